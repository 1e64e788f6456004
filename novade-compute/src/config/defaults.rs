//! Default configuration values.
//!
//! Used by `serde`'s `default` attribute when a key or section is missing.

use super::{ImageConfig, InstanceConfig, LoggingConfig, ShaderConfig};

pub(super) fn default_instance_config() -> InstanceConfig {
    InstanceConfig {
        application_name: default_application_name(),
        enable_validation: default_bool_false(),
    }
}

/// Returns the default application name reported to the driver.
pub(super) fn default_application_name() -> String {
    "novade-compute".to_string()
}

pub(super) fn default_bool_false() -> bool {
    false
}

pub(super) fn default_image_config() -> ImageConfig {
    ImageConfig {
        width: default_image_dimension(),
        height: default_image_dimension(),
    }
}

/// Returns the default image width and height (`8`).
pub(super) fn default_image_dimension() -> u32 {
    8
}

pub(super) fn default_shader_config() -> ShaderConfig {
    ShaderConfig {
        path: None,
        entry_point: default_entry_point(),
    }
}

pub(super) fn default_entry_point() -> String {
    "main".to_string()
}

pub(super) fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        format: default_log_format(),
    }
}

/// Returns the default log level string (`"info"`).
pub(super) fn default_log_level() -> String {
    "info".to_string()
}

/// Returns the default log format string (`"text"`).
pub(super) fn default_log_format() -> String {
    "text".to_string()
}
