//! Executor configuration.
//!
//! Configuration is read from a TOML file. Every section and key is optional;
//! missing values fall back to the functions in [`defaults`]. Unknown keys are
//! rejected so typos surface as errors instead of silently using defaults.
//!
//! ```toml
//! [instance]
//! application_name = "novade-compute"
//! enable_validation = false
//!
//! [image]
//! width = 8
//! height = 8
//!
//! [shader]
//! path = "imagetest.comp.spv"
//! entry_point = "main"
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```

mod defaults;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

/// Environment variable that overrides the configuration file path.
pub const CONFIG_PATH_ENV: &str = "NOVADE_COMPUTE_CONFIG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    #[serde(default = "defaults::default_instance_config")]
    pub instance: InstanceConfig,
    #[serde(default = "defaults::default_image_config")]
    pub image: ImageConfig,
    #[serde(default = "defaults::default_shader_config")]
    pub shader: ShaderConfig,
    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            instance: defaults::default_instance_config(),
            image: defaults::default_image_config(),
            shader: defaults::default_shader_config(),
            logging: defaults::default_logging_config(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    #[serde(default = "defaults::default_application_name")]
    pub application_name: String,
    /// Enables `VK_LAYER_KHRONOS_validation` and routes its messages to `tracing`.
    #[serde(default = "defaults::default_bool_false")]
    pub enable_validation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageConfig {
    #[serde(default = "defaults::default_image_dimension")]
    pub width: u32,
    #[serde(default = "defaults::default_image_dimension")]
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShaderConfig {
    /// Precompiled SPIR-V file. The built-in fill program is used when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "defaults::default_entry_point")]
    pub entry_point: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    #[serde(default = "defaults::default_log_level")]
    pub level: String,
    /// `text` or `json`.
    #[serde(default = "defaults::default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        defaults::default_logging_config()
    }
}

impl ExecutorConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: ExecutorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Normalizes log settings and rejects unusable values.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.image.width == 0 || self.image.height == 0 {
            return Err(ConfigError::ValidationError(format!(
                "image dimensions must be positive, got {}x{}",
                self.image.width, self.image.height
            )));
        }
        if self.shader.entry_point.trim().is_empty() {
            return Err(ConfigError::ValidationError("shader entry_point must not be empty".into()));
        }
        if self.instance.application_name.contains('\0') {
            return Err(ConfigError::ValidationError(
                "application_name must not contain NUL bytes".into(),
            ));
        }

        self.logging.level = self.logging.level.to_lowercase();
        if !matches!(self.logging.level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            return Err(ConfigError::ValidationError(format!(
                "invalid log level '{}'",
                self.logging.level
            )));
        }
        self.logging.format = self.logging.format.to_lowercase();
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "invalid log format '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }
}

/// Locates, reads and validates [`ExecutorConfig`].
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the configuration.
    ///
    /// An explicit `path` wins; `NOVADE_COMPUTE_CONFIG` is the fallback.
    /// With neither, validated defaults are returned. A named file that
    /// cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<ExecutorConfig, ConfigError> {
        let env_path = env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        match path.or(env_path.as_deref()) {
            Some(path) => Self::load_file(path),
            None => {
                debug!("No configuration file given; using defaults");
                let mut config = ExecutorConfig::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn load_file(path: &Path) -> Result<ExecutorConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded configuration from {:?}", path);
        ExecutorConfig::from_toml_str(&content)
    }
}
