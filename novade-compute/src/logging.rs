//! Logging setup on top of `tracing-subscriber`.

use std::io::stdout;

use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Initializes a minimal logging setup, directing messages to `stderr`.
///
/// Intended for tests and for startup before the configuration is loaded.
/// Filters by `RUST_LOG`, defaulting to `info`. Errors (e.g. a subscriber is
/// already installed) are ignored.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}

/// Maps a config level string onto a `tracing` level.
pub fn parse_level(level: &str) -> Result<Level, ConfigError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        invalid_level => Err(ConfigError::LoggingInitialization(format!(
            "Invalid log level in config: {}",
            invalid_level
        ))),
    }
}

/// Builds the filter for `level` and optional `RUST_LOG`-style `directives`.
///
/// Valid directives replace the configured level; invalid ones are skipped.
/// With no valid directive, `level` applies to every target.
pub fn build_filter(level: Level, directives: Option<&str>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .parse_lossy(directives.unwrap_or_default())
}

/// Installs the global subscriber described by `config`.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let level = parse_level(&config.level)?;
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(level, directives.as_deref());

    let stdout_layer = match config.format.to_lowercase().as_str() {
        "json" => fmt::layer()
            .json()
            .with_writer(stdout)
            .with_ansi(false)
            .with_filter(filter)
            .boxed(),
        "text" => fmt::layer()
            .with_writer(stdout)
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_filter(filter)
            .boxed(),
        other => {
            return Err(ConfigError::LoggingInitialization(format!(
                "Invalid log format in config: {}",
                other
            )))
        }
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .try_init()
        .map_err(|e| ConfigError::LoggingInitialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("trace", Level::TRACE)]
    #[case("DEBUG", Level::DEBUG)]
    #[case("Info", Level::INFO)]
    #[case("warn", Level::WARN)]
    #[case("error", Level::ERROR)]
    fn levels_parse_case_insensitively(#[case] input: &str, #[case] expected: Level) {
        assert_eq!(parse_level(input).unwrap(), expected);
    }

    #[test]
    fn unknown_level_is_rejected() {
        assert!(matches!(
            parse_level("verbose"),
            Err(ConfigError::LoggingInitialization(msg)) if msg.contains("verbose")
        ));
    }

    #[test]
    fn configured_level_applies_without_directives() {
        assert_eq!(build_filter(Level::WARN, None).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(build_filter(Level::DEBUG, Some("")).max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[rstest]
    #[case("novade_compute=trace", LevelFilter::TRACE)]
    #[case("error", LevelFilter::ERROR)]
    #[case("novade_compute=loud,debug", LevelFilter::DEBUG)]
    fn directives_replace_configured_level(#[case] directives: &str, #[case] expected: LevelFilter) {
        assert_eq!(build_filter(Level::WARN, Some(directives)).max_level_hint(), Some(expected));
    }

    #[test]
    fn invalid_directives_fall_back_to_configured_level() {
        let filter = build_filter(Level::WARN, Some("novade_compute=loud"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn unknown_format_is_rejected_before_install() {
        let config = LoggingConfig {
            level: "info".into(),
            format: "xml".into(),
        };
        assert!(init_logging(&config).is_err());
    }
}
