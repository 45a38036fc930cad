//! Shared logging configuration and initialization.

use std::env;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{parse_bool, RunConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var("CHURN_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Ok(format) = env::var("CHURN_LOG_FORMAT") {
        if let Some(parsed) = parse_log_format(&format) {
            config.format = parsed;
        }
    }

    if let Ok(include_target) = env::var("CHURN_LOG_TARGET") {
        if let Some(parsed) = parse_bool(&include_target) {
            config.include_target = parsed;
        }
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(logging: &LoggingConfig, run: &RunConfig) {
    info!(
        component = "churn_dataset",
        event = "app.start",
        log_level = %logging.level,
        log_format = ?logging.format,
        data_root = %run.data_root.display(),
        preset = run.pipeline.preset.as_str(),
        block_count = run.pipeline.blocks.len()
    );
}

/// Unparseable directives fall back to plain `info`.
fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_env_vars<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let previous: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, _)| ((*key).to_string(), env::var(key).ok()))
            .collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let output = f();

        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        output
    }

    #[test]
    fn per_module_directives_survive_env_parsing() {
        let cfg = with_env_vars(
            &[
                (
                    "CHURN_LOG_LEVEL",
                    Some(" churn_features::blocks=debug,churn_features::source=warn "),
                ),
                ("CHURN_LOG_FORMAT", Some(" Pretty ")),
                ("CHURN_LOG_TARGET", Some("0")),
            ],
            logging_config_from_env,
        );

        assert_eq!(
            cfg.level,
            "churn_features::blocks=debug,churn_features::source=warn"
        );
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert!(!cfg.include_target);
        let filter = env_filter(&cfg).to_string();
        assert!(filter.contains("churn_features::blocks=debug"));
        assert!(filter.contains("churn_features::source=warn"));
    }

    #[test]
    fn json_format_alone_keeps_level_and_target_defaults() {
        let cfg = with_env_vars(
            &[
                ("CHURN_LOG_LEVEL", None),
                ("CHURN_LOG_FORMAT", Some("json")),
                ("CHURN_LOG_TARGET", Some("")),
            ],
            logging_config_from_env,
        );

        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(cfg.include_target);
    }

    #[test]
    fn malformed_level_directive_falls_back_to_info() {
        let cfg = LoggingConfig {
            level: "churn_features=loud".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(env_filter(&cfg).to_string(), "info");
    }

    #[test]
    fn log_format_names_are_case_insensitive() {
        for (raw, expected) in [
            ("JSON", Some(LogFormat::Json)),
            ("pretty", Some(LogFormat::Pretty)),
            ("  json\n", Some(LogFormat::Json)),
            ("compact", None),
            ("", None),
        ] {
            assert_eq!(parse_log_format(raw), expected, "format {raw:?}");
        }
    }
}
