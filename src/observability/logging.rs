//! Structured logging configuration.

use crate::config::LoggingSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Event filter.
    pub filter: EnvFilter,
    /// Append log lines to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_settings(None)
    }

    /// Builds logging configuration from config settings with env overrides.
    ///
    /// The filter comes from `LINGSHU_LOG`, then `RUST_LOG`, then the
    /// configured filter, then `info`. `LINGSHU_LOG_FORMAT` and
    /// `LINGSHU_LOG_FILE` override the format and the log file.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>) -> Self {
        let mut format = settings
            .and_then(|s| s.format.as_deref())
            .and_then(LogFormat::parse)
            .unwrap_or_default();
        if let Ok(v) = std::env::var("LINGSHU_LOG_FORMAT")
            && let Some(parsed) = LogFormat::parse(&v)
        {
            format = parsed;
        }

        let mut file = settings.and_then(|s| s.file.clone());
        if let Ok(v) = std::env::var("LINGSHU_LOG_FILE")
            && !v.trim().is_empty()
        {
            file = Some(PathBuf::from(v));
        }

        let directive = std::env::var("LINGSHU_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok()
            .or_else(|| settings.and_then(|s| s.filter.clone()))
            .unwrap_or_else(|| "info".to_string());
        let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

        Self {
            format,
            filter,
            file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(" pretty "), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_settings_pick_format_and_file() {
        let settings = LoggingSettings {
            format: Some("json".to_string()),
            filter: Some("lingshu=debug".to_string()),
            file: Some(PathBuf::from("/tmp/lingshu.log")),
        };
        let config = LoggingConfig::from_settings(Some(&settings));
        if std::env::var("LINGSHU_LOG_FORMAT").is_err() {
            assert_eq!(config.format, LogFormat::Json);
        }
        if std::env::var("LINGSHU_LOG_FILE").is_err() {
            assert_eq!(config.file, Some(PathBuf::from("/tmp/lingshu.log")));
        }
    }
}
