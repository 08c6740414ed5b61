//! Observability: structured logging and Prometheus metrics.

mod logging;
mod metrics;

pub use logging::{LogFormat, LoggingConfig};
pub use metrics::{MetricsConfig, MetricsHandle, install_prometheus};

use crate::config::ObservabilitySettings;
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry, fmt};

/// Full observability configuration.
#[derive(Debug)]
pub struct ObservabilityConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
    /// Whether to expose metrics via HTTP listener.
    pub metrics_expose: bool,
}

/// Handle for observability runtime components.
#[derive(Debug)]
pub struct ObservabilityHandle {
    metrics: Option<MetricsHandle>,
}

impl ObservabilityHandle {
    /// Returns the metrics handle if a recorder was installed.
    #[must_use]
    pub const fn metrics(&self) -> Option<&MetricsHandle> {
        self.metrics.as_ref()
    }
}

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Initializes observability using environment variables.
///
/// # Errors
///
/// Returns an error if observability has already been initialized or if any
/// component fails to initialize.
pub fn init_from_env(metrics_expose: bool) -> Result<ObservabilityHandle> {
    init(ObservabilityConfig {
        logging: LoggingConfig::from_env(),
        metrics: MetricsConfig::from_env(),
        metrics_expose,
    })
}

/// Initializes observability from config settings with env overrides.
///
/// # Errors
///
/// Returns an error if observability has already been initialized or if any
/// component fails to initialize.
pub fn init_from_config(settings: &ObservabilitySettings) -> Result<ObservabilityHandle> {
    init(ObservabilityConfig {
        logging: LoggingConfig::from_settings(settings.logging.as_ref()),
        metrics: MetricsConfig::from_settings(settings.metrics.as_ref()),
        metrics_expose: settings.metrics_expose.unwrap_or(false),
    })
}

/// Installs the global subscriber and metrics recorder for the process.
///
/// # Errors
///
/// Returns an error if observability has already been initialized or if any
/// component fails to initialize.
pub fn init(config: ObservabilityConfig) -> Result<ObservabilityHandle> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: "observability already initialized".to_string(),
        });
    }

    let metrics = install_prometheus(&config.metrics, config.metrics_expose)?;

    let file = config.logging.file.as_deref().map(LogFile::open).transpose()?;
    let to_file = file.is_some();
    let writer = file.map_or_else(|| BoxMakeWriter::new(io::stderr), BoxMakeWriter::new);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(true)
            .with_target(true)
            .with_thread_names(true)
            .boxed(),
        LogFormat::Pretty if to_file => fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .boxed(),
    };
    tracing_subscriber::registry()
        .with(layer)
        .with(config.logging.filter)
        .try_init()
        .map_err(|e| Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: format!("global subscriber: {e}"),
        })?;

    OBSERVABILITY_INIT
        .set(())
        .map_err(|()| Error::OperationFailed {
            operation: "observability_init".to_string(),
            cause: "failed to mark observability initialized".to_string(),
        })?;

    Ok(ObservabilityHandle { metrics })
}

/// Append-only log file shared by every writer the subscriber hands out.
#[derive(Debug, Clone)]
struct LogFile {
    file: Arc<Mutex<File>>,
}

impl LogFile {
    /// Opens `path` for appending, creating missing parent directories.
    ///
    /// `LINGSHU_LOG_FILE` and `[observability.logging] file` both land here.
    fn open(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Err(Error::InvalidInput(format!(
                "log file {} is a directory",
                path.display()
            )));
        }
        let failed = |e: io::Error| Error::OperationFailed {
            operation: "open_log_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(failed)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(failed)?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    fn file(&self) -> std::sync::MutexGuard<'_, File> {
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file().flush()
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggingSettings;

    #[test]
    fn test_configured_log_file_is_created_and_appended() {
        let Some(dir) = tempfile::tempdir().ok() else {
            return;
        };
        let path = dir.path().join("nested").join("lingshu.log");
        let settings = LoggingSettings {
            format: None,
            filter: None,
            file: Some(path.clone()),
        };
        let config = LoggingConfig::from_settings(Some(&settings));
        if std::env::var("LINGSHU_LOG_FILE").is_ok() {
            return;
        }
        let configured = config.file.unwrap_or_default();

        for line in ["first\n", "second\n"] {
            let mut writer = LogFile::open(&configured).unwrap_or_else(|_| unreachable!());
            assert!(writer.write_all(line.as_bytes()).is_ok());
            assert!(writer.flush().is_ok());
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap_or_default(), "first\nsecond\n");
    }

    #[test]
    fn test_directory_log_path_is_rejected() {
        let Some(dir) = tempfile::tempdir().ok() else {
            return;
        };
        assert!(matches!(LogFile::open(dir.path()), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_writers_share_one_handle() {
        let Some(dir) = tempfile::tempdir().ok() else {
            return;
        };
        let path = dir.path().join("shared.log");
        let log = LogFile::open(&path).unwrap_or_else(|_| unreachable!());
        let mut a = log.make_writer();
        let mut b = log.make_writer();
        assert!(a.write_all(b"a").is_ok());
        assert!(b.write_all(b"b").is_ok());
        assert!(Arc::ptr_eq(&a.file, &b.file));
        assert_eq!(std::fs::read_to_string(&path).unwrap_or_default(), "ab");
    }
}
