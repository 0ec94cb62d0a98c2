//! Tracing initialization
//!
//! Sets up a `tracing-subscriber` registry with an `EnvFilter`, a console
//! layer on stderr (human-readable or JSON) and an optional rolling JSON log
//! file. Stdout is left to command output.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LogRotation;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,astro=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive could not be parsed
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter {
        /// The rejected directive
        filter: String,
        /// Parser message
        message: String,
    },

    /// The log file location could not be prepared
    #[error("log file {}: {message}", path.display())]
    LogFile {
        /// Configured log file
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded on the startup event
    pub service_name: String,
    /// Emit JSON lines instead of human-readable output on the console
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Also write JSON lines to this file
    pub file: Option<PathBuf>,
    /// Rotation period for `file`
    pub rotation: LogRotation,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "astro".to_string(),
            json: false,
            default_filter: DEFAULT_FILTER.to_string(),
            file: None,
            rotation: LogRotation::default(),
        }
    }
}

/// Keeps the background log file writer alive; drop it last
#[must_use = "dropping the guard stops the log file writer"]
#[derive(Debug, Default)]
pub struct TelemetryGuard {
    _file: Option<WorkerGuard>,
}

/// Build the env filter, preferring `RUST_LOG` over the configured default
fn build_filter(default_filter: &str) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_filter).map_err(|e| TelemetryError::InvalidFilter {
            filter: default_filter.to_string(),
            message: e.to_string(),
        }),
    }
}

/// Console formatting layer writing to `writer`
fn console_layer<S, W>(json: bool, writer: W) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_writer(writer)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(writer)
            .boxed()
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Open a rolling appender for `path`; rotated files are `<name>.<period>`
fn open_log_file(path: &Path, rotation: LogRotation) -> Result<RollingFileAppender, TelemetryError> {
    let log_file_error = |message: String| TelemetryError::LogFile {
        path: path.to_path_buf(),
        message,
    };
    let prefix = path
        .file_name()
        .ok_or_else(|| log_file_error("path has no file name".to_string()))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| log_file_error(e.to_string()))?;
    Ok(RollingFileAppender::new(rotation.into(), dir, prefix))
}

/// Initialize the global tracing subscriber
///
/// Returns an error instead of panicking when a subscriber is already set.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = build_filter(&config.default_filter)?;

    let (file_layer, file_guard) = match &config.file {
        Some(path) => {
            let appender = open_log_file(path, config.rotation)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer(config.json, std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })?;

    tracing::debug!(
        service = %config.service_name,
        file = ?config.file,
        "telemetry initialized"
    );
    Ok(TelemetryGuard { _file: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn emit_through_console(json: bool) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber =
            tracing_subscriber::registry().with(console_layer(json, move || writer.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(app_id = 7, "application created");
        });
        captured.contents()
    }

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "astro");
        assert!(!config.json);
        assert_eq!(config.default_filter, DEFAULT_FILTER);
        assert!(config.file.is_none());
        assert_eq!(config.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_invalid_default_filter_is_rejected() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let err = build_filter("astro=notalevel").unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidFilter { .. }));
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_json_console_uses_the_given_writer() {
        let out = emit_through_console(true);
        let line: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(line["fields"]["message"], "application created");
        assert_eq!(line["fields"]["app_id"], 7);
    }

    #[test]
    fn test_text_console_uses_the_given_writer() {
        let out = emit_through_console(false);
        assert!(out.contains("application created"));
        assert!(out.contains("INFO"));
    }

    #[test]
    fn test_log_file_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/astro.log");

        let mut appender = open_log_file(&path, LogRotation::Never).unwrap();
        writeln!(appender, "{{\"msg\":\"hello\"}}").unwrap();
        appender.flush().unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("hello"));
    }

    #[test]
    fn test_rotated_log_file_gets_a_period_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("astro.log");

        let mut appender = open_log_file(&path, LogRotation::Daily).unwrap();
        writeln!(appender, "line").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("astro.log."));
    }

    #[test]
    fn test_log_file_without_name_is_rejected() {
        let err = open_log_file(Path::new("/"), LogRotation::Never).unwrap_err();
        assert!(matches!(err, TelemetryError::LogFile { .. }));
    }
}
