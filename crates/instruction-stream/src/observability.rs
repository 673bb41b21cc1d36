//! Tracing subscriber setup for binaries that drive a [`StreamController`].
//!
//! The library itself only emits `tracing` events; nothing is installed
//! until a binary calls [`init_observability`] and keeps the returned
//! [`LogGuard`] alive.
//!
//! [`StreamController`]: crate::StreamController

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use crate::errors::StreamError;

const ENABLED_ENV: &str = "INSTRUCTION_STREAM_OBSERVABILITY";
const LOG_LEVEL_ENV: &str = "INSTRUCTION_STREAM_LOG_LEVEL";
const JSON_LOG_PATH_ENV: &str = "INSTRUCTION_STREAM_JSON_LOG_PATH";

/// Filter used when neither `INSTRUCTION_STREAM_LOG_LEVEL` nor `RUST_LOG`
/// is set.
pub const DEFAULT_FILTER: &str = "instruction_stream=info";

/// Where and how much to log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// `EnvFilter` directives.
    pub filter: String,
    /// JSONL output file. `None` logs compactly to stderr.
    pub json_log_path: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: DEFAULT_FILTER.to_string(),
            json_log_path: None,
        }
    }
}

impl LogSettings {
    /// Reads settings from the process environment.
    ///
    /// - `INSTRUCTION_STREAM_OBSERVABILITY`: on/off flag (default on).
    /// - `INSTRUCTION_STREAM_LOG_LEVEL`, then `RUST_LOG`: filter directives.
    /// - `INSTRUCTION_STREAM_JSON_LOG_PATH`: JSONL output file.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            enabled: non_blank(ENABLED_ENV)
                .and_then(|value| parse_flag(&value))
                .unwrap_or(true),
            filter: non_blank(LOG_LEVEL_ENV)
                .or_else(|| non_blank("RUST_LOG"))
                .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            json_log_path: non_blank(JSON_LOG_PATH_ENV).map(PathBuf::from),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Flushes the JSONL writer when dropped. Hold it for the life of the
/// process.
#[derive(Default)]
pub struct LogGuard {
    _worker: Option<WorkerGuard>,
}

/// Installs the global subscriber described by `settings`.
///
/// Returns an empty guard when logging is disabled or another subscriber
/// is already installed. Fails on invalid filter directives or when the
/// JSONL file cannot be created.
pub fn init_observability(settings: &LogSettings) -> Result<LogGuard, StreamError> {
    if !settings.enabled {
        return Ok(LogGuard::default());
    }

    let filter = EnvFilter::try_new(&settings.filter).map_err(|e| {
        StreamError::Config(format!("invalid log filter {:?}: {e}", settings.filter))
    })?;

    let (json_layer, worker) = match &settings.json_log_path {
        Some(path) => {
            let (writer, guard) = json_writer(path)?;
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    let console_layer = json_layer.is_none().then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(console_layer)
        .try_init();
    if installed.is_err() {
        tracing::debug!("a tracing subscriber is already installed; keeping it");
        return Ok(LogGuard::default());
    }
    Ok(LogGuard { _worker: worker })
}

fn json_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard), StreamError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            StreamError::Config(format!("log path {} has no file name", path.display()))
        })?;
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| {
        StreamError::Config(format!("cannot create log directory {}: {e}", dir.display()))
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| StreamError::Config(format!("cannot open log file {}: {e}", path.display())))?;
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> LogSettings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LogSettings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_to_crate_info_filter() {
        assert_eq!(settings_from(&[]), LogSettings::default());
        assert_eq!(LogSettings::default().filter, "instruction_stream=info");
    }

    #[test]
    fn crate_level_wins_over_rust_log() {
        let settings = settings_from(&[(LOG_LEVEL_ENV, "debug"), ("RUST_LOG", "warn")]);
        assert_eq!(settings.filter, "debug");

        let settings = settings_from(&[(LOG_LEVEL_ENV, "  "), ("RUST_LOG", "warn")]);
        assert_eq!(settings.filter, "warn");
    }

    #[test]
    fn flag_and_path_are_read() {
        let settings = settings_from(&[
            (ENABLED_ENV, "Off"),
            (JSON_LOG_PATH_ENV, "logs/stream.jsonl"),
        ]);
        assert!(!settings.enabled);
        assert_eq!(
            settings.json_log_path,
            Some(PathBuf::from("logs/stream.jsonl"))
        );
        assert!(settings_from(&[(ENABLED_ENV, "maybe")]).enabled);
    }

    #[test]
    fn invalid_filter_is_a_config_error() {
        let settings = LogSettings {
            filter: "instruction_stream=loud".into(),
            ..LogSettings::default()
        };
        assert!(matches!(
            init_observability(&settings),
            Err(StreamError::Config(msg)) if msg.contains("invalid log filter")
        ));
    }

    #[test]
    fn disabled_settings_install_nothing() {
        let settings = LogSettings {
            enabled: false,
            filter: "instruction_stream=loud".into(),
            json_log_path: None,
        };
        assert!(init_observability(&settings).is_ok());
    }

    #[test]
    fn json_writer_creates_the_log_directory() {
        let root = std::env::temp_dir().join(format!(
            "instruction-stream-logs-{}",
            std::process::id()
        ));
        let path = root.join("nested").join("stream.jsonl");

        let (_writer, guard) = json_writer(&path).expect("writer");
        drop(guard);

        assert!(root.join("nested").is_dir());
        std::fs::remove_dir_all(&root).expect("cleanup");
    }
}
