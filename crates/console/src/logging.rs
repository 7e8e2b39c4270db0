//! File logging for the console.
//!
//! Everything goes to `<data_dir>/logs/saltdock.log` so stdout and stderr
//! stay reserved for command output and operator-facing errors. The filter
//! comes from `SALTDOCK_LOG_FILTER`, then `RUST_LOG`; the format from
//! `SALTDOCK_LOG_FORMAT` (`json` or `pretty`).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::log_dir;

const DEFAULT_FILTER: &str = "info,tungstenite=warn,reqwest=warn";
const LOG_FILE: &str = "saltdock.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format {other:?}")),
        }
    }
}

/// Where and how the console logs, resolved before the subscriber exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub filter: String,
    pub format: LogFormat,
}

impl LogSettings {
    /// Resolve from explicit values; `None` falls back to the defaults.
    /// Unknown formats fall back to json.
    pub fn resolve(data_dir: &Path, filter: Option<String>, format: Option<&str>) -> Self {
        Self {
            dir: log_dir(data_dir),
            filter: filter
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            format: format
                .and_then(|f| f.parse().ok())
                .unwrap_or(LogFormat::Json),
        }
    }

    pub fn from_env(data_dir: &Path) -> Self {
        let filter = std::env::var("SALTDOCK_LOG_FILTER")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok();
        let format = std::env::var("SALTDOCK_LOG_FORMAT").ok();
        Self::resolve(data_dir, filter, format.as_deref())
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }
}

/// Keeps the non-blocking writer alive; drop it last.
pub struct LoggingHandle {
    pub run_id: String,
    pub log_path: PathBuf,
    _guard: WorkerGuard,
}

pub fn init_logging(data_dir: &Path) -> anyhow::Result<LoggingHandle> {
    let settings = LogSettings::from_env(data_dir);
    std::fs::create_dir_all(&settings.dir)?;

    let filter = EnvFilter::try_new(&settings.filter)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let appender = tracing_appender::rolling::never(&settings.dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let registry = tracing_subscriber::registry().with(filter);
    match settings.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_current_span(true),
            )
            .try_init()?,
    }

    let run_id = format!("run-{}", uuid::Uuid::new_v4());
    let log_path = settings.log_path();
    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        run_id = %run_id,
        log_path = %log_path.display(),
        format = ?settings.format,
        filter = %settings.filter,
    );

    Ok(LoggingHandle {
        run_id,
        log_path,
        _guard: guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_json_under_data_dir() {
        let settings = LogSettings::resolve(Path::new("/srv/saltdock"), None, None);
        assert_eq!(settings.dir, Path::new("/srv/saltdock/logs"));
        assert_eq!(settings.log_path(), Path::new("/srv/saltdock/logs/saltdock.log"));
        assert_eq!(settings.filter, DEFAULT_FILTER);
        assert_eq!(settings.format, LogFormat::Json);
    }

    #[test]
    fn explicit_filter_and_format_win() {
        let settings = LogSettings::resolve(
            Path::new("/tmp/sd"),
            Some("saltdock=debug".into()),
            Some(" Pretty "),
        );
        assert_eq!(settings.filter, "saltdock=debug");
        assert_eq!(settings.format, LogFormat::Pretty);
    }

    #[test]
    fn blank_filter_and_unknown_format_fall_back() {
        let settings = LogSettings::resolve(Path::new("/tmp/sd"), Some("  ".into()), Some("xml"));
        assert_eq!(settings.filter, DEFAULT_FILTER);
        assert_eq!(settings.format, LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
