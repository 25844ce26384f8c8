//! Logging setup — console output plus an optional JSON log file.
//!
//! The subscriber is built from an explicit [`LoggingConfig`] and handed
//! back to the caller; nothing here touches global state. `main`
//! installs it once, tests scope it with `with_default`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const DEFAULT_FILTER: &str = "app_poller=info";

type Base = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Base> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: String,
    /// Render console output as JSON instead of human-readable lines.
    pub json: bool,
    /// Also append JSON events to this file.
    pub json_file: Option<PathBuf>,
    /// Include thread ids/names in console output.
    pub thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
            json_file: None,
            thread_info: false,
        }
    }
}

/// Build the subscriber described by `config`.
///
/// The returned guard flushes the file writer on drop; keep it alive for
/// as long as events should reach the file.
pub fn build_subscriber(
    config: &LoggingConfig,
) -> Result<(impl Subscriber + Send + Sync, Option<WorkerGuard>)> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(&config.filter)
            .with_context(|| format!("Invalid log filter '{}'", config.filter))?,
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console: BoxedLayer = if config.json {
        fmt::layer()
            .json()
            .with_target(false)
            .with_thread_ids(config.thread_info)
            .with_thread_names(config.thread_info)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(config.thread_info)
            .with_thread_names(config.thread_info)
            .boxed()
    };
    layers.push(console);

    let mut guard = None;
    if let Some(path) = &config.json_file {
        let (dir, file_name) = split_log_path(path)?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

        let appender = tracing_appender::rolling::never(&dir, file_name);
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);

        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
    }

    let subscriber = Registry::default().with(filter).with(layers);
    Ok((subscriber, guard))
}

fn split_log_path(path: &Path) -> Result<(PathBuf, &std::ffi::OsStr)> {
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path {} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name))
}
