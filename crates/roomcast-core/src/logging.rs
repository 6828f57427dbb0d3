//! `tracing` subscriber setup.
//!
//! All crates log through `tracing` macros with structured fields. The binary
//! calls [`init_subscriber`] once at startup; `RUST_LOG` takes precedence over
//! the configured level when set. Output always goes to stderr and, when a
//! log file is configured, is appended to that file as well.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;

/// Output format for the log layers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human-readable output.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

/// Initialize the global tracing subscriber.
///
/// Composes a stderr `fmt` layer with an optional file layer on a shared
/// [`tracing_subscriber::Registry`]. Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Default filter directive, e.g. `"info"` or `"roomcast_server=debug"`.
/// * `format` - Compact text or JSON lines, used by both layers.
/// * `file` - Log file to append to. Parent directories are created.
pub fn init_subscriber(level: &str, format: LogFormat, file: Option<&Path>) -> std::io::Result<()> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let log_file = file.map(open_log_file).transpose()?;

    // try_init fails if a global subscriber already exists
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(std::io::stderr, format, true))
        .with(log_file.map(|f| fmt_layer(Mutex::new(f), format, false)))
        .try_init();
    Ok(())
}

/// Open `path` for appending, creating it and its parent directories.
pub fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// A boxed `fmt` layer writing to `writer` in `format`.
pub fn fmt_layer<S, W>(writer: W, format: LogFormat, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(writer);
    match format {
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}
