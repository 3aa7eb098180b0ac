//! Subscriber setup for the trainer binary.
//!
//! Logs go to stderr and, when `log_file` is configured, to a buffered file
//! as well. The returned [`LoggingGuard`] flushes that file when dropped, so
//! `main` keeps it alive for the whole run.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Shared handle to the buffered log file; every event locks it once.
#[derive(Clone)]
struct SharedFile(Arc<Mutex<BufWriter<File>>>);

impl SharedFile {
    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, BufWriter<File>>> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))
    }
}

impl Write for SharedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

/// Flushes the log file on drop.
#[must_use = "dropping the guard flushes and detaches the log file"]
pub struct LoggingGuard {
    file: Option<SharedFile>,
}

impl LoggingGuard {
    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }
}

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.flush() {
                eprintln!("Failed to flush log file: {e}");
            }
        }
    }
}

fn open_log_file(path: &Path) -> anyhow::Result<SharedFile> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    Ok(SharedFile(Arc::new(Mutex::new(BufWriter::new(file)))))
}

/// Install the global subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`.
pub fn init_logging(log_file: Option<&Path>) -> anyhow::Result<LoggingGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file = log_file.map(open_log_file).transpose()?;

    let file_layer = file.clone().map(|shared| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(move || shared.clone())
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if let Some(path) = log_file {
        tracing::info!(path = %path.display(), "Logging to file");
    }
    Ok(LoggingGuard { file })
}
