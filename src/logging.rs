//! Logging init: human output on stderr plus an append-only file under the
//! user data dir. Falls back to stderr alone when the file cannot be opened.
//! Automated runs also keep a short log of warnings, errors and per-account
//! summaries.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::error::SnapError;

pub const LOG_FILE_NAME: &str = "snapgrab.log";
pub const AUTOMATED_LOG_FILE_NAME: &str = "snapgrab-automated.log";
/// Target of the per-account summary lines.
pub const SUMMARY_TARGET: &str = "snapgrab::summary";
const AUTOMATED_FILTER: &str = "warn,snapgrab::summary=info";

#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Only warnings and errors on stderr.
    pub quiet: bool,
    /// No colors, for cron jobs and pipes. Also writes the automated log.
    pub automated: bool,
}

enum FileOrStderr {
    File(fs::File),
    Stderr,
}

impl io::Write for FileOrStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileOrStderr::File(f) => f.write(buf),
            FileOrStderr::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileOrStderr::File(f) => f.flush(),
            FileOrStderr::Stderr => io::stderr().lock().flush(),
        }
    }
}

struct FileMakeWriter(fs::File);

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileOrStderr;

    fn make_writer(&'a self) -> Self::Writer {
        self.0
            .try_clone()
            .map(FileOrStderr::File)
            .unwrap_or(FileOrStderr::Stderr)
    }
}

pub fn log_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.data_local_dir().join("snapgrab"))
}

fn open_append(path: &Path) -> Result<fs::File, SnapError> {
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| SnapError::Logging(err.to_string()))
}

fn automated_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(writer)
        .with_filter(EnvFilter::new(AUTOMATED_FILTER))
}

fn stderr_filter(options: LogOptions) -> EnvFilter {
    let default = if options.quiet { "warn" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Installs the stderr and file layers. Returns the log file path.
pub fn init_logging(options: LogOptions) -> Result<PathBuf, SnapError> {
    let dir = log_dir()
        .ok_or_else(|| SnapError::Logging("unable to resolve data directory".to_string()))?;
    fs::create_dir_all(&dir).map_err(|err| SnapError::Logging(err.to_string()))?;
    let log_file_path = dir.join(LOG_FILE_NAME);
    let file = open_append(&log_file_path)?;
    let automated = if options.automated {
        let file = open_append(&dir.join(AUTOMATED_LOG_FILE_NAME))?;
        Some(automated_layer(FileMakeWriter(file)))
    } else {
        None
    };

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(io::stderr)
        .with_ansi(!options.automated)
        .with_filter(stderr_filter(options));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(FileMakeWriter(file))
        .with_filter(EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(automated)
        .try_init()
        .map_err(|err| SnapError::Logging(err.to_string()))?;

    tracing::debug!("logging to {}", log_file_path.display());
    Ok(log_file_path)
}

/// Stderr-only logging, used when [`init_logging`] fails.
pub fn init_logging_stderr(options: LogOptions) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(stderr_filter(options))
        .with_target(false)
        .with_writer(io::stderr)
        .with_ansi(!options.automated)
        .try_init();
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn automated_log_keeps_summaries_and_problems() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber =
            tracing_subscriber::registry().with(automated_layer(move || writer.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("downloading new snap");
            tracing::debug!("retrying once");
            tracing::info!(target: SUMMARY_TARGET, "[✔] 3 stories downloaded for abc");
            tracing::warn!("feed attempt for abc failed");
            tracing::error!("abc is not a valid user");
        });

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3, "{text}");
        assert!(lines[0].contains("3 stories downloaded"));
        assert!(lines[1].contains("WARN"));
        assert!(lines[2].contains("not a valid user"));
        assert!(!text.contains("downloading new snap"));
    }
}
