//! Structured logging infrastructure.
//!
//! Console and file output go through `tracing-subscriber` in the configured
//! format. When a Seq endpoint is configured, events are also shipped to it in
//! CLEF batches by a background task.

mod seq;

pub use seq::{SeqHandle, SeqLayer};

use crate::config::{LogFormat, LogLevel, LoggingConfig};
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Error type for logging operations
#[derive(Debug)]
pub enum LogError {
    /// IO error occurred
    IoError(std::io::Error),

    /// Error in subscriber setup
    SubscriberError(Box<dyn std::error::Error + Send + Sync>),

    /// General error
    Other(String),
}

impl From<std::io::Error> for LogError {
    fn from(err: std::io::Error) -> Self {
        LogError::IoError(err)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for LogError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        LogError::SubscriberError(err)
    }
}

impl std::fmt::Display for LogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogError::IoError(e) => write!(f, "IO error: {}", e),
            LogError::SubscriberError(e) => write!(f, "Subscriber error: {}", e),
            LogError::Other(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for LogError {}

/// Result type for logging operations
pub type Result<T> = std::result::Result<T, LogError>;

/// Keeps background log writers alive. Flush before the process exits.
#[derive(Debug, Default)]
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
    seq: Option<SeqHandle>,
}

impl LogGuard {
    /// Whether events are being shipped to Seq.
    pub fn ships_to_seq(&self) -> bool {
        self.seq.is_some()
    }

    /// Push any buffered Seq events to the server.
    pub async fn flush(&self) {
        if let Some(seq) = &self.seq {
            seq.flush().await;
        }
    }
}

/// Initialize the logging system with the given configuration.
///
/// `seq_url` enables shipping to Seq when non-empty; it requires a running
/// tokio runtime. Initializing twice keeps the first subscriber.
pub fn init(config: &LoggingConfig, seq_url: Option<&str>) -> Result<LogGuard> {
    let level = log_level_to_level(config.level);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let mut guard = LogGuard::default();

    let writer = match &config.file {
        Some(path) if !config.stdout => {
            let (writer, file_guard) = create_non_blocking_file(path)?;
            guard._file_guard = Some(file_guard);
            Some(BoxMakeWriter::new(writer))
        }
        Some(_) => {
            tracing::warn!("Configured for stdout only; file logging ignored");
            Some(BoxMakeWriter::new(std::io::stdout))
        }
        None if config.stdout => Some(BoxMakeWriter::new(std::io::stdout)),
        None => None,
    };
    let fmt_layer = writer.map(|writer| format_layer(config.format, writer));

    let seq_layer = match seq_url.map(str::trim).filter(|url| !url.is_empty()) {
        Some(url) => {
            let (layer, handle) = seq::spawn(url)?;
            guard.seq = Some(handle);
            Some(layer)
        }
        None => None,
    };

    let result = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(seq_layer)
        .with(filter)
        .try_init();

    // A subscriber installed earlier (tests, embedding applications) stays in place
    if let Err(e) = result {
        tracing::debug!(error = %e, "logging already initialized");
    }

    Ok(guard)
}

/// Build the console/file layer for `format`.
fn format_layer(format: LogFormat, writer: BoxMakeWriter) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_target(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_writer(writer);

    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Default => layer.boxed(),
    }
}

/// Create a non-blocking file writer.
fn create_non_blocking_file(path: impl AsRef<Path>) -> Result<(NonBlocking, WorkerGuard)> {
    let path = path.as_ref();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| LogError::Other(format!("Log file has no name: {}", path.display())))?;
    let file_appender = tracing_appender::rolling::never(dir, file_name);

    Ok(tracing_appender::non_blocking(file_appender))
}

/// Convert a LogLevel to a tracing::Level.
pub fn log_level_to_level(level: LogLevel) -> Level {
    match level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    }
}
