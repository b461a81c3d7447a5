use std::{
    error::Error,
    fs::OpenOptions,
    io,
    path::PathBuf,
    sync::Mutex,
};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to open log file {path}: {source}")]
    File { path: PathBuf, source: io::Error },
    #[error("Failed to install the log subscriber: {0}")]
    Init(Box<dyn Error + Send + Sync>),
}

/// Everything needed to set up logging for one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: Level,
    /// log to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// `RUST_LOG` wins over the configured level
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_ascii_lowercase()))
    }
}

/// install the global subscriber, can only succeed once per process
pub fn init(config: &LogConfig) -> Result<(), LoggingError> {
    let builder = tracing_subscriber::fmt().with_env_filter(config.filter());

    match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File {
                    path: path.clone(),
                    source,
                })?;

            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(io::stderr).try_init(),
    }
    .map_err(LoggingError::Init)
}
