//! Tracing setup for Ferry processes.
//!
//! Console output follows the level picked on the command line (or
//! `RUST_LOG`); a second layer writes every event to
//! `<logs_dir>/ferry-last-run.log`, replaced on each run.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::{Level, Subscriber};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Name of the per-run trace file inside the logs directory.
pub const LOG_FILE_NAME: &str = "ferry-last-run.log";

/// Errors from installing the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    /// Console logging is active; only the trace file is missing
    #[error("file logging disabled, could not create {}: {source}", .path.display())]
    FileLayer {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Installs the console and file layers as the global subscriber.
///
/// Returns the path of the trace file. When the logs directory or file
/// cannot be created the console layer is still installed and
/// `TracingError::FileLayer` reports what was lost.
///
/// # Errors
///
/// - `TracingError::FileLayer` - Trace file unavailable, console logging active
/// - `TracingError::AlreadyInstalled` - A global subscriber was set earlier
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<PathBuf, TracingError> {
    let logs_path = logs_dir.unwrap_or_else(|| Path::new("logs"));
    let log_file_path = logs_path.join(LOG_FILE_NAME);
    let log_file = create_dir_all(logs_path).and_then(|()| File::create(&log_file_path));

    let log_file = match log_file {
        Ok(log_file) => log_file,
        Err(source) => {
            tracing_subscriber::registry()
                .with(console_layer(console_level))
                .try_init()
                .map_err(|_| TracingError::AlreadyInstalled)?;
            return Err(TracingError::FileLayer {
                path: log_file_path,
                source,
            });
        }
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer(console_level))
        .with(file_layer)
        .try_init()
        .map_err(|_| TracingError::AlreadyInstalled)?;

    tracing::info!(
        "Tracing initialized: console={}, trace_file={}",
        console_level,
        log_file_path.display()
    );

    Ok(log_file_path)
}

fn console_layer<S>(console_level: Level) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));
    fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter)
}

/// Console verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only errors
    Error,
    /// Unreachable peers and failed registrations
    Warn,
    /// Lifecycle events
    #[default]
    Info,
    /// Per-request detail
    Debug,
    /// Everything
    Trace,
}

impl CliLogLevel {
    /// Maps the CLI name onto a tracing level.
    ///
    /// ```
    /// use ferry_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Warn.as_tracing_level(), tracing::Level::WARN);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unusable_logs_dir_keeps_console_logging() {
        let temp_dir = tempfile::tempdir().unwrap();
        let not_a_dir = temp_dir.path().join("logs");
        std::fs::write(&not_a_dir, b"").unwrap();

        let result = init_tracing(Level::INFO, Some(&not_a_dir));

        assert!(matches!(result, Err(TracingError::FileLayer { .. })));
        assert!(tracing::dispatcher::has_been_set());
    }

    #[test]
    fn test_levels_map_in_order() {
        let levels: Vec<Level> = [
            CliLogLevel::Error,
            CliLogLevel::Warn,
            CliLogLevel::Info,
            CliLogLevel::Debug,
            CliLogLevel::Trace,
        ]
        .into_iter()
        .map(CliLogLevel::as_tracing_level)
        .collect();

        assert_eq!(
            levels,
            vec![Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE]
        );
        assert_eq!(CliLogLevel::default(), CliLogLevel::Info);
    }
}
