use std::error::Error;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Environment variable holding a `tracing` filter directive, e.g.
/// `EESYAI_LOG=eesyai=debug`.
pub const LOG_ENV: &str = "EESYAI_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogTarget {
    File,
    Stderr,
    Disabled,
}

fn log_target(has_file: bool, interactive: bool) -> LogTarget {
    match (has_file, interactive) {
        (true, _) => LogTarget::File,
        // The full-screen UI owns the terminal.
        (false, true) => LogTarget::Disabled,
        (false, false) => LogTarget::Stderr,
    }
}

fn default_directive(target: LogTarget) -> &'static str {
    match target {
        LogTarget::File => "info",
        LogTarget::Stderr | LogTarget::Disabled => "warn",
    }
}

fn env_filter(target: LogTarget) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive(target)))
}

/// Install the global subscriber. With `log_file` events are appended to it;
/// otherwise they go to stderr, except in the interactive UI where nothing is
/// installed.
pub fn init_tracing(log_file: Option<&Path>, interactive: bool) -> Result<(), Box<dyn Error>> {
    let target = log_target(log_file.is_some(), interactive);
    let filter = env_filter(target);

    let installed = match (target, log_file) {
        (LogTarget::File, Some(path)) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| format!("Cannot open log file {}: {err}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
        }
        (LogTarget::Stderr, _) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init(),
        _ => return Ok(()),
    };

    installed.map_err(|err| format!("Failed to install log subscriber: {err}").into())
}
