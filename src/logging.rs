use std::{
    io::{self, IsTerminal},
    path::Path,
};

use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{Builder as RollingBuilder, Rotation},
};
use tracing_subscriber::{
    fmt::{self, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::cli::ColorChoice;

/// Rotated log files kept around in the log directory.
const MAX_LOG_FILES: usize = 7;

/// Keeps the file log writer alive. Dropping it flushes what's buffered.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Console filter directives for a `-v` count.
pub fn console_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "info,libextedit=debug",
        2 => "info,libextedit=trace",
        _ => "trace",
    }
}

/// Installs the global subscriber. Records from the `log` facade are bridged
/// into it, so library code keeps logging through `log`.
///
/// When `log_dir` is given, everything down to trace level is also written to
/// a daily rolling file named after `file_prefix`.
pub fn init_logging(
    verbosity: u8,
    color: ColorChoice,
    log_dir: Option<&Path>,
    file_prefix: &str,
) -> LogGuard {
    let console_env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_filter(verbosity)));

    let use_ansi = match color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => io::stderr().is_terminal(),
    };

    let console_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(use_ansi)
        .without_time()
        .with_target(false)
        .with_thread_names(false)
        .with_level(true)
        .with_filter(console_env_filter);

    let mut file_guard = None;

    let file_layer = log_dir.and_then(|dir| {
        let appender = fs_err::create_dir_all(dir)
            .map_err(|err| err.to_string())
            .and_then(|()| {
                RollingBuilder::new()
                    .rotation(Rotation::DAILY)
                    .filename_prefix(file_prefix)
                    .filename_suffix("log")
                    .max_log_files(MAX_LOG_FILES)
                    .build(dir)
                    .map_err(|err| err.to_string())
            });

        match appender {
            Ok(appender) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                file_guard = Some(guard);

                Some(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_timer(UtcTime::rfc_3339())
                        .with_target(true)
                        .with_thread_names(true)
                        .with_level(true)
                        .with_filter(EnvFilter::new("trace")),
                )
            }
            Err(err) => {
                // No subscriber exists yet, so this can't go through `log`.
                eprintln!(
                    "Warning: could not set up file logging in {}: {}",
                    dir.display(),
                    err
                );
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    LogGuard {
        _file_guard: file_guard,
    }
}
