// SPDX-License-Identifier: MIT OR Apache-2.0

//! Logging initialization.
//!
//! Console output goes to stderr through `tracing-subscriber`; when
//! `XM_LOG_OUTPUT_PATH` points at a directory, a second layer writes
//! `app.log`, rotated daily and pruned after seven days.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{Result, XmError};

/// Directory for rotated log files.
pub const ENV_LOG_OUTPUT_PATH: &str = "XM_LOG_OUTPUT_PATH";
/// Forces debug-level logging when set to a truthy value.
pub const ENV_LOG_VERBOSE: &str = "XM_LOG_VERBOSE";
/// Log level override.
pub const ENV_LOG_LEVEL: &str = "XM_LOG_LEVEL";

const LOG_FILE_PREFIX: &str = "app.log";
const LOG_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Keeps the non-blocking file writer alive; drop it last.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// Level precedence: `--verbose`/`XM_LOG_VERBOSE` force `debug`, then the
/// `--log-level` flag, then `XM_LOG_LEVEL`, then `info`. The CLI accepts
/// `fatal` and `panic` as aliases for `error`.
///
/// # Errors
///
/// Returns an error if the file layer's directory cannot be created.
pub fn init(flag_level: Option<&str>, flag_verbose: bool) -> Result<LogGuard> {
    let verbose = flag_verbose || env_truthy(ENV_LOG_VERBOSE);
    let level = if verbose {
        "debug".to_string()
    } else {
        flag_level
            .map(str::to_string)
            .or_else(|| std::env::var(ENV_LOG_LEVEL).ok())
            .unwrap_or_else(|| "info".to_string())
    };
    let level = normalize_level(&level);
    let filter = EnvFilter::new(format!("xmcores={level},xm={level},warn"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match std::env::var(ENV_LOG_OUTPUT_PATH) {
        Ok(dir) if !dir.is_empty() => {
            std::fs::create_dir_all(&dir).map_err(|e| {
                XmError::Config(format!("Failed to create log directory {dir}: {e}"))
            })?;
            prune_old_logs(Path::new(&dir));
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(LogGuard { _file: guard })
}

fn env_truthy(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn normalize_level(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        // tracing has no fatal/panic levels
        "error" | "fatal" | "panic" => "error",
        _ => "info",
    }
}

/// Delete rotated log files older than the retention window.
fn prune_old_logs(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let cutoff = SystemTime::now() - LOG_RETENTION;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(LOG_FILE_PREFIX) {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if modified < cutoff {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!(file = %entry.path().display(), error = %e, "failed to prune old log file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_normalize_level_aliases() {
        assert_eq!(normalize_level("fatal"), "error");
        assert_eq!(normalize_level("panic"), "error");
        assert_eq!(normalize_level("TRACE"), "trace");
        assert_eq!(normalize_level("bogus"), "info");
    }

    #[test]
    fn test_prune_removes_only_stale_app_logs() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("app.log.2020-01-01");
        let fresh = dir.path().join("app.log.today");
        let other = dir.path().join("unrelated.txt");
        for p in [&stale, &fresh, &other] {
            fs::write(p, b"x").unwrap();
        }
        let old = SystemTime::now() - Duration::from_secs(30 * 24 * 60 * 60);
        let file = fs::File::options().write(true).open(&stale).unwrap();
        file.set_modified(old).unwrap();

        prune_old_logs(dir.path());

        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(other.exists());
    }
}
