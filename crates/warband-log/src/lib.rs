//! Structured logging for warband tools.
//!
//! Installs a `tracing` subscriber with console output (uptime timestamps,
//! module paths, thread names) and, in debug builds, a JSON log file for
//! post-mortem analysis of a session. Records emitted through the `log`
//! facade are captured as well.

use std::path::{Path, PathBuf};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use warband_config::Config;

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_FILTER: &str = "info";

/// Name of the JSON log file written in debug builds.
pub const LOG_FILE_NAME: &str = "warband.log";

/// Initialize the global tracing subscriber.
///
/// * `log_dir` - directory for the JSON log file (debug builds only)
/// * `debug_build` - whether to write the JSON log file
/// * `config` - optional configuration whose `debug.log_level` is used
///
/// `RUST_LOG` takes precedence over the config. Returns the path of the
/// JSON log file if one was opened.
///
/// ```no_run
/// use warband_log::init_logging;
/// use warband_config::Config;
///
/// let config = Config::default();
/// if let Some(path) = init_logging(Some(std::path::Path::new("./logs")), true, Some(&config)) {
///     tracing::info!("session log: {}", path.display());
/// }
/// ```
pub fn init_logging(
    log_dir: Option<&Path>,
    debug_build: bool,
    config: Option<&Config>,
) -> Option<PathBuf> {
    let filter_str = filter_directives(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true) // worker threads are named by tokio
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(path) = log_dir.map(log_file_path)
        && let Some(file) = open_log_file(&path)
    {
        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return Some(path);
    }

    subscriber.init();
    None
}

/// Location of the JSON log file inside `log_dir`.
pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE_NAME)
}

fn open_log_file(path: &Path) -> Option<std::fs::File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).ok()?;
    }
    std::fs::File::create(path).ok()
}

/// Filter directives derived from the config, falling back to [`DEFAULT_FILTER`].
pub fn filter_directives(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.debug.log_level.trim().is_empty() => {
            config.debug.log_level.trim().to_string()
        }
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Create an `EnvFilter` with the default filter string.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}
