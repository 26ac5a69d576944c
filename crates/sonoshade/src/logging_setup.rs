use anyhow::{Context, Result};
use sonoshade_core::LogConfig;
use std::fs::File;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

/// Keeps the file writer thread alive; flushes on drop
pub struct LogGuard {
    _guard: WorkerGuard,
    path: PathBuf,
}

impl LogGuard {
    /// File this session logs into
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Outcome of pruning the log directory, reported once tracing is up
enum Housekeeping {
    Skipped,
    Removed(usize),
    Failed(std::io::Error),
}

/// Install the global subscriber described by `config` and log the session
/// banner.
pub fn init(config: &LogConfig) -> Result<Option<LogGuard>> {
    let housekeeping = prepare_directory(config)?;

    // RUST_LOG takes precedence over the configured level
    let filter = EnvFilter::builder()
        .with_default_directive(config.parse_level().into())
        .from_env_lossy();

    let ansi = config.color.resolve(std::io::stderr().is_terminal());
    let console_layer = config.console_output.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(ansi)
            .with_target(false)
            .with_filter(filter.clone())
    });

    let (file_layer, guard) = if config.file_output {
        let (writer, guard) = open_log_file(config)?;
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(filter);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    session_banner(config, guard.as_ref().map(LogGuard::path));
    match housekeeping {
        Housekeeping::Skipped | Housekeeping::Removed(0) => {}
        Housekeeping::Removed(n) => info!("Removed {} old log file(s)", n),
        Housekeeping::Failed(e) => warn!("Failed to clean up old log files: {}", e),
    }
    Ok(guard)
}

fn prepare_directory(config: &LogConfig) -> Result<Housekeeping> {
    if !config.file_output {
        return Ok(Housekeeping::Skipped);
    }
    config
        .ensure_log_directory()
        .context("Failed to create log directory")?;
    Ok(match config.cleanup_old_logs() {
        Ok(removed) => Housekeeping::Removed(removed),
        Err(e) => Housekeeping::Failed(e),
    })
}

fn open_log_file(config: &LogConfig) -> Result<(NonBlocking, LogGuard)> {
    let path = config.current_log_path();
    // Several sessions a day share one file
    let file = File::options()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file: {:?}", path))?;
    let (writer, worker_guard) = tracing_appender::non_blocking(file);
    Ok((
        writer,
        LogGuard {
            _guard: worker_guard,
            path,
        },
    ))
}

fn session_banner(config: &LogConfig, log_file: Option<&Path>) {
    info!("==========================================");
    info!("=== Sonoshade {} Session Started ===", env!("CARGO_PKG_VERSION"));
    info!("==========================================");
    info!("Log level: {}", config.level);
    if let Some(path) = log_file {
        info!("Log file: {:?}", path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonoshade_core::ColorMode;

    fn file_config(dir: &Path) -> LogConfig {
        LogConfig {
            level: "debug".to_string(),
            log_directory: dir.join("logs"),
            file_output: true,
            console_output: false,
            color: ColorMode::Never,
            max_log_files: 3,
        }
    }

    #[test]
    fn test_prepare_directory_prunes_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            max_log_files: 1,
            ..file_config(dir.path())
        };
        std::fs::create_dir_all(&config.log_directory).unwrap();
        for day in 1..=3 {
            let name = format!("sonoshade_2026-02-0{}.log", day);
            std::fs::write(config.log_directory.join(name), "x").unwrap();
        }

        assert!(matches!(
            prepare_directory(&config).unwrap(),
            Housekeeping::Removed(2)
        ));

        let disabled = LogConfig {
            file_output: false,
            ..config
        };
        assert!(matches!(
            prepare_directory(&disabled).unwrap(),
            Housekeeping::Skipped
        ));
    }

    #[test]
    fn test_log_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(dir.path());
        config.ensure_log_directory().unwrap();
        std::fs::write(config.current_log_path(), "earlier session\n").unwrap();

        let (_writer, guard) = open_log_file(&config).unwrap();
        assert_eq!(guard.path(), config.current_log_path());
        drop(guard);

        let content = std::fs::read_to_string(config.current_log_path()).unwrap();
        assert!(content.starts_with("earlier session"));
    }

    #[test]
    fn test_init_writes_banner_into_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = file_config(dir.path());

        let guard = init(&config).unwrap().expect("file output enabled");
        let path = guard.path().to_path_buf();
        assert!(path.starts_with(&config.log_directory));

        // Only one global subscriber per process
        assert!(init(&config).is_err());

        // Dropping the guard flushes the writer thread
        drop(guard);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Session Started"));
        assert!(content.contains("Log level: debug"));
    }
}
