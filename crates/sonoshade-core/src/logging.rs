//! Logging configuration.
//!
//! The subscriber itself is installed by the application crate; this module
//! only describes where logs go and how much is kept.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

const LOG_FILE_PREFIX: &str = "sonoshade_";

/// Whether console output is colored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    /// Color only when stderr is a terminal
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorMode {
    /// Decide for a console that is (or is not) a terminal
    pub fn resolve(self, is_terminal: bool) -> bool {
        match self {
            Self::Auto => is_terminal,
            Self::Always => true,
            Self::Never => false,
        }
    }
}

impl FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown color mode '{}' (auto, always, never)", other)),
        }
    }
}

/// Where and how verbosely to log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Default level (`trace`, `debug`, `info`, `warn`, `error`)
    pub level: String,
    /// Directory for log files
    pub log_directory: PathBuf,
    /// Write to a log file
    pub file_output: bool,
    /// Write to stderr
    pub console_output: bool,
    /// Console coloring
    pub color: ColorMode,
    /// Number of log files kept in `log_directory`
    pub max_log_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_directory: PathBuf::from("logs"),
            file_output: true,
            console_output: true,
            color: ColorMode::Auto,
            max_log_files: 10,
        }
    }
}

impl LogConfig {
    /// Parse the configured level, defaulting to INFO
    pub fn parse_level(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::INFO)
    }

    /// Create the log directory if it does not exist
    pub fn ensure_log_directory(&self) -> io::Result<()> {
        fs::create_dir_all(&self.log_directory)
    }

    /// Path of today's log file
    pub fn current_log_path(&self) -> PathBuf {
        let date = chrono::Local::now().format("%Y-%m-%d");
        self.log_directory
            .join(format!("{}{}.log", LOG_FILE_PREFIX, date))
    }

    /// Remove the oldest log files beyond `max_log_files`.
    /// Returns the number of files deleted.
    pub fn cleanup_old_logs(&self) -> io::Result<usize> {
        if !self.log_directory.exists() {
            return Ok(0);
        }

        let mut logs: Vec<PathBuf> = fs::read_dir(&self.log_directory)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_log_file(path))
            .collect();

        if logs.len() <= self.max_log_files {
            return Ok(0);
        }

        // Date-stamped names sort chronologically
        logs.sort();
        let excess = logs.len() - self.max_log_files;
        let mut removed = 0;
        for path in logs.into_iter().take(excess) {
            fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }
}

fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(LOG_FILE_PREFIX) && n.ends_with(".log"))
        .unwrap_or(false)
}
