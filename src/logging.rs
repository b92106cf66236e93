//! Logging configuration for mixedcd
//!
//! Logs are written to both the terminal and a file at:
//! `~/Library/Logs/mixedcd/mixedcd.log` on macOS, or
//! `<data dir>/mixedcd/logs/mixedcd.log` elsewhere.
//!
//! Attach this file to bug reports about failed burns.

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

const LOG_FILE: &str = "mixedcd.log";

/// Rotate once the file grows past this size
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Get the log directory path
pub fn get_log_directory() -> Option<PathBuf> {
    if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Logs").join("mixedcd"))
    } else {
        dirs::data_local_dir().map(|d| d.join("mixedcd").join("logs"))
    }
}

/// Get the current log file path
pub fn get_log_file_path() -> Option<PathBuf> {
    get_log_directory().map(|d| d.join(LOG_FILE))
}

/// Move an oversized log aside, replacing the previous backup
fn rotate_if_large(log_path: &Path, limit: u64) -> bool {
    match fs::metadata(log_path) {
        Ok(metadata) if metadata.len() > limit => {
            let mut backup = log_path.as_os_str().to_owned();
            backup.push(".old");
            fs::rename(log_path, PathBuf::from(backup)).is_ok()
        }
        _ => false,
    }
}

fn log_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build()
}

/// Initialize the logging system
///
/// Info and above goes to the terminal, debug and above to the log file.
/// Returns the path to the log file on success.
pub fn init_logging() -> Option<PathBuf> {
    let log_path = match get_log_file_path() {
        Some(p) => p,
        None => {
            eprintln!("Warning: Could not determine log directory");
            init_terminal_only();
            return None;
        }
    };

    if let Some(log_dir) = log_path.parent() {
        if let Err(e) = fs::create_dir_all(log_dir) {
            eprintln!("Warning: Could not create log directory: {}", e);
            init_terminal_only();
            return None;
        }
    }

    rotate_if_large(&log_path, MAX_LOG_BYTES);

    let log_file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file: {}", e);
            init_terminal_only();
            return None;
        }
    };

    let config = log_config();
    let loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(LevelFilter::Info, config.clone(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::Debug, config, log_file),
    ];

    if CombinedLogger::init(loggers).is_err() {
        eprintln!("Warning: Logger already initialized");
    }

    log::info!("=== mixedcd {} started ===", env!("CARGO_PKG_VERSION"));
    log::info!("Log file: {}", log_path.display());

    Some(log_path)
}

/// Terminal-only logging when the log file is unavailable
fn init_terminal_only() {
    let term_logger = TermLogger::new(LevelFilter::Info, log_config(), TerminalMode::Mixed, ColorChoice::Auto);
    let _ = CombinedLogger::init(vec![term_logger]);
}
