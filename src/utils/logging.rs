use chrono::{Local, Utc};
use env_logger::{Builder, Env};
use log::{debug, error, info};
use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::SystemTime;

static INIT: Once = Once::new();

// Keep only the most recent log files
const MAX_LOG_FILES: usize = 10;

/// Initialize the logging system
pub fn init_logger() {
    INIT.call_once(|| {
        let log_dir = get_log_dir();
        let log_file = get_log_file_path(&log_dir);

        let env = Env::default().filter_or("LOG_LEVEL", "info");

        let mut builder = Builder::from_env(env);
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        });

        match OpenOptions::new().create(true).append(true).open(&log_file) {
            Ok(file) => {
                builder
                    .target(env_logger::Target::Pipe(Box::new(FileAndStdout { file })))
                    .init();

                info!("Logging initialized: {}", log_file.display());
            }
            Err(e) => {
                // Fall back to stdout only
                builder.init();
                error!("Failed to open log file, logging to stdout only: {}", e);
            }
        }

        debug!("Log level: {}", get_log_level());
        info!("Secure banking core starting at {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));

        if let Err(e) = clean_old_logs(&log_dir) {
            error!("Failed to clean old logs: {}", e);
        }
    });
}

/// Get the log directory path
fn get_log_dir() -> PathBuf {
    let path = env::var("LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("logs"));

    if let Err(e) = fs::create_dir_all(&path) {
        eprintln!("Failed to create log directory {}: {}", path.display(), e);
    }

    path
}

/// Get the log file path for the current run
fn get_log_file_path(log_dir: &Path) -> PathBuf {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    log_dir.join(format!("secure_banking_{}.log", timestamp))
}

fn get_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

/// Remove all but the newest `MAX_LOG_FILES` log files
fn clean_old_logs(log_dir: &Path) -> std::io::Result<()> {
    let mut log_files: Vec<(PathBuf, SystemTime)> = Vec::new();

    for entry in fs::read_dir(log_dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map(|ext| ext == "log").unwrap_or(false) {
            let modified = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            log_files.push((path, modified));
        }
    }

    // newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (file, _) in log_files.iter().skip(MAX_LOG_FILES) {
        debug!("Removing old log file: {}", file.display());
        fs::remove_file(file)?;
    }

    Ok(())
}

/// Custom writer that writes to both a file and stdout
struct FileAndStdout {
    file: File,
}

impl Write for FileAndStdout {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stdout().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()?;
        self.file.flush()
    }
}
