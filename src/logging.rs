use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::info;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "rollbookd";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 5 * 1024 * 1024;
const MAX_LOG_FILES: usize = 3;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();

struct LoggingState {
    log_dir: PathBuf,
    _logger: LoggerHandle,
}

/// Starts file logging under `<workspace>/logs`. Idempotent for the same
/// directory; a second workspace in the same process keeps the first log
/// destination rather than switching mid-stream.
pub fn init_workspace_logging(workspace: &Path) -> Result<(), String> {
    let log_dir = workspace.join("logs");
    if let Some(state) = LOGGING_STATE.get() {
        if state.log_dir != log_dir {
            return Err(format!(
                "logging already initialized at {}",
                state.log_dir.display()
            ));
        }
        return Ok(());
    }

    let init_dir = log_dir.clone();
    LOGGING_STATE
        .get_or_try_init(|| -> Result<LoggingState, String> {
            std::fs::create_dir_all(&init_dir)
                .map_err(|err| format!("failed to create log directory: {err}"))?;
            let logger = Logger::try_with_str(default_log_level())
                .map_err(|err| format!("invalid log level: {err}"))?
                .log_to_file(
                    FileSpec::default()
                        .directory(init_dir.as_path())
                        .basename(LOG_FILE_BASENAME),
                )
                .rotate(
                    Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(MAX_LOG_FILES),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .format_for_files(flexi_logger::detailed_format)
                .start()
                .map_err(|err| format!("failed to start logger: {err}"))?;

            info!(
                "event=daemon_start version={} platform={}",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS
            );

            Ok(LoggingState {
                log_dir: init_dir,
                _logger: logger,
            })
        })
        .map(|_| ())
}

fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}
