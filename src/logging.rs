use std::sync::OnceLock;

use chrono::Local;
use log::{LevelFilter, Metadata, Record, SetLoggerError};

static LOGGER: OnceLock<ExplorerLogger> = OnceLock::new();

/// Writes timestamped records to stderr, keeping stdout for command output.
pub struct ExplorerLogger {
    level: LevelFilter,
}

impl ExplorerLogger {
    pub fn new(level: LevelFilter) -> Self {
        Self { level }
    }

    /// Installs the process-wide logger. The installed instance passes every
    /// level; `log::set_max_level` filters, so the level can be changed later.
    pub fn init(level: LevelFilter) -> Result<&'static ExplorerLogger, SetLoggerError> {
        let logger = LOGGER.get_or_init(|| ExplorerLogger::new(LevelFilter::Trace));
        log::set_logger(logger).map(|()| log::set_max_level(level))?;
        Ok(logger)
    }

    fn format_record(record: &Record) -> String {
        format!(
            "{} [{}] {}",
            Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    }
}

impl log::Log for ExplorerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{}", Self::format_record(record));
        }
    }

    fn flush(&self) {}
}

/// Installs [`ExplorerLogger`], falling back to `env_logger` when another
/// logger is already set.
pub fn init_logging(level: LevelFilter) {
    if ExplorerLogger::init(level).is_err() {
        let _ = env_logger::builder().filter_level(level).try_init();
    }
}
