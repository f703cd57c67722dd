use evlog::Logger;
use once_cell::sync::OnceCell;

static LOGGER: OnceCell<Logger> = OnceCell::new();

pub fn set_logger(logger: Logger) {
    let _ = LOGGER.set(logger);
}

/// Falls back to a logger with no printers when nothing was installed, which is
/// the case under `cargo test`.
pub fn get_logger() -> &'static Logger {
    LOGGER.get_or_init(Logger::default)
}
