pub mod logger;

pub use logger::{AsyncLogger, LogRecord, sanitize_prefix};
