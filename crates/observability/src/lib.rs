//! Tracing/logging setup shared by the queue binaries.

pub mod subscriber;

pub use subscriber::LogFormat;

/// Initialize process-wide tracing with JSON output.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init(LogFormat::Json);
}

/// Like [`init`], but the format comes from `LIVEQUEUE_LOG_FORMAT`
/// (`json` or `text`, default `json`).
pub fn init_from_env() {
    subscriber::init(LogFormat::from_env());
}
