//! Tracing/logging setup shared by projector hosts.

/// Subscriber configuration (filters, output formats).
pub mod subscriber;

pub use subscriber::{LogFormat, LogFormatError};

/// Initialize process-wide tracing/logging.
///
/// The output format comes from `PROJECTOR_LOG_FORMAT` (`json`, the default,
/// `pretty` or `compact`); the filter from `RUST_LOG` (default `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    let format = std::env::var("PROJECTOR_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    subscriber::init(format);
}

/// Initialize tracing for tests: compact output routed through the test harness
/// so it is only shown for failing tests.
pub fn init_for_tests() {
    subscriber::init_test_writer();
}
