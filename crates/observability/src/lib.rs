//! Logging setup shared by the session tools.

/// Initialize process-wide logging using `PMO_LOG_FORMAT` and `RUST_LOG`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use self::tracing::{LogFormat, init_with, ENV_LOG_FORMAT};
