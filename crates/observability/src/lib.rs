//! Tracing and logging (shared setup).

/// Initialize process-wide logging from `RUST_LOG` and `LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use tracing::{init_with, LogFormat};
