/// Macro for prefixed status logging.
///
/// Emits an `info` event with the prefix attached as the `scope` field, so
/// operators can filter on it (`SHIPYARD_LOG=info`).
///
/// Usage:
/// ```ignore
/// log_status!("backup", "Archived {} files for {}", count, app.name);
/// log_status!("release", "Activated {}", release_id);
/// ```
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        ::tracing::info!(scope = $prefix, "{}", format_args!($($arg)*))
    };
}

pub mod core;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `shipyard::backup` instead of `shipyard::core::backup`
pub use core::*;
pub use utils::*;
