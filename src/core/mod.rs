// Public modules
pub mod backup;
pub mod config;
pub mod context;
pub mod datastore;
pub mod defaults;
pub mod error;
pub mod exec;
pub mod history;
pub mod hooks;
pub mod host;
pub mod interrupt;
pub mod lock;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod registry;
pub mod release;
pub mod report;
pub mod secret;

#[cfg(test)]
pub(crate) mod testing;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
pub use output::{BulkSummary, ItemOutcome};
