//! Generic utility primitives with zero domain knowledge.
//!
//! - `archive` - tar.gz creation/extraction, tree copies and digests with path exclusions
//! - `command` - Shell command execution with timeouts and cancellation
//! - `dotenv` - `KEY=value` documents that preserve comments and order
//! - `io` - File I/O with consistent error handling
//! - `shell` - Shell escaping and quoting
//! - `stamp` - Sortable, collision-free timestamp identifiers
//! - `template` - String template rendering
//! - `validation` - Input validation helpers

pub mod archive;
pub mod command;
pub mod dotenv;
pub mod io;
pub mod shell;
pub mod stamp;
pub mod template;
pub mod validation;
