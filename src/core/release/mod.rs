//! Release Manager for zero-downtime applications.
//!
//! Layout under the application root:
//!
//! ```text
//! releases/<id>/     one directory per build, never mutated once live
//! shared/storage     persistent data, linked into every release
//! shared/.env        environment file, linked into every release
//! current -> releases/<id>
//! ```
//!
//! `current` only ever moves through [`activate`], which refuses releases
//! whose build has not been marked complete.

mod manager;
mod types;

pub use manager::{
    activate, current_release, discard, ensure_layout, list_releases, mark_ready,
    prepare_release, prune_releases, switch_current,
};
pub use types::{Release, ReleaseMetadata, ReleaseSource};
