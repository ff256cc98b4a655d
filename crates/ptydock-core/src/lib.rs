//! ptydock-core: shared leaf types for ptydock.
//!
//! Error taxonomy, session ids, terminal sizes, and the versioned snapshot
//! payload with its JSON codec. Deliberately dependency-light: no async, no
//! I/O, so every other crate can depend on it.

pub mod error;
pub mod id;
pub mod size;
pub mod snapshot;

// Re-export commonly used items at crate root.
pub use error::{SessionError, SessionResult};
pub use id::SessionId;
pub use size::Size;
pub use snapshot::{
    now_millis, SnapshotPayload, SnapshotReason, SnapshotStats, SNAPSHOT_VERSION,
};
