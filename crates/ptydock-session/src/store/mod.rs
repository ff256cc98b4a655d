//! Snapshot-store boundary.
//!
//! The store persists [`SnapshotPayload`]s keyed by session id. It is an
//! external service reached asynchronously; the lifecycle manager treats
//! every store failure as best-effort (restore failures leave a blank
//! screen, save failures are logged and swallowed).

mod file;

pub use file::FileSnapshotStore;

use crate::transport::BoxFuture;
use ptydock_core::{SessionId, SessionResult, SnapshotPayload};

pub trait SnapshotStore: Send + Sync {
    /// Fetch the last capture for `id`. `Ok(None)` when nothing usable is
    /// stored — absence is not an error.
    fn get<'a>(&'a self, id: &'a SessionId) -> BoxFuture<'a, SessionResult<Option<SnapshotPayload>>>;

    /// Persist a capture for `id`, replacing any previous one.
    fn save<'a>(
        &'a self,
        id: &'a SessionId,
        payload: &'a SnapshotPayload,
    ) -> BoxFuture<'a, SessionResult<()>>;
}
