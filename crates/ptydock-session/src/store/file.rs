//! File-backed snapshot store.
//!
//! One JSON file per session id under a base directory. Writes go through a
//! temp file and an atomic rename so a crash mid-write never leaves a
//! half-written snapshot behind; reads are lenient, treating unreadable or
//! unparseable files as absent.

use super::SnapshotStore;
use crate::transport::BoxFuture;
use ptydock_core::{SessionError, SessionId, SessionResult, SnapshotPayload};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at `~/.ptydock/snapshots` (falls back to the system temp
    /// directory when there is no home).
    pub fn default_location() -> Self {
        let base = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        Self::new(base.join(".ptydock").join("snapshots"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn get<'a>(&'a self, id: &'a SessionId) -> BoxFuture<'a, SessionResult<Option<SnapshotPayload>>> {
        Box::pin(async move {
            let path = self.path_for(id);
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "snapshot file unreadable");
                    return Ok(None);
                }
            };
            match SnapshotPayload::decode(&content) {
                Ok(payload) => Ok(Some(payload)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "snapshot file corrupt, ignoring");
                    Ok(None)
                }
            }
        })
    }

    fn save<'a>(
        &'a self,
        id: &'a SessionId,
        payload: &'a SnapshotPayload,
    ) -> BoxFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let path = self.path_for(id);
            let encoded = payload.encode()?;

            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| SessionError::SnapshotSave(format!("create dir: {e}")))?;

            let temp = path.with_extension("json.tmp");
            tokio::fs::write(&temp, encoded.as_bytes())
                .await
                .map_err(|e| SessionError::SnapshotSave(format!("write temp: {e}")))?;
            tokio::fs::rename(&temp, &path)
                .await
                .map_err(|e| SessionError::SnapshotSave(format!("rename: {e}")))?;

            debug!(session_id = %id, path = %path.display(), reason = %payload.stats.reason, "snapshot saved");
            Ok(())
        })
    }
}
