use thiserror::Error;

/// Errors produced by the session lifecycle layer.
///
/// Best-effort paths (snapshot save/restore, listener callbacks) are
/// contained where they occur and usually only logged; the variants exist so
/// the containment sites can say precisely what they swallowed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport start failed: {0}")]
    TransportStart(String),

    #[error("transport error: {0}")]
    TransportRuntime(String),

    #[error("snapshot restore failed: {0}")]
    SnapshotRestore(String),

    #[error("snapshot save failed: {0}")]
    SnapshotSave(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        SessionError::Other(format!("json error: {e}"))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
