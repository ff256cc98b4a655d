//! Versioned snapshot payloads.
//!
//! A snapshot is a point-in-time capture of a session's visible buffer and
//! dimensions, persisted so the terminal's appearance survives restarts and
//! reattachment. The payload is an immutable value; the `version` field is
//! mandatory and must be checked on every restore — a mismatched version is
//! discarded, never coerced.

use crate::error::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current payload schema version. Bump on any incompatible change.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Why a capture was taken. Recorded in the payload for diagnostics and used
/// by the manager to debounce duplicate detach-triggered captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotReason {
    Interval,
    Detach,
    Dispose,
}

impl fmt::Display for SnapshotReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SnapshotReason::Interval => "interval",
            SnapshotReason::Detach => "detach",
            SnapshotReason::Dispose => "dispose",
        };
        f.write_str(s)
    }
}

/// Guardrail counters at capture time. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Bytes admitted since the guardrail counter was last reset.
    pub bytes_since_reset: u64,
    /// How many times the guardrail forced a buffer truncation.
    pub truncations: u32,
    /// What triggered this capture.
    pub reason: SnapshotReason,
}

/// A point-in-time capture of a session's visible buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub version: u32,
    /// Capture time, milliseconds since the unix epoch.
    pub created_at: u64,
    /// Dimensions the buffer was captured at.
    pub cols: u16,
    pub rows: u16,
    /// Serialized visible-buffer text. The encoding belongs to the rendering
    /// engine; this layer treats it as opaque.
    pub data: String,
    pub stats: SnapshotStats,
}

impl SnapshotPayload {
    /// Whether this payload was written by the current schema version.
    pub fn version_matches(&self) -> bool {
        self.version == SNAPSHOT_VERSION
    }

    pub fn encode(&self) -> SessionResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a payload without a version gate. Restore sites must still call
    /// [`SnapshotPayload::version_matches`] before applying it.
    pub fn decode(s: &str) -> SessionResult<Self> {
        serde_json::from_str(s)
            .map_err(|e| SessionError::SnapshotRestore(format!("malformed payload: {e}")))
    }
}

/// Milliseconds since the unix epoch, for `created_at` fields.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(version: u32) -> SnapshotPayload {
        SnapshotPayload {
            version,
            created_at: 1_700_000_000_000,
            cols: 100,
            rows: 30,
            data: "hello\nworld".to_string(),
            stats: SnapshotStats {
                bytes_since_reset: 42,
                truncations: 0,
                reason: SnapshotReason::Detach,
            },
        }
    }

    #[test]
    fn encode_decode_preserves_payload() {
        let p = payload(SNAPSHOT_VERSION);
        let encoded = p.encode().unwrap();
        let decoded = SnapshotPayload::decode(&encoded).unwrap();
        assert_eq!(decoded, p);
        assert!(decoded.version_matches());
    }

    #[test]
    fn stale_version_is_detected() {
        let p = payload(0);
        let decoded = SnapshotPayload::decode(&p.encode().unwrap()).unwrap();
        assert!(!decoded.version_matches());
    }

    #[test]
    fn malformed_payload_is_a_restore_error() {
        let err = SnapshotPayload::decode("{not json").unwrap_err();
        assert!(matches!(err, SessionError::SnapshotRestore(_)));
    }

    #[test]
    fn reason_serializes_lowercase() {
        let s = serde_json::to_string(&SnapshotReason::Dispose).unwrap();
        assert_eq!(s, "\"dispose\"");
    }
}
