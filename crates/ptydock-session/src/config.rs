//! Session tuning: TOML file with per-field defaults.
//!
//! Every knob defaults to the value the manager was designed around; a
//! missing file or a file with only some keys is fine.

use crate::guardrail::DEFAULT_OUTPUT_BUDGET;
use ptydock_core::{SessionError, SessionResult};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Top-level tuning file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct TuningFile {
    #[serde(default)]
    pub session: SessionSection,
}

/// `[session]` section of the tuning TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// Seconds between interval-triggered snapshot captures.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    /// Minimum gap between two detach-triggered captures, in milliseconds.
    #[serde(default = "default_detach_debounce_ms")]
    pub detach_debounce_ms: u64,
    /// Output bytes admitted between guardrail resets.
    #[serde(default = "default_output_budget_bytes")]
    pub output_budget_bytes: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            snapshot_interval_secs: default_snapshot_interval_secs(),
            detach_debounce_ms: default_detach_debounce_ms(),
            output_budget_bytes: default_output_budget_bytes(),
        }
    }
}

fn default_snapshot_interval_secs() -> u64 {
    120
}
fn default_detach_debounce_ms() -> u64 {
    1500
}
fn default_output_budget_bytes() -> u64 {
    DEFAULT_OUTPUT_BUDGET
}

/// Resolved tuning values handed to each session.
#[derive(Debug, Clone)]
pub struct SessionTuning {
    pub snapshot_interval: Duration,
    pub detach_debounce: Duration,
    pub output_budget: u64,
}

impl Default for SessionTuning {
    fn default() -> Self {
        SessionSection::default().into()
    }
}

impl From<SessionSection> for SessionTuning {
    fn from(s: SessionSection) -> Self {
        Self {
            snapshot_interval: Duration::from_secs(s.snapshot_interval_secs),
            detach_debounce: Duration::from_millis(s.detach_debounce_ms),
            output_budget: s.output_budget_bytes,
        }
    }
}

impl SessionTuning {
    /// Load tuning from a TOML file; a missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> SessionResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            info!(path = %path.display(), "tuning file not found, using defaults");
            return Ok(Self::default());
        }
        info!(path = %path.display(), "loading tuning file");
        let content = std::fs::read_to_string(path)?;
        let file: TuningFile = toml::from_str(&content)
            .map_err(|e| SessionError::Other(format!("tuning parse error: {e}")))?;
        Ok(file.session.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_design_constants() {
        let t = SessionTuning::default();
        assert_eq!(t.snapshot_interval, Duration::from_secs(120));
        assert_eq!(t.detach_debounce, Duration::from_millis(1500));
        assert_eq!(t.output_budget, 128 * 1024 * 1024);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let file: TuningFile = toml::from_str(
            r#"
            [session]
            snapshot_interval_secs = 30
            "#,
        )
        .unwrap();
        let t: SessionTuning = file.session.into();
        assert_eq!(t.snapshot_interval, Duration::from_secs(30));
        assert_eq!(t.detach_debounce, Duration::from_millis(1500));
    }

    #[test]
    fn missing_file_is_defaults() {
        let t = SessionTuning::load(Some(Path::new("/nonexistent/ptydock.toml"))).unwrap();
        assert_eq!(t.output_budget, 128 * 1024 * 1024);
    }
}
