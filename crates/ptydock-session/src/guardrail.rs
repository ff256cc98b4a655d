//! Memory guardrail for process output.
//!
//! Tracks cumulative bytes of PTY output admitted since the last reset and
//! signals when accepting a chunk would exceed a fixed budget. The caller
//! owns the corrective action (clear the buffer, write a sentinel notice,
//! reset the counter); the guardrail only counts.

/// Default output budget: 128 MiB between resets.
pub const DEFAULT_OUTPUT_BUDGET: u64 = 128 * 1024 * 1024;

#[derive(Debug)]
pub struct MemoryGuardrail {
    budget: u64,
    bytes_since_reset: u64,
    truncations: u32,
    /// Cleared once the process exits; admitted bytes stop counting but the
    /// totals stay inspectable until the session is disposed.
    counting: bool,
}

impl MemoryGuardrail {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            bytes_since_reset: 0,
            truncations: 0,
            counting: true,
        }
    }

    /// Whether admitting `len` more bytes stays within the budget.
    pub fn can_accept(&self, len: usize) -> bool {
        if !self.counting {
            return true;
        }
        self.bytes_since_reset.saturating_add(len as u64) <= self.budget
    }

    /// Count `len` admitted bytes.
    pub fn record(&mut self, len: usize) {
        if self.counting {
            self.bytes_since_reset = self.bytes_since_reset.saturating_add(len as u64);
        }
    }

    /// Restart the running total (after a successful snapshot or a forced
    /// truncation).
    pub fn reset(&mut self) {
        self.bytes_since_reset = 0;
    }

    /// Note that the caller truncated the buffer in response to a rejection.
    pub fn note_truncation(&mut self) {
        self.truncations += 1;
    }

    /// The process exited; stop counting.
    pub fn record_exit(&mut self) {
        self.counting = false;
    }

    pub fn bytes_since_reset(&self) -> u64 {
        self.bytes_since_reset
    }

    pub fn truncations(&self) -> u32 {
        self.truncations
    }
}

impl Default for MemoryGuardrail {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_BUDGET)
    }
}
