//! PTY-backed terminal session lifecycle and snapshot management.
//!
//! The central type is [`TerminalSession`]: one per logical terminal, owning
//! a startup state machine, a detachable visual surface, a memory guardrail
//! over process output, and a periodic + detach-debounced snapshot protocol.
//! The process itself lives behind [`ProcessTransport`] and persistence
//! behind [`SnapshotStore`], both dyn-safe so hosts and tests can swap in
//! their own.

pub mod config;
pub mod guardrail;
pub mod listeners;
pub mod screen;
pub mod session;
pub mod store;
pub mod surface;
pub mod transport;

pub use config::SessionTuning;
pub use guardrail::{MemoryGuardrail, DEFAULT_OUTPUT_BUDGET};
pub use listeners::{ListenerRegistry, Subscription};
pub use screen::{Screen, Vt100Screen};
pub use session::{Activity, SessionState, TerminalSession};
pub use store::{FileSnapshotStore, SnapshotStore};
pub use surface::{ResizeGuard, Surface};
pub use transport::{
    BoxFuture, ExitStatus, ProcessTransport, PtyTransport, StartOptions, TransportEvent,
};
