//! Process-transport boundary.
//!
//! The transport owns the real OS-level process behind a session: it spawns,
//! writes, resizes and kills, and it delivers output and exit notifications
//! as an event stream. The lifecycle manager is its only consumer and never
//! touches the process directly.
//!
//! The trait is dyn-safe, so async methods return boxed futures.

mod pty;

pub use pty::PtyTransport;

use ptydock_core::{SessionId, SessionResult, Size};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::sync::mpsc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Startup parameters forwarded verbatim to the transport. Spawning policy
/// (shell selection, environment construction) lives behind the transport.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Working directory for the spawned process.
    pub cwd: Option<PathBuf>,
    /// Shell override; transport default when absent.
    pub shell: Option<String>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Whether the host pre-approved interactive prompts for this session.
    pub auto_approve: bool,
    /// Bytes written to the process immediately after start.
    pub initial_input: Option<String>,
}

/// How the process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub exit_code: i32,
    pub signal: Option<String>,
}

/// Events delivered on a session's transport stream.
#[derive(Debug)]
pub enum TransportEvent {
    /// Late-arriving start confirmation. Transports whose `start` resolves
    /// before the process is actually up send this once it is.
    Started,
    /// A chunk of process output.
    Data(Vec<u8>),
    /// The process exited; no further events follow.
    Exit(ExitStatus),
}

pub trait ProcessTransport: Send + Sync {
    /// Spawn the process for `id`. Called exactly once per session.
    fn start<'a>(
        &'a self,
        id: &'a SessionId,
        size: Size,
        options: &'a StartOptions,
    ) -> BoxFuture<'a, SessionResult<()>>;

    /// Forward user input to the process.
    fn write<'a>(&'a self, id: &'a SessionId, data: &'a [u8]) -> BoxFuture<'a, SessionResult<()>>;

    /// Resize the process's terminal.
    fn resize<'a>(&'a self, id: &'a SessionId, size: Size) -> BoxFuture<'a, SessionResult<()>>;

    /// Terminate the process. Best effort; must be safe after exit.
    fn kill<'a>(&'a self, id: &'a SessionId) -> BoxFuture<'a, SessionResult<()>>;

    /// Take the event stream for `id`. Yields `None` if `start` has not
    /// succeeded or the stream was already taken — the stream is consumed by
    /// exactly one pump.
    fn take_events(&self, id: &SessionId) -> Option<mpsc::Receiver<TransportEvent>>;
}
