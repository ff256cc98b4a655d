//! PTY transport using portable-pty.
//!
//! Spawns a shell (or an override command) on a pseudo-terminal per session
//! id and bridges its blocking reader into the async event stream.

use super::{ExitStatus, ProcessTransport, StartOptions, TransportEvent};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use ptydock_core::{SessionError, SessionId, SessionResult, Size};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const READ_BUF_SIZE: usize = 4096;

struct PtyEntry {
    writer: Box<dyn Write + Send>,
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    events: Option<mpsc::Receiver<TransportEvent>>,
}

/// Process transport backed by the host's native PTY implementation.
#[derive(Default)]
pub struct PtyTransport {
    sessions: Mutex<HashMap<SessionId, PtyEntry>>,
}

impl PtyTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn pty_size(size: Size) -> PtySize {
        PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    fn spawn_blocking_pumps(
        id: &SessionId,
        mut reader: Box<dyn Read + Send>,
        mut child: Box<dyn portable_pty::Child + Send + Sync>,
        tx: mpsc::Sender<TransportEvent>,
    ) {
        // Output pump: blocking reads bridged onto the event channel. Ends at
        // EOF (process exited) or when the session stops listening.
        let data_tx = tx.clone();
        let read_id = id.clone();
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if data_tx
                            .blocking_send(TransportEvent::Data(buf[..n].to_vec()))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(session_id = %read_id, error = %e, "PTY read ended");
                        break;
                    }
                }
            }
        });

        // Exit pump: waits for the child and reports how it ended.
        let exit_id = id.clone();
        tokio::task::spawn_blocking(move || {
            let status = child.wait();
            let exit_code = match &status {
                Ok(s) => s.exit_code() as i32,
                Err(_) => -1,
            };
            info!(session_id = %exit_id, exit_code, "PTY child exited");
            let _ = tx.blocking_send(TransportEvent::Exit(ExitStatus {
                exit_code,
                signal: None,
            }));
        });
    }
}

impl ProcessTransport for PtyTransport {
    fn start<'a>(
        &'a self,
        id: &'a SessionId,
        size: Size,
        options: &'a StartOptions,
    ) -> super::BoxFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            {
                let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
                if sessions.contains_key(id) {
                    return Err(SessionError::IllegalState(format!(
                        "transport already started for session {id}"
                    )));
                }
            }

            let pty_system = native_pty_system();
            let pair = pty_system
                .openpty(Self::pty_size(size))
                .map_err(|e| SessionError::TransportStart(format!("failed to open PTY: {e}")))?;

            let shell = options
                .shell
                .clone()
                .or_else(|| std::env::var("SHELL").ok())
                .unwrap_or_else(|| "/bin/sh".to_string());
            let mut cmd = CommandBuilder::new(&shell);
            if let Some(cwd) = &options.cwd {
                cmd.cwd(cwd);
            }
            for (key, value) in &options.env {
                cmd.env(key, value);
            }
            if !options.env.contains_key("TERM") {
                cmd.env("TERM", "xterm-256color");
            }
            if options.auto_approve {
                cmd.env("PTYDOCK_AUTO_APPROVE", "1");
            }

            let child = pair.slave.spawn_command(cmd).map_err(|e| {
                SessionError::TransportStart(format!("failed to spawn {shell}: {e}"))
            })?;
            info!(session_id = %id, shell = %shell, size = %size, "PTY spawned");

            let reader = pair.master.try_clone_reader().map_err(|e| {
                SessionError::TransportStart(format!("failed to clone PTY reader: {e}"))
            })?;
            let mut writer = pair.master.take_writer().map_err(|e| {
                SessionError::TransportStart(format!("failed to take PTY writer: {e}"))
            })?;
            let killer = child.clone_killer();

            if let Some(input) = &options.initial_input {
                writer.write_all(input.as_bytes())?;
                writer.flush()?;
            }

            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            // The PTY is live by the time start resolves; the explicit ack
            // covers consumers that subscribe before inspecting our result.
            let _ = tx.try_send(TransportEvent::Started);
            Self::spawn_blocking_pumps(id, reader, child, tx);

            let entry = PtyEntry {
                writer,
                master: pair.master,
                killer,
                events: Some(rx),
            };
            self.sessions
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(id.clone(), entry);
            Ok(())
        })
    }

    fn write<'a>(&'a self, id: &'a SessionId, data: &'a [u8]) -> super::BoxFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            let entry = sessions
                .get_mut(id)
                .ok_or_else(|| SessionError::TransportRuntime(format!("no PTY for session {id}")))?;
            entry
                .writer
                .write_all(data)
                .and_then(|_| entry.writer.flush())
                .map_err(|e| SessionError::TransportRuntime(format!("PTY write failed: {e}")))
        })
    }

    fn resize<'a>(&'a self, id: &'a SessionId, size: Size) -> super::BoxFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            let entry = sessions
                .get(id)
                .ok_or_else(|| SessionError::TransportRuntime(format!("no PTY for session {id}")))?;
            entry
                .master
                .resize(Self::pty_size(size))
                .map_err(|e| SessionError::TransportRuntime(format!("PTY resize failed: {e}")))?;
            debug!(session_id = %id, size = %size, "PTY resized");
            Ok(())
        })
    }

    fn kill<'a>(&'a self, id: &'a SessionId) -> super::BoxFuture<'a, SessionResult<()>> {
        Box::pin(async move {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = sessions.get_mut(id) else {
                return Ok(());
            };
            if let Err(e) = entry.killer.kill() {
                // Killing an already-exited child reports an error on some
                // platforms; the session is tearing down either way.
                warn!(session_id = %id, error = %e, "PTY kill reported an error");
            }
            sessions.remove(id);
            Ok(())
        })
    }

    fn take_events(&self, id: &SessionId) -> Option<mpsc::Receiver<TransportEvent>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get_mut(id).and_then(|entry| entry.events.take())
    }
}
