//! Session lifecycle & snapshot manager.
//!
//! One [`TerminalSession`] per logical workspace/tab. The session owns the
//! lifecycle state machine, the attach/detach protocol for its visual
//! surface, the periodic+debounced snapshot protocol, the memory guardrail
//! over process output, and the four listener registries.
//!
//! All mutable state lives in one `SessionInner` behind a single async
//! mutex; spawned completions (startup, event pump, snapshot timer) re-check
//! the lifecycle state under that lock, so a completion arriving after
//! dispose is harmless rather than cancelled.

use crate::config::SessionTuning;
use crate::guardrail::MemoryGuardrail;
use crate::listeners::{ListenerRegistry, Subscription};
use crate::screen::Screen;
use crate::store::SnapshotStore;
use crate::surface::{ResizeGuard, Surface};
use crate::transport::{ExitStatus, ProcessTransport, StartOptions, TransportEvent};
use ptydock_core::{
    now_millis, SessionError, SessionId, SessionResult, Size, SnapshotPayload, SnapshotReason,
    SnapshotStats, SNAPSHOT_VERSION,
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Grace period for one follow-up re-fit after attach, absorbing host layout
/// that had not settled when the surface reported its first dimensions.
const FRAME_SETTLE_DELAY: Duration = Duration::from_millis(16);

/// Lifecycle states. Attachment is orthogonal (`SessionInner::attached`);
/// `Disposed` is terminal and reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    RestoringSnapshot,
    Connecting,
    Running,
    Exited,
    Disposed,
}

/// Payload for activity listeners: some process output was observed.
#[derive(Debug, Clone, Copy)]
pub struct Activity {
    pub bytes: usize,
}

/// The attached half of the surface protocol. Dropping it cancels resize
/// observation and stops the coalescing task.
struct AttachedSurface {
    surface: Box<dyn Surface>,
    _resize_guard: ResizeGuard,
    resize_task: JoinHandle<()>,
}

impl Drop for AttachedSurface {
    fn drop(&mut self) {
        self.resize_task.abort();
    }
}

struct SessionInner {
    state: SessionState,
    /// Authoritative current dimensions.
    size: Size,
    /// Size set while the transport was not yet running; flushed on the
    /// `Connecting → Running` transition.
    pending_size: Option<Size>,
    /// The render container. Owned by the session for its whole life; a
    /// surface only hosts it while attached.
    screen: Box<dyn Screen>,
    attached: Option<AttachedSurface>,
    guardrail: MemoryGuardrail,
    /// Debounce bookkeeping; reflects capture *completions*.
    last_snapshot_at: Option<Instant>,
    last_snapshot_reason: Option<SnapshotReason>,
    /// At most one capture initiation in flight per session.
    snapshot_in_flight: bool,
    cleanups: Vec<Box<dyn FnOnce() + Send>>,
    timer: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

/// One detachable, snapshot-backed terminal session.
pub struct TerminalSession {
    id: SessionId,
    transport: Arc<dyn ProcessTransport>,
    store: Option<Arc<dyn SnapshotStore>>,
    tuning: SessionTuning,
    inner: Mutex<SessionInner>,
    activity: ListenerRegistry<Activity>,
    ready: ListenerRegistry<()>,
    errors: ListenerRegistry<String>,
    exits: ListenerRegistry<ExitStatus>,
}

impl TerminalSession {
    /// Create a session and begin its startup sequence: restore the last
    /// snapshot (best effort), then request transport start exactly once.
    /// Returns immediately; observe progress through the listener registries.
    pub async fn launch(
        id: SessionId,
        screen: Box<dyn Screen>,
        transport: Arc<dyn ProcessTransport>,
        store: Option<Arc<dyn SnapshotStore>>,
        tuning: SessionTuning,
        initial_size: Size,
        options: StartOptions,
    ) -> Arc<Self> {
        let guardrail = MemoryGuardrail::new(tuning.output_budget);
        let session = Arc::new(Self {
            id,
            transport,
            store,
            tuning,
            inner: Mutex::new(SessionInner {
                state: SessionState::Created,
                size: initial_size,
                pending_size: None,
                screen,
                attached: None,
                guardrail,
                last_snapshot_at: None,
                last_snapshot_reason: None,
                snapshot_in_flight: false,
                cleanups: Vec::new(),
                timer: None,
                pump: None,
            }),
            activity: ListenerRegistry::new("activity"),
            ready: ListenerRegistry::new("ready"),
            errors: ListenerRegistry::new("error"),
            exits: ListenerRegistry::new("exit"),
        });

        let startup = session.clone();
        tokio::spawn(async move { startup.run_startup(options).await });

        let weak = Arc::downgrade(&session);
        let interval = session.tuning.snapshot_interval;
        let timer = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(session) = weak.upgrade() else { break };
                if session.state().await == SessionState::Disposed {
                    break;
                }
                session.capture(SnapshotReason::Interval).await;
            }
        });
        session.inner.lock().await.timer = Some(timer);

        session
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn size(&self) -> Size {
        self.inner.lock().await.size
    }

    pub async fn is_attached(&self) -> bool {
        self.inner.lock().await.attached.is_some()
    }

    /// Current visible-buffer text, as the snapshot protocol would serialize
    /// it.
    pub async fn visible_text(&self) -> String {
        self.inner.lock().await.screen.visible_text()
    }

    // ── Startup ────────────────────────────────────────────────────────

    async fn run_startup(self: Arc<Self>, options: StartOptions) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Created {
                return;
            }
            inner.state = SessionState::RestoringSnapshot;
        }

        self.restore_snapshot().await;

        let size = {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Disposed {
                return;
            }
            inner.state = SessionState::Connecting;
            inner.size
        };

        // Exactly one start request per session lifetime.
        match self.transport.start(&self.id, size, &options).await {
            Ok(()) => {
                self.mark_ready().await;
                self.start_pump().await;
            }
            Err(e) => {
                {
                    let mut inner = self.inner.lock().await;
                    if inner.state == SessionState::Disposed {
                        return;
                    }
                    inner.state = SessionState::Exited;
                }
                warn!(session_id = %self.id, error = %e, "transport start failed");
                self.errors.emit(&e.to_string());
            }
        }
    }

    /// Restore failure is non-fatal in every form: missing, corrupt, or a
    /// version mismatch all leave the screen blank.
    async fn restore_snapshot(&self) {
        let Some(store) = &self.store else { return };
        match store.get(&self.id).await {
            Ok(Some(payload)) if payload.version_matches() => {
                let mut inner = self.inner.lock().await;
                if inner.state == SessionState::Disposed {
                    return;
                }
                let size = Size::new(payload.cols, payload.rows);
                if size.is_sized() {
                    inner.screen.resize(size);
                    inner.size = size;
                }
                // Stored text uses bare newlines; the emulator needs CRLF to
                // return to column zero.
                let data = payload.data.replace('\n', "\r\n");
                inner.screen.feed(data.as_bytes());
                debug!(session_id = %self.id, size = %size, "snapshot restored");
            }
            Ok(Some(payload)) => {
                warn!(
                    session_id = %self.id,
                    found = payload.version,
                    expected = SNAPSHOT_VERSION,
                    "snapshot version mismatch, starting blank"
                );
            }
            Ok(None) => {}
            Err(e) => {
                debug!(session_id = %self.id, error = %e, "snapshot restore failed, starting blank");
            }
        }
    }

    /// `Connecting → Running`: flush a pending size and fire `ready`.
    /// Idempotent, so a late `Started` event is a no-op once the start
    /// acknowledgment already ran.
    async fn mark_ready(&self) {
        let flush = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                SessionState::Connecting => {}
                _ => return,
            }
            inner.state = SessionState::Running;
            inner.pending_size.take()
        };
        info!(session_id = %self.id, "transport running");
        if let Some(size) = flush {
            if let Err(e) = self.transport.resize(&self.id, size).await {
                warn!(session_id = %self.id, error = %e, "pending size flush failed");
            }
        }
        self.ready.emit(&());
    }

    /// Take the transport's event stream and spawn the pump for it. Runs
    /// once, from the start-acknowledgment path.
    async fn start_pump(self: &Arc<Self>) {
        if let Some(rx) = self.transport.take_events(&self.id) {
            let pump = tokio::spawn(run_pump(Arc::downgrade(self), rx));
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Disposed {
                pump.abort();
                return;
            }
            inner.pump = Some(pump);
        }
    }

    // ── Output path ────────────────────────────────────────────────────

    async fn ingest(&self, chunk: &[u8]) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Disposed {
                return;
            }
            if inner.guardrail.can_accept(chunk.len()) {
                inner.guardrail.record(chunk.len());
                inner.screen.feed(chunk);
            } else {
                // Deliberate data loss: drop the whole buffer (and this
                // chunk) rather than retain unbounded output.
                let notice = format!(
                    "\r\n[ptydock] output budget exceeded ({} MiB); buffer cleared\r\n",
                    self.tuning.output_budget >> 20
                );
                inner.screen.clear();
                inner.screen.feed(notice.as_bytes());
                inner.guardrail.reset();
                inner.guardrail.note_truncation();
                warn!(
                    session_id = %self.id,
                    budget = self.tuning.output_budget,
                    "output budget exceeded, buffer truncated"
                );
            }
        }
        self.activity.emit(&Activity { bytes: chunk.len() });
    }

    async fn on_exit(&self, status: ExitStatus) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Disposed {
                return;
            }
            inner.state = SessionState::Exited;
            inner.guardrail.record_exit();
        }
        info!(
            session_id = %self.id,
            exit_code = status.exit_code,
            signal = ?status.signal,
            "process exited"
        );
        self.exits.emit(&status);
    }

    // ── Attach / detach ────────────────────────────────────────────────

    /// Attach the session's render container to `surface`.
    ///
    /// No-op when already attached to that surface; detaches first when
    /// attached elsewhere. Fails fast on a disposed session.
    pub async fn attach(self: &Arc<Self>, surface: Box<dyn Surface>) -> SessionResult<()> {
        let switched = {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Disposed {
                return Err(SessionError::IllegalState(
                    "attach on a disposed session".into(),
                ));
            }
            if let Some(attached) = &inner.attached {
                if attached.surface.id() == surface.id() {
                    return Ok(());
                }
            }
            // At most one attachment: park the container before adopting the
            // new surface.
            inner.attached.take().is_some()
        };

        // Detach first: the capture runs before the new surface's dimensions
        // touch the buffer, so the snapshot reflects the state at detach.
        if switched {
            self.capture(SnapshotReason::Detach).await;
        }

        let forward = {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Disposed {
                return Err(SessionError::IllegalState(
                    "attach on a disposed session".into(),
                ));
            }
            if !inner.screen.is_open() {
                inner.screen.open();
            }

            let dims = surface.dimensions();
            if dims.is_sized() {
                inner.screen.resize(dims);
                inner.size = dims;
            }
            let running = inner.state == SessionState::Running;
            if !running && dims.is_sized() {
                inner.pending_size = Some(dims);
            }

            // Coalesce resize reports to the latest size.
            let (tx, rx) = watch::channel(dims);
            let guard = surface.observe_resize(Box::new(move |size| {
                let _ = tx.send(size);
            }));
            let weak = Arc::downgrade(self);
            let resize_task = tokio::spawn(watch_resizes(weak.clone(), rx));
            inner.attached = Some(AttachedSurface {
                surface,
                _resize_guard: guard,
                resize_task,
            });

            // One follow-up re-fit to absorb layout not settled yet.
            tokio::spawn(async move {
                tokio::time::sleep(FRAME_SETTLE_DELAY).await;
                if let Some(session) = weak.upgrade() {
                    session.refit().await;
                }
            });

            running && dims.is_sized()
        };

        if forward {
            let size = self.size().await;
            if let Err(e) = self.transport.resize(&self.id, size).await {
                warn!(session_id = %self.id, error = %e, "resize after attach failed");
            }
        }
        info!(session_id = %self.id, "surface attached");
        Ok(())
    }

    /// Park the render container off-surface. No-op when not attached.
    /// Triggers a capture tagged `detach` (subject to the debounce rule).
    pub async fn detach(&self) {
        let had = {
            let mut inner = self.inner.lock().await;
            inner.attached.take()
        };
        if had.is_none() {
            return;
        }
        debug!(session_id = %self.id, "surface detached");
        self.capture(SnapshotReason::Detach).await;
    }

    async fn refit(self: &Arc<Self>) {
        let dims = {
            let inner = self.inner.lock().await;
            inner.attached.as_ref().map(|a| a.surface.dimensions())
        };
        if let Some(dims) = dims {
            self.resize(dims).await;
        }
    }

    /// Fit the buffer to `size` and forward it to the transport when
    /// running. Sizes arriving before `Running` are kept pending and flushed
    /// on the transition; only the latest pending size survives.
    pub async fn resize(&self, size: Size) {
        if !size.is_sized() {
            return;
        }
        let forward = {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Disposed {
                return;
            }
            inner.screen.resize(size);
            inner.size = size;
            if inner.state == SessionState::Running {
                true
            } else {
                inner.pending_size = Some(size);
                false
            }
        };
        if forward {
            if let Err(e) = self.transport.resize(&self.id, size).await {
                warn!(session_id = %self.id, error = %e, "transport resize failed");
            }
        }
    }

    // ── Input ──────────────────────────────────────────────────────────

    /// Forward user input to the process, in the order received. Input after
    /// exit is dropped; input after dispose fails fast.
    pub async fn write_input(&self, data: &[u8]) -> SessionResult<()> {
        {
            let inner = self.inner.lock().await;
            match inner.state {
                SessionState::Disposed => {
                    return Err(SessionError::IllegalState(
                        "write on a disposed session".into(),
                    ));
                }
                SessionState::Exited => {
                    debug!(session_id = %self.id, "dropping input, process already exited");
                    return Ok(());
                }
                _ => {}
            }
        }
        self.transport.write(&self.id, data).await
    }

    // ── Snapshot protocol ──────────────────────────────────────────────

    /// Capture the visible buffer and persist it through the store.
    ///
    /// Skips entirely when there is no store, when a capture is already in
    /// flight, when a `detach` capture lands inside the debounce window of
    /// the previous completed `detach` capture, or when a `detach` capture
    /// would persist an empty buffer. `interval` and `dispose` captures
    /// persist even an empty buffer, keeping stored dimensions current.
    /// Refused outright once the session is disposed; the final
    /// dispose-tagged capture runs on a private path inside [`dispose`].
    ///
    /// [`dispose`]: TerminalSession::dispose
    pub async fn capture(&self, reason: SnapshotReason) {
        if self.inner.lock().await.state == SessionState::Disposed {
            return;
        }
        self.capture_inner(reason).await;
    }

    async fn capture_inner(&self, reason: SnapshotReason) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let payload = {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Disposed && reason != SnapshotReason::Dispose {
                return;
            }
            if inner.snapshot_in_flight {
                debug!(session_id = %self.id, %reason, "capture already in flight, skipping");
                return;
            }
            if reason == SnapshotReason::Detach
                && inner.last_snapshot_reason == Some(SnapshotReason::Detach)
            {
                if let Some(at) = inner.last_snapshot_at {
                    if at.elapsed() < self.tuning.detach_debounce {
                        debug!(session_id = %self.id, "detach capture debounced");
                        return;
                    }
                }
            }
            let data = inner.screen.visible_text();
            if data.is_empty() && reason == SnapshotReason::Detach {
                return;
            }
            inner.snapshot_in_flight = true;
            SnapshotPayload {
                version: SNAPSHOT_VERSION,
                created_at: now_millis(),
                cols: inner.size.cols,
                rows: inner.size.rows,
                data,
                stats: SnapshotStats {
                    bytes_since_reset: inner.guardrail.bytes_since_reset(),
                    truncations: inner.guardrail.truncations(),
                    reason,
                },
            }
        };

        let result = store.save(&self.id, &payload).await;

        let mut inner = self.inner.lock().await;
        inner.snapshot_in_flight = false;
        // Timestamp bookkeeping is unconditional so a failing store cannot
        // hold the debounce window open; counter reset is success-only.
        inner.last_snapshot_at = Some(Instant::now());
        inner.last_snapshot_reason = Some(reason);
        match result {
            Ok(()) => {
                inner.guardrail.reset();
                debug!(session_id = %self.id, %reason, "snapshot captured");
            }
            Err(e) => {
                warn!(session_id = %self.id, %reason, error = %e, "snapshot save failed");
            }
        }
    }

    // ── Dispose ────────────────────────────────────────────────────────

    /// Tear the session down. Idempotent and terminal; every step is
    /// best-effort so a partial failure never aborts the rest.
    pub async fn dispose(&self) {
        let (attached, timer, pump) = {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Disposed {
                return;
            }
            inner.state = SessionState::Disposed;
            (inner.attached.take(), inner.timer.take(), inner.pump.take())
        };
        // Detach first: stops resize observation; the container stays with
        // the session.
        drop(attached);

        // Final capture, tagged dispose. The private path is the only one
        // that may run in the Disposed state; an interval capture already in
        // flight covers it.
        self.capture_inner(SnapshotReason::Dispose).await;

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(pump) = pump {
            pump.abort();
        }

        if let Err(e) = self.transport.kill(&self.id).await {
            warn!(session_id = %self.id, error = %e, "transport kill failed");
        }

        let cleanups = {
            let mut inner = self.inner.lock().await;
            std::mem::take(&mut inner.cleanups)
        };
        for cleanup in cleanups {
            cleanup();
        }

        self.activity.clear();
        self.ready.clear();
        self.errors.clear();
        self.exits.clear();
        info!(session_id = %self.id, "session disposed");
    }

    // ── Host passthroughs ──────────────────────────────────────────────

    pub async fn set_theme(&self, theme: &str) {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Disposed {
            return;
        }
        inner.screen.set_theme(theme);
    }

    pub async fn focus(&self) {
        let inner = self.inner.lock().await;
        if let Some(attached) = &inner.attached {
            attached.surface.request_focus();
        }
    }

    /// Register an action to run once at dispose. Runs immediately when the
    /// session is already disposed.
    pub async fn register_cleanup(&self, cleanup: impl FnOnce() + Send + 'static) {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Disposed {
            drop(inner);
            cleanup();
            return;
        }
        inner.cleanups.push(Box::new(cleanup));
    }

    // ── Listener registration ──────────────────────────────────────────

    pub fn register_activity_listener(
        &self,
        listener: impl Fn(&Activity) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.activity.register(listener)
    }

    pub fn register_ready_listener(
        &self,
        listener: impl Fn(&()) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.ready.register(listener)
    }

    pub fn register_error_listener(
        &self,
        listener: impl Fn(&String) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.errors.register(listener)
    }

    pub fn register_exit_listener(
        &self,
        listener: impl Fn(&ExitStatus) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Subscription {
        self.exits.register(listener)
    }

    /// Whether any listener remains registered, across all four registries.
    pub fn has_listeners(&self) -> bool {
        !(self.activity.is_empty()
            && self.ready.is_empty()
            && self.errors.is_empty()
            && self.exits.is_empty())
    }
}

/// Consume the transport event stream until it closes or the process exits.
async fn run_pump(weak: Weak<TerminalSession>, mut rx: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(session) = weak.upgrade() else { return };
        match event {
            TransportEvent::Started => session.mark_ready().await,
            TransportEvent::Data(chunk) => session.ingest(&chunk).await,
            TransportEvent::Exit(status) => {
                session.on_exit(status).await;
                return;
            }
        }
    }
}

/// Apply coalesced surface resizes; the watch channel keeps only the latest
/// size, so there is never a queue of stale dimensions.
async fn watch_resizes(weak: Weak<TerminalSession>, mut rx: watch::Receiver<Size>) {
    while rx.changed().await.is_ok() {
        let size = *rx.borrow_and_update();
        let Some(session) = weak.upgrade() else { return };
        session.resize(size).await;
    }
}
