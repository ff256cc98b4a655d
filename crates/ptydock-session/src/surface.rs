//! Visual-surface boundary.
//!
//! A [`Surface`] is the host-side container a session's terminal is drawn
//! into (a tab, a panel, a window). The session attaches to at most one
//! surface at a time; the surface reports its dimensions and notifies the
//! session when they change. Everything else about the surface (layout,
//! theming, widgets) belongs to the host.

use ptydock_core::Size;

pub trait Surface: Send {
    /// Stable identity, used to detect re-attachment to the same surface.
    fn id(&self) -> &str;

    /// Current container dimensions in character cells. May be 0×0 while the
    /// host's layout has not settled.
    fn dimensions(&self) -> Size;

    /// Install a resize observer. The observer stops firing when the
    /// returned guard is dropped.
    fn observe_resize(&self, observer: Box<dyn Fn(Size) + Send + Sync>) -> ResizeGuard;

    /// Ask the host to give this surface input focus.
    fn request_focus(&self);
}

/// Cancels a resize observation on drop.
pub struct ResizeGuard {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl ResizeGuard {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A guard with nothing to cancel, for surfaces that cannot resize.
    pub fn noop() -> Self {
        Self { cancel: None }
    }
}

impl Drop for ResizeGuard {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}
