//! Rendering-engine boundary.
//!
//! The session never interprets escape sequences itself; it feeds raw PTY
//! output into a [`Screen`] and reads back visible text for snapshots. The
//! screen is the session's render container: owned by the session for its
//! whole life, hosted by whatever surface is currently attached, and parked
//! (state intact) while detached.

mod vt100;

pub use self::vt100::Vt100Screen;

use ptydock_core::Size;

pub trait Screen: Send {
    /// Open the engine against the render container. Idempotent; called on
    /// first attach.
    fn open(&mut self);

    fn is_open(&self) -> bool;

    /// Feed raw process output.
    fn feed(&mut self, data: &[u8]);

    /// Fit the visible buffer to new dimensions.
    fn resize(&mut self, size: Size);

    /// Drop the entire visible buffer and scrollback.
    fn clear(&mut self);

    /// Serialized visible-buffer text, engine-specific encoding. Empty when
    /// nothing has been drawn.
    fn visible_text(&self) -> String;

    fn set_theme(&mut self, theme: &str);
}
