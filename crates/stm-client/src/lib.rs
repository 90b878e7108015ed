//! stm-client: the latency-hiding display layer.
//!
//! Sits between the terminal emulator's authoritative framebuffer and
//! the renderer. The [`overlay::PredictionEngine`] speculates about the
//! visual effect of keystrokes in flight; the
//! [`overlay::NotificationEngine`] keeps the user informed when the
//! link goes quiet. Both produce transient cell overrides that are
//! painted at render time and never written back into the
//! authoritative state.

pub mod overlay;

pub use overlay::{
    NotificationEngine, OverlayManager, PredictionEngine, Validity,
};
