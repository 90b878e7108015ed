//! Overlay primitives and the engines that manage them.
//!
//! An overlay element is a conditional claim about the framebuffer: "by
//! the time my TTL runs out, this cell will show X" or "the cursor will
//! be here". Elements start `Pending`, settle exactly once into
//! `Correct` or `IncorrectOrExpired`, and are removed on settling.

mod item;
mod manager;
mod notification;
mod prediction;

#[cfg(test)]
mod proptest;

pub use item::{ConditionalCursorMove, ConditionalOverlayCell, OverlayItem, Validity};
pub use manager::OverlayManager;
pub use notification::NotificationEngine;
pub use prediction::PredictionEngine;
