//! Orchestrates prediction scoring and banner painting per frame.

use stm_core::terminal::Framebuffer;
use stm_core::timing::timestamp;

use super::notification::NotificationEngine;
use super::prediction::PredictionEngine;

/// Owns both overlay engines and applies them in order.
#[derive(Debug)]
pub struct OverlayManager {
    predictions: PredictionEngine,
    notifications: NotificationEngine,
}

impl Default for OverlayManager {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayManager {
    /// Fresh engines, clock seeded from the process clock.
    pub fn new() -> Self {
        Self {
            predictions: PredictionEngine::new(),
            notifications: NotificationEngine::new(timestamp()),
        }
    }

    /// Score, cull, and (when the streak allows) paint predictions,
    /// then paint the banner. Call once per frame after the emulator
    /// has written its authoritative update.
    pub fn apply(&mut self, fb: &mut Framebuffer) {
        self.apply_at(fb, timestamp());
    }

    /// `apply` with an explicit clock, for deterministic timelines.
    pub fn apply_at(&mut self, fb: &mut Framebuffer, now: u64) {
        self.predictions.calculate_score(fb, now);
        self.predictions.cull(fb, now);
        if self.predictions.should_display() {
            self.predictions.apply(fb);
        }
        self.notifications.render_notification(now);
        self.notifications.apply(fb);
    }

    /// Milliseconds until the next element ages out, or `i32::MAX` when
    /// nothing bounds the wait. Callers treat the sentinel as "no upper
    /// bound", not "never wake": the outer loop still polls on I/O.
    pub fn wait_time(&self) -> i32 {
        self.wait_time_at(timestamp())
    }

    /// `wait_time` with an explicit clock.
    pub fn wait_time_at(&self, now: u64) -> i32 {
        let next_expiry = [
            self.predictions.min_expiration(),
            self.notifications.min_expiration(),
        ]
        .into_iter()
        .flatten()
        .min();

        match next_expiry {
            Some(expiry) if expiry >= now => (expiry - now).min(i32::MAX as u64) as i32,
            _ => i32::MAX,
        }
    }

    /// The prediction engine, for feeding user bytes.
    pub fn predictions_mut(&mut self) -> &mut PredictionEngine {
        &mut self.predictions
    }

    /// Read access to the prediction engine.
    pub fn predictions(&self) -> &PredictionEngine {
        &self.predictions
    }

    /// The notification engine, for pings and messages.
    pub fn notifications_mut(&mut self) -> &mut NotificationEngine {
        &mut self.notifications
    }

    /// Read access to the notification engine.
    pub fn notifications(&self) -> &NotificationEngine {
        &self.notifications
    }
}
