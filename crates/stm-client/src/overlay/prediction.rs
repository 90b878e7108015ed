//! Speculative local echo.
//!
//! For every byte the user types, the engine enqueues conditional
//! elements describing what the server's echo should eventually do to
//! the screen. Observed echoes grade the predictions: a streak of
//! confirmed guesses earns the right to paint ahead of the server, a
//! single wrong guess forfeits everything.

use std::collections::VecDeque;

use tracing::trace;

use stm_core::terminal::Framebuffer;
use stm_core::timing::{RttEstimate, RttEstimator};

use super::item::{ConditionalCursorMove, ConditionalOverlayCell, OverlayItem, Validity};

/// Confirmed-prediction streak required before overlays are painted.
const SCORE_GATE: i32 = 3;

/// Echo SRTT above which predictions are underlined (ms).
const FLAG_ON_SRTT: f64 = 150.0;

/// Echo SRTT below which underlining stops (ms).
const FLAG_OFF_SRTT: f64 = 100.0;

/// Stand-in estimate until the first echo is measured: assume a slow
/// link, so early predictions get generous TTLs.
const SLOW_LINK_GUESS: RttEstimate = RttEstimate {
    smoothed: 1000.0,
    deviation: 500.0,
};

/// Engine for predictive local echo.
#[derive(Debug)]
pub struct PredictionEngine {
    /// Front element is the predicted cursor; cells follow in typing order.
    elements: VecDeque<OverlayItem>,
    /// Streak of observationally-confirmed predictions.
    score: i32,
    /// Estimator over confirmed-echo round trips; sizes TTLs.
    rtt: RttEstimator,
    /// Underline predictions (high-latency hint to the user).
    flagging: bool,
}

impl Default for PredictionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PredictionEngine {
    /// A fresh engine with no echo measurements.
    pub fn new() -> Self {
        Self {
            elements: VecDeque::new(),
            score: 0,
            rtt: RttEstimator::new(),
            flagging: false,
        }
    }

    fn echo_rtt(&self) -> RttEstimate {
        self.rtt.estimate_or(SLOW_LINK_GUESS)
    }

    /// Predicted-element TTL: a retransmission-timeout-style bound over
    /// echo round trips, clamped to [20, 2000] ms.
    pub fn prediction_len(&self) -> u64 {
        let rtt = self.echo_rtt();
        let rto = (1.25 * rtt.smoothed + 8.0 * rtt.deviation).ceil() as i64;
        rto.clamp(20, 2000) as u64
    }

    /// The user typed `byte`; enqueue its predicted effect.
    pub fn new_user_byte(&mut self, byte: u8, fb: &Framebuffer, now: u64) {
        // Starting from scratch, or the cursor claim settled and was
        // culled while cells remained: anchor a fresh one at the
        // actual cursor.
        if !matches!(self.elements.front(), Some(OverlayItem::Cursor(_))) {
            self.elements
                .push_front(OverlayItem::Cursor(ConditionalCursorMove {
                    expiration_time: now + self.prediction_len(),
                    prediction_time: now,
                    new_row: fb.ds.get_cursor_row(),
                    new_col: fb.ds.get_cursor_col(),
                }));
        }

        let (cursor_row, cursor_col) = match self.elements.front() {
            Some(OverlayItem::Cursor(c)) => (c.new_row, c.new_col),
            _ => unreachable!("front is a cursor move"),
        };

        if cursor_row >= fb.ds.get_height() || cursor_col >= fb.ds.get_width() {
            return;
        }

        let printable = (0x20..=0x7E).contains(&byte);
        if printable && cursor_col < fb.ds.get_width().saturating_sub(2) {
            let Some(existing) = fb.get_cell(cursor_row, cursor_col) else {
                return;
            };
            let mut replacement = existing.clone();
            replacement.contents = vec![byte as char];
            replacement.width = 1;

            let cell = ConditionalOverlayCell {
                expiration_time: now + self.prediction_len(),
                prediction_time: now,
                row: cursor_row,
                col: cursor_col,
                original_contents: existing.clone(),
                replacement,
                flag: self.flagging,
            };

            let new_expiration_time = now + self.prediction_len();
            if let Some(OverlayItem::Cursor(front)) = self.elements.front_mut() {
                front.new_col += 1;
                front.expiration_time = new_expiration_time;
            }
            self.elements.push_back(OverlayItem::Cell(cell));
        } else {
            // Control bytes and the screen edge have effects we cannot
            // guess; stop speculating until the streak rebuilds.
            self.clear();
            self.score = 0;
        }
    }

    /// Grade pending predictions against the observed framebuffer.
    ///
    /// One wrong or expired element forfeits the streak and every
    /// outstanding prediction with it.
    pub fn calculate_score(&mut self, fb: &Framebuffer, now: u64) {
        for i in 0..self.elements.len() {
            match self.elements[i].get_validity(fb, now) {
                Validity::Pending => continue,
                Validity::Correct => self.score += 1,
                Validity::IncorrectOrExpired => {
                    trace!(target: "stm_client::prediction", "misprediction, clearing");
                    self.score = 0;
                    self.clear();
                    return;
                }
            }
        }
    }

    /// Feed settled predictions into the echo estimator and drop them.
    pub fn cull(&mut self, fb: &Framebuffer, now: u64) {
        let mut i = 0;
        while i < self.elements.len() {
            if self.elements[i].get_validity(fb, now) == Validity::Correct {
                let r = now.saturating_sub(self.elements[i].prediction_time());
                self.rtt.observe(r as f64);
            }

            if self.elements[i].get_validity(fb, now) != Validity::Pending {
                let _ = self.elements.remove(i);
            } else {
                i += 1;
            }
        }

        // Hysteresis keeps the underlining from flickering near the
        // threshold.
        let srtt = self.echo_rtt().smoothed;
        if srtt > FLAG_ON_SRTT {
            self.flagging = true;
        }
        if srtt < FLAG_OFF_SRTT {
            self.flagging = false;
        }
    }

    /// Paint predictions over the framebuffer. Callers gate on
    /// [`score`](Self::score).
    pub fn apply(&self, fb: &mut Framebuffer) {
        for element in &self.elements {
            element.apply(fb);
        }
    }

    /// Drop every outstanding prediction.
    pub fn clear(&mut self) {
        self.elements.clear();
    }

    /// Whether a painted overlay is currently earned.
    pub fn should_display(&self) -> bool {
        self.score > SCORE_GATE
    }

    /// Current confirmed-prediction streak.
    pub fn score(&self) -> i32 {
        self.score
    }

    /// Smoothed echo round-trip estimate (ms).
    pub fn srtt(&self) -> f64 {
        self.echo_rtt().smoothed
    }

    /// Whether predictions render underlined.
    pub fn flagging(&self) -> bool {
        self.flagging
    }

    /// Earliest TTL deadline among outstanding predictions.
    pub fn min_expiration(&self) -> Option<u64> {
        self.elements.iter().map(OverlayItem::expiration_time).min()
    }

    /// Number of outstanding elements (cursor claim included).
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether no predictions are outstanding.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
