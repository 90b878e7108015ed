//! Property-based tests for the overlay engines.

#![cfg(test)]

use proptest::prelude::*;

use stm_core::terminal::Framebuffer;

use super::notification::NotificationEngine;
use super::prediction::PredictionEngine;

proptest! {
    #[test]
    fn prediction_len_stays_bounded(samples in prop::collection::vec(0u64..10_000, 0..64)) {
        // Feed an arbitrary history of echo delays through confirmed
        // predictions; the TTL must hold its clamp throughout.
        let mut engine = PredictionEngine::new();
        let mut now = 1_000_000u64;
        for delay in samples {
            let mut fb = Framebuffer::new(80, 24);
            engine.new_user_byte(b'a', &fb, now);
            // Echo arrives `delay` ms later.
            let mut echoed = fb.get_cell(0, 0).unwrap().clone();
            echoed.contents = vec!['a'];
            fb.set_cell(0, 0, echoed);
            fb.ds.move_col(1, false);
            engine.cull(&fb, now + delay);
            engine.clear();
            now += delay + 1;

            let len = engine.prediction_len();
            prop_assert!((20..=2000).contains(&len));
        }
    }

    #[test]
    fn banner_layout_never_panics_and_stays_in_order(message in "\\PC{0,200}") {
        let mut engine = NotificationEngine::new(0);
        engine.set_notification_string(&message, 0);
        engine.render_notification(0);

        let mut fb = Framebuffer::new(80, 24);
        engine.apply(&mut fb);

        // Columns must be strictly increasing across laid-out cells.
        let mut last_col = None;
        for cell in engine.cells_for_test() {
            if let Some(prev) = last_col {
                prop_assert!(cell > prev);
            }
            last_col = Some(cell);
        }
    }
}
