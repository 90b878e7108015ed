//! Conditional overlay elements.

use stm_core::terminal::{Cell, Framebuffer};

/// How an element's claim stands against the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Not yet decidable and not expired.
    Pending,
    /// The framebuffer agrees with the claim.
    Correct,
    /// The framebuffer disagrees, or the TTL passed first.
    IncorrectOrExpired,
}

/// A speculative cell overwrite.
#[derive(Debug, Clone)]
pub struct ConditionalOverlayCell {
    /// Local clock (ms) past which the claim expires.
    pub expiration_time: u64,
    /// When the prediction was made; Correct settling feeds the RTT
    /// estimator with `now - prediction_time`.
    pub prediction_time: u64,
    pub row: usize,
    pub col: usize,
    /// What the cell showed when the prediction was made.
    pub original_contents: Cell,
    /// What we claim it will show.
    pub replacement: Cell,
    /// Render the prediction underlined.
    pub flag: bool,
}

impl ConditionalOverlayCell {
    /// Judge the claim against the framebuffer.
    pub fn get_validity(&self, fb: &Framebuffer, now: u64) -> Validity {
        if self.row >= fb.ds.get_height() || self.col >= fb.ds.get_width() {
            return Validity::IncorrectOrExpired;
        }
        let Some(current) = fb.get_cell(self.row, self.col) else {
            return Validity::IncorrectOrExpired;
        };

        if *current == self.replacement {
            return Validity::Correct;
        }
        if *current == self.original_contents && now < self.expiration_time {
            return Validity::Pending;
        }
        Validity::IncorrectOrExpired
    }

    /// Paint the claimed cell over the framebuffer.
    pub fn apply(&self, fb: &mut Framebuffer) {
        let flag = self.flag;
        let replacement = &self.replacement;
        let Some(cell) = fb.get_mutable_cell(self.row, self.col) else {
            return;
        };
        if cell != replacement {
            *cell = replacement.clone();
            if flag {
                cell.renditions.underlined = true;
            }
        }
    }
}

/// A speculative cursor position.
#[derive(Debug, Clone)]
pub struct ConditionalCursorMove {
    /// Local clock (ms) past which the claim expires.
    pub expiration_time: u64,
    /// When the prediction was made.
    pub prediction_time: u64,
    pub new_row: usize,
    pub new_col: usize,
}

impl ConditionalCursorMove {
    /// Judge the claim against the framebuffer's cursor.
    pub fn get_validity(&self, fb: &Framebuffer, now: u64) -> Validity {
        if self.new_row >= fb.ds.get_height() || self.new_col >= fb.ds.get_width() {
            return Validity::IncorrectOrExpired;
        }
        if fb.ds.get_cursor_row() == self.new_row && fb.ds.get_cursor_col() == self.new_col {
            return Validity::Correct;
        }
        if now < self.expiration_time {
            return Validity::Pending;
        }
        Validity::IncorrectOrExpired
    }

    /// Move the cursor to the claimed position.
    pub fn apply(&self, fb: &mut Framebuffer) {
        debug_assert!(self.new_row < fb.ds.get_height());
        debug_assert!(self.new_col < fb.ds.get_width());
        debug_assert!(!fb.ds.origin_mode);
        if self.new_row >= fb.ds.get_height() || self.new_col >= fb.ds.get_width() {
            return;
        }
        fb.ds.move_row(self.new_row, false);
        fb.ds.move_col(self.new_col, false);
    }
}

/// Tagged union of the two element kinds.
#[derive(Debug, Clone)]
pub enum OverlayItem {
    Cell(ConditionalOverlayCell),
    Cursor(ConditionalCursorMove),
}

impl OverlayItem {
    /// Judge this element against the framebuffer.
    pub fn get_validity(&self, fb: &Framebuffer, now: u64) -> Validity {
        match self {
            OverlayItem::Cell(cell) => cell.get_validity(fb, now),
            OverlayItem::Cursor(cursor) => cursor.get_validity(fb, now),
        }
    }

    /// Paint this element over the framebuffer.
    pub fn apply(&self, fb: &mut Framebuffer) {
        match self {
            OverlayItem::Cell(cell) => cell.apply(fb),
            OverlayItem::Cursor(cursor) => cursor.apply(fb),
        }
    }

    /// The element's TTL deadline.
    pub fn expiration_time(&self) -> u64 {
        match self {
            OverlayItem::Cell(cell) => cell.expiration_time,
            OverlayItem::Cursor(cursor) => cursor.expiration_time,
        }
    }

    /// When the element was predicted.
    pub fn prediction_time(&self) -> u64 {
        match self {
            OverlayItem::Cell(cell) => cell.prediction_time,
            OverlayItem::Cursor(cursor) => cursor.prediction_time,
        }
    }
}
