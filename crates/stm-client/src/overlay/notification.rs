//! The connection-health banner.
//!
//! One row of bold white-on-blue text across the top of the screen:
//! transient messages from the host, and a no-contact count-up when
//! the server has gone quiet. Rebuilt at most four times a second
//! unless something latches a render.

use unicode_width::UnicodeWidthChar;

use stm_core::terminal::{Cell, Framebuffer, Renditions};

/// Banner foreground, ANSI SGR white.
const BANNER_FG: u32 = 37;

/// Banner background, ANSI SGR blue.
const BANNER_BG: u32 = 44;

/// How long one rendered banner generation stays valid (ms).
const BANNER_TTL: u64 = 1100;

/// Minimum gap between banner rebuilds (ms) absent a latched render.
const RENDER_GAP: u64 = 250;

/// Silence on the link before the banner counts up (ms).
const NO_CONTACT_THRESHOLD: u64 = 5000;

/// A server-time jump that forces the next render (ms).
const PING_JUMP_THRESHOLD: u64 = 4000;

/// One banner cell, pinned to row 0.
#[derive(Debug, Clone)]
struct BannerCell {
    expiration_time: u64,
    col: usize,
    replacement: Cell,
}

/// Renders the one-line connection-health banner.
#[derive(Debug)]
pub struct NotificationEngine {
    cells: Vec<BannerCell>,
    message: String,
    message_expiration: u64,
    /// Last wall-clock ms we heard from the server.
    last_word: u64,
    needs_render: bool,
    last_render: u64,
}

impl NotificationEngine {
    /// A quiet banner; `now` seeds the last-contact clock.
    pub fn new(now: u64) -> Self {
        Self {
            cells: Vec::new(),
            message: String::new(),
            message_expiration: 0,
            last_word: now,
            needs_render: true,
            last_render: 0,
        }
    }

    /// The server was heard at time `t`.
    ///
    /// A jump after a long gap latches a render so the count-up
    /// disappears promptly.
    pub fn server_ping(&mut self, t: u64) {
        if t.saturating_sub(self.last_word) >= PING_JUMP_THRESHOLD {
            self.needs_render = true;
        }
        self.last_word = t;
    }

    /// Show `message` for the next second or so.
    pub fn set_notification_string(&mut self, message: &str, now: u64) {
        self.message = message.to_string();
        self.message_expiration = now + BANNER_TTL;
        self.needs_render = true;
    }

    /// Rebuild the banner cells if a render is due.
    pub fn render_notification(&mut self, now: u64) {
        if now.saturating_sub(self.last_render) < RENDER_GAP && !self.needs_render {
            return;
        }
        self.needs_render = false;
        self.last_render = now;

        self.cells.clear();

        if now >= self.message_expiration {
            self.message.clear();
        }

        let time_expired = now.saturating_sub(self.last_word) > NO_CONTACT_THRESHOLD;
        let seconds = ((now.saturating_sub(self.last_word)) as f64 / 1000.0).round();

        let text = match (self.message.is_empty(), time_expired) {
            (true, false) => return,
            (true, true) => format!(
                "[stm] No contact for {:.0} seconds. [To quit: Ctrl-^ .]",
                seconds
            ),
            (false, false) => format!("[stm] {}", self.message),
            (false, true) => format!(
                "[stm] {} [To quit: Ctrl-^ .] (No contact for {:.0} seconds.)",
                self.message, seconds
            ),
        };

        self.layout(&text, now);
    }

    /// Column-by-column layout with terminal width semantics: width-1
    /// and width-2 characters open a cell, combining characters join
    /// the previous one.
    fn layout(&mut self, text: &str, now: u64) {
        let template = Cell {
            contents: Vec::new(),
            width: 1,
            renditions: Renditions {
                bold: true,
                underlined: false,
                foreground_color: BANNER_FG,
                background_color: BANNER_BG,
            },
        };

        let mut col = 0usize;
        let mut current: Option<BannerCell> = None;

        for ch in text.chars() {
            match UnicodeWidthChar::width(ch) {
                Some(width @ (1 | 2)) => {
                    if let Some(done) = current.take() {
                        self.cells.push(done);
                    }
                    let mut cell = template.clone();
                    cell.contents.push(ch);
                    cell.width = width as u8;
                    current = Some(BannerCell {
                        expiration_time: now + BANNER_TTL,
                        col,
                        replacement: cell,
                    });
                    col += width;
                }
                Some(0) => {
                    // Combining character joins the open cell; a leading
                    // one gets a synthesized no-break-space base.
                    if current.is_none() {
                        let mut cell = template.clone();
                        cell.contents.push('\u{00A0}');
                        current = Some(BannerCell {
                            expiration_time: now + BANNER_TTL,
                            col,
                            replacement: cell,
                        });
                        col += 1;
                    }
                    if let Some(open) = current.as_mut() {
                        open.replacement.contents.push(ch);
                    }
                }
                _ => {}
            }
        }

        if let Some(done) = current.take() {
            self.cells.push(done);
        }
    }

    /// Paint the banner: blue bar across row 0, text cells on top, and
    /// the cursor hidden if it lives under the bar.
    pub fn apply(&self, fb: &mut Framebuffer) {
        if self.cells.is_empty() {
            return;
        }

        let bar = Cell {
            contents: vec![' '],
            width: 1,
            renditions: Renditions {
                bold: false,
                underlined: false,
                foreground_color: BANNER_FG,
                background_color: BANNER_BG,
            },
        };
        for col in 0..fb.ds.get_width() {
            fb.set_cell(0, col, bar.clone());
        }

        if fb.ds.get_cursor_row() == 0 {
            fb.ds.cursor_visible = false;
        }

        for cell in &self.cells {
            fb.set_cell(0, cell.col, cell.replacement.clone());
        }
    }

    /// Earliest TTL deadline among banner cells.
    pub fn min_expiration(&self) -> Option<u64> {
        self.cells.iter().map(|c| c.expiration_time).min()
    }

    /// Whether anything would currently be painted.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Laid-out banner columns, for tests.
    #[cfg(test)]
    pub(crate) fn cells_for_test(&self) -> impl Iterator<Item = usize> + '_ {
        self.cells.iter().map(|c| c.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banner_text(engine: &NotificationEngine) -> String {
        engine
            .cells
            .iter()
            .flat_map(|c| c.replacement.contents.iter())
            .collect()
    }

    #[test]
    fn quiet_link_renders_nothing() {
        let mut engine = NotificationEngine::new(0);
        engine.render_notification(100);
        assert!(engine.is_empty());
    }

    #[test]
    fn message_renders_with_prefix() {
        let mut engine = NotificationEngine::new(0);
        engine.set_notification_string("Connecting...", 100);
        engine.render_notification(100);
        assert_eq!(banner_text(&engine), "[stm] Connecting...");
    }

    #[test]
    fn message_expires_after_ttl() {
        let mut engine = NotificationEngine::new(0);
        engine.set_notification_string("hello", 100);
        engine.render_notification(100);
        assert!(!engine.is_empty());

        // Contact is recent, message expired: banner empties.
        engine.server_ping(1500);
        engine.render_notification(100 + BANNER_TTL + 1);
        assert!(engine.is_empty());
    }

    #[test]
    fn no_contact_countup_appears() {
        let mut engine = NotificationEngine::new(0);
        engine.render_notification(7000);
        let text = banner_text(&engine);
        assert!(text.starts_with("[stm] No contact for 7 seconds."));
        assert!(text.contains("[To quit: Ctrl-^ .]"));
    }

    #[test]
    fn message_and_no_contact_combine() {
        let mut engine = NotificationEngine::new(0);
        engine.set_notification_string("Reconnecting", 6000);
        engine.render_notification(6000);
        let text = banner_text(&engine);
        assert!(text.starts_with("[stm] Reconnecting [To quit: Ctrl-^ .] (No contact for 6 seconds.)"));
    }

    #[test]
    fn render_gap_suppresses_rebuilds() {
        let mut engine = NotificationEngine::new(0);
        engine.render_notification(6000);
        assert!(!engine.is_empty());

        // Within the gap without a latch: the stale cells stay.
        let before = banner_text(&engine);
        engine.render_notification(6100);
        assert_eq!(banner_text(&engine), before);

        // Past the gap the count refreshes.
        engine.render_notification(6000 + RENDER_GAP);
        assert!(!engine.is_empty());
    }

    #[test]
    fn ping_jump_latches_render_within_gap() {
        let mut engine = NotificationEngine::new(0);
        engine.render_notification(7000);
        assert!(!engine.is_empty());

        // Contact resumes after a long gap; the very next render,
        // inside the 250 ms window, must still run and clear the bar.
        engine.server_ping(7050);
        engine.render_notification(7060);
        assert!(engine.is_empty());
    }

    #[test]
    fn small_ping_gap_does_not_latch() {
        let mut engine = NotificationEngine::new(0);
        engine.render_notification(100); // initial latched render
        engine.server_ping(200);
        assert!(!engine.needs_render);
    }

    #[test]
    fn banner_cells_are_bold_white_on_blue() {
        let mut engine = NotificationEngine::new(0);
        engine.set_notification_string("x", 0);
        engine.render_notification(0);
        let cell = &engine.cells[0].replacement;
        assert!(cell.renditions.bold);
        assert_eq!(cell.renditions.foreground_color, BANNER_FG);
        assert_eq!(cell.renditions.background_color, BANNER_BG);
        assert_eq!(engine.min_expiration(), Some(BANNER_TTL));
    }

    #[test]
    fn wide_characters_advance_two_columns() {
        let mut engine = NotificationEngine::new(0);
        engine.set_notification_string("日本", 0);
        engine.render_notification(0);

        // "[stm] " occupies columns 0..6, then the wide pair.
        let wide: Vec<_> = engine.cells.iter().filter(|c| c.replacement.width == 2).collect();
        assert_eq!(wide.len(), 2);
        assert_eq!(wide[1].col, wide[0].col + 2);
    }

    #[test]
    fn combining_characters_join_previous_cell() {
        let mut engine = NotificationEngine::new(0);
        engine.set_notification_string("e\u{0301}x", 0);
        engine.render_notification(0);

        let e_cell = engine
            .cells
            .iter()
            .find(|c| c.replacement.contents.first() == Some(&'e'))
            .unwrap();
        assert_eq!(e_cell.replacement.contents, vec!['e', '\u{0301}']);

        let x_cell = engine
            .cells
            .iter()
            .find(|c| c.replacement.contents.first() == Some(&'x'))
            .unwrap();
        assert_eq!(x_cell.col, e_cell.col + 1);
    }

    #[test]
    fn apply_paints_bar_and_hides_cursor_on_row_zero() {
        let mut engine = NotificationEngine::new(0);
        engine.set_notification_string("hi", 0);
        engine.render_notification(0);

        let mut fb = Framebuffer::new(40, 10);
        assert!(fb.ds.cursor_visible);
        engine.apply(&mut fb);

        // Whole top row carries the banner background.
        for col in 0..40 {
            assert_eq!(
                fb.get_cell(0, col).unwrap().renditions.background_color,
                BANNER_BG
            );
        }
        assert!(!fb.ds.cursor_visible);

        // Text landed at the start.
        assert_eq!(fb.get_cell(0, 0).unwrap().contents, vec!['[']);
    }

    #[test]
    fn apply_leaves_cursor_alone_off_row_zero() {
        let mut engine = NotificationEngine::new(0);
        engine.set_notification_string("hi", 0);
        engine.render_notification(0);

        let mut fb = Framebuffer::new(40, 10);
        fb.ds.move_row(5, false);
        engine.apply(&mut fb);
        assert!(fb.ds.cursor_visible);
    }

    #[test]
    fn empty_banner_apply_is_a_noop() {
        let engine = NotificationEngine::new(0);
        let mut fb = Framebuffer::new(40, 10);
        let before = fb.clone();
        engine.apply(&mut fb);
        assert_eq!(fb, before);
    }
}
