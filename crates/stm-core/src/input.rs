//! User-input state for the client-to-server direction.
//!
//! The client's "my state" is the sequence of everything the user has
//! done: keystrokes and window resizes. The server applies the suffix
//! it has not yet seen to the pseudo-terminal. Acknowledged prefixes
//! are subtracted away so diffs stay small during long sessions.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::SyncState;

/// One unit of user activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserEvent {
    /// Raw bytes typed by the user.
    Keystrokes(Vec<u8>),
    /// The user's window changed size.
    Resize {
        /// New width in columns.
        cols: u16,
        /// New height in rows.
        rows: u16,
    },
}

/// Ordered log of user activity, synchronized client to server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEventStream {
    events: Vec<UserEvent>,
}

impl UserEventStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append typed bytes, coalescing with a trailing keystroke run.
    pub fn push_keystrokes(&mut self, bytes: &[u8]) {
        if let Some(UserEvent::Keystrokes(run)) = self.events.last_mut() {
            run.extend_from_slice(bytes);
        } else {
            self.events.push(UserEvent::Keystrokes(bytes.to_vec()));
        }
    }

    /// Append a resize event.
    pub fn push_resize(&mut self, cols: u16, rows: u16) {
        self.events.push(UserEvent::Resize { cols, rows });
    }

    /// Events present in `self` but not in the older `prefix`.
    ///
    /// Returns `None` when `prefix` is not actually a prefix of `self`
    /// (the streams have diverged and a full serialization is needed).
    fn suffix_beyond<'a>(&'a self, prefix: &Self) -> Option<&'a [UserEvent]> {
        if prefix.events.len() > self.events.len() {
            return None;
        }
        if self.events[..prefix.events.len()] != prefix.events[..] {
            return None;
        }
        Some(&self.events[prefix.events.len()..])
    }

    /// Iterate over all events in order.
    pub fn events(&self) -> impl Iterator<Item = &UserEvent> {
        self.events.iter()
    }

    /// Number of events held.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when no events are held.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl SyncState for UserEventStream {
    fn diff_from(&self, old: &Self) -> Vec<u8> {
        let suffix: Vec<&UserEvent> = match self.suffix_beyond(old) {
            Some(events) => events.iter().collect(),
            // Diverged history: resend everything we hold.
            None => self.events.iter().collect(),
        };
        if suffix.is_empty() {
            return Vec::new();
        }
        bincode::serialize(&suffix).unwrap_or_default()
    }

    fn apply_diff(&self, diff: &[u8]) -> Result<Self> {
        let mut next = self.clone();
        if diff.is_empty() {
            return Ok(next);
        }
        let suffix: Vec<UserEvent> = bincode::deserialize(diff).map_err(|e| Error::Codec {
            message: format!("user event decode failed: {}", e),
        })?;
        next.events.extend(suffix);
        Ok(next)
    }

    fn subtract(&mut self, prefix: &Self) {
        let keep = match self.suffix_beyond(prefix) {
            Some(events) => events.to_vec(),
            None => return,
        };
        self.events = keep;
    }

    fn blank() -> Self {
        Self::default()
    }
}
