//! State synchronization primitives.
//!
//! The transport ships *diffs between application states*, not a byte
//! stream. Any type that can describe itself as a compact diff against
//! an older version of itself can ride the transport.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// An application state the transport can synchronize.
///
/// The transport keeps a short history of these on each side and
/// converges the remote copy by sending `diff_from` encodings against
/// the newest state the peer has acknowledged.
pub trait SyncState: Clone + Eq {
    /// Produce a compact encoding of the transformation from `old` to `self`.
    fn diff_from(&self, old: &Self) -> Vec<u8>;

    /// Apply an encoded diff, producing the successor state.
    fn apply_diff(&self, diff: &[u8]) -> Result<Self>;

    /// Full serialization, used when no common ancestor exists.
    fn init_diff(&self) -> Vec<u8> {
        self.diff_from(&Self::blank())
    }

    /// Drop from this state any portion the remote is known to hold.
    ///
    /// Purely an encoding optimization; the default keeps everything.
    fn subtract(&mut self, _prefix: &Self) {}

    /// The empty state both sides start from.
    fn blank() -> Self;
}

/// A state plus the bookkeeping the transport needs for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedState<S> {
    /// Sender's local clock (ms) when this state was enqueued or last sent.
    pub timestamp: u64,
    /// Strictly increasing sequence number minted by the sender.
    pub num: u64,
    /// The state itself.
    pub state: S,
}

impl<S> TimestampedState<S> {
    /// Wrap a state with its sequence number and clock reading.
    pub fn new(timestamp: u64, num: u64, state: S) -> Self {
        Self {
            timestamp,
            num,
            state,
        }
    }
}
