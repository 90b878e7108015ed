//! stm-core: the state-synchronization transport for stm.
//!
//! This crate provides:
//! - The [`SyncState`](sync::SyncState) abstraction for diffable
//!   application states
//! - An encrypted, roaming-aware UDP [`Connection`](transport::Connection)
//! - Fragmentation and instruction framing
//! - The [`Transport`](transport::Transport) engine that converges two
//!   endpoints' states over an unreliable link
//! - Terminal cell and framebuffer types shared with the overlay layer
//! - The client's user-input state
//!
//! The design is single-threaded and poll-driven: nothing here blocks
//! or spawns. Hosts wire `fd()` and `wait_time()` into their own event
//! loop and call `recv()`/`tick()` when the loop wakes.

pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod input;
pub mod logging;
pub mod protocol;
pub mod sync;
pub mod terminal;
pub mod timing;
pub mod transport;

pub use config::TransportConfig;
pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
pub use sync::{SyncState, TimestampedState};
pub use transport::Transport;
