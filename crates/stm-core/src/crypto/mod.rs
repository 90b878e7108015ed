//! AEAD framing for the datagram transport.
//!
//! Every datagram is `wire_nonce(8) || ciphertext`. The 64-bit wire
//! nonce is a direction bit plus a 63-bit per-direction counter that
//! is never reused within a session key's lifetime. Authentication
//! failures are indistinguishable from drops: the receiver discards
//! the datagram and says nothing.

mod aead;
mod nonce;

pub use aead::{SessionKey, decrypt, encrypt};
pub use nonce::{Direction, NonceSource, WireNonce};
