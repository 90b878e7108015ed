//! Nonce discipline: one direction bit, 63 bits of counter.

use crate::constants::WIRE_NONCE_LEN;

const DIRECTION_BIT: u64 = 1 << 63;

/// Direction of communication, encoded in the nonce's top bit and in
/// the first plaintext byte of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Server to client.
    ToClient,
    /// Client to server.
    ToServer,
}

impl Direction {
    /// Byte representation used in the packet plaintext.
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::ToClient => 0x00,
            Direction::ToServer => 0x01,
        }
    }

    /// Parse from the packet plaintext byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Direction::ToClient),
            0x01 => Some(Direction::ToServer),
            _ => None,
        }
    }

    /// The direction the peer sends in.
    pub fn opposite(self) -> Self {
        match self {
            Direction::ToClient => Direction::ToServer,
            Direction::ToServer => Direction::ToClient,
        }
    }

    fn bit(self) -> u64 {
        match self {
            Direction::ToClient => 0,
            Direction::ToServer => DIRECTION_BIT,
        }
    }
}

/// A 64-bit wire nonce: direction bit 63, counter bits 62..0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireNonce(u64);

impl WireNonce {
    /// Assemble a nonce from direction and counter.
    pub fn new(direction: Direction, counter: u64) -> Self {
        debug_assert!(counter < DIRECTION_BIT, "nonce counter exhausted");
        Self(direction.bit() | (counter & !DIRECTION_BIT))
    }

    /// Serialize for the wire (big-endian).
    pub fn to_bytes(self) -> [u8; WIRE_NONCE_LEN] {
        self.0.to_be_bytes()
    }

    /// Parse from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; WIRE_NONCE_LEN] = bytes.get(..WIRE_NONCE_LEN)?.try_into().ok()?;
        Some(Self(u64::from_be_bytes(raw)))
    }

    /// The direction encoded in the top bit.
    pub fn direction(self) -> Direction {
        if self.0 & DIRECTION_BIT == 0 {
            Direction::ToClient
        } else {
            Direction::ToServer
        }
    }

    /// The 63-bit counter.
    pub fn counter(self) -> u64 {
        self.0 & !DIRECTION_BIT
    }

    /// Expand to the cipher's 96-bit nonce (zero-padded high bits).
    pub fn cipher_nonce(self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[4..12].copy_from_slice(&self.to_bytes());
        nonce
    }
}

/// Mints fresh nonces for one direction; never repeats within a session.
#[derive(Debug)]
pub struct NonceSource {
    direction: Direction,
    next_counter: u64,
}

impl NonceSource {
    /// Start counting from zero for the given direction.
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            next_counter: 0,
        }
    }

    /// The direction this source stamps on its nonces.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Mint the next nonce.
    pub fn next(&mut self) -> WireNonce {
        let nonce = WireNonce::new(self.direction, self.next_counter);
        self.next_counter += 1;
        nonce
    }
}
