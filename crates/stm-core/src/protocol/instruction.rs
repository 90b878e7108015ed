//! Instruction encoding.
//!
//! One instruction describes one state transition offer:
//!
//! ```text
//! old_num(8) || new_num(8) || ack_num(8) || throwaway_num(8)
//!   || diff_len(varint) || diff_bytes || chaff_bytes
//! ```
//!
//! Integers are big-endian; `diff_len` is unsigned LEB128. Everything
//! after the diff is chaff: random padding the sender appends to mask
//! payload sizes from traffic analysis. The decoder ignores it.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

/// One state-transition offer plus acknowledgment bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// The state the diff applies on top of.
    pub old_num: u64,
    /// The state the diff produces.
    pub new_num: u64,
    /// Newest state of the peer's that we have received.
    pub ack_num: u64,
    /// Oldest of our states the peer still needs for diff-basing;
    /// everything older can be discarded on their side.
    pub throwaway_num: u64,
    /// Encoded state diff, empty for pure acks.
    pub diff: Vec<u8>,
}

impl Instruction {
    /// Serialize, appending the given chaff after the diff.
    pub fn encode(&self, chaff: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(4 * 8 + 5 + self.diff.len() + chaff.len());
        buf.put_u64(self.old_num);
        buf.put_u64(self.new_num);
        buf.put_u64(self.ack_num);
        buf.put_u64(self.throwaway_num);
        put_varint(&mut buf, self.diff.len() as u64);
        buf.put_slice(&self.diff);
        buf.put_slice(chaff);
        buf.to_vec()
    }

    /// Parse from a reassembled payload, discarding trailing chaff.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut buf = payload;
        if buf.remaining() < 4 * 8 {
            return Err(Error::codec("instruction header truncated"));
        }
        let old_num = buf.get_u64();
        let new_num = buf.get_u64();
        let ack_num = buf.get_u64();
        let throwaway_num = buf.get_u64();

        let diff_len = get_varint(&mut buf)? as usize;
        if buf.remaining() < diff_len {
            return Err(Error::codec(format!(
                "diff truncated: want {} bytes, have {}",
                diff_len,
                buf.remaining()
            )));
        }
        let diff = buf[..diff_len].to_vec();

        Ok(Self {
            old_num,
            new_num,
            ack_num,
            throwaway_num,
            diff,
        })
    }
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

fn get_varint(buf: &mut &[u8]) -> Result<u64> {
    let mut value: u64 = 0;
    for shift in (0u32..64).step_by(7) {
        if !buf.has_remaining() {
            return Err(Error::codec("varint truncated"));
        }
        let byte = buf.get_u8();
        // wrapping: bits beyond 64 in a non-canonical encoding fall off
        value |= u64::from(byte & 0x7F).wrapping_shl(shift);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::codec("varint overflows u64"))
}
