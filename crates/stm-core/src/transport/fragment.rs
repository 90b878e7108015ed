//! Fragmentation and reassembly.
//!
//! Instructions can exceed one datagram (a full-screen init diff, for
//! instance). The fragmenter splits the encoded payload into
//! MTU-bounded pieces tagged `fragment_id(2) || index_and_final(2)`;
//! the assembler keeps a single-slot buffer and only ever completes a
//! payload whose every index `[0..=final]` has arrived under the
//! current id. A fragment from a newer id abandons the slot.

use bytes::{Buf, BufMut, BytesMut};

use crate::constants::FRAGMENT_HEADER_LEN;
use crate::error::{Error, Result};

const FINAL_FLAG: u16 = 0x8000;
const INDEX_MASK: u16 = 0x7FFF;

/// One MTU-bounded piece of an encoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Per-session monotonic payload id (wrapping).
    pub id: u16,
    /// Position of this piece within the payload.
    pub index: u16,
    /// Whether this is the last piece.
    pub is_final: bool,
    /// The piece itself.
    pub body: Vec<u8>,
}

impl Fragment {
    /// Serialize header and body for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(FRAGMENT_HEADER_LEN + self.body.len());
        buf.put_u16(self.id);
        let mut index_field = self.index & INDEX_MASK;
        if self.is_final {
            index_field |= FINAL_FLAG;
        }
        buf.put_u16(index_field);
        buf.put_slice(&self.body);
        buf.to_vec()
    }

    /// Parse from wire bytes.
    pub fn from_bytes(mut data: &[u8]) -> Result<Self> {
        if data.remaining() < FRAGMENT_HEADER_LEN {
            return Err(Error::codec("fragment header truncated"));
        }
        let id = data.get_u16();
        let index_field = data.get_u16();
        Ok(Self {
            id,
            index: index_field & INDEX_MASK,
            is_final: index_field & FINAL_FLAG != 0,
            body: data.to_vec(),
        })
    }
}

/// Splits outbound payloads, minting one id per payload.
#[derive(Debug, Default)]
pub struct Fragmenter {
    next_id: u16,
}

impl Fragmenter {
    /// Create a fragmenter starting at id zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `payload` into fragments whose bodies are at most
    /// `max_body` bytes. Always yields at least one fragment.
    pub fn fragment(&mut self, payload: &[u8], max_body: usize) -> Vec<Fragment> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let max_body = max_body.max(1);
        let count = payload.len().div_ceil(max_body).max(1);

        (0..count)
            .map(|i| {
                let start = i * max_body;
                let end = payload.len().min(start + max_body);
                Fragment {
                    id,
                    index: i as u16,
                    is_final: i + 1 == count,
                    body: payload[start..end].to_vec(),
                }
            })
            .collect()
    }
}

/// Single-slot reassembly buffer.
#[derive(Debug, Default)]
pub struct FragmentAssembly {
    current_id: Option<u16>,
    pieces: Vec<Option<Vec<u8>>>,
    final_index: Option<u16>,
    arrived: usize,
}

impl FragmentAssembly {
    /// Create an empty assembly buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns the reassembled payload when it
    /// completes the current id.
    pub fn add_fragment(&mut self, frag: Fragment) -> Option<Vec<u8>> {
        match self.current_id {
            Some(id) if id == frag.id => {}
            Some(id) if is_newer(frag.id, id) => self.reset_to(frag.id),
            Some(_) => return None, // stale id, drop
            None => self.reset_to(frag.id),
        }

        let index = frag.index as usize;
        if self.pieces.len() <= index {
            self.pieces.resize(index + 1, None);
        }
        if self.pieces[index].is_none() {
            self.arrived += 1;
        }
        if frag.is_final {
            self.final_index = Some(frag.index);
        }
        self.pieces[index] = Some(frag.body);

        let final_index = self.final_index?;
        if self.arrived == final_index as usize + 1
            && self.pieces[..=final_index as usize].iter().all(Option::is_some)
        {
            let payload = self.pieces[..=final_index as usize]
                .iter_mut()
                .flat_map(|piece| piece.take().unwrap())
                .collect();
            self.current_id = None;
            self.pieces.clear();
            self.final_index = None;
            self.arrived = 0;
            return Some(payload);
        }
        None
    }

    fn reset_to(&mut self, id: u16) {
        self.current_id = Some(id);
        self.pieces.clear();
        self.final_index = None;
        self.arrived = 0;
    }
}

/// Wrapping id comparison: `a` newer than `b`.
fn is_newer(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_wire_roundtrip() {
        let frag = Fragment {
            id: 7,
            index: 3,
            is_final: true,
            body: vec![1, 2, 3],
        };
        let parsed = Fragment::from_bytes(&frag.to_bytes()).unwrap();
        assert_eq!(parsed, frag);
    }

    #[test]
    fn small_payload_is_one_final_fragment() {
        let mut fragmenter = Fragmenter::new();
        let frags = fragmenter.fragment(b"tiny", 100);
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].index, 0);
        assert!(frags[0].is_final);
        assert_eq!(frags[0].body, b"tiny");
    }

    #[test]
    fn empty_payload_still_yields_a_fragment() {
        let mut fragmenter = Fragmenter::new();
        let frags = fragmenter.fragment(b"", 100);
        assert_eq!(frags.len(), 1);
        assert!(frags[0].is_final);
        assert!(frags[0].body.is_empty());
    }

    #[test]
    fn large_payload_splits_and_reassembles() {
        let payload: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        let mut fragmenter = Fragmenter::new();
        let frags = fragmenter.fragment(&payload, 300);
        assert_eq!(frags.len(), 4);
        assert!(frags[3].is_final);
        assert!(!frags[0].is_final);

        let mut assembly = FragmentAssembly::new();
        let mut result = None;
        for frag in frags {
            result = assembly.add_fragment(frag);
        }
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn out_of_order_arrival_completes() {
        let payload = vec![9u8; 500];
        let mut fragmenter = Fragmenter::new();
        let mut frags = fragmenter.fragment(&payload, 200);
        frags.reverse();

        let mut assembly = FragmentAssembly::new();
        let mut result = None;
        for frag in frags {
            result = assembly.add_fragment(frag);
        }
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn duplicate_fragment_does_not_complete_early() {
        let payload = vec![1u8; 400];
        let mut fragmenter = Fragmenter::new();
        let frags = fragmenter.fragment(&payload, 200);
        assert_eq!(frags.len(), 2);

        let mut assembly = FragmentAssembly::new();
        assert!(assembly.add_fragment(frags[0].clone()).is_none());
        assert!(assembly.add_fragment(frags[0].clone()).is_none());
        assert_eq!(assembly.add_fragment(frags[1].clone()).unwrap(), payload);
    }

    #[test]
    fn newer_id_abandons_partial_assembly() {
        let mut fragmenter = Fragmenter::new();
        let first = fragmenter.fragment(&[1u8; 400], 200);
        let second = fragmenter.fragment(&[2u8; 100], 200);

        let mut assembly = FragmentAssembly::new();
        assert!(assembly.add_fragment(first[0].clone()).is_none());
        // Newer payload id arrives before the first completes.
        assert_eq!(assembly.add_fragment(second[0].clone()).unwrap(), vec![2u8; 100]);
        // Straggler from the abandoned payload is stale now.
        assert!(assembly.add_fragment(first[1].clone()).is_none());
    }

    #[test]
    fn ids_wrap_without_confusing_newness() {
        assert!(is_newer(0, u16::MAX));
        assert!(!is_newer(u16::MAX, 0));
        assert!(is_newer(5, 3));
        assert!(!is_newer(3, 5));
    }
}
