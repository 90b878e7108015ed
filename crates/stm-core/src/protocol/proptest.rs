//! Property-based tests for the wire codec and fragmentation.

#![cfg(test)]

use proptest::prelude::*;

use crate::protocol::Instruction;
use crate::transport::{FragmentAssembly, Fragmenter};

prop_compose! {
    fn arb_instruction()(
        old_num in any::<u64>(),
        new_num in any::<u64>(),
        ack_num in any::<u64>(),
        throwaway_num in any::<u64>(),
        diff in prop::collection::vec(any::<u8>(), 0..2048),
    ) -> Instruction {
        Instruction { old_num, new_num, ack_num, throwaway_num, diff }
    }
}

proptest! {
    #[test]
    fn instruction_roundtrip_with_chaff(
        inst in arb_instruction(),
        chaff in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let wire = inst.encode(&chaff);
        let decoded = Instruction::decode(&wire).unwrap();
        prop_assert_eq!(decoded, inst);
    }

    #[test]
    fn instruction_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let _ = Instruction::decode(&data);
    }

    #[test]
    fn fragmentation_roundtrip(
        payload in prop::collection::vec(any::<u8>(), 0..8192),
        max_body in 1usize..2048,
    ) {
        let mut fragmenter = Fragmenter::new();
        let frags = fragmenter.fragment(&payload, max_body);
        prop_assert!(frags.iter().all(|f| f.body.len() <= max_body));

        let mut assembly = FragmentAssembly::new();
        let mut result = None;
        for frag in frags {
            let wire = frag.to_bytes();
            let parsed = crate::transport::Fragment::from_bytes(&wire).unwrap();
            result = assembly.add_fragment(parsed);
        }
        prop_assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn fragmentation_survives_shuffled_arrival(
        payload in prop::collection::vec(any::<u8>(), 1..4096),
        seed in any::<u64>(),
    ) {
        let mut fragmenter = Fragmenter::new();
        let mut frags = fragmenter.fragment(&payload, 256);

        // Deterministic shuffle from the seed.
        let mut state = seed | 1;
        for i in (1..frags.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let j = (state >> 33) as usize % (i + 1);
            frags.swap(i, j);
        }

        let mut assembly = FragmentAssembly::new();
        let mut result = None;
        for frag in frags {
            result = assembly.add_fragment(frag);
        }
        prop_assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn fragment_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = crate::transport::Fragment::from_bytes(&data);
    }
}
