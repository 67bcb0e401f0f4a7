//! The translator must make forward progress and never panic on
//! arbitrary instruction streams: anything it cannot lower becomes a
//! trap word, never a crash.

use m68k_jit::{translate, JitConfig};
use m68k_state::FlatMemory;
use proptest::prelude::*;

proptest! {
    #[test]
    fn arbitrary_streams_translate_without_panicking(
        words in proptest::collection::vec(any::<u16>(), 1..8)
    ) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut mem = FlatMemory::new(0x10000);
        let mut bytes = Vec::new();
        for w in &words {
            bytes.extend_from_slice(&w.to_be_bytes());
        }
        bytes.extend_from_slice(&[0x4e, 0x75]); // RTS backstop
        mem.load(0x1000, &bytes);

        let block = translate(JitConfig::default(), &mem, 0x1000);
        prop_assert!(block.insn_count >= 1);
        prop_assert!(!block.code.is_empty());
        prop_assert!(block.hi > block.lo);
        prop_assert_eq!(block.entry_m68k, 0x1000);
        // The prologue is always a push and some exit always pops.
        prop_assert_eq!(block.code[0] & 0xffff_0000, 0xe92d_0000);
        prop_assert!(block.code.iter().any(|&w| w & 0xffff_0000 == 0xe8bd_0000));
    }

    #[test]
    fn liveness_scan_never_reports_impossible_bits(
        words in proptest::collection::vec(any::<u16>(), 1..16)
    ) {
        let mut mem = FlatMemory::new(0x10000);
        let mut bytes = Vec::new();
        for w in &words {
            bytes.extend_from_slice(&w.to_be_bytes());
        }
        mem.load(0x2000, &bytes);
        let mask = m68k_jit::liveness::live_mask(&mem, 0x2000, 200);
        prop_assert_eq!(mask & !m68k_jit::liveness::ALL, 0);
    }
}
