//! Engine-level behaviour: cache lifecycle, guest cache maintenance and
//! soft-flush revalidation, driven through the public API.

use jit_runtime::{crc32, Engine, EngineConfig, NullHostCache};
use m68k_state::state::cache_op;
use m68k_state::{FlatMemory, GuestMem};

fn engine(cfg: EngineConfig) -> Engine<FlatMemory, NullHostCache> {
    let _ = env_logger::builder().is_test(true).try_init();
    Engine::new(cfg, FlatMemory::new(0x20000), NullHostCache)
}

/// A small self-contained block: MOVEQ #5,D0; RTS.
const BLOCK: [u8; 4] = [0x70, 0x05, 0x4e, 0x75];

#[test]
fn published_units_carry_the_guest_checksum() {
    let mut engine = engine(EngineConfig::hosted());
    engine.mem.load(0x4000, &BLOCK);
    let idx = engine.get_or_compile(0x4000).expect("compiles");
    let unit = engine.cache().unit(idx);
    assert_eq!(unit.entry_m68k, 0x4000);
    assert_eq!(unit.lo, 0x4000);
    assert_eq!(unit.hi, 0x4004);
    assert_eq!(unit.crc32, crc32(&BLOCK));
    assert_eq!(unit.entry_ptr % 64, 0, "entry is cache-line aligned");
}

#[test]
fn scenario_d_line_invalidation() {
    // Translate a block at 0x4000 covering 0x4000..0x4020, CINV the
    // line at 0x4010, then a lookup for 0x4000 misses.
    let mut engine = engine(EngineConfig::hosted());
    let mut code = vec![0x70, 0x01].repeat(15);
    code.extend_from_slice(&[0x4e, 0x75]);
    engine.mem.load(0x4000, &code);
    engine.get_or_compile(0x4000).expect("compiles");
    assert_eq!(engine.cache().len(), 1);

    engine.state.cache_op = cache_op::LINE;
    engine.state.cache_addr = 0x4010;
    engine.process_cache_op();

    assert_eq!(engine.cache().len(), 0);
    let misses_before = engine.stats().cache_misses;
    engine.get_or_compile(0x4000).expect("recompiles");
    assert_eq!(engine.stats().cache_misses, misses_before + 1);
}

#[test]
fn scenario_e_soft_flush_keeps_clean_blocks() {
    let cfg = EngineConfig {
        soft_flush: true,
        soft_flush_threshold: 0,
        ..EngineConfig::hosted()
    };
    let mut engine = engine(cfg);
    engine.mem.load(0x5000, &BLOCK);
    let idx = engine.get_or_compile(0x5000).expect("compiles");
    let code_before: Vec<u32> = engine.cache().unit(idx).code.words().to_vec();

    engine.state.cache_op = cache_op::ALL;
    engine.process_cache_op();
    assert!(engine.cache().unit(idx).is_poisoned());

    // Guest bytes unchanged: the same unit comes back, byte-identical.
    let again = engine.get_or_compile(0x5000).expect("revalidates");
    assert_eq!(idx, again);
    assert_eq!(engine.cache().unit(again).code.words(), code_before.as_slice());
    assert_eq!(engine.stats().cache_misses, 1);
}

#[test]
fn soft_flush_detects_self_modification() {
    let cfg = EngineConfig {
        soft_flush: true,
        soft_flush_threshold: 0,
        ..EngineConfig::hosted()
    };
    let mut engine = engine(cfg);
    engine.mem.load(0x5000, &BLOCK);
    engine.get_or_compile(0x5000).expect("compiles");
    engine.state.cache_op = cache_op::ALL;
    engine.process_cache_op();

    engine.mem.write_u8(0x5001, 0x2a); // MOVEQ #42 now
    engine.get_or_compile(0x5000).expect("retranslates");
    assert_eq!(engine.stats().discards, 1);
    assert_eq!(engine.stats().cache_misses, 2);
}

#[test]
fn lru_orders_by_last_lookup() {
    let mut engine = engine(EngineConfig::hosted());
    for (i, pc) in [0x1000u32, 0x2000, 0x3000].iter().enumerate() {
        engine.mem.load(*pc, &[0x70, i as u8, 0x4e, 0x75]);
        engine.get_or_compile(*pc).expect("compiles");
    }
    engine.get_or_compile(0x1000).expect("hits");
    let order: Vec<u32> = engine.cache().iter_lru().map(|u| u.entry_m68k).collect();
    assert_eq!(order, vec![0x1000, 0x3000, 0x2000]);
}

#[test]
fn page_invalidation_spares_other_pages() {
    let mut engine = engine(EngineConfig::hosted());
    engine.mem.load(0x4000, &BLOCK);
    engine.mem.load(0x6000, &BLOCK);
    engine.get_or_compile(0x4000).expect("compiles");
    engine.get_or_compile(0x6000).expect("compiles");

    engine.state.cache_op = cache_op::PAGE;
    engine.state.cache_addr = 0x4123;
    engine.process_cache_op();

    assert_eq!(engine.cache().len(), 1);
    let survivor = engine.cache().iter_lru().next().expect("one left");
    assert_eq!(survivor.entry_m68k, 0x6000);
}

#[test]
fn stop_state_waits_for_interrupt() {
    let mut engine = engine(EngineConfig::hosted());
    engine.state.stopped = 1;
    engine.state.write_sr(0x2000);
    engine.state.a[7] = 0x1_0000;
    engine.mem.write_u32(0x64, 0x0000_7777); // level-1 autovector
    engine.state.int32 = 1;
    engine.poll_interrupts();
    assert_eq!(engine.state.stopped, 0, "interrupt wakes the STOP state");
    assert_eq!(engine.state.pc, 0x7777);
}
