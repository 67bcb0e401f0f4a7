//! The engine: owns the guest state, the translation cache and the
//! dispatcher loop.

use log::{debug, info, warn};
use m68k_jit::{translate, JitConfig};
use m68k_state::state::cache_op;
use m68k_state::{exceptions, GuestMem, GuestState};
use thiserror::Error;

use crate::cache::Cache;
use crate::crc32::crc32;
use crate::hostcache::HostCache;
use crate::unit::Tu;

/// Engine-level failures surfaced to the embedder.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A block could not be cached even after evicting everything.
    #[error("translation cache exhausted at guest pc {pc:#010x}")]
    CacheExhausted {
        /// Guest address being translated.
        pc: u32,
    },
    /// An unhandled guest opcode trapped.
    #[error("unhandled guest opcode {opcode:#06x} at {pc:#010x}")]
    Trap {
        /// The trapping opcode.
        opcode: u16,
        /// Guest address of the instruction.
        pc: u32,
    },
}

/// Engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Translation parameters.
    pub jit: JitConfig,
    /// Translation cache capacity in bytes of published code.
    pub cache_capacity: usize,
    /// Soft-flush mode: `CINV all` poisons units for checksum
    /// revalidation instead of dropping them, once the unit count
    /// exceeds the threshold.
    pub soft_flush: bool,
    /// Unit count above which `CINV all` soft-flushes.
    pub soft_flush_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            jit: JitConfig::default(),
            cache_capacity: 8 << 20,
            soft_flush: false,
            soft_flush_threshold: 64,
        }
    }
}

impl EngineConfig {
    /// Default configuration with the helper table wired to this
    /// crate's runtime routines.
    #[must_use]
    pub fn hosted() -> Self {
        let mut cfg = Self::default();
        cfg.jit.helpers = crate::helpers::helper_table();
        cfg
    }
}

/// Aggregate statistics over the engine lifetime.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineStats {
    /// Cache lookups that required a translation.
    pub cache_misses: u64,
    /// Units invalidated by guest cache ops.
    pub invalidations: u64,
    /// Soft-flushed units revalidated successfully.
    pub revalidations: u64,
    /// Soft-flushed units discarded on checksum mismatch.
    pub discards: u64,
}

/// The dispatcher: guest state, cache and host-cache maintenance in one
/// place, borrowed mutably by exactly one of the translator or the
/// running unit at a time.
pub struct Engine<M, H> {
    /// Architectural guest state.
    pub state: GuestState,
    /// Guest memory.
    pub mem: M,
    cache: Cache,
    host_cache: H,
    cfg: EngineConfig,
    stats: EngineStats,
}

impl<M: GuestMem, H: HostCache> Engine<M, H> {
    /// Create an engine over the given memory and host cache.
    pub fn new(cfg: EngineConfig, mem: M, host_cache: H) -> Self {
        info!(
            "engine up: {} KiB cache, soft flush {}",
            cfg.cache_capacity / 1024,
            if cfg.soft_flush { "on" } else { "off" }
        );
        Self {
            state: GuestState::new(),
            mem,
            cache: Cache::new(cfg.cache_capacity),
            host_cache,
            cfg,
            stats: EngineStats::default(),
        }
    }

    /// Borrow the translation cache (tests and stats).
    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Statistics so far.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Look up or translate the unit for `pc`, enforcing the soft-flush
    /// revalidation protocol.
    pub fn get_or_compile(&mut self, pc: u32) -> Result<u32, EngineError> {
        if let Some(idx) = self.cache.lookup(pc) {
            if !self.cache.unit(idx).is_poisoned() {
                return Ok(idx);
            }
            // Poisoned: revalidate against the current guest bytes.
            let (lo, hi, sum) = {
                let unit = self.cache.unit(idx);
                (unit.lo, unit.hi, unit.crc32)
            };
            if self.checksum_guest(lo, hi) == sum {
                self.cache.unit_mut(idx).unpoison();
                self.stats.revalidations += 1;
                return Ok(idx);
            }
            debug!("soft-flush discard at {pc:08x}");
            self.cache.remove(idx);
            self.stats.discards += 1;
        }
        self.compile(pc)
    }

    fn compile(&mut self, pc: u32) -> Result<u32, EngineError> {
        self.stats.cache_misses += 1;
        let block = translate(self.cfg.jit, &self.mem, pc);
        let bytes = self.guest_bytes(block.lo, block.hi);
        let unit = Tu::publish(&block, &bytes);
        let begin = unit.code.as_ptr() as usize;
        let end = begin + unit.code.byte_len();
        self.host_cache.sync_icache(begin, end);
        self.cache.insert(unit).ok_or(EngineError::CacheExhausted { pc })
    }

    fn guest_bytes(&self, lo: u32, hi: u32) -> Vec<u8> {
        (lo..hi).map(|a| self.mem.read_u8(a)).collect()
    }

    fn checksum_guest(&self, lo: u32, hi: u32) -> u32 {
        crc32(&self.guest_bytes(lo, hi))
    }

    /// Apply a pending guest cache-maintenance request, staged by the
    /// line-F lowering before it ended its block.
    pub fn process_cache_op(&mut self) {
        let op = self.state.cache_op;
        if op == cache_op::NONE {
            return;
        }
        self.state.cache_op = cache_op::NONE;
        let addr = self.state.cache_addr;
        match op {
            cache_op::LINE => {
                let start = addr & !15;
                let n = self.cache.invalidate_range(start, start + 16);
                self.stats.invalidations += n as u64;
                debug!("cinv line {start:08x}: {n} units");
            }
            cache_op::PAGE => {
                let start = addr & !0xfff;
                let n = self.cache.invalidate_range(start, start + 0x1000);
                self.stats.invalidations += n as u64;
                debug!("cinv page {start:08x}: {n} units");
            }
            _ => {
                if self.cfg.soft_flush && self.cache.len() > self.cfg.soft_flush_threshold {
                    let n = self.cache.poison_all();
                    debug!("cinv all: soft-flushed {n} units");
                } else {
                    let n = self.cache.invalidate_all();
                    self.stats.invalidations += n as u64;
                    debug!("cinv all: dropped {n} units");
                }
                self.host_cache.clean_dcache_all();
            }
        }
    }

    /// Deliver a pending interrupt if the flag word requests one and
    /// the mask allows it. Wakes a STOPped guest.
    pub fn poll_interrupts(&mut self) {
        let level = (self.state.int32 & 7) as u8;
        if level == 0 {
            return;
        }
        if exceptions::deliver_interrupt(&mut self.state, &mut self.mem, level) {
            self.state.int32 &= !7;
        }
    }

    /// Run until the guest PC reaches zero (the dispatcher's halt
    /// convention) or an error surfaces.
    ///
    /// Only meaningful on the ARM host, where published code is
    /// executable and guest memory is identity mapped.
    #[cfg(target_arch = "arm")]
    #[allow(unsafe_code)]
    pub fn run(&mut self) -> Result<(), EngineError> {
        loop {
            self.process_cache_op();
            self.poll_interrupts();
            if self.state.stopped != 0 {
                // Waiting for an interrupt; nothing to execute.
                continue;
            }
            let pc = self.state.pc;
            if pc == 0 {
                return Ok(());
            }
            let idx = self.get_or_compile(pc)?;
            let unit = self.cache.unit_mut(idx);
            unit.use_count += 1;
            let insns = u64::from(unit.m68k_insn_count);
            let entry = unit.entry_ptr;
            // SAFETY: the unit was published through the host-cache
            // sync and its entry pointer is unpoisoned; the state is
            // exclusively borrowed for the duration of the call.
            unsafe {
                let f: extern "C" fn(*mut GuestState) = core::mem::transmute(entry);
                f(&raw mut self.state);
            }
            self.state.insn_count += insns;
        }
    }

    /// Log cache occupancy and per-unit usage counters.
    pub fn dump_stats(&self) {
        let mut units = 0usize;
        let mut insns = 0u64;
        for unit in self.cache.iter_lru() {
            units += 1;
            insns += u64::from(unit.m68k_insn_count);
            debug!(
                "unit {:08x} [{:08x}..{:08x}) use={} fetch={}",
                unit.entry_m68k, unit.lo, unit.hi, unit.use_count, unit.fetch_count
            );
        }
        info!(
            "{units} units, {} code bytes, {insns} guest insns cached, {} misses",
            self.cache.code_bytes(),
            self.stats.cache_misses
        );
        if self.stats.discards > 0 || self.stats.revalidations > 0 {
            info!(
                "soft flush: {} revalidated, {} discarded",
                self.stats.revalidations, self.stats.discards
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostcache::NullHostCache;
    use m68k_state::FlatMemory;

    fn engine_with(bytes: &[u8], at: u32, cfg: EngineConfig) -> Engine<FlatMemory, NullHostCache> {
        let mut mem = FlatMemory::new(0x20000);
        mem.load(at, bytes);
        Engine::new(cfg, mem, NullHostCache)
    }

    const RTS_BLOCK: [u8; 4] = [0x70, 0x05, 0x4e, 0x75];

    #[test]
    fn miss_compiles_then_hits() {
        let mut engine = engine_with(&RTS_BLOCK, 0x1000, EngineConfig::default());
        let a = engine.get_or_compile(0x1000).expect("compiles");
        assert_eq!(engine.stats().cache_misses, 1);
        let b = engine.get_or_compile(0x1000).expect("hits");
        assert_eq!(a, b);
        assert_eq!(engine.stats().cache_misses, 1);
    }

    #[test]
    fn line_invalidation_misses_afterwards() {
        // Scenario D: translate at 0x4000, CINV the line at 0x4010,
        // then the next lookup for the block misses.
        let mut engine = engine_with(&[0x70, 0x01, 0x70, 0x02, 0x70, 0x03, 0x70, 0x04,
                                       0x70, 0x05, 0x70, 0x06, 0x70, 0x07, 0x70, 0x08,
                                       0x70, 0x09, 0x4e, 0x75], 0x4000, EngineConfig::default());
        engine.get_or_compile(0x4000).expect("compiles");
        assert!(engine.cache().len() == 1);
        engine.state.cache_op = cache_op::LINE;
        engine.state.cache_addr = 0x4010;
        engine.process_cache_op();
        assert_eq!(engine.cache().len(), 0);
        assert_eq!(engine.stats().invalidations, 1);
    }

    #[test]
    fn line_invalidation_outside_range_keeps_unit() {
        let mut engine = engine_with(&RTS_BLOCK, 0x4000, EngineConfig::default());
        engine.get_or_compile(0x4000).expect("compiles");
        engine.state.cache_op = cache_op::LINE;
        engine.state.cache_addr = 0x4800;
        engine.process_cache_op();
        assert_eq!(engine.cache().len(), 1);
    }

    #[test]
    fn soft_flush_preserves_unmodified_units() {
        // Scenario E: CINV all with soft flush on and unchanged guest
        // bytes revalidates the unit instead of retranslating.
        let cfg = EngineConfig {
            soft_flush: true,
            soft_flush_threshold: 0,
            ..EngineConfig::default()
        };
        let mut engine = engine_with(&RTS_BLOCK, 0x5000, cfg);
        let a = engine.get_or_compile(0x5000).expect("compiles");
        engine.state.cache_op = cache_op::ALL;
        engine.process_cache_op();
        assert!(engine.cache().unit(a).is_poisoned());
        let b = engine.get_or_compile(0x5000).expect("revalidates");
        assert_eq!(a, b);
        assert_eq!(engine.stats().revalidations, 1);
        assert_eq!(engine.stats().cache_misses, 1, "no retranslation");
        assert!(!engine.cache().unit(b).is_poisoned());
    }

    #[test]
    fn soft_flush_discards_modified_units() {
        let cfg = EngineConfig {
            soft_flush: true,
            soft_flush_threshold: 0,
            ..EngineConfig::default()
        };
        let mut engine = engine_with(&RTS_BLOCK, 0x5000, cfg);
        engine.get_or_compile(0x5000).expect("compiles");
        engine.state.cache_op = cache_op::ALL;
        engine.process_cache_op();
        // Self-modifying guest: patch the MOVEQ immediate.
        engine.mem.write_u8(0x5001, 0x42);
        engine.get_or_compile(0x5000).expect("retranslates");
        assert_eq!(engine.stats().discards, 1);
        assert_eq!(engine.stats().cache_misses, 2);
    }

    #[test]
    fn hard_flush_drops_everything() {
        let mut engine = engine_with(&RTS_BLOCK, 0x5000, EngineConfig::default());
        engine.get_or_compile(0x5000).expect("compiles");
        engine.state.cache_op = cache_op::ALL;
        engine.process_cache_op();
        assert_eq!(engine.cache().len(), 0);
    }

    #[test]
    fn masked_interrupt_waits_for_lower_mask() {
        let mut engine = engine_with(&RTS_BLOCK, 0x1000, EngineConfig::default());
        engine.state.pc = 0x1000;
        engine.state.int32 = 3;
        // Reset state masks at level 7.
        engine.poll_interrupts();
        assert_eq!(engine.state.pc, 0x1000);
        assert_eq!(engine.state.int32, 3);
        // Lower the mask: delivery rewrites the PC through the vector.
        engine.state.write_sr(0x2000);
        engine.mem.write_u32(0x6c, 0x0000_8888);
        engine.state.a[7] = 0x1_0000;
        engine.poll_interrupts();
        assert_eq!(engine.state.pc, 0x8888);
        assert_eq!(engine.state.int32, 0);
    }

    #[test]
    fn tiny_capacity_reports_exhaustion() {
        let cfg = EngineConfig { cache_capacity: 8, ..EngineConfig::default() };
        let mut engine = engine_with(&RTS_BLOCK, 0x1000, cfg);
        let err = engine.get_or_compile(0x1000).expect_err("cannot fit");
        assert!(matches!(err, EngineError::CacheExhausted { pc: 0x1000 }));
    }
}
