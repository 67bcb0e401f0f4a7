//! Per-block translation context: emission buffer, batched PC offset,
//! cached-SR tracking and the runtime helper call shim.

use arm_asm as arm;
use arm_asm::{Cond, Reg};
use m68k_state::GuestMem;

use crate::regalloc::{FpState, RaState};

/// Guest-state base pointer, pinned for the whole translation unit.
pub const REG_CTX: Reg = Reg(11);
/// Guest program counter, pinned for the whole translation unit.
pub const REG_PC: Reg = Reg(12);
/// Cached guest status register.
pub const REG_SR: Reg = Reg(10);

/// Byte offset of a `GuestState` field, as load/store immediate material.
macro_rules! state_offset {
    ($field:ident) => {
        core::mem::offset_of!(::m68k_state::GuestState, $field) as i16
    };
}
pub(crate) use state_offset;

/// Addresses of the runtime routines emitted code may call.
///
/// The translator only embeds these words into literal pools; the engine
/// fills them in with real function addresses before translating.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelperTable {
    /// `extern "C" fn(state: *mut GuestState, vector: u32, return_pc: u32)`.
    pub raise_exception: u32,
    /// `extern "C" fn(state: *mut GuestState, value: u32)`: full SR write
    /// with stack-pointer re-aliasing.
    pub write_sr: u32,
    /// `extern "C" fn(n: i32, d: i32) -> (i32, i32)` quotient/remainder pair.
    pub idivmod: u32,
    /// `extern "C" fn(n: u32, d: u32) -> (u32, u32)`.
    pub uidivmod: u32,
    /// `double`-typed math entry points, indexed by [`crate::lines::linef::MathFn`].
    pub math: [u32; 32],
}

/// Translation parameters.
#[derive(Debug, Clone, Copy)]
pub struct JitConfig {
    /// Maximum guest instructions per translation unit.
    pub max_insns: u32,
    /// SR liveness scan depth, in instructions.
    pub ccr_scan_depth: u32,
    /// Blocks run with `setend be` so guest loads need no byte swapping.
    /// When clear, explicit `rev` fixups are emitted instead.
    pub big_endian_data: bool,
    /// Runtime helper addresses.
    pub helpers: HelperTable,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            max_insns: 256,
            ccr_scan_depth: 200,
            big_endian_data: true,
            helpers: HelperTable::default(),
        }
    }
}

/// Scratch ARM-word buffer with patching support.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    words: Vec<u32>,
}

impl CodeBuffer {
    /// Append one instruction word, returning its index.
    pub fn emit(&mut self, insn: u32) -> usize {
        self.words.push(insn);
        self.words.len() - 1
    }

    /// Number of words emitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// True when nothing has been emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Read back an emitted word.
    #[must_use]
    pub fn word(&self, at: usize) -> u32 {
        self.words[at]
    }

    /// Overwrite an emitted word.
    pub fn patch(&mut self, at: usize, insn: u32) {
        self.words[at] = insn;
    }

    /// Point the branch at `at` to the instruction at `target`.
    pub fn patch_branch_to(&mut self, at: usize, target: usize) {
        let offset = target as i32 - at as i32 - 2;
        self.words[at] = arm::patch_branch_offset(self.words[at], offset);
    }

    /// Add `extra` words to the offset of the branch at `at`.
    pub fn retarget_branch(&mut self, at: usize, extra: i32) {
        let offset = arm::branch_offset(self.words[at]) + extra;
        self.words[at] = arm::patch_branch_offset(self.words[at], offset);
    }

    /// Materialise an arbitrary constant into `rd` using the shortest
    /// sequence: `mov`, `mvn` or `movw`(+`movt`).
    pub fn load_const(&mut self, rd: Reg, value: u32) {
        if let Some(imm) = arm::encode_imm12(value) {
            self.emit(arm::mov_imm(rd, imm));
        } else if let Some(imm) = arm::encode_imm12(!value) {
            self.emit(arm::mvn_imm(rd, imm));
        } else {
            self.emit(arm::movw(rd, value as u16));
            if value >> 16 != 0 {
                self.emit(arm::movt(rd, (value >> 16) as u16));
            }
        }
    }

    /// The finished words.
    #[must_use]
    pub fn into_words(self) -> Vec<u32> {
        self.words
    }

    /// Emitted words as a slice.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words
    }
}

/// How a lowering leaves the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Fall through to the next guest instruction.
    Continue,
    /// Unconditional PC change: the block ends here.
    Exit,
    /// The lowering emitted conditional branches that continue the block;
    /// the straight-line path falls into a join epilogue the translator
    /// appends. Each listed branch is then retargeted past that epilogue.
    CondExit(Vec<usize>),
}

/// Everything a lowering needs while compiling one block.
pub struct BlockCtx<'a> {
    /// Translation parameters.
    pub cfg: JitConfig,
    /// Emission buffer.
    pub buf: CodeBuffer,
    /// Integer register allocator state.
    pub(crate) ra: RaState,
    /// FPU register allocator state.
    pub(crate) fra: FpState,
    /// Guest memory, for instruction fetch and the liveness scan.
    pub mem: &'a dyn GuestMem,
    /// Guest address of the next unconsumed instruction word.
    pub pc: u32,
    /// Guest address of the instruction currently being lowered; the
    /// batched PC register tracks this value.
    pub insn_start: u32,
    pub(crate) cc_loaded: bool,
    pub(crate) cc_dirty: bool,
    pub(crate) cc_used: bool,
    pub(crate) pc_rel: i32,
    /// Set when emitted code performs a procedure call; the prologue and
    /// epilogues must then preserve the link register.
    pub link_saved: bool,
    /// Indices of `pop` placeholder words; the translator patches each
    /// with the final register mask once the block is complete.
    pub pop_sites: Vec<usize>,
}

impl<'a> BlockCtx<'a> {
    /// Fresh context starting at `pc`.
    pub fn new(cfg: JitConfig, mem: &'a dyn GuestMem, pc: u32) -> Self {
        Self {
            cfg,
            buf: CodeBuffer::default(),
            ra: RaState::new(),
            fra: FpState::new(),
            mem,
            pc,
            insn_start: pc,
            cc_loaded: false,
            cc_dirty: false,
            cc_used: false,
            pc_rel: 0,
            link_saved: false,
            pop_sites: Vec::new(),
        }
    }

    /// Consume the next guest instruction word.
    pub fn next_word(&mut self) -> u16 {
        let word = self.mem.read_u16(self.pc);
        self.pc = self.pc.wrapping_add(2);
        word
    }

    /// Consume two guest words as a 32-bit value.
    pub fn next_long(&mut self) -> u32 {
        let value = self.mem.read_u32(self.pc);
        self.pc = self.pc.wrapping_add(4);
        value
    }

    /// Peek `n` words ahead without consuming.
    #[must_use]
    pub fn peek_word(&self, n: u32) -> u16 {
        self.mem.read_u16(self.pc.wrapping_add(2 * n))
    }

    /// Live SR flags after the current instruction, from the lookahead
    /// scan. Lowerings mask their flag updates with this.
    #[must_use]
    pub fn live_flags(&self) -> u8 {
        crate::liveness::live_mask(self.mem, self.pc, self.cfg.ccr_scan_depth)
    }

    // --- Condition code manager ---

    /// Ensure the guest SR is cached in [`REG_SR`].
    pub fn cc_get(&mut self) {
        if !self.cc_loaded {
            self.buf.emit(arm::ldrh_offset(REG_SR, REG_CTX, state_offset!(sr)));
            self.cc_loaded = true;
            self.cc_dirty = false;
            self.cc_used = true;
        }
    }

    /// Was the SR register ever cached in this block? Decides whether
    /// the prologue saves it.
    #[must_use]
    pub fn cc_used(&self) -> bool {
        self.cc_used
    }

    /// Ensure the SR is cached and mark it modified.
    pub fn cc_modify(&mut self) {
        self.cc_get();
        self.cc_dirty = true;
    }

    /// Write the cached SR back if it was modified; drop the caching.
    pub fn cc_flush(&mut self) {
        if self.cc_loaded && self.cc_dirty {
            self.buf.emit(arm::strh_offset(REG_SR, REG_CTX, state_offset!(sr)));
        }
        self.cc_loaded = false;
        self.cc_dirty = false;
    }

    /// Write the cached SR back but keep it cached (conditional exits).
    pub fn cc_store(&mut self) {
        if self.cc_loaded && self.cc_dirty {
            self.buf.emit(arm::strh_offset(REG_SR, REG_CTX, state_offset!(sr)));
        }
    }

    /// Drop the cached SR without a write-back (a helper has rewritten
    /// the architectural SR behind the cache's back).
    pub fn cc_discard(&mut self) {
        self.cc_loaded = false;
        self.cc_dirty = false;
    }

    /// Was the SR modified anywhere in this block?
    #[must_use]
    pub fn cc_modified(&self) -> bool {
        self.cc_dirty
    }

    // --- PC offset manager ---

    /// Record that the guest PC advanced by `n` bytes. Emits a real
    /// update only when the pending offset would leave ±120.
    pub fn pc_advance(&mut self, n: i32) {
        self.pc_rel += n;
        if self.pc_rel > 120 || self.pc_rel < -120 {
            self.pc_emit_pending();
        }
    }

    /// An offset usable against [`REG_PC`] that is equivalent to
    /// `pc_rel + offset`, flushing first if it would not fit.
    pub fn pc_get_offset(&mut self, offset: i32) -> i32 {
        let mut new_offset = self.pc_rel + offset;
        if !(-127..=127).contains(&new_offset) {
            self.pc_emit_pending();
            new_offset = offset;
        }
        new_offset
    }

    /// Emit any pending PC adjustment and reset the accumulator.
    pub fn pc_flush(&mut self) {
        self.pc_emit_pending();
    }

    /// Discard the pending offset without emitting; the PC register has
    /// been rewritten explicitly by control flow.
    pub fn pc_reset(&mut self) {
        self.pc_rel = 0;
    }

    /// Pending unemitted PC offset. Test support.
    #[must_use]
    pub fn pc_pending(&self) -> i32 {
        self.pc_rel
    }

    fn pc_emit_pending(&mut self) {
        if self.pc_rel > 0 {
            self.buf.emit(arm::add_imm(REG_PC, REG_PC, arm::encode_imm12(self.pc_rel as u32).unwrap_or(0)));
        } else if self.pc_rel < 0 {
            self.buf.emit(arm::sub_imm(REG_PC, REG_PC, arm::encode_imm12((-self.pc_rel) as u32).unwrap_or(0)));
        }
        self.pc_rel = 0;
    }

    // --- Guest memory access fixups ---

    /// Post-load byte-swap fixup for a value of `size` bytes, when the
    /// block does not run with big-endian data accesses.
    pub fn swap_after_load(&mut self, size: u8, reg: Reg) {
        if self.cfg.big_endian_data {
            return;
        }
        match size {
            4 => {
                self.buf.emit(arm::rev(reg, reg));
            }
            2 => {
                self.buf.emit(arm::rev16(reg, reg));
                self.buf.emit(arm::uxth(reg, reg, 0));
            }
            _ => {}
        }
    }

    /// Pre-store byte-swap fixup, mirroring [`Self::swap_after_load`].
    pub fn swap_before_store(&mut self, size: u8, reg: Reg) {
        self.swap_after_load(size, reg);
    }

    // --- Helper calls ---

    /// Call a runtime helper through a literal pool. Clobbers r0-r3 per
    /// the AAPCS; the caller stages arguments in r0-r2 and must have
    /// flushed anything live out of the caller-saved range. The guest PC
    /// register (r12) is not callee-saved and is preserved around the
    /// call. Marks the block as needing its link register preserved.
    pub fn emit_helper_call(&mut self, addr: u32) {
        self.link_saved = true;
        // ldr r3, [pc, #4]; blx r3; b past the literal; .word addr
        let scratch = Reg(3);
        self.buf.emit(arm::push(REG_PC.mask_bit()));
        self.buf.emit(arm::ldr_offset(scratch, arm::HOST_PC, 4));
        self.buf.emit(arm::blx_reg(scratch));
        self.buf.emit(arm::b(0));
        self.buf.emit(addr);
        self.buf.emit(arm::pop(REG_PC.mask_bit()));
    }

    /// Same, but bracketed with `setend` so the helper runs with the
    /// host's native little-endian data accesses.
    pub fn emit_helper_call_native_endian(&mut self, addr: u32) {
        if self.cfg.big_endian_data {
            self.buf.emit(arm::setend_le());
        }
        self.emit_helper_call(addr);
        if self.cfg.big_endian_data {
            self.buf.emit(arm::setend_be());
        }
    }

    /// Write every dirty cached value back so the in-memory `GuestState`
    /// matches the architectural state, keeping all mappings live.
    pub fn sync_guest_state(&mut self) {
        self.ra_store_dirty();
        self.fra_store_dirty();
        self.cc_store();
    }

    /// Emit a complete in-line exit from the translation unit.
    ///
    /// Requires the in-memory guest state to be current and [`REG_PC`] to
    /// hold the architectural PC. The `pop` placeholder is patched by the
    /// translator once the block's register mask is known.
    pub fn emit_inline_exit(&mut self) {
        self.buf.emit(arm::str_offset(REG_PC, REG_CTX, state_offset!(pc)));
        if self.cfg.big_endian_data {
            self.buf.emit(arm::setend_le());
        }
        let at = self.buf.emit(arm::pop(0));
        self.pop_sites.push(at);
        self.buf.emit(arm::bx_lr());
    }

    /// Raise a guest exception from emitted code and exit the unit.
    ///
    /// The caller must have called [`Self::sync_guest_state`] and flushed
    /// the batched PC, so this sequence can sit on the not-taken side of
    /// a conditional skip: the architectural return address is
    /// `REG_PC + pc_bias`, the helper rewrites `GuestState`, and the unit
    /// exits through an inline epilogue.
    pub fn emit_raise_exception(&mut self, vector: u32, pc_bias: i32) {
        self.buf.emit(arm::mov_reg(Reg(0), REG_CTX));
        self.buf.load_const(Reg(1), vector);
        self.add_const(Reg(2), REG_PC, pc_bias);
        self.emit_helper_call_native_endian(self.cfg.helpers.raise_exception);
        self.buf.emit(arm::ldr_offset(REG_PC, REG_CTX, state_offset!(pc)));
        self.emit_inline_exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use m68k_state::FlatMemory;

    fn ctx_over(mem: &FlatMemory) -> BlockCtx<'_> {
        BlockCtx::new(JitConfig::default(), mem, 0x1000)
    }

    #[test]
    fn load_const_picks_shortest_form() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = ctx_over(&mem);
        ctx.buf.load_const(Reg(0), 0xff);
        assert_eq!(ctx.buf.len(), 1);
        ctx.buf.load_const(Reg(0), 0xffff_ffff);
        assert_eq!(ctx.buf.len(), 2); // mvn
        ctx.buf.load_const(Reg(0), 0x1234_5678);
        assert_eq!(ctx.buf.len(), 4); // movw + movt
    }

    #[test]
    fn pc_advance_batches_until_overflow() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = ctx_over(&mem);
        for _ in 0..60 {
            ctx.pc_advance(2);
        }
        assert!(ctx.buf.is_empty());
        assert_eq!(ctx.pc_pending(), 120);
        ctx.pc_advance(2);
        assert_eq!(ctx.buf.len(), 1);
        assert_eq!(ctx.pc_pending(), 0);
        assert_eq!(ctx.buf.word(0), arm_asm::add_imm(REG_PC, REG_PC, arm_asm::encode_imm12(122).expect("fits")));
    }

    #[test]
    fn pc_flush_emits_subtract_for_negative_offsets() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = ctx_over(&mem);
        ctx.pc_advance(-6);
        ctx.pc_flush();
        assert_eq!(ctx.buf.word(0), arm_asm::sub_imm(REG_PC, REG_PC, arm_asm::encode_imm12(6).expect("fits")));
    }

    #[test]
    fn cc_get_loads_once() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = ctx_over(&mem);
        ctx.cc_get();
        ctx.cc_get();
        assert_eq!(ctx.buf.len(), 1);
        ctx.cc_flush();
        assert_eq!(ctx.buf.len(), 1); // unmodified: no store
        ctx.cc_modify();
        ctx.cc_flush();
        assert_eq!(ctx.buf.len(), 3); // reload + store
    }

    #[test]
    fn branch_patching_round_trip() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = ctx_over(&mem);
        let at = ctx.buf.emit(arm_asm::b_cc(Cond::Eq, 0));
        for _ in 0..5 {
            ctx.buf.emit(arm_asm::nop());
        }
        ctx.buf.patch_branch_to(at, 6);
        assert_eq!(arm_asm::branch_offset(ctx.buf.word(at)), 4);
        ctx.buf.retarget_branch(at, 3);
        assert_eq!(arm_asm::branch_offset(ctx.buf.word(at)), 7);
    }
}
