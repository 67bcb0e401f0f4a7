//! The block translator: drives decode → lowering over a contiguous
//! guest instruction sequence and produces a relocatable block of ARM
//! words with its prologue and epilogues patched.

use arm_asm as arm;
use arm_asm::Reg;
use log::{debug, trace};
use m68k_state::GuestMem;

use crate::ctx::{state_offset, BlockCtx, Flow, JitConfig, REG_CTX, REG_PC};
use crate::lines;

/// Per-instruction checkpoint: where in the host stream the instruction
/// starts and which guest registers were mapped at that point.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Guest address of the instruction.
    pub m68k_addr: u32,
    /// Word offset of its first host instruction.
    pub host_offset: u32,
    /// Host register holding each of D0..D7,A0..A7, or `0xff`.
    pub reg_map: [u8; 16],
}

/// A finished, position-independent translation of one guest block.
/// The engine owns turning this into an executable translation unit.
#[derive(Debug, Clone)]
pub struct CompiledBlock {
    /// Guest address the block was compiled for.
    pub entry_m68k: u32,
    /// Inclusive lower bound of guest bytes covered.
    pub lo: u32,
    /// Exclusive upper bound of guest bytes covered.
    pub hi: u32,
    /// Guest instructions compiled.
    pub insn_count: u32,
    /// Emitted host words.
    pub code: Vec<u32>,
    /// Per-instruction checkpoints.
    pub checkpoints: Vec<Checkpoint>,
}

/// Translate the guest block starting at `pc`.
///
/// The loop bound (`max_insns`) plus unconditional-exit lowerings
/// guarantee forward progress: every block covers at least one guest
/// instruction and always ends in a return to the dispatcher.
pub fn translate(cfg: JitConfig, mem: &dyn GuestMem, pc: u32) -> CompiledBlock {
    let mut ctx = BlockCtx::new(cfg, mem, pc);
    let mut checkpoints = Vec::new();
    let mut lo = pc;
    let mut hi = pc;

    // Prologue: a push placeholder (patched once the touched-register
    // set is known), the state base, big-endian data accesses, and the
    // guest PC.
    let prologue_push = ctx.buf.emit(arm::push(0));
    ctx.buf.emit(arm::mov_reg(REG_CTX, Reg(0)));
    if cfg.big_endian_data {
        ctx.buf.emit(arm::setend_be());
    }
    ctx.buf.emit(arm::ldr_offset(REG_PC, REG_CTX, state_offset!(pc)));

    let mut insn_count = 0u32;
    while insn_count < cfg.max_insns {
        ctx.insn_start = ctx.pc;
        checkpoints.push(Checkpoint {
            m68k_addr: ctx.pc,
            host_offset: ctx.buf.len() as u32,
            reg_map: reg_map(&ctx),
        });
        let opcode = ctx.next_word();
        trace!("lowering {opcode:04x} at {:08x}", ctx.insn_start);
        let flow = lines::emit_insn(&mut ctx, opcode);
        insn_count += 1;
        lo = lo.min(ctx.insn_start);
        hi = hi.max(ctx.pc);

        match flow {
            Flow::Continue => {
                let len = ctx.pc.wrapping_sub(ctx.insn_start) as i32;
                ctx.pc_advance(len);
            }
            Flow::Exit => break,
            Flow::CondExit(fixups) => {
                emit_join_epilogue(&mut ctx, &fixups);
            }
        }
    }

    // Final exit: flush everything and return with the PC the offset
    // accumulator (or an exit lowering) left in the PC register.
    ctx.ra_flush_all();
    ctx.fra_flush_all();
    ctx.pc_flush();
    ctx.cc_flush();
    ctx.buf.emit(arm::str_offset(REG_PC, REG_CTX, state_offset!(pc)));
    if cfg.big_endian_data {
        ctx.buf.emit(arm::setend_le());
    }
    let at = ctx.buf.emit(arm::pop(0));
    ctx.pop_sites.push(at);
    ctx.buf.emit(arm::bx_lr());

    // The push set: callee-saved pool registers actually touched, the
    // pinned state base, the SR cache when it was ever loaded, and the
    // link register when emitted code made calls.
    let mut mask = ctx.ra_changed_mask() & 0x03f0;
    mask |= REG_CTX.mask_bit();
    if ctx.cc_used() {
        mask |= crate::ctx::REG_SR.mask_bit();
    }
    let push_mask = mask | if ctx.link_saved { arm::LR.mask_bit() } else { 0 };
    let pop_mask = mask | if ctx.link_saved { arm::HOST_PC.mask_bit() } else { 0 };
    ctx.buf.patch(prologue_push, arm::push(push_mask));
    let sites = core::mem::take(&mut ctx.pop_sites);
    for site in sites {
        ctx.buf.patch(site, arm::pop(pop_mask));
    }

    debug!(
        "translated {insn_count} m68k insns at {pc:08x}..{hi:08x} into {} arm words",
        ctx.buf.len()
    );

    CompiledBlock {
        entry_m68k: pc,
        lo,
        hi,
        insn_count,
        code: ctx.buf.into_words(),
        checkpoints,
    }
}

/// The join epilogue of a conditional exit: the straight-line path
/// stores the live state and leaves the unit; the recorded branches are
/// then retargeted past it and the block continues.
fn emit_join_epilogue(ctx: &mut BlockCtx<'_>, fixups: &[usize]) {
    let start = ctx.buf.len();
    ctx.ra_store_dirty();
    ctx.fra_store_dirty();
    ctx.cc_store();
    ctx.buf.emit(arm::str_offset(REG_PC, REG_CTX, state_offset!(pc)));
    if ctx.cfg.big_endian_data {
        ctx.buf.emit(arm::setend_le());
    }
    let at = ctx.buf.emit(arm::pop(0));
    ctx.pop_sites.push(at);
    ctx.buf.emit(arm::bx_lr());
    let distance = (ctx.buf.len() - start) as i32;
    for &f in fixups {
        ctx.buf.retarget_branch(f, distance);
    }
}

fn reg_map(ctx: &BlockCtx<'_>) -> [u8; 16] {
    let mut map = [0xffu8; 16];
    for (i, slot) in map.iter_mut().enumerate() {
        if let Some(reg) = ctx.ra_mapping(crate::regalloc::GuestReg(i as u8)) {
            *slot = reg.0;
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use m68k_state::FlatMemory;

    fn translate_at(bytes: &[u8], pc: u32) -> CompiledBlock {
        let mut mem = FlatMemory::new(0x10000);
        mem.load(pc, bytes);
        translate(JitConfig::default(), &mem, pc)
    }

    #[test]
    fn straight_line_block_has_one_pc_update() {
        // Four MOVEQ then RTS: the PC batching must collapse to zero
        // adds during the block (RTS rewrites the PC explicitly).
        let block = translate_at(&[0x70, 0x01, 0x72, 0x02, 0x74, 0x03, 0x76, 0x04, 0x4e, 0x75], 0x1000);
        assert_eq!(block.insn_count, 5);
        let adds: Vec<_> = block
            .code
            .iter()
            .filter(|&&w| w & 0x0fff_f000 == 0x028c_c000) // add r12, r12, #imm
            .collect();
        assert!(adds.is_empty(), "no batched-PC update expected, got {adds:x?}");
    }

    #[test]
    fn pc_relative_load_materialises_pc() {
        // MOVE.W (8,PC),D0 = 0x303a 0008; then RTS.
        let block = translate_at(&[0x30, 0x3a, 0x00, 0x08, 0x4e, 0x75], 0x1000);
        // The load folds against the guest PC register.
        assert!(
            block.code.iter().any(|&w| w & 0x0fff_00f0 == 0x01dc_00b0),
            "pc-relative halfword load expected"
        );
    }

    #[test]
    fn block_covers_consumed_bytes() {
        let block = translate_at(&[0x70, 0x05, 0x4e, 0x75], 0x2000);
        assert_eq!(block.entry_m68k, 0x2000);
        assert_eq!(block.lo, 0x2000);
        assert_eq!(block.hi, 0x2004);
        assert_eq!(block.insn_count, 2);
    }

    #[test]
    fn prologue_and_epilogue_masks_match() {
        let block = translate_at(&[0x70, 0x05, 0x4e, 0x75], 0x1000);
        let push = block.code[0];
        assert_eq!(push & 0xffff_0000, 0xe92d_0000);
        let mask = (push & 0xffff) as u16;
        // The state base is always saved.
        assert_ne!(mask & REG_CTX.mask_bit(), 0);
        // Some pop carries the same mask.
        assert!(block.code.iter().any(|&w| w == arm::pop(mask)));
    }

    #[test]
    fn checkpoints_track_instruction_starts() {
        let block = translate_at(&[0x70, 0x01, 0x72, 0x02, 0x4e, 0x75], 0x1000);
        assert_eq!(block.checkpoints.len(), 3);
        assert_eq!(block.checkpoints[0].m68k_addr, 0x1000);
        assert_eq!(block.checkpoints[1].m68k_addr, 0x1002);
        assert!(block.checkpoints[1].host_offset >= block.checkpoints[0].host_offset);
    }

    #[test]
    fn conditional_branch_produces_join_epilogue() {
        // BEQ +4; MOVEQ #1,D0; RTS
        let block = translate_at(&[0x67, 0x04, 0x70, 0x01, 0x4e, 0x75], 0x1000);
        // Two exits: the join epilogue and the final one → two pops.
        let pops = block.code.iter().filter(|&&w| w & 0xffff_0000 == 0xe8bd_0000).count();
        assert_eq!(pops, 2);
        assert_eq!(block.insn_count, 3);
    }

    #[test]
    fn unhandled_opcode_emits_trap_word() {
        // ABCD is not lowered: it must surface as a udf trap encoding
        // the opcode.
        let block = translate_at(&[0xc1, 0x00], 0x1000);
        assert!(block.code.iter().any(|&w| arm::udf_imm(w) == 0xc100 && w & 0x0ff0_00f0 == 0x07f0_00f0));
    }

    #[test]
    fn max_insns_bounds_the_block() {
        let mut bytes = Vec::new();
        for _ in 0..600 {
            bytes.extend_from_slice(&[0x70, 0x00]); // MOVEQ #0,D0
        }
        let mut mem = FlatMemory::new(0x10000);
        mem.load(0, &bytes);
        let block = translate(JitConfig::default(), &mem, 0);
        assert_eq!(block.insn_count, 256);
        assert_eq!(block.hi, 512);
    }
}
