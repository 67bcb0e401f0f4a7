//! Per-opcode lowerings, dispatched on the top nibble of the opcode.
//!
//! Each family handler consumes the instruction's extension words from
//! the block context, emits host code, and reports how the block
//! continues via [`Flow`]. Flag updates are masked by the SR-liveness
//! scan: a handler asks the context for the live mask and skips update
//! code for dead bits.

use arm_asm as arm;
use arm_asm::Cond;
use m68k_state::{sr, vectors};

use crate::ctx::{BlockCtx, Flow, REG_SR};
use crate::ea::OpSize;

pub mod addsub;
pub mod line0;
pub mod line4;
pub mod line5;
pub mod line6;
pub mod line7;
pub mod linee;
pub mod linef;
pub mod logic;
pub mod moves;
pub mod muldiv;

type Handler = fn(&mut BlockCtx<'_>, u16) -> Flow;

/// Top-nibble dispatch table.
static DISPATCH: [Handler; 16] = [
    line0::emit,    // 0: bit manipulation / MOVEP / immediate
    moves::emit,    // 1: MOVE.B
    moves::emit,    // 2: MOVE.L
    moves::emit,    // 3: MOVE.W
    line4::emit,    // 4: miscellaneous
    line5::emit,    // 5: ADDQ/SUBQ/Scc/DBcc/TRAPcc
    line6::emit,    // 6: Bcc/BSR/BRA
    line7::emit,    // 7: MOVEQ
    logic::emit_or, // 8: OR/DIVx.W/SBCD
    addsub::emit_sub, // 9: SUB/SUBX/SUBA
    emit_line_a,    // A: unimplemented trap
    addsub::emit_cmp_eor, // B: CMP/CMPA/CMPM/EOR
    logic::emit_and, // C: AND/MULx.W/ABCD/EXG
    addsub::emit_add, // D: ADD/ADDX/ADDA
    linee::emit,    // E: shift/rotate/bit-field
    linef::emit,    // F: coprocessor
];

/// Lower one guest instruction, whose opcode word has been consumed.
pub fn emit_insn(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    DISPATCH[(opcode >> 12) as usize](ctx, opcode)
}

/// Line A: unimplemented-instruction trap.
fn emit_line_a(ctx: &mut BlockCtx<'_>, _opcode: u16) -> Flow {
    ctx.pc_flush();
    ctx.sync_guest_state();
    ctx.emit_raise_exception(vectors::LINE_A, 0);
    ctx.ra_invalidate_all();
    ctx.cc_discard();
    Flow::Exit
}

/// Lower an opcode the translator has no handler for: a `udf` trap
/// encoding the guest opcode, terminating the unit.
pub(crate) fn emit_unhandled(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    ctx.pc_flush();
    ctx.sync_guest_state();
    ctx.buf.emit(arm::udf(opcode));
    Flow::Exit
}

/// N, Z, V and C as an update mask.
pub(crate) const NZVC: u8 = (sr::N | sr::Z | sr::V | sr::C) as u8;

/// Fold {N,Z,V,C} (and X alongside C when requested) from the host flags
/// into the cached SR. Must directly follow the flag-setting host
/// instruction. `invert_carry` captures the subtract convention: the
/// m68k carry is the borrow, the inverse of the ARM carry.
pub(crate) fn flags_from_host(ctx: &mut BlockCtx<'_>, mask: u8, invert_carry: bool) {
    let m = u16::from(mask) & (sr::X | sr::N | sr::Z | sr::V | sr::C);
    if m == 0 {
        return;
    }
    ctx.cc_modify();
    ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, m));
    if m & sr::Z != 0 {
        ctx.buf.emit(arm::orr_cc_imm(Cond::Eq, REG_SR, REG_SR, sr::Z));
    }
    if m & sr::N != 0 {
        ctx.buf.emit(arm::orr_cc_imm(Cond::Mi, REG_SR, REG_SR, sr::N));
    }
    if m & sr::V != 0 {
        ctx.buf.emit(arm::orr_cc_imm(Cond::Vs, REG_SR, REG_SR, sr::V));
    }
    let carry = if invert_carry { Cond::Cc } else { Cond::Cs };
    if m & sr::C != 0 {
        ctx.buf.emit(arm::orr_cc_imm(carry, REG_SR, REG_SR, sr::C));
    }
    if m & sr::X != 0 {
        ctx.buf.emit(arm::orr_cc_imm(carry, REG_SR, REG_SR, sr::X));
    }
}

/// Same, but with sticky Z: the Z bit is cleared on a non-zero result
/// and left alone otherwise (multi-precision NEGX/ADDX/SUBX rule).
pub(crate) fn flags_from_host_sticky_z(ctx: &mut BlockCtx<'_>, mask: u8, invert_carry: bool) {
    let m = u16::from(mask) & (sr::X | sr::N | sr::Z | sr::V | sr::C);
    if m == 0 {
        return;
    }
    ctx.cc_modify();
    if m & !sr::Z != 0 {
        ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, m & !sr::Z));
    }
    if m & sr::Z != 0 {
        ctx.buf.emit(arm::bic_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::Z));
    }
    if m & sr::N != 0 {
        ctx.buf.emit(arm::orr_cc_imm(Cond::Mi, REG_SR, REG_SR, sr::N));
    }
    if m & sr::V != 0 {
        ctx.buf.emit(arm::orr_cc_imm(Cond::Vs, REG_SR, REG_SR, sr::V));
    }
    let carry = if invert_carry { Cond::Cc } else { Cond::Cs };
    if m & sr::C != 0 {
        ctx.buf.emit(arm::orr_cc_imm(carry, REG_SR, REG_SR, sr::C));
    }
    if m & sr::X != 0 {
        ctx.buf.emit(arm::orr_cc_imm(carry, REG_SR, REG_SR, sr::X));
    }
}

/// Update N and Z from a value of the given size; V and C in the mask
/// are cleared (the MOVE/logic-group rule). X is never touched.
pub(crate) fn flags_nz(ctx: &mut BlockCtx<'_>, value: arm::Reg, size: OpSize, mask: u8) {
    let m = u16::from(mask) & (sr::N | sr::Z | sr::V | sr::C);
    if m == 0 {
        return;
    }
    ctx.cc_modify();
    if m & (sr::N | sr::Z) != 0 {
        match size {
            OpSize::Long => {
                ctx.buf.emit(arm::cmp_imm(value, 0));
            }
            _ => {
                let t = ctx.ra_alloc();
                ctx.buf.emit(arm::lsls_imm(t, value, 32 - size.bits()));
                ctx.ra_free(t);
            }
        }
    }
    ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, m));
    if m & sr::Z != 0 {
        ctx.buf.emit(arm::orr_cc_imm(Cond::Eq, REG_SR, REG_SR, sr::Z));
    }
    if m & sr::N != 0 {
        ctx.buf.emit(arm::orr_cc_imm(Cond::Mi, REG_SR, REG_SR, sr::N));
    }
}

/// Statically-known flag update (MOVEQ, CLR): set the given flag values
/// for the bits in the mask.
pub(crate) fn flags_static(ctx: &mut BlockCtx<'_>, mask: u8, values: u8) {
    let m = u16::from(mask) & (sr::X | sr::N | sr::Z | sr::V | sr::C);
    if m == 0 {
        return;
    }
    ctx.cc_modify();
    ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, m));
    let set = m & u16::from(values);
    if set != 0 {
        ctx.buf.emit(arm::orr_imm(REG_SR, REG_SR, set));
    }
}

/// Emit the user-mode privilege gate: in user mode, raise a privilege
/// violation (stacking the address of this instruction) and leave the
/// unit; in supervisor mode fall through to the caller's code.
///
/// Flushes the batched PC, so afterwards `REG_PC` holds the address of
/// the current instruction on the supervisor path as well.
pub(crate) fn privilege_gate(ctx: &mut BlockCtx<'_>) {
    ctx.pc_flush();
    ctx.sync_guest_state();
    ctx.cc_get();
    let s_bit = arm::encode_imm12(u32::from(sr::S)).expect("S bit is encodable");
    ctx.buf.emit(arm::tst_imm(REG_SR, s_bit));
    let skip = ctx.buf.emit(arm::b_cc(Cond::Ne, 0));
    ctx.emit_raise_exception(vectors::PRIVILEGE_VIOLATION, 0);
    let end = ctx.buf.len();
    ctx.buf.patch_branch_to(skip, end);
}

/// Conditionally advance the guest PC register by an arbitrary delta.
pub(crate) fn set_pc_cc(ctx: &mut BlockCtx<'_>, cond: Cond, delta: i32) {
    use crate::ctx::REG_PC;
    if let Some(imm) = arm::encode_imm12(delta.unsigned_abs()) {
        if delta >= 0 {
            ctx.buf.emit(arm::add_cc_imm(cond, REG_PC, REG_PC, imm));
        } else {
            ctx.buf.emit(arm::sub_cc_imm(cond, REG_PC, REG_PC, imm));
        }
    } else {
        let tmp = ctx.ra_alloc();
        ctx.buf.load_const(tmp, delta as u32);
        ctx.buf.emit(arm::add_cc_reg(cond, REG_PC, REG_PC, tmp, 0));
        ctx.ra_free(tmp);
    }
}
