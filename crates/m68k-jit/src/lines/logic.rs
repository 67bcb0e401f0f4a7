//! Lines 8 and C: OR and AND in both directions, the word-size
//! multiply/divide entry points, and EXG. (The BCD opcodes in these
//! lines are not lowered and fall back to the trap path.)

use arm_asm as arm;

use super::flags_nz;
use crate::ctx::{BlockCtx, Flow};
use crate::ea::OpSize;
use crate::regalloc::GuestReg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicKind {
    Or,
    And,
    Eor,
}

/// Lower one line-8 instruction.
pub fn emit_or(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    match (opcode >> 6) & 7 {
        0b011 => super::muldiv::emit_div_w(ctx, opcode, false),
        0b111 => super::muldiv::emit_div_w(ctx, opcode, true),
        0b100 if opcode & 0x0030 == 0 => super::emit_unhandled(ctx, opcode), // SBCD
        _ => emit_logic(ctx, opcode, LogicKind::Or),
    }
}

/// Lower one line-C instruction.
pub fn emit_and(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    match (opcode >> 6) & 7 {
        0b011 => super::muldiv::emit_mul_w(ctx, opcode, false),
        0b111 => super::muldiv::emit_mul_w(ctx, opcode, true),
        0b100 if opcode & 0x0030 == 0 => super::emit_unhandled(ctx, opcode), // ABCD
        0b101 | 0b110 if opcode & 0x0030 == 0 => emit_exg(ctx, opcode),
        _ => emit_logic(ctx, opcode, LogicKind::And),
    }
}

/// Shared OR/AND/EOR body. EOR only ever writes to memory or a data
/// register (line B dispatches here).
pub(crate) fn emit_logic(ctx: &mut BlockCtx<'_>, opcode: u16, kind: LogicKind) -> Flow {
    let Some(size) = OpSize::from_bits((opcode >> 6) as u8) else {
        return super::emit_unhandled(ctx, opcode);
    };
    let ea = (opcode & 0x3f) as u8;
    let dn_idx = ((opcode >> 9) & 7) as u8;
    let to_memory = opcode & 0x0100 != 0;

    if to_memory && ea >> 3 != 0 {
        let addr = ctx.ea_rmw_address(size, ea);
        let mask = ctx.live_flags();
        let val = ctx.ra_alloc();
        ctx.ea_emit_load(size, val, addr, 0);
        let dn = ctx.map_read(GuestReg::d(dn_idx));
        apply(ctx, kind, size, val, dn);
        flags_nz(ctx, val, size, mask);
        ctx.ea_emit_store(size, val, addr, 0);
        ctx.ra_free(dn);
        ctx.ra_free(val);
        ctx.ra_free(addr);
        return Flow::Continue;
    }

    // EOR always writes the EA side; its register-direct form therefore
    // has the roles reversed relative to OR/AND.
    let (src, dn, dst_guest) = if kind == LogicKind::Eor {
        let src = ctx.map_read(GuestReg::d(dn_idx));
        let dst = GuestReg::d(ea & 7);
        (src, ctx.map_read(dst), dst)
    } else {
        let src = ctx.ea_load(size, ea, true);
        let dst = GuestReg::d(dn_idx);
        (src, ctx.map_read(dst), dst)
    };
    let mask = ctx.live_flags();
    match size {
        OpSize::Long => {
            match kind {
                LogicKind::Or => ctx.buf.emit(arm::orr_reg(dn, dn, src, 0)),
                LogicKind::And => ctx.buf.emit(arm::and_reg(dn, dn, src, 0)),
                LogicKind::Eor => ctx.buf.emit(arm::eor_reg(dn, dn, src, 0)),
            };
            flags_nz(ctx, dn, size, mask);
        }
        _ => match kind {
            LogicKind::Or => {
                // A zero-extended source only disturbs the sized part.
                let t = ctx.ra_alloc();
                extend(ctx, size, t, src);
                ctx.buf.emit(arm::orr_reg(dn, dn, t, 0));
                ctx.ra_free(t);
                flags_nz(ctx, dn, size, mask);
            }
            LogicKind::And => {
                let t = ctx.ra_alloc();
                ctx.buf.emit(arm::and_reg(t, dn, src, 0));
                ctx.buf.emit(arm::bfi(dn, t, 0, size.bits()));
                flags_nz(ctx, t, size, mask);
                ctx.ra_free(t);
            }
            LogicKind::Eor => {
                let t = ctx.ra_alloc();
                extend(ctx, size, t, src);
                ctx.buf.emit(arm::eor_reg(dn, dn, t, 0));
                ctx.ra_free(t);
                flags_nz(ctx, dn, size, mask);
            }
        },
    }
    ctx.set_dirty(dst_guest);
    ctx.ra_free(dn);
    ctx.ra_free(src);
    Flow::Continue
}

fn extend(ctx: &mut BlockCtx<'_>, size: OpSize, dst: arm::Reg, src: arm::Reg) {
    match size {
        OpSize::Byte => ctx.buf.emit(arm::uxtb(dst, src, 0)),
        _ => ctx.buf.emit(arm::uxth(dst, src, 0)),
    };
}

/// Apply `val = val op src` where `val` is a zero-extended value loaded
/// from memory, so high garbage can only come from the register source.
fn apply(ctx: &mut BlockCtx<'_>, kind: LogicKind, size: OpSize, val: arm::Reg, src: arm::Reg) {
    match size {
        OpSize::Long => {
            match kind {
                LogicKind::Or => ctx.buf.emit(arm::orr_reg(val, val, src, 0)),
                LogicKind::And => ctx.buf.emit(arm::and_reg(val, val, src, 0)),
                LogicKind::Eor => ctx.buf.emit(arm::eor_reg(val, val, src, 0)),
            };
        }
        _ => match kind {
            // AND against a zero-extended value cannot leak high bits.
            LogicKind::And => {
                ctx.buf.emit(arm::and_reg(val, val, src, 0));
            }
            _ => {
                let t = ctx.ra_alloc();
                extend(ctx, size, t, src);
                match kind {
                    LogicKind::Or => ctx.buf.emit(arm::orr_reg(val, val, t, 0)),
                    _ => ctx.buf.emit(arm::eor_reg(val, val, t, 0)),
                };
                ctx.ra_free(t);
            }
        },
    }
}

/// EXG: swap two registers (Dn↔Dn, An↔An or Dn↔An).
fn emit_exg(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let rx = ((opcode >> 9) & 7) as u8;
    let ry = (opcode & 7) as u8;
    let (gx, gy) = match (opcode >> 3) & 0x1f {
        0b01000 => (GuestReg::d(rx), GuestReg::d(ry)),
        0b01001 => (GuestReg::a(rx), GuestReg::a(ry)),
        0b10001 => (GuestReg::d(rx), GuestReg::a(ry)),
        _ => return super::emit_unhandled(ctx, opcode),
    };
    let hx = ctx.map_read(gx);
    let hy = ctx.map_read(gy);
    let t = ctx.ra_alloc();
    ctx.buf.emit(arm::mov_reg(t, hx));
    ctx.buf.emit(arm::mov_reg(hx, hy));
    ctx.buf.emit(arm::mov_reg(hy, t));
    ctx.set_dirty(gx);
    ctx.set_dirty(gy);
    ctx.ra_free(t);
    ctx.ra_free(hy);
    ctx.ra_free(hx);
    Flow::Continue
}
