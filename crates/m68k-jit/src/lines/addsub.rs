//! Lines 9, B and D: ADD/SUB in both directions, ADDA/SUBA, the
//! extended ADDX/SUBX forms, and line B's CMP/CMPA/CMPM/EOR.

use arm_asm as arm;
use m68k_state::sr;

use super::{flags_from_host, flags_from_host_sticky_z};
use crate::ctx::{BlockCtx, Flow, REG_SR};
use crate::ea::OpSize;
use crate::regalloc::GuestReg;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddSub {
    Add,
    Sub,
}

/// Lower one line-D instruction.
pub fn emit_add(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    emit_addsub(ctx, opcode, AddSub::Add)
}

/// Lower one line-9 instruction.
pub fn emit_sub(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    emit_addsub(ctx, opcode, AddSub::Sub)
}

fn emit_addsub(ctx: &mut BlockCtx<'_>, opcode: u16, op: AddSub) -> Flow {
    let opmode = ((opcode >> 6) & 7) as u8;
    let ea = (opcode & 0x3f) as u8;
    let dn_idx = ((opcode >> 9) & 7) as u8;

    if opmode == 0b011 || opmode == 0b111 {
        return emit_adda(ctx, opcode, op);
    }
    if opmode & 0b100 != 0 && ea >> 4 == 0 {
        // ADDX/SUBX: register or -(An),-(An) form.
        return emit_addsub_x(ctx, opcode, op);
    }

    let Some(size) = OpSize::from_bits(opmode) else {
        return super::emit_unhandled(ctx, opcode);
    };
    let invert = op == AddSub::Sub;

    if opmode & 0b100 == 0 {
        // <ea> op Dn → Dn.
        let src = ctx.ea_load(size, ea, true);
        let dn = ctx.map_read(GuestReg::d(dn_idx));
        let mask = ctx.live_flags();
        sized_alu(ctx, op, size, dn, src);
        flags_from_host(ctx, mask, invert);
        ctx.set_dirty(GuestReg::d(dn_idx));
        ctx.ra_free(dn);
        ctx.ra_free(src);
    } else {
        // Dn op <ea> → <ea>.
        let addr = ctx.ea_rmw_address(size, ea);
        let mask = ctx.live_flags();
        let val = ctx.ra_alloc();
        ctx.ea_emit_load(size, val, addr, 0);
        let dn = ctx.map_read(GuestReg::d(dn_idx));
        sized_alu(ctx, op, size, val, dn);
        flags_from_host(ctx, mask, invert);
        ctx.ea_emit_store(size, val, addr, 0);
        ctx.ra_free(dn);
        ctx.ra_free(val);
        ctx.ra_free(addr);
    }
    Flow::Continue
}

/// `dst = dst op src` with host flags valid for the operand size.
/// Sub-long operands are computed in the top bits of a scratch.
fn sized_alu(ctx: &mut BlockCtx<'_>, op: AddSub, size: OpSize, dst: arm::Reg, src: arm::Reg) {
    match size {
        OpSize::Long => {
            match op {
                AddSub::Add => ctx.buf.emit(arm::adds_reg(dst, dst, src, 0)),
                AddSub::Sub => ctx.buf.emit(arm::subs_reg(dst, dst, src, 0)),
            };
        }
        _ => {
            let up = 32 - size.bits();
            let t = ctx.ra_alloc();
            ctx.buf.emit(arm::lsl_imm(t, dst, up));
            match op {
                AddSub::Add => ctx.buf.emit(arm::adds_reg(t, t, src, up)),
                AddSub::Sub => ctx.buf.emit(arm::subs_reg(t, t, src, up)),
            };
            ctx.buf.emit(arm::lsr_imm(t, t, up));
            ctx.buf.emit(arm::bfi(dst, t, 0, size.bits()));
            ctx.ra_free(t);
        }
    }
}

/// ADDA/SUBA: word sources sign-extend; the whole register changes and
/// no flags are touched.
fn emit_adda(ctx: &mut BlockCtx<'_>, opcode: u16, op: AddSub) -> Flow {
    let long = opcode & 0x0100 != 0;
    let size = if long { OpSize::Long } else { OpSize::Word };
    let ea = (opcode & 0x3f) as u8;
    let src = ctx.ea_load(size, ea, false);
    if !long {
        ctx.buf.emit(arm::sxth(src, src, 0));
    }
    let an = ctx.map_read(GuestReg::a(((opcode >> 9) & 7) as u8));
    match op {
        AddSub::Add => ctx.buf.emit(arm::add_reg(an, an, src, 0)),
        AddSub::Sub => ctx.buf.emit(arm::sub_reg(an, an, src, 0)),
    };
    ctx.set_dirty(GuestReg::a(((opcode >> 9) & 7) as u8));
    ctx.ra_free(an);
    ctx.ra_free(src);
    Flow::Continue
}

/// ADDX/SUBX: the X flag joins the operation and Z is sticky.
fn emit_addsub_x(ctx: &mut BlockCtx<'_>, opcode: u16, op: AddSub) -> Flow {
    let Some(size) = OpSize::from_bits((opcode >> 6) as u8) else {
        return super::emit_unhandled(ctx, opcode);
    };
    let rx = ((opcode >> 9) & 7) as u8; // destination
    let ry = (opcode & 7) as u8; // source
    let memory_form = opcode & 0x0008 != 0;

    let (dst, src, store): (arm::Reg, arm::Reg, Option<arm::Reg>) = if memory_form {
        // -(Ay) to -(Ax): source decrements first.
        let src_addr = ctx.ea_rmw_address(size, 0b100_000 | ry);
        let src = ctx.ra_alloc();
        ctx.ea_emit_load(size, src, src_addr, 0);
        ctx.ra_free(src_addr);
        let dst_addr = ctx.ea_rmw_address(size, 0b100_000 | rx);
        let dst = ctx.ra_alloc();
        ctx.ea_emit_load(size, dst, dst_addr, 0);
        (dst, src, Some(dst_addr))
    } else {
        let src = ctx.map_read(GuestReg::d(ry));
        let dst = ctx.map_read(GuestReg::d(rx));
        (dst, src, None)
    };
    let mask = ctx.live_flags();

    // Move X into the host carry: for ADC the carry adds, for SBC the
    // inverted carry subtracts.
    ctx.cc_get();
    let t = ctx.ra_alloc();
    match op {
        AddSub::Add => {
            ctx.buf.emit(arm::lsrs_imm(t, REG_SR, 5)); // carry = X
        }
        AddSub::Sub => {
            ctx.buf.emit(arm::eor_imm(t, REG_SR, sr::X));
            ctx.buf.emit(arm::lsrs_imm(t, t, 5)); // carry = !X
        }
    }

    match size {
        OpSize::Long => {
            match op {
                AddSub::Add => ctx.buf.emit(arm::adcs_reg(dst, dst, src, 0)),
                AddSub::Sub => ctx.buf.emit(arm::sbcs_reg(dst, dst, src, 0)),
            };
            flags_from_host_sticky_z(ctx, mask, op == AddSub::Sub);
        }
        _ => {
            let up = 32 - size.bits();
            // The carry must enter at the shifted position, so both
            // operands move to the top before the extended op.
            ctx.buf.emit(arm::lsl_imm(t, dst, up));
            match op {
                AddSub::Add => ctx.buf.emit(arm::adcs_reg(t, t, src, up)),
                AddSub::Sub => ctx.buf.emit(arm::sbcs_reg(t, t, src, up)),
            };
            flags_from_host_sticky_z(ctx, mask, op == AddSub::Sub);
            ctx.buf.emit(arm::lsr_imm(t, t, up));
            ctx.buf.emit(arm::bfi(dst, t, 0, size.bits()));
        }
    }
    ctx.ra_free(t);

    if let Some(dst_addr) = store {
        ctx.ea_emit_store(size, dst, dst_addr, 0);
        ctx.ra_free(dst_addr);
        ctx.ra_free(dst);
        ctx.ra_free(src);
    } else {
        ctx.set_dirty(GuestReg::d(rx));
        ctx.ra_free(dst);
        ctx.ra_free(src);
    }
    Flow::Continue
}

/// Line B: CMP, CMPA, CMPM and EOR.
pub fn emit_cmp_eor(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let opmode = ((opcode >> 6) & 7) as u8;
    match opmode {
        0b011 | 0b111 => emit_cmpa(ctx, opcode),
        0b000 | 0b001 | 0b010 => emit_cmp(ctx, opcode),
        _ => {
            if opcode & 0x0038 == 0x0008 {
                emit_cmpm(ctx, opcode)
            } else {
                super::logic::emit_logic(ctx, opcode, super::logic::LogicKind::Eor)
            }
        }
    }
}

fn emit_cmp(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let Some(size) = OpSize::from_bits((opcode >> 6) as u8) else {
        return super::emit_unhandled(ctx, opcode);
    };
    let src = ctx.ea_load(size, (opcode & 0x3f) as u8, true);
    let dn = ctx.map_read(GuestReg::d(((opcode >> 9) & 7) as u8));
    let mask = ctx.live_flags() & !(sr::X as u8);
    sized_cmp(ctx, size, dn, src);
    flags_from_host(ctx, mask, true);
    ctx.ra_free(dn);
    ctx.ra_free(src);
    Flow::Continue
}

fn sized_cmp(ctx: &mut BlockCtx<'_>, size: OpSize, a: arm::Reg, b: arm::Reg) {
    match size {
        OpSize::Long => {
            ctx.buf.emit(arm::cmp_reg(a, b));
        }
        _ => {
            let up = 32 - size.bits();
            let t = ctx.ra_alloc();
            ctx.buf.emit(arm::lsl_imm(t, a, up));
            ctx.buf.emit(arm::subs_reg(t, t, b, up));
            ctx.ra_free(t);
        }
    }
}

/// CMPA: the source is sign-extended to a long compare.
fn emit_cmpa(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let long = opcode & 0x0100 != 0;
    let size = if long { OpSize::Long } else { OpSize::Word };
    let src = ctx.ea_load(size, (opcode & 0x3f) as u8, false);
    if !long {
        ctx.buf.emit(arm::sxth(src, src, 0));
    }
    let an = ctx.map_read(GuestReg::a(((opcode >> 9) & 7) as u8));
    let mask = ctx.live_flags() & !(sr::X as u8);
    ctx.buf.emit(arm::cmp_reg(an, src));
    flags_from_host(ctx, mask, true);
    ctx.ra_free(an);
    ctx.ra_free(src);
    Flow::Continue
}

/// CMPM (Ay)+,(Ax)+.
fn emit_cmpm(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let Some(size) = OpSize::from_bits((opcode >> 6) as u8) else {
        return super::emit_unhandled(ctx, opcode);
    };
    let ry = (opcode & 7) as u8;
    let rx = ((opcode >> 9) & 7) as u8;
    let src = ctx.ea_load(size, 0b011_000 | ry, true);
    let dst = ctx.ea_load(size, 0b011_000 | rx, true);
    let mask = ctx.live_flags() & !(sr::X as u8);
    sized_cmp(ctx, size, dst, src);
    flags_from_host(ctx, mask, true);
    ctx.ra_free(dst);
    ctx.ra_free(src);
    Flow::Continue
}
