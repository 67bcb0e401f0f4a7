//! Line 0: arithmetic/logic immediates, CCR/SR immediates, bit
//! manipulation and MOVEP.

use arm_asm as arm;
use arm_asm::Cond;
use m68k_state::sr;

use super::{flags_from_host, flags_nz, privilege_gate};
use crate::ctx::{BlockCtx, Flow, REG_SR};
use crate::ea::OpSize;
use crate::regalloc::GuestReg;

/// Lower one line-0 instruction.
pub fn emit(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    if opcode & 0x0100 != 0 {
        if opcode & 0x0038 == 0x0008 {
            return emit_movep(ctx, opcode);
        }
        return emit_bitop(ctx, opcode, BitNumber::Dynamic(((opcode >> 9) & 7) as u8));
    }
    if opcode & 0x0f00 == 0x0800 {
        let bit = (ctx.next_word() & 0xff) as u8;
        return emit_bitop(ctx, opcode, BitNumber::Static(bit));
    }
    match (opcode >> 9) & 7 {
        0b000 => emit_logic_imm(ctx, opcode, LogicOp::Or),
        0b001 => emit_logic_imm(ctx, opcode, LogicOp::And),
        0b010 => emit_arith_imm(ctx, opcode, ArithOp::Sub),
        0b011 => emit_arith_imm(ctx, opcode, ArithOp::Add),
        0b101 => emit_logic_imm(ctx, opcode, LogicOp::Eor),
        0b110 => emit_arith_imm(ctx, opcode, ArithOp::Cmp),
        _ => super::emit_unhandled(ctx, opcode),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum LogicOp {
    Or,
    And,
    Eor,
}

#[derive(Clone, Copy, PartialEq)]
enum ArithOp {
    Add,
    Sub,
    Cmp,
}

enum BitNumber {
    Static(u8),
    Dynamic(u8),
}

fn read_imm(ctx: &mut BlockCtx<'_>, size: OpSize) -> u32 {
    match size {
        OpSize::Byte => u32::from(ctx.next_word() & 0xff),
        OpSize::Word => u32::from(ctx.next_word()),
        OpSize::Long => ctx.next_long(),
    }
}

/// ADDI/SUBI/CMPI. Sub-long operands are shifted to the top of the host
/// register so the host flags reflect the sized arithmetic exactly.
fn emit_arith_imm(ctx: &mut BlockCtx<'_>, opcode: u16, op: ArithOp) -> Flow {
    let Some(size) = OpSize::from_bits((opcode >> 6) as u8) else {
        return super::emit_unhandled(ctx, opcode);
    };
    let ea = (opcode & 0x3f) as u8;
    let imm = read_imm(ctx, size);

    let invert_carry = op != ArithOp::Add;
    let x_mask = if op == ArithOp::Cmp { !(sr::X as u8) } else { !0 };

    if ea >> 3 == 0 {
        // Dn destination.
        let dn = ctx.map_read(GuestReg::d(ea & 7));
        let mask = ctx.live_flags() & x_mask;
        emit_sized_arith_reg(ctx, op, size, dn, imm);
        if op != ArithOp::Cmp {
            ctx.set_dirty(GuestReg::d(ea & 7));
        }
        flags_from_host(ctx, mask, invert_carry);
        ctx.ra_free(dn);
    } else if op == ArithOp::Cmp {
        // CMPI reads any EA, including PC-relative on the 68020.
        let val = ctx.ea_load(size, ea, true);
        let mask = ctx.live_flags() & x_mask;
        emit_sized_cmp_value(ctx, size, val, imm);
        flags_from_host(ctx, mask, true);
        ctx.ra_free(val);
    } else {
        let addr = ctx.ea_rmw_address(size, ea);
        let mask = ctx.live_flags() & x_mask;
        let val = ctx.ra_alloc();
        ctx.ea_emit_load(size, val, addr, 0);
        emit_sized_arith_reg(ctx, op, size, val, imm);
        flags_from_host(ctx, mask, invert_carry);
        ctx.ea_emit_store(size, val, addr, 0);
        ctx.ra_free(val);
        ctx.ra_free(addr);
    }
    Flow::Continue
}

/// Sized `reg = reg op imm` leaving host flags valid for the size.
fn emit_sized_arith_reg(ctx: &mut BlockCtx<'_>, op: ArithOp, size: OpSize, reg: arm::Reg, imm: u32) {
    match size {
        OpSize::Long => {
            let encoded = arm::encode_imm12(imm);
            match (op, encoded) {
                (ArithOp::Add, Some(e)) => {
                    ctx.buf.emit(arm::adds_imm(reg, reg, e));
                }
                (ArithOp::Sub, Some(e)) => {
                    ctx.buf.emit(arm::subs_imm(reg, reg, e));
                }
                (ArithOp::Cmp, Some(e)) => {
                    ctx.buf.emit(arm::cmp_imm(reg, e));
                }
                (_, None) => {
                    let t = ctx.ra_alloc();
                    ctx.buf.load_const(t, imm);
                    match op {
                        ArithOp::Add => ctx.buf.emit(arm::adds_reg(reg, reg, t, 0)),
                        ArithOp::Sub => ctx.buf.emit(arm::subs_reg(reg, reg, t, 0)),
                        ArithOp::Cmp => ctx.buf.emit(arm::cmp_reg(reg, t)),
                    };
                    ctx.ra_free(t);
                }
            }
        }
        _ => {
            let up = 32 - size.bits();
            let t = ctx.ra_alloc();
            ctx.buf.emit(arm::lsl_imm(t, reg, up));
            let shifted = imm << up;
            if let Some(e) = arm::encode_imm12(shifted) {
                match op {
                    ArithOp::Add => ctx.buf.emit(arm::adds_imm(t, t, e)),
                    ArithOp::Sub => ctx.buf.emit(arm::subs_imm(t, t, e)),
                    ArithOp::Cmp => ctx.buf.emit(arm::cmp_imm(t, e)),
                };
            } else {
                let t2 = ctx.ra_alloc();
                ctx.buf.load_const(t2, shifted);
                match op {
                    ArithOp::Add => ctx.buf.emit(arm::adds_reg(t, t, t2, 0)),
                    ArithOp::Sub => ctx.buf.emit(arm::subs_reg(t, t, t2, 0)),
                    ArithOp::Cmp => ctx.buf.emit(arm::cmp_reg(t, t2)),
                };
                ctx.ra_free(t2);
            }
            if op != ArithOp::Cmp {
                ctx.buf.emit(arm::lsr_imm(t, t, up));
                ctx.buf.emit(arm::bfi(reg, t, 0, size.bits()));
            }
            ctx.ra_free(t);
        }
    }
}

/// Sized compare of a loaded value against an immediate; value register
/// is not preserved for sub-long sizes.
fn emit_sized_cmp_value(ctx: &mut BlockCtx<'_>, size: OpSize, val: arm::Reg, imm: u32) {
    match size {
        OpSize::Long => {
            if let Some(e) = arm::encode_imm12(imm) {
                ctx.buf.emit(arm::cmp_imm(val, e));
            } else {
                let t = ctx.ra_alloc();
                ctx.buf.load_const(t, imm);
                ctx.buf.emit(arm::cmp_reg(val, t));
                ctx.ra_free(t);
            }
        }
        _ => {
            let up = 32 - size.bits();
            ctx.buf.emit(arm::lsl_imm(val, val, up));
            let shifted = imm << up;
            if let Some(e) = arm::encode_imm12(shifted) {
                ctx.buf.emit(arm::cmp_imm(val, e));
            } else {
                let t = ctx.ra_alloc();
                ctx.buf.load_const(t, shifted);
                ctx.buf.emit(arm::cmp_reg(val, t));
                ctx.ra_free(t);
            }
        }
    }
}

/// ORI/ANDI/EORI, including the CCR and SR destinations.
fn emit_logic_imm(ctx: &mut BlockCtx<'_>, opcode: u16, op: LogicOp) -> Flow {
    let ea = (opcode & 0x3f) as u8;
    let size_bits = ((opcode >> 6) & 3) as u8;

    if ea == 0b111_100 {
        return match size_bits {
            0 => emit_to_ccr(ctx, op),
            1 => emit_to_sr(ctx, op),
            _ => super::emit_unhandled(ctx, opcode),
        };
    }

    let Some(size) = OpSize::from_bits(size_bits) else {
        return super::emit_unhandled(ctx, opcode);
    };
    let imm = read_imm(ctx, size);

    if ea >> 3 == 0 {
        let dn = ctx.map_read(GuestReg::d(ea & 7));
        let mask = ctx.live_flags();
        emit_sized_logic_reg(ctx, op, size, dn, imm);
        ctx.set_dirty(GuestReg::d(ea & 7));
        flags_nz(ctx, dn, size, mask);
        ctx.ra_free(dn);
    } else {
        let addr = ctx.ea_rmw_address(size, ea);
        let mask = ctx.live_flags();
        let val = ctx.ra_alloc();
        ctx.ea_emit_load(size, val, addr, 0);
        emit_sized_logic_reg(ctx, op, size, val, imm);
        flags_nz(ctx, val, size, mask);
        ctx.ea_emit_store(size, val, addr, 0);
        ctx.ra_free(val);
        ctx.ra_free(addr);
    }
    Flow::Continue
}

/// Sized `reg = reg op imm` for the logic group; high bits of data
/// registers are preserved.
fn emit_sized_logic_reg(ctx: &mut BlockCtx<'_>, op: LogicOp, size: OpSize, reg: arm::Reg, imm: u32) {
    let masked = imm & (u32::MAX >> (32 - size.bits()));
    match op {
        LogicOp::Or | LogicOp::Eor => {
            // Setting or toggling bits only touches the sized low part.
            let emit_one = |ctx: &mut BlockCtx<'_>, value: u32| {
                if let Some(e) = arm::encode_imm12(value) {
                    match op {
                        LogicOp::Or => ctx.buf.emit(arm::orr_imm(reg, reg, e)),
                        _ => ctx.buf.emit(arm::eor_imm(reg, reg, e)),
                    };
                } else {
                    let t = ctx.ra_alloc();
                    ctx.buf.load_const(t, value);
                    match op {
                        LogicOp::Or => ctx.buf.emit(arm::orr_reg(reg, reg, t, 0)),
                        _ => ctx.buf.emit(arm::eor_reg(reg, reg, t, 0)),
                    };
                    ctx.ra_free(t);
                }
            };
            emit_one(ctx, masked);
        }
        LogicOp::And => {
            // AND of the low part only: clear the bits absent from the
            // immediate, leaving everything above the operand size.
            let clear = !imm & (u32::MAX >> (32 - size.bits()));
            if let Some(e) = arm::encode_imm12(clear) {
                ctx.buf.emit(arm::bic_imm(reg, reg, e));
            } else {
                let t = ctx.ra_alloc();
                ctx.buf.load_const(t, clear);
                ctx.buf.emit(arm::bic_reg(reg, reg, t, 0));
                ctx.ra_free(t);
            }
        }
    }
}

fn emit_to_ccr(ctx: &mut BlockCtx<'_>, op: LogicOp) -> Flow {
    let imm = ctx.next_word() & sr::CCR_MASK;
    ctx.cc_modify();
    match op {
        LogicOp::Or => {
            ctx.buf.emit(arm::orr_imm(REG_SR, REG_SR, imm));
        }
        LogicOp::And => {
            ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, !imm & sr::CCR_MASK));
        }
        LogicOp::Eor => {
            ctx.buf.emit(arm::eor_imm(REG_SR, REG_SR, imm));
        }
    }
    Flow::Continue
}

/// ORI/ANDI/EORI to SR: privileged; the SR write goes through the
/// runtime helper so supervisor-stack re-aliasing stays in one place.
fn emit_to_sr(ctx: &mut BlockCtx<'_>, op: LogicOp) -> Flow {
    let imm = ctx.next_word();
    privilege_gate(ctx);
    ctx.cc_get();
    let t = ctx.ra_alloc();
    match op {
        LogicOp::Or => {
            if let Some(e) = arm::encode_imm12(u32::from(imm)) {
                ctx.buf.emit(arm::orr_imm(t, REG_SR, e));
            } else {
                ctx.buf.emit(arm::movw(t, imm));
                ctx.buf.emit(arm::orr_reg(t, t, REG_SR, 0));
            }
        }
        LogicOp::And => {
            ctx.buf.emit(arm::movw(t, imm));
            ctx.buf.emit(arm::and_reg(t, t, REG_SR, 0));
        }
        LogicOp::Eor => {
            if let Some(e) = arm::encode_imm12(u32::from(imm)) {
                ctx.buf.emit(arm::eor_imm(t, REG_SR, e));
            } else {
                ctx.buf.emit(arm::movw(t, imm));
                ctx.buf.emit(arm::eor_reg(t, t, REG_SR, 0));
            }
        }
    }
    finish_sr_write(ctx, t)
}

/// Stage `value` into the SR-write helper and end the block: the new SR
/// may unmask interrupts or drop privileges.
pub(super) fn finish_sr_write(ctx: &mut BlockCtx<'_>, value: arm::Reg) -> Flow {
    ctx.cc_discard();
    ctx.ra_flush_all();
    ctx.fra_flush_all();
    // Advance the PC past this instruction before the call; the gate
    // left REG_PC at the instruction start.
    let len = ctx.pc.wrapping_sub(ctx.insn_start) as i32;
    ctx.add_const(crate::ctx::REG_PC, crate::ctx::REG_PC, len);
    ctx.pc_reset();
    ctx.buf.emit(arm::mov_reg(arm::Reg(1), value));
    ctx.ra_free(value);
    ctx.buf.emit(arm::mov_reg(arm::Reg(0), crate::ctx::REG_CTX));
    let addr = ctx.cfg.helpers.write_sr;
    ctx.emit_helper_call_native_endian(addr);
    Flow::Exit
}

/// BTST/BCHG/BCLR/BSET with static or dynamic bit numbers.
fn emit_bitop(ctx: &mut BlockCtx<'_>, opcode: u16, bit: BitNumber) -> Flow {
    let ea = (opcode & 0x3f) as u8;
    let kind = ((opcode >> 6) & 3) as u8; // 0 BTST, 1 BCHG, 2 BCLR, 3 BSET
    let on_dn = ea >> 3 == 0;

    let (target, addr) = if on_dn {
        (ctx.map_read(GuestReg::d(ea & 7)), None)
    } else {
        let addr = ctx.ea_rmw_address(OpSize::Byte, ea);
        let val = ctx.ra_alloc();
        ctx.buf.emit(arm::ldrb_offset(val, addr, 0));
        (val, Some(addr))
    };
    let mask = ctx.live_flags();

    let width = if on_dn { 32u32 } else { 8 };
    match bit {
        BitNumber::Static(n) => {
            let bit_mask = 1u32 << (u32::from(n) % width);
            let e = arm::encode_imm12(bit_mask).expect("single bit is encodable");
            ctx.buf.emit(arm::tst_imm(target, e));
            match kind {
                1 => {
                    ctx.buf.emit(arm::eor_imm(target, target, e));
                }
                2 => {
                    ctx.buf.emit(arm::bic_imm(target, target, e));
                }
                3 => {
                    ctx.buf.emit(arm::orr_imm(target, target, e));
                }
                _ => {}
            }
        }
        BitNumber::Dynamic(dn) => {
            let n = ctx.copy_from(GuestReg::d(dn));
            ctx.buf.emit(arm::and_imm(n, n, arm::encode_imm12(width - 1).expect("fits")));
            let bit_reg = ctx.ra_alloc();
            ctx.buf.emit(arm::mov_imm(bit_reg, 1));
            ctx.buf.emit(arm::lsl_reg(bit_reg, bit_reg, n));
            ctx.buf.emit(arm::tst_reg(target, bit_reg, 0));
            match kind {
                1 => {
                    ctx.buf.emit(arm::eor_reg(target, target, bit_reg, 0));
                }
                2 => {
                    ctx.buf.emit(arm::bic_reg(target, target, bit_reg, 0));
                }
                3 => {
                    ctx.buf.emit(arm::orr_reg(target, target, bit_reg, 0));
                }
                _ => {}
            }
            ctx.ra_free(bit_reg);
            ctx.ra_free(n);
        }
    }

    // Z reflects the bit as it was before any change.
    if mask & sr::Z as u8 != 0 {
        ctx.cc_modify();
        ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, sr::Z));
        ctx.buf.emit(arm::orr_cc_imm(Cond::Eq, REG_SR, REG_SR, sr::Z));
    }

    if let Some(addr) = addr {
        if kind != 0 {
            ctx.buf.emit(arm::strb_offset(target, addr, 0));
        }
        ctx.ra_free(addr);
    } else if kind != 0 {
        ctx.set_dirty(GuestReg::d(ea & 7));
    }
    ctx.ra_free(target);
    Flow::Continue
}

/// MOVEP: word/long transfers between a data register and alternating
/// memory bytes at `(d16,An)`.
fn emit_movep(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let dn = ((opcode >> 9) & 7) as u8;
    let an = (opcode & 7) as u8;
    let opmode = ((opcode >> 6) & 7) as u8; // 100 W→reg, 101 L→reg, 110 reg→W, 111 reg→L
    let d16 = i32::from(ctx.next_word() as i16);

    let long = opmode & 1 != 0;
    let to_reg = opmode & 2 == 0;
    let bytes: i16 = if long { 4 } else { 2 };

    let base = ctx.map_read(GuestReg::a(an));
    let addr = ctx.ra_alloc();
    ctx.add_const(addr, base, d16);
    ctx.ra_free(base);

    if to_reg {
        let reg = ctx.map_read(GuestReg::d(dn));
        let t = ctx.ra_alloc();
        for i in 0..bytes {
            ctx.buf.emit(arm::ldrb_offset(t, addr, 2 * i));
            let lsb = 8 * (bytes - 1 - i) as u8;
            ctx.buf.emit(arm::bfi(reg, t, lsb, 8));
        }
        ctx.set_dirty(GuestReg::d(dn));
        ctx.ra_free(t);
        ctx.ra_free(reg);
    } else {
        let reg = ctx.map_read(GuestReg::d(dn));
        let t = ctx.ra_alloc();
        for i in 0..bytes {
            let shift = 8 * (bytes - 1 - i) as u8;
            ctx.buf.emit(arm::lsr_imm(t, reg, shift));
            ctx.buf.emit(arm::strb_offset(t, addr, 2 * i));
        }
        ctx.ra_free(t);
        ctx.ra_free(reg);
    }
    ctx.ra_free(addr);
    Flow::Continue
}
