//! Line 4: CLR/NEG/NEGX/NOT/TST/TAS/SWAP/EXT/LEA/PEA/NBCD, LINK/UNLK,
//! MOVEM, long multiply/divide, the SR/CCR/USP moves and the small
//! control set (NOP/TRAP/TRAPV/RTS/RTR/RTE/RTD/RESET/STOP/ILLEGAL,
//! JSR/JMP, CHK).

use arm_asm as arm;
use arm_asm::Cond;
use m68k_state::{sr, vectors};

use super::{flags_from_host, flags_from_host_sticky_z, flags_nz, flags_static, privilege_gate};
use crate::ctx::{state_offset, BlockCtx, Flow, REG_CTX, REG_PC, REG_SR};
use crate::ea::OpSize;
use crate::regalloc::GuestReg;

/// Lower one line-4 instruction.
pub fn emit(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let ea = (opcode & 0x3f) as u8;
    let sz = ((opcode >> 6) & 3) as u8;

    if opcode & 0x0100 != 0 {
        if opcode & 0x00c0 == 0x00c0 {
            return emit_lea(ctx, opcode);
        }
        return emit_chk(ctx, opcode);
    }

    match (opcode >> 9) & 7 {
        0b000 => {
            if sz == 3 {
                emit_move_from_sr(ctx, ea)
            } else {
                emit_negx(ctx, opcode)
            }
        }
        0b001 => {
            if sz == 3 {
                emit_move_from_ccr(ctx, ea)
            } else {
                emit_clr(ctx, opcode)
            }
        }
        0b010 => {
            if sz == 3 {
                emit_move_to_ccr(ctx, ea)
            } else {
                emit_neg(ctx, opcode)
            }
        }
        0b011 => {
            if sz == 3 {
                emit_move_to_sr(ctx, ea)
            } else {
                emit_not(ctx, opcode)
            }
        }
        0b100 => match sz {
            0 => {
                if opcode & 0x0038 == 0x0008 {
                    emit_link(ctx, (opcode & 7) as u8, true)
                } else {
                    emit_nbcd(ctx, opcode)
                }
            }
            1 => {
                if opcode & 0x0038 == 0 {
                    emit_swap(ctx, opcode)
                } else {
                    emit_pea(ctx, opcode)
                }
            }
            _ => {
                if opcode & 0x0038 == 0 {
                    emit_ext(ctx, opcode)
                } else {
                    emit_movem(ctx, opcode, false)
                }
            }
        },
        0b101 => {
            if opcode == 0x4afc {
                emit_illegal(ctx)
            } else if sz == 3 {
                emit_tas(ctx, opcode)
            } else {
                emit_tst(ctx, opcode)
            }
        }
        0b110 => {
            if sz < 2 {
                super::muldiv::emit_long(ctx, opcode)
            } else {
                emit_movem(ctx, opcode, true)
            }
        }
        _ => emit_misc(ctx, opcode),
    }
}

fn emit_misc(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    match opcode {
        0x4e70 => {
            // RESET: privileged, otherwise a no-op for this machine model.
            privilege_gate(ctx);
            Flow::Continue
        }
        0x4e71 => Flow::Continue, // NOP
        0x4e72 => emit_stop(ctx),
        0x4e73 => emit_rte(ctx),
        0x4e74 => emit_rtd(ctx),
        0x4e75 => emit_rts(ctx),
        0x4e76 => emit_trapv(ctx),
        0x4e77 => emit_rtr(ctx),
        _ => {
            if opcode & 0xfff0 == 0x4e40 {
                emit_trap(ctx, (opcode & 15) as u8)
            } else if opcode & 0xfff8 == 0x4e50 {
                emit_link(ctx, (opcode & 7) as u8, false)
            } else if opcode & 0xfff8 == 0x4e58 {
                emit_unlk(ctx, (opcode & 7) as u8)
            } else if opcode & 0xfff0 == 0x4e60 {
                emit_move_usp(ctx, opcode)
            } else if opcode & 0xffc0 == 0x4e80 {
                emit_jsr(ctx, opcode)
            } else if opcode & 0xffc0 == 0x4ec0 {
                emit_jmp(ctx, opcode)
            } else {
                super::emit_unhandled(ctx, opcode)
            }
        }
    }
}

fn emit_clr(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let Some(size) = OpSize::from_bits((opcode >> 6) as u8) else {
        return super::emit_unhandled(ctx, opcode);
    };
    let ea = (opcode & 0x3f) as u8;
    if ea >> 3 == 0 {
        let dn = ctx.map_read(GuestReg::d(ea & 7));
        match size {
            OpSize::Long => {
                ctx.buf.emit(arm::mov_imm(dn, 0));
            }
            _ => {
                ctx.buf.emit(arm::bfc(dn, 0, size.bits()));
            }
        }
        ctx.set_dirty(GuestReg::d(ea & 7));
        ctx.ra_free(dn);
    } else {
        let zero = ctx.ra_alloc();
        ctx.buf.emit(arm::mov_imm(zero, 0));
        ctx.ea_store(size, ea, zero);
        ctx.ra_free(zero);
    }
    let mask = ctx.live_flags();
    flags_static(ctx, mask & super::NZVC, sr::Z as u8);
    Flow::Continue
}

/// Unary sized operation over a register or memory operand.
fn unary_op(
    ctx: &mut BlockCtx<'_>,
    opcode: u16,
    op: impl Fn(&mut BlockCtx<'_>, arm::Reg, OpSize, u8),
) -> Flow {
    let Some(size) = OpSize::from_bits((opcode >> 6) as u8) else {
        return super::emit_unhandled(ctx, opcode);
    };
    let ea = (opcode & 0x3f) as u8;
    if ea >> 3 == 0 {
        let dn = ctx.map_read(GuestReg::d(ea & 7));
        let mask = ctx.live_flags();
        op(ctx, dn, size, mask);
        ctx.set_dirty(GuestReg::d(ea & 7));
        ctx.ra_free(dn);
    } else {
        let addr = ctx.ea_rmw_address(size, ea);
        let mask = ctx.live_flags();
        let val = ctx.ra_alloc();
        ctx.ea_emit_load(size, val, addr, 0);
        op(ctx, val, size, mask);
        ctx.ea_emit_store(size, val, addr, 0);
        ctx.ra_free(val);
        ctx.ra_free(addr);
    }
    Flow::Continue
}

fn emit_neg(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    unary_op(ctx, opcode, |ctx, reg, size, mask| {
        match size {
            OpSize::Long => {
                ctx.buf.emit(arm::rsbs_imm(reg, reg, 0));
                flags_from_host(ctx, mask, true);
            }
            _ => {
                let up = 32 - size.bits();
                let t = ctx.ra_alloc();
                ctx.buf.emit(arm::lsl_imm(t, reg, up));
                ctx.buf.emit(arm::rsbs_imm(t, t, 0));
                flags_from_host(ctx, mask, true);
                ctx.buf.emit(arm::lsr_imm(t, t, up));
                ctx.buf.emit(arm::bfi(reg, t, 0, size.bits()));
                ctx.ra_free(t);
            }
        }
    })
}

fn emit_negx(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    unary_op(ctx, opcode, |ctx, reg, size, mask| {
        // 0 - dst - X: preload the host carry with !X so RSC subtracts X.
        ctx.cc_get();
        let t = ctx.ra_alloc();
        ctx.buf.emit(arm::eor_imm(t, REG_SR, sr::X));
        ctx.buf.emit(arm::lsrs_imm(t, t, 5)); // carry = !X
        match size {
            OpSize::Long => {
                ctx.buf.emit(arm::rscs_imm(reg, reg, 0));
                flags_from_host_sticky_z(ctx, mask, true);
            }
            _ => {
                let up = 32 - size.bits();
                ctx.buf.emit(arm::lsl_imm(t, reg, up));
                ctx.buf.emit(arm::rscs_imm(t, t, 0));
                flags_from_host_sticky_z(ctx, mask, true);
                ctx.buf.emit(arm::lsr_imm(t, t, up));
                ctx.buf.emit(arm::bfi(reg, t, 0, size.bits()));
            }
        }
        ctx.ra_free(t);
    })
}

fn emit_not(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    unary_op(ctx, opcode, |ctx, reg, size, mask| {
        match size {
            OpSize::Long => {
                ctx.buf.emit(arm::mvn_reg(reg, reg));
            }
            _ => {
                let t = ctx.ra_alloc();
                ctx.buf.emit(arm::mvn_reg(t, reg));
                ctx.buf.emit(arm::bfi(reg, t, 0, size.bits()));
                ctx.ra_free(t);
            }
        }
        flags_nz(ctx, reg, size, mask);
    })
}

fn emit_tst(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let Some(size) = OpSize::from_bits((opcode >> 6) as u8) else {
        return super::emit_unhandled(ctx, opcode);
    };
    let ea = (opcode & 0x3f) as u8;
    let val = ctx.ea_load(size, ea, true);
    let mask = ctx.live_flags();
    flags_nz(ctx, val, size, mask);
    ctx.ra_free(val);
    Flow::Continue
}

fn emit_tas(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let ea = (opcode & 0x3f) as u8;
    if ea >> 3 == 0 {
        let dn = ctx.map_read(GuestReg::d(ea & 7));
        let mask = ctx.live_flags();
        flags_nz(ctx, dn, OpSize::Byte, mask);
        ctx.buf.emit(arm::orr_imm(dn, dn, 0x80));
        ctx.set_dirty(GuestReg::d(ea & 7));
        ctx.ra_free(dn);
    } else {
        let addr = ctx.ea_rmw_address(OpSize::Byte, ea);
        let mask = ctx.live_flags();
        let val = ctx.ra_alloc();
        ctx.buf.emit(arm::ldrb_offset(val, addr, 0));
        flags_nz(ctx, val, OpSize::Byte, mask);
        ctx.buf.emit(arm::orr_imm(val, val, 0x80));
        ctx.buf.emit(arm::strb_offset(val, addr, 0));
        ctx.ra_free(val);
        ctx.ra_free(addr);
    }
    Flow::Continue
}

fn emit_swap(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let dn = ctx.map_read(GuestReg::d((opcode & 7) as u8));
    let mask = ctx.live_flags();
    ctx.buf.emit(arm::ror_imm(dn, dn, 16));
    ctx.set_dirty(GuestReg::d((opcode & 7) as u8));
    flags_nz(ctx, dn, OpSize::Long, mask);
    ctx.ra_free(dn);
    Flow::Continue
}

fn emit_ext(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let n = (opcode & 7) as u8;
    let opmode = ((opcode >> 6) & 7) as u8; // 010 EXT.W, 011 EXT.L, 111 EXTB.L
    let dn = ctx.map_read(GuestReg::d(n));
    let mask = ctx.live_flags();
    match opmode {
        0b010 => {
            let t = ctx.ra_alloc();
            ctx.buf.emit(arm::sxtb(t, dn, 0));
            ctx.buf.emit(arm::bfi(dn, t, 0, 16));
            ctx.ra_free(t);
            flags_nz(ctx, dn, OpSize::Word, mask);
        }
        0b011 => {
            ctx.buf.emit(arm::sxth(dn, dn, 0));
            flags_nz(ctx, dn, OpSize::Long, mask);
        }
        0b111 => {
            ctx.buf.emit(arm::sxtb(dn, dn, 0));
            flags_nz(ctx, dn, OpSize::Long, mask);
        }
        _ => return super::emit_unhandled(ctx, opcode),
    }
    ctx.set_dirty(GuestReg::d(n));
    ctx.ra_free(dn);
    Flow::Continue
}

fn emit_lea(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let addr = ctx.ea_lea((opcode & 0x3f) as u8);
    let an = ctx.map_write(GuestReg::a(((opcode >> 9) & 7) as u8));
    ctx.buf.emit(arm::mov_reg(an, addr));
    ctx.ra_free(an);
    ctx.ra_free(addr);
    Flow::Continue
}

fn emit_pea(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let addr = ctx.ea_lea((opcode & 0x3f) as u8);
    let a7 = ctx.map_read(GuestReg::a(7));
    ctx.swap_before_store(4, addr);
    ctx.buf.emit(arm::str_offset_preindex(addr, a7, -4));
    ctx.set_dirty(GuestReg::a(7));
    ctx.ra_free(a7);
    ctx.ra_free(addr);
    Flow::Continue
}

/// NBCD: binary-coded-decimal negate with extend.
fn emit_nbcd(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    unary_op(ctx, opcode, |ctx, reg, _size, mask| {
        ctx.cc_get();
        let t = ctx.ra_alloc();
        let x = ctx.ra_alloc();
        ctx.buf.emit(arm::uxtb(t, reg, 0));
        // X sits at bit 4 of the SR.
        ctx.buf.emit(arm::and_imm(x, REG_SR, sr::X));
        ctx.buf.emit(arm::lsr_imm(x, x, 4));
        ctx.buf.emit(arm::add_reg(t, t, x, 0));
        // result = 0x9a - (dst + X), digit-adjusted; zero stays zero.
        let r = ctx.ra_alloc();
        ctx.buf.emit(arm::rsb_imm(r, t, 0x9a));
        ctx.buf.emit(arm::cmp_imm(t, 0));
        ctx.buf.emit(arm::mov_cc_imm(Cond::Eq, r, 0));
        // Low-nibble adjust: 0xa in the low digit carries into the high.
        let d = ctx.ra_alloc();
        ctx.buf.emit(arm::and_imm(d, r, 0x0f));
        ctx.buf.emit(arm::cmp_imm(d, 0x0a));
        ctx.buf.emit(arm::add_cc_imm(Cond::Eq, r, r, 6));
        ctx.buf.emit(arm::uxtb(r, r, 0));
        ctx.ra_free(d);
        // C = X = result != 0; Z is sticky.
        if mask != 0 {
            ctx.cc_modify();
            let m = u16::from(mask);
            ctx.buf.emit(arm::cmp_imm(r, 0));
            if m & (sr::C | sr::X) != 0 {
                ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, m & (sr::C | sr::X)));
            }
            if m & sr::C != 0 {
                ctx.buf.emit(arm::orr_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::C));
            }
            if m & sr::X != 0 {
                ctx.buf.emit(arm::orr_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::X));
            }
            if m & sr::Z != 0 {
                ctx.buf.emit(arm::bic_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::Z));
            }
        }
        ctx.buf.emit(arm::bfi(reg, r, 0, 8));
        ctx.ra_free(r);
        ctx.ra_free(x);
        ctx.ra_free(t);
    })
}

fn emit_link(ctx: &mut BlockCtx<'_>, an: u8, long: bool) -> Flow {
    let disp = if long {
        ctx.next_long() as i32
    } else {
        i32::from(ctx.next_word() as i16)
    };
    let an_reg = ctx.map_read(GuestReg::a(an));
    let a7 = ctx.map_read(GuestReg::a(7));
    ctx.swap_before_store(4, an_reg);
    ctx.buf.emit(arm::str_offset_preindex(an_reg, a7, -4));
    ctx.swap_after_load(4, an_reg);
    ctx.buf.emit(arm::mov_reg(an_reg, a7));
    ctx.add_const(a7, a7, disp);
    ctx.set_dirty(GuestReg::a(an));
    ctx.set_dirty(GuestReg::a(7));
    ctx.ra_free(a7);
    ctx.ra_free(an_reg);
    Flow::Continue
}

fn emit_unlk(ctx: &mut BlockCtx<'_>, an: u8) -> Flow {
    let an_reg = ctx.map_read(GuestReg::a(an));
    let a7 = ctx.map_read(GuestReg::a(7));
    ctx.buf.emit(arm::mov_reg(a7, an_reg));
    ctx.buf.emit(arm::ldr_offset_postindex(an_reg, a7, 4));
    ctx.swap_after_load(4, an_reg);
    ctx.set_dirty(GuestReg::a(an));
    ctx.set_dirty(GuestReg::a(7));
    ctx.ra_free(a7);
    ctx.ra_free(an_reg);
    Flow::Continue
}

fn emit_jsr(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let addr = ctx.ea_lea((opcode & 0x3f) as u8);
    let ret = ctx.pc; // address of the next instruction
    let a7 = ctx.map_read(GuestReg::a(7));
    let t = ctx.ra_alloc();
    ctx.buf.load_const(t, ret);
    ctx.swap_before_store(4, t);
    ctx.buf.emit(arm::str_offset_preindex(t, a7, -4));
    ctx.set_dirty(GuestReg::a(7));
    ctx.ra_free(t);
    ctx.ra_free(a7);
    ctx.buf.emit(arm::mov_reg(REG_PC, addr));
    ctx.ra_free(addr);
    ctx.pc_reset();
    Flow::Exit
}

fn emit_jmp(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let addr = ctx.ea_lea((opcode & 0x3f) as u8);
    ctx.buf.emit(arm::mov_reg(REG_PC, addr));
    ctx.ra_free(addr);
    ctx.pc_reset();
    Flow::Exit
}

fn emit_rts(ctx: &mut BlockCtx<'_>) -> Flow {
    let a7 = ctx.map_read(GuestReg::a(7));
    ctx.buf.emit(arm::ldr_offset_postindex(REG_PC, a7, 4));
    ctx.swap_after_load(4, REG_PC);
    ctx.set_dirty(GuestReg::a(7));
    ctx.ra_free(a7);
    ctx.pc_reset();
    Flow::Exit
}

fn emit_rtd(ctx: &mut BlockCtx<'_>) -> Flow {
    let disp = i32::from(ctx.next_word() as i16);
    let a7 = ctx.map_read(GuestReg::a(7));
    ctx.buf.emit(arm::ldr_offset_postindex(REG_PC, a7, 4));
    ctx.swap_after_load(4, REG_PC);
    ctx.add_const(a7, a7, disp);
    ctx.set_dirty(GuestReg::a(7));
    ctx.ra_free(a7);
    ctx.pc_reset();
    Flow::Exit
}

fn emit_rtr(ctx: &mut BlockCtx<'_>) -> Flow {
    let a7 = ctx.map_read(GuestReg::a(7));
    ctx.cc_modify();
    let t = ctx.ra_alloc();
    ctx.buf.emit(arm::ldrh_offset_postindex(t, a7, 2));
    ctx.swap_after_load(2, t);
    ctx.buf.emit(arm::and_imm(t, t, sr::CCR_MASK));
    ctx.buf.emit(arm::bfi(REG_SR, t, 0, 8));
    ctx.ra_free(t);
    ctx.buf.emit(arm::ldr_offset_postindex(REG_PC, a7, 4));
    ctx.swap_after_load(4, REG_PC);
    ctx.set_dirty(GuestReg::a(7));
    ctx.ra_free(a7);
    ctx.pc_reset();
    Flow::Exit
}

/// RTE: privileged; reads the format-0 frame and hands the SR write to
/// the runtime helper (stack re-aliasing).
fn emit_rte(ctx: &mut BlockCtx<'_>) -> Flow {
    privilege_gate(ctx);
    let a7 = ctx.map_read(GuestReg::a(7));
    let new_sr = ctx.ra_alloc();
    let fmt = ctx.ra_alloc();
    ctx.buf.emit(arm::ldrh_offset(new_sr, a7, 0));
    ctx.swap_after_load(2, new_sr);
    ctx.buf.emit(arm::ldrh_offset(fmt, a7, 6));
    ctx.swap_after_load(2, fmt);
    // Only format-0 four-word frames are produced by this machine; any
    // other format word raises a format error with the frame intact and
    // the RTE itself as the stacked address.
    ctx.buf.emit(arm::lsrs_imm(fmt, fmt, 12));
    ctx.ra_free(fmt);
    let ok = ctx.buf.emit(arm::b_cc(Cond::Eq, 0));
    ctx.emit_raise_exception(vectors::FORMAT_ERROR, 0);
    let end = ctx.buf.len();
    ctx.buf.patch_branch_to(ok, end);
    ctx.buf.emit(arm::ldr_offset(REG_PC, a7, 2));
    ctx.swap_after_load(4, REG_PC);
    ctx.buf.emit(arm::add_imm(a7, a7, 8));
    ctx.set_dirty(GuestReg::a(7));
    ctx.ra_free(a7);
    ctx.pc_reset();

    // The new SR goes through the helper after everything is flushed;
    // REG_PC already holds the return address and survives the call.
    ctx.cc_discard();
    ctx.ra_flush_all();
    ctx.fra_flush_all();
    ctx.buf.emit(arm::mov_reg(arm::Reg(1), new_sr));
    ctx.ra_free(new_sr);
    ctx.buf.emit(arm::mov_reg(arm::Reg(0), REG_CTX));
    let addr = ctx.cfg.helpers.write_sr;
    ctx.emit_helper_call_native_endian(addr);
    Flow::Exit
}

fn emit_stop(ctx: &mut BlockCtx<'_>) -> Flow {
    let imm = ctx.next_word();
    privilege_gate(ctx);
    let t = ctx.ra_alloc();
    ctx.buf.emit(arm::mov_imm(t, 1));
    ctx.buf.emit(arm::strh_offset(t, REG_CTX, state_offset!(stopped)));
    ctx.buf.emit(arm::movw(t, imm));
    super::line0::finish_sr_write(ctx, t)
}

fn emit_trap(ctx: &mut BlockCtx<'_>, n: u8) -> Flow {
    ctx.pc_flush();
    ctx.sync_guest_state();
    ctx.emit_raise_exception(vectors::trap(n), 2);
    ctx.ra_invalidate_all();
    ctx.cc_discard();
    Flow::Exit
}

fn emit_illegal(ctx: &mut BlockCtx<'_>) -> Flow {
    ctx.pc_flush();
    ctx.sync_guest_state();
    ctx.emit_raise_exception(vectors::ILLEGAL_INSTRUCTION, 0);
    ctx.ra_invalidate_all();
    ctx.cc_discard();
    Flow::Exit
}

fn emit_trapv(ctx: &mut BlockCtx<'_>) -> Flow {
    ctx.pc_flush();
    ctx.sync_guest_state();
    ctx.cc_get();
    ctx.buf.emit(arm::tst_imm(REG_SR, sr::V));
    let skip = ctx.buf.emit(arm::b_cc(Cond::Eq, 0));
    ctx.emit_raise_exception(vectors::TRAPCC, 2);
    let end = ctx.buf.len();
    ctx.buf.patch_branch_to(skip, end);
    Flow::Continue
}

fn emit_chk(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    // CHK.W <ea>,Dn (the long form is a 68020 extension with size 100).
    let ea = (opcode & 0x3f) as u8;
    let long = opcode & 0x0080 == 0;
    let size = if long { OpSize::Long } else { OpSize::Word };
    let bound = ctx.ea_load(size, ea, false);
    if size == OpSize::Word {
        ctx.buf.emit(arm::sxth(bound, bound, 0));
    }
    let dn = ctx.copy_from(GuestReg::d(((opcode >> 9) & 7) as u8));
    if size == OpSize::Word {
        ctx.buf.emit(arm::sxth(dn, dn, 0));
    }
    ctx.pc_flush();
    ctx.sync_guest_state();
    let bias = ctx.pc.wrapping_sub(ctx.insn_start) as i32;
    let mask = ctx.live_flags();

    ctx.buf.emit(arm::cmp_imm(dn, 0));
    if mask & sr::N as u8 != 0 {
        ctx.cc_modify();
        ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, sr::N));
        ctx.buf.emit(arm::orr_cc_imm(Cond::Mi, REG_SR, REG_SR, sr::N));
        ctx.cc_store();
    }
    let to_raise = ctx.buf.emit(arm::b_cc(Cond::Lt, 0));
    ctx.buf.emit(arm::cmp_reg(dn, bound));
    let skip = ctx.buf.emit(arm::b_cc(Cond::Le, 0));
    let raise_at = ctx.buf.len();
    ctx.buf.patch_branch_to(to_raise, raise_at);
    ctx.emit_raise_exception(vectors::CHK, bias);
    let end = ctx.buf.len();
    ctx.buf.patch_branch_to(skip, end);
    ctx.ra_free(dn);
    ctx.ra_free(bound);
    Flow::Continue
}

fn emit_move_from_sr(ctx: &mut BlockCtx<'_>, ea: u8) -> Flow {
    privilege_gate(ctx);
    ctx.cc_get();
    let t = ctx.ra_alloc();
    ctx.buf.emit(arm::mov_reg(t, REG_SR));
    ctx.ea_store(OpSize::Word, ea, t);
    ctx.ra_free(t);
    Flow::Continue
}

fn emit_move_from_ccr(ctx: &mut BlockCtx<'_>, ea: u8) -> Flow {
    ctx.cc_get();
    let t = ctx.ra_alloc();
    ctx.buf.emit(arm::and_imm(t, REG_SR, sr::CCR_MASK));
    ctx.ea_store(OpSize::Word, ea, t);
    ctx.ra_free(t);
    Flow::Continue
}

fn emit_move_to_ccr(ctx: &mut BlockCtx<'_>, ea: u8) -> Flow {
    let val = ctx.ea_load(OpSize::Word, ea, false);
    ctx.cc_modify();
    ctx.buf.emit(arm::and_imm(val, val, sr::CCR_MASK));
    ctx.buf.emit(arm::bfi(REG_SR, val, 0, 8));
    ctx.ra_free(val);
    Flow::Continue
}

fn emit_move_to_sr(ctx: &mut BlockCtx<'_>, ea: u8) -> Flow {
    // Gate first: a user-mode trap must not run the EA side effects.
    privilege_gate(ctx);
    let val = ctx.ea_load(OpSize::Word, ea, false);
    super::line0::finish_sr_write(ctx, val)
}

fn emit_move_usp(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    privilege_gate(ctx);
    let an = (opcode & 7) as u8;
    if opcode & 0x0008 == 0 {
        // MOVE An,USP
        let reg = ctx.map_read(GuestReg::a(an));
        ctx.buf.emit(arm::str_offset(reg, REG_CTX, state_offset!(usp)));
        ctx.ra_free(reg);
    } else {
        // MOVE USP,An
        let reg = ctx.map_write(GuestReg::a(an));
        ctx.buf.emit(arm::ldr_offset(reg, REG_CTX, state_offset!(usp)));
        ctx.ra_free(reg);
    }
    Flow::Continue
}

/// MOVEM: register list to/from memory.
fn emit_movem(ctx: &mut BlockCtx<'_>, opcode: u16, to_regs: bool) -> Flow {
    let list = ctx.next_word();
    let long = opcode & 0x0040 != 0;
    let size = if long { OpSize::Long } else { OpSize::Word };
    let step = i16::from(size.bytes());
    let ea = (opcode & 0x3f) as u8;
    let mode = (ea >> 3) & 7;
    let reg = ea & 7;

    // Bit k names D0..D7,A0..A7 — except predecrement mode, where the
    // order is reversed.
    let guest_of = |k: u8, reversed: bool| -> GuestReg {
        let idx = if reversed { 15 - k } else { k };
        GuestReg(idx)
    };

    match mode {
        4 if !to_regs => {
            // Store to -(An), descending addresses, reversed list.
            let an = ctx.map_read(GuestReg::a(reg));
            ctx.set_dirty(GuestReg::a(reg));
            for k in 0..16 {
                if list & (1 << k) == 0 {
                    continue;
                }
                let g = guest_of(k, true);
                let host = ctx.map_read(g);
                ctx.swap_before_store(size.bytes(), host);
                match size {
                    OpSize::Long => ctx.buf.emit(arm::str_offset_preindex(host, an, -step)),
                    _ => ctx.buf.emit(arm::strh_offset_preindex(host, an, -step)),
                };
                ctx.swap_after_load(size.bytes(), host);
                ctx.ra_free(host);
            }
            ctx.ra_free(an);
        }
        3 if to_regs => {
            // Load from (An)+, ascending.
            let an = ctx.map_read(GuestReg::a(reg));
            ctx.set_dirty(GuestReg::a(reg));
            for k in 0..16 {
                if list & (1 << k) == 0 {
                    continue;
                }
                let g = guest_of(k, false);
                let host = ctx.map_write(g);
                match size {
                    OpSize::Long => {
                        ctx.buf.emit(arm::ldr_offset_postindex(host, an, step));
                        ctx.swap_after_load(4, host);
                    }
                    _ => {
                        // MOVEM.W sign-extends into the full register.
                        ctx.buf.emit(arm::ldrsh_offset_postindex(host, an, step));
                        if !ctx.cfg.big_endian_data {
                            ctx.buf.emit(arm::revsh(host, host));
                        }
                    }
                };
                ctx.ra_free(host);
            }
            ctx.ra_free(an);
        }
        _ => {
            // Static base: compute once, walk ascending offsets.
            let base = ctx.ea_lea(ea);
            let mut offset: i16 = 0;
            for k in 0..16 {
                if list & (1 << k) == 0 {
                    continue;
                }
                let g = guest_of(k, false);
                if to_regs {
                    let host = ctx.map_write(g);
                    match size {
                        OpSize::Long => {
                            ctx.buf.emit(arm::ldr_offset(host, base, offset));
                            ctx.swap_after_load(4, host);
                        }
                        _ => {
                            ctx.buf.emit(arm::ldrsh_offset(host, base, offset));
                            if !ctx.cfg.big_endian_data {
                                ctx.buf.emit(arm::revsh(host, host));
                            }
                        }
                    }
                    ctx.ra_free(host);
                } else {
                    let host = ctx.map_read(g);
                    ctx.swap_before_store(size.bytes(), host);
                    match size {
                        OpSize::Long => ctx.buf.emit(arm::str_offset(host, base, offset)),
                        _ => ctx.buf.emit(arm::strh_offset(host, base, offset)),
                    };
                    ctx.swap_after_load(size.bytes(), host);
                    ctx.ra_free(host);
                }
                offset += step;
            }
            ctx.ra_free(base);
        }
    }
    Flow::Continue
}
