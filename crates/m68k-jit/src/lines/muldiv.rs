//! Multiply and divide lowerings: the 16×16→32 word forms from lines 8
//! and C, and the long forms from line 4. Division calls out to the
//! runtime quotient/remainder helpers; the divide-by-zero check raises
//! vector 0x14 before the call.

use arm_asm as arm;
use arm_asm::Cond;
use m68k_state::{sr, vectors};

use crate::ctx::{BlockCtx, Flow, REG_SR};
use crate::ea::OpSize;
use crate::regalloc::GuestReg;

/// MULU.W/MULS.W: 16x16 to 32.
pub fn emit_mul_w(ctx: &mut BlockCtx<'_>, opcode: u16, signed: bool) -> Flow {
    let dn_idx = ((opcode >> 9) & 7) as u8;
    let src = ctx.ea_load(OpSize::Word, (opcode & 0x3f) as u8, false);
    let dn = ctx.map_read(GuestReg::d(dn_idx));
    let mask = ctx.live_flags();

    let t = ctx.ra_alloc();
    if signed {
        ctx.buf.emit(arm::sxth(t, dn, 0));
        ctx.buf.emit(arm::sxth(src, src, 0));
    } else {
        ctx.buf.emit(arm::uxth(t, dn, 0));
        ctx.buf.emit(arm::uxth(src, src, 0));
    }
    ctx.buf.emit(arm::muls(dn, t, src));
    ctx.ra_free(t);
    ctx.set_dirty(GuestReg::d(dn_idx));
    flags_nzvc_from_host(ctx, mask);
    ctx.ra_free(dn);
    ctx.ra_free(src);
    Flow::Continue
}

/// N and Z from the host flags of the preceding instruction; V and C in
/// the mask are cleared (multiply convention).
fn flags_nzvc_from_host(ctx: &mut BlockCtx<'_>, mask: u8) {
    let m = u16::from(mask) & (sr::N | sr::Z | sr::V | sr::C);
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
}

/// Stage `(dividend, divisor)` into r0/r1 with the stack so the transfer
/// is correct regardless of which host registers currently hold them.
fn stage_div_args(ctx: &mut BlockCtx<'_>, dividend: arm::Reg, divisor: arm::Reg) {
    ctx.buf.emit(arm::push(dividend.mask_bit()));
    ctx.buf.emit(arm::push(divisor.mask_bit()));
    ctx.buf.emit(arm::pop(arm::Reg(1).mask_bit()));
    ctx.buf.emit(arm::pop(arm::Reg(0).mask_bit()));
}

/// Fetch the helper's quotient/remainder pair out of r0/r1.
fn fetch_div_results(ctx: &mut BlockCtx<'_>, quot: arm::Reg, rem: arm::Reg) {
    ctx.buf.emit(arm::push(arm::Reg(0).mask_bit()));
    ctx.buf.emit(arm::push(arm::Reg(1).mask_bit()));
    ctx.buf.emit(arm::pop(rem.mask_bit()));
    ctx.buf.emit(arm::pop(quot.mask_bit()));
}

/// DIVU.W/DIVS.W: 32/16 to 16:16 with overflow and zero checks.
pub fn emit_div_w(ctx: &mut BlockCtx<'_>, opcode: u16, signed: bool) -> Flow {
    let dn_idx = ((opcode >> 9) & 7) as u8;
    let src = ctx.ea_load(OpSize::Word, (opcode & 0x3f) as u8, false);
    if signed {
        ctx.buf.emit(arm::sxth(src, src, 0));
    } else {
        ctx.buf.emit(arm::uxth(src, src, 0));
    }

    // Division by zero raises vector 0x14 with the next instruction as
    // the stacked return address.
    ctx.pc_flush();
    ctx.sync_guest_state();
    let bias = ctx.pc.wrapping_sub(ctx.insn_start) as i32;
    ctx.buf.emit(arm::cmp_imm(src, 0));
    let ok = ctx.buf.emit(arm::b_cc(Cond::Ne, 0));
    ctx.emit_raise_exception(vectors::DIVIDE_BY_ZERO, bias);
    let after = ctx.buf.len();
    ctx.buf.patch_branch_to(ok, after);

    let dn = ctx.map_read(GuestReg::d(dn_idx));
    let mask = ctx.live_flags();
    let quot = ctx.ra_alloc();
    let rem = ctx.ra_alloc();

    // Keep r0-r3 alive over the call, except slots reused for results.
    let saved = 0x000f & !(quot.mask_bit() | rem.mask_bit());
    if saved != 0 {
        ctx.buf.emit(arm::push(saved));
    }
    stage_div_args(ctx, dn, src);
    let helper = if signed { ctx.cfg.helpers.idivmod } else { ctx.cfg.helpers.uidivmod };
    ctx.emit_helper_call_native_endian(helper);
    fetch_div_results(ctx, quot, rem);
    if saved != 0 {
        ctx.buf.emit(arm::pop(saved));
    }

    // Quotient overflow leaves the destination untouched and sets V.
    if signed {
        let t = ctx.ra_alloc();
        ctx.buf.emit(arm::sxth(t, quot, 0));
        ctx.buf.emit(arm::teq_reg(t, quot));
        ctx.ra_free(t);
    } else {
        let t = ctx.ra_alloc();
        ctx.buf.emit(arm::lsrs_imm(t, quot, 16));
        ctx.ra_free(t);
    }
    let ok_b = ctx.buf.emit(arm::b_cc(Cond::Eq, 0));
    if mask & sr::V as u8 != 0 {
        ctx.cc_modify();
        ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, (sr::V | sr::C) & u16::from(mask)));
        ctx.buf.emit(arm::orr_imm(REG_SR, REG_SR, sr::V));
    }
    let done_b = ctx.buf.emit(arm::b(0));
    let ok_at = ctx.buf.len();
    ctx.buf.patch_branch_to(ok_b, ok_at);

    // No overflow: flags from the 16-bit quotient, then pack
    // remainder:quotient into the destination.
    if mask & super::NZVC != 0 {
        ctx.cc_modify();
        ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, u16::from(mask & super::NZVC)));
        let t = ctx.ra_alloc();
        ctx.buf.emit(arm::lsls_imm(t, quot, 16));
        ctx.ra_free(t);
        if mask & sr::Z as u8 != 0 {
            ctx.buf.emit(arm::orr_cc_imm(Cond::Eq, REG_SR, REG_SR, sr::Z));
        }
        if mask & sr::N as u8 != 0 {
            ctx.buf.emit(arm::orr_cc_imm(Cond::Mi, REG_SR, REG_SR, sr::N));
        }
    }
    ctx.buf.emit(arm::mov_reg(dn, quot));
    ctx.buf.emit(arm::bfi(dn, rem, 16, 16));
    ctx.set_dirty(GuestReg::d(dn_idx));

    let end = ctx.buf.len();
    ctx.buf.patch_branch_to(done_b, end);

    ctx.ra_free(rem);
    ctx.ra_free(quot);
    ctx.ra_free(dn);
    ctx.ra_free(src);
    Flow::Continue
}

/// Line 4 long multiply/divide: MULS.L/MULU.L and DIVS.L/DIVU.L with
/// their extension word.
pub fn emit_long(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let ext = ctx.next_word();
    let is_div = opcode & 0x0040 != 0;
    let dl = ((ext >> 12) & 7) as u8;
    let dh = (ext & 7) as u8;
    let signed = ext & 0x0800 != 0;
    let wide = ext & 0x0400 != 0;

    if is_div {
        emit_div_l(ctx, opcode, dl, dh, signed, wide)
    } else {
        emit_mul_l(ctx, opcode, dl, dh, signed, wide)
    }
}

fn emit_mul_l(ctx: &mut BlockCtx<'_>, opcode: u16, dl: u8, dh: u8, signed: bool, wide: bool) -> Flow {
    let src = ctx.ea_load(OpSize::Long, (opcode & 0x3f) as u8, false);
    let lo = ctx.map_read(GuestReg::d(dl));
    let mask = ctx.live_flags();

    if wide {
        // 32×32→64 into Dh:Dl.
        let hi = ctx.map_write(GuestReg::d(dh));
        if signed {
            ctx.buf.emit(arm::smull(hi, lo, lo, src));
        } else {
            ctx.buf.emit(arm::umull(hi, lo, lo, src));
        }
        ctx.set_dirty(GuestReg::d(dl));
        if mask & super::NZVC != 0 {
            ctx.cc_modify();
            ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, u16::from(mask & super::NZVC)));
            if mask & sr::Z as u8 != 0 {
                let t = ctx.ra_alloc();
                ctx.buf.emit(arm::orrs_reg(t, hi, lo, 0));
                ctx.buf.emit(arm::orr_cc_imm(Cond::Eq, REG_SR, REG_SR, sr::Z));
                ctx.ra_free(t);
            }
            if mask & sr::N as u8 != 0 {
                ctx.buf.emit(arm::cmp_imm(hi, 0));
                ctx.buf.emit(arm::orr_cc_imm(Cond::Mi, REG_SR, REG_SR, sr::N));
            }
        }
        ctx.ra_free(hi);
    } else {
        // 32×32→32 with overflow detection via the discarded high half.
        let hi = ctx.ra_alloc();
        if signed {
            ctx.buf.emit(arm::smull(hi, lo, lo, src));
        } else {
            ctx.buf.emit(arm::umull(hi, lo, lo, src));
        }
        ctx.set_dirty(GuestReg::d(dl));
        if mask & super::NZVC != 0 {
            ctx.cc_modify();
            ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, u16::from(mask & super::NZVC)));
            if mask & sr::V as u8 != 0 {
                if signed {
                    let t = ctx.ra_alloc();
                    ctx.buf.emit(arm::asr_imm(t, lo, 31));
                    ctx.buf.emit(arm::teq_reg(t, hi));
                    ctx.ra_free(t);
                } else {
                    ctx.buf.emit(arm::cmp_imm(hi, 0));
                }
                ctx.buf.emit(arm::orr_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::V));
            }
            if mask & (sr::N | sr::Z) as u8 != 0 {
                ctx.buf.emit(arm::cmp_imm(lo, 0));
                if mask & sr::Z as u8 != 0 {
                    ctx.buf.emit(arm::orr_cc_imm(Cond::Eq, REG_SR, REG_SR, sr::Z));
                }
                if mask & sr::N as u8 != 0 {
                    ctx.buf.emit(arm::orr_cc_imm(Cond::Mi, REG_SR, REG_SR, sr::N));
                }
            }
        }
        ctx.ra_free(hi);
    }
    ctx.ra_free(lo);
    ctx.ra_free(src);
    Flow::Continue
}

fn emit_div_l(ctx: &mut BlockCtx<'_>, opcode: u16, dq: u8, dr: u8, signed: bool, wide: bool) -> Flow {
    if wide {
        // The 64/32 form with a Dh:Dl dividend is not lowered.
        return super::emit_unhandled(ctx, opcode);
    }
    let src = ctx.ea_load(OpSize::Long, (opcode & 0x3f) as u8, false);

    ctx.pc_flush();
    ctx.sync_guest_state();
    let bias = ctx.pc.wrapping_sub(ctx.insn_start) as i32;
    ctx.buf.emit(arm::cmp_imm(src, 0));
    let ok = ctx.buf.emit(arm::b_cc(Cond::Ne, 0));
    ctx.emit_raise_exception(vectors::DIVIDE_BY_ZERO, bias);
    let after = ctx.buf.len();
    ctx.buf.patch_branch_to(ok, after);

    let dividend = ctx.map_read(GuestReg::d(dq));
    let mask = ctx.live_flags();
    let quot = ctx.ra_alloc();
    let rem = ctx.ra_alloc();
    let saved = 0x000f & !(quot.mask_bit() | rem.mask_bit());
    if saved != 0 {
        ctx.buf.emit(arm::push(saved));
    }
    stage_div_args(ctx, dividend, src);
    let helper = if signed { ctx.cfg.helpers.idivmod } else { ctx.cfg.helpers.uidivmod };
    ctx.emit_helper_call_native_endian(helper);
    fetch_div_results(ctx, quot, rem);
    if saved != 0 {
        ctx.buf.emit(arm::pop(saved));
    }

    ctx.buf.emit(arm::mov_reg(dividend, quot));
    ctx.set_dirty(GuestReg::d(dq));
    if dr != dq {
        let remainder = ctx.map_write(GuestReg::d(dr));
        ctx.buf.emit(arm::mov_reg(remainder, rem));
        ctx.ra_free(remainder);
    }

    if mask & super::NZVC != 0 {
        ctx.cc_modify();
        ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, u16::from(mask & super::NZVC)));
        ctx.buf.emit(arm::cmp_imm(quot, 0));
        if mask & sr::Z as u8 != 0 {
            ctx.buf.emit(arm::orr_cc_imm(Cond::Eq, REG_SR, REG_SR, sr::Z));
        }
        if mask & sr::N as u8 != 0 {
            ctx.buf.emit(arm::orr_cc_imm(Cond::Mi, REG_SR, REG_SR, sr::N));
        }
    }
    ctx.ra_free(rem);
    ctx.ra_free(quot);
    ctx.ra_free(dividend);
    ctx.ra_free(src);
    Flow::Continue
}
