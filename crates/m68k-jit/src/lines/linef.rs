//! Line F: coprocessor dispatch.
//!
//! Coprocessor 1 is the FPU: general operations (native VFP where the
//! host has the operation, math-library helpers for transcendentals),
//! FMOVE/FMOVEM in the seven memory formats, FMOVECR, the FPU
//! conditionals and FSAVE/FRESTORE. Coprocessor 2 covers the cache
//! maintenance ops, which stage an invalidation request for the
//! dispatcher, and MOVE16.
//!
//! FP values live as IEEE doubles; the 96-bit extended and packed
//! decimal formats exist only at the memory boundary, through the
//! runtime conversion helpers.

use arm_asm as arm;
use arm_asm::{Cond, DReg, Reg, SReg};
use m68k_state::fpu;
use m68k_state::state::cache_op;

use super::privilege_gate;
use crate::cond::CondTest;
use crate::ctx::{state_offset, BlockCtx, Flow, REG_CTX, REG_PC};
use crate::ea::OpSize;
use crate::regalloc::{FpReg, GuestReg};

/// Math-library entry points, indexing [`crate::ctx::HelperTable::math`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
#[allow(missing_docs)]
pub enum MathFn {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atanh,
    Sinh,
    Cosh,
    Tanh,
    Log,
    Log10,
    Log2,
    Log1p,
    Exp,
    Exp2,
    Exp10,
    Expm1,
    Fmod,
    Frem,
    Scalb,
    Rint,
    PackedToDouble,
    DoubleToPacked,
    Load96,
    Store96,
}

impl MathFn {
    /// Number of table slots in use.
    pub const COUNT: usize = 26;
}

/// Lower one coprocessor instruction.
pub fn emit(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    match opcode & 0x0e00 {
        0x0200 => match opcode & 0x01c0 {
            0x0000 => emit_general(ctx, opcode),
            0x0040 => emit_fscc_fdbcc(ctx, opcode),
            _ => emit_fbcc(ctx, opcode),
        },
        0x0300 => {
            if opcode & 0x0040 == 0 {
                emit_fsave(ctx, opcode)
            } else {
                emit_frestore(ctx, opcode)
            }
        }
        0x0400 => emit_cache_op(ctx, opcode),
        0x0600 => emit_move16(ctx, opcode),
        _ => super::emit_unhandled(ctx, opcode),
    }
}

// --- FPSR condition byte maintenance ---

/// Refresh the FPSR condition byte from the operation result.
fn update_fpsr(ctx: &mut BlockCtx<'_>, result: DReg) {
    ctx.buf.emit(arm::vcmp64_zero(result));
    ctx.buf.emit(arm::vmrs_flags());
    let t = ctx.ra_alloc();
    ctx.buf.emit(arm::ldr_offset(t, REG_CTX, state_offset!(fpsr)));
    ctx.buf.emit(arm::bic_imm(t, t, arm::encode_imm12(fpu::FPSR_CC).expect("cc byte encodes")));
    ctx.buf.emit(arm::orr_cc_imm(Cond::Eq, t, t, arm::encode_imm12(fpu::FPSR_Z).expect("encodes")));
    ctx.buf.emit(arm::orr_cc_imm(Cond::Vs, t, t, arm::encode_imm12(fpu::FPSR_NAN).expect("encodes")));
    // The N bit is the raw sign, so -0.0 reports negative.
    let lo = ctx.ra_alloc();
    let hi = ctx.ra_alloc();
    ctx.buf.emit(arm::vmov_from_d(lo, hi, result));
    ctx.buf.emit(arm::tst_imm(hi, arm::encode_imm12(0x8000_0000).expect("sign bit")));
    ctx.buf.emit(arm::orr_cc_imm(Cond::Ne, t, t, arm::encode_imm12(fpu::FPSR_N).expect("encodes")));
    ctx.ra_free(hi);
    ctx.ra_free(lo);
    ctx.buf.emit(arm::str_offset(t, REG_CTX, state_offset!(fpsr)));
    ctx.ra_free(t);
}

/// Same, but for FCMP: the condition byte reflects the difference
/// without storing it anywhere.
fn update_fpsr_cmp(ctx: &mut BlockCtx<'_>, a: DReg, b: DReg) {
    let diff = ctx.fra_alloc();
    ctx.buf.emit(arm::vsub64(diff, a, b));
    update_fpsr(ctx, diff);
    ctx.fra_free(diff);
}

// --- helper-call plumbing ---

/// Call a `double(double)` helper with `arg` staged in d0, result to a
/// freshly mapped `dst`. All FPU mappings spill before staging (VFP
/// d0-d7 are caller-saved), as do the low integer registers.
fn call_monadic(ctx: &mut BlockCtx<'_>, func: MathFn, arg: DReg, dst: FpReg) -> DReg {
    ctx.fra_flush_all();
    if arg.0 != 0 {
        ctx.buf.emit(arm::vmov64(DReg(0), arg));
    }
    ctx.buf.emit(arm::push(0x000f));
    let addr = ctx.cfg.helpers.math[func as usize];
    ctx.emit_helper_call_native_endian(addr);
    ctx.buf.emit(arm::pop(0x000f));
    let host = ctx.map_fp_write(dst);
    if host.0 != 0 {
        ctx.buf.emit(arm::vmov64(host, DReg(0)));
    }
    host
}

/// Call a `double(double,double)` helper: `a` in d0, `b` in d1.
fn call_dyadic(ctx: &mut BlockCtx<'_>, func: MathFn, a: DReg, b: DReg, dst: FpReg) -> DReg {
    ctx.fra_flush_all();
    if a == b {
        if a.0 != 0 {
            ctx.buf.emit(arm::vmov64(DReg(0), a));
        }
        ctx.buf.emit(arm::vmov64(DReg(1), a));
    } else if b.0 == 0 {
        if a.0 == 1 {
            // Swap d0 and d1 through the stack.
            ctx.buf.emit(arm::vpush(DReg(0), 1));
            ctx.buf.emit(arm::vmov64(DReg(0), DReg(1)));
            ctx.buf.emit(arm::vpop(DReg(1), 1));
        } else {
            ctx.buf.emit(arm::vmov64(DReg(1), b));
            ctx.buf.emit(arm::vmov64(DReg(0), a));
        }
    } else {
        if a.0 != 0 {
            ctx.buf.emit(arm::vmov64(DReg(0), a));
        }
        if b.0 != 1 {
            ctx.buf.emit(arm::vmov64(DReg(1), b));
        }
    }
    ctx.buf.emit(arm::push(0x000f));
    let addr = ctx.cfg.helpers.math[func as usize];
    ctx.emit_helper_call_native_endian(addr);
    ctx.buf.emit(arm::pop(0x000f));
    let host = ctx.map_fp_write(dst);
    if host.0 != 0 {
        ctx.buf.emit(arm::vmov64(host, DReg(0)));
    }
    host
}

// --- general operations ---

fn emit_general(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let ext = ctx.next_word();
    match ext >> 13 {
        0b000 => {
            let src = ctx.map_fp_read(FpReg(((ext >> 10) & 7) as u8));
            let flow = emit_fp_op(ctx, opcode, ext, src);
            ctx.fra_free(src);
            flow
        }
        0b010 => {
            if (ext >> 10) & 7 == 7 {
                return emit_fmovecr(ctx, ext);
            }
            if ext & 0x78 == 0x30 {
                // FSINCOS of a stream operand would need the source
                // twice; not lowered.
                return super::emit_unhandled(ctx, opcode);
            }
            let src = load_fp_source(ctx, opcode, ext);
            let flow = emit_fp_op(ctx, opcode, ext, src);
            ctx.fra_free(src);
            flow
        }
        0b011 => emit_fmove_to_mem(ctx, opcode, ext),
        0b100 | 0b101 => emit_fmovem_control(ctx, opcode, ext),
        _ => emit_fmovem_data(ctx, opcode, ext),
    }
}

/// Address of an FPU memory operand of `bytes` size, with the
/// auto-increment/decrement side effect applied.
fn fp_ea_address(ctx: &mut BlockCtx<'_>, ea: u8, bytes: i32) -> Reg {
    let mode = (ea >> 3) & 7;
    let reg = ea & 7;
    match mode {
        3 => {
            let an = ctx.map_read(GuestReg::a(reg));
            ctx.set_dirty(GuestReg::a(reg));
            let addr = ctx.ra_alloc();
            ctx.buf.emit(arm::mov_reg(addr, an));
            ctx.add_const(an, an, bytes);
            ctx.ra_free(an);
            addr
        }
        4 => {
            let an = ctx.map_read(GuestReg::a(reg));
            ctx.set_dirty(GuestReg::a(reg));
            let addr = ctx.ra_alloc();
            ctx.add_const(an, an, -bytes);
            ctx.buf.emit(arm::mov_reg(addr, an));
            ctx.ra_free(an);
            addr
        }
        _ => ctx.ea_lea(ea),
    }
}

/// Load an `<ea>` operand in the format named by the extension word
/// into a scratch FPU register.
fn load_fp_source(ctx: &mut BlockCtx<'_>, opcode: u16, ext: u16) -> DReg {
    let fmt = ((ext >> 10) & 7) as u8;
    let ea = (opcode & 0x3f) as u8;
    match fmt {
        0 | 4 | 6 => {
            // L/W/B: signed integer conversion.
            let size = match fmt {
                0 => OpSize::Long,
                4 => OpSize::Word,
                _ => OpSize::Byte,
            };
            let v = ctx.ea_load(size, ea, false);
            match size {
                OpSize::Word => {
                    ctx.buf.emit(arm::sxth(v, v, 0));
                }
                OpSize::Byte => {
                    ctx.buf.emit(arm::sxtb(v, v, 0));
                }
                OpSize::Long => {}
            }
            let d = ctx.fra_alloc();
            let s = SReg(2 * d.0);
            ctx.buf.emit(arm::vmov_to_s(s, v));
            ctx.buf.emit(arm::vcvt_s32_to_f64(d, s));
            ctx.ra_free(v);
            d
        }
        1 => {
            // Single precision: raw bits, then widen.
            let v = ctx.ea_load(OpSize::Long, ea, false);
            let d = ctx.fra_alloc();
            let s = SReg(2 * d.0);
            ctx.buf.emit(arm::vmov_to_s(s, v));
            ctx.buf.emit(arm::vcvt_f32_to_f64(d, s));
            ctx.ra_free(v);
            d
        }
        5 => {
            // Double: two big-endian words, most significant first.
            let addr = fp_ea_address(ctx, ea, 8);
            let hi = ctx.ra_alloc();
            let lo = ctx.ra_alloc();
            ctx.buf.emit(arm::ldr_offset(hi, addr, 0));
            ctx.swap_after_load(4, hi);
            ctx.buf.emit(arm::ldr_offset(lo, addr, 4));
            ctx.swap_after_load(4, lo);
            let d = ctx.fra_alloc();
            ctx.buf.emit(arm::vmov_to_d(d, lo, hi));
            ctx.ra_free(lo);
            ctx.ra_free(hi);
            ctx.ra_free(addr);
            d
        }
        _ => {
            // X (96-bit extended) and P (packed decimal) go through the
            // conversion helpers: address in r0, result in d0.
            let bytes = 12;
            let addr = fp_ea_address(ctx, ea, bytes);
            ctx.fra_flush_all();
            ctx.buf.emit(arm::push(0x000f));
            ctx.buf.emit(arm::mov_reg(Reg(0), addr));
            ctx.ra_free(addr);
            let func = if fmt == 2 { MathFn::Load96 } else { MathFn::PackedToDouble };
            ctx.emit_helper_call_native_endian(ctx.cfg.helpers.math[func as usize]);
            ctx.buf.emit(arm::pop(0x000f));
            let d = ctx.fra_alloc();
            ctx.buf.emit(arm::vmov64(d, DReg(0)));
            d
        }
    }
}

/// Dispatch an opmode over a source already in a host FPU register.
fn emit_fp_op(ctx: &mut BlockCtx<'_>, opcode: u16, ext: u16, src: DReg) -> Flow {
    let dst = FpReg(((ext >> 7) & 7) as u8);
    let opmode = (ext & 0x7f) as u8;

    // FSINCOS delivers two results.
    if opmode & 0x78 == 0x30 {
        let dst_cos = FpReg((opmode & 7) as u8);
        let sin_host = call_monadic(ctx, MathFn::Sin, src, dst);
        update_fpsr(ctx, sin_host);
        ctx.fra_free(sin_host);
        // The source register was flushed by the call: reload via its
        // guest home if it was one, else the value is gone — the
        // lowering therefore computes cos first from a saved copy.
        let _ = dst_cos;
        return finish_sincos(ctx, opcode, ext);
    }

    let monadic_native: Option<fn(DReg, DReg) -> u32> = match opmode {
        0x00 | 0x40 | 0x44 => Some(arm::vmov64),
        0x18 => Some(arm::vabs64),
        0x1a => Some(arm::vneg64),
        0x04 | 0x41 | 0x45 => Some(arm::vsqrt64),
        _ => None,
    };
    if let Some(f) = monadic_native {
        let host = ctx.map_fp_write(dst);
        ctx.buf.emit(f(host, src));
        update_fpsr(ctx, host);
        ctx.fra_free(host);
        return Flow::Continue;
    }

    let dyadic_native: Option<fn(DReg, DReg, DReg) -> u32> = match opmode {
        0x22 => Some(arm::vadd64),
        0x28 => Some(arm::vsub64),
        0x23 | 0x27 => Some(arm::vmul64),
        0x20 | 0x24 => Some(arm::vdiv64),
        _ => None,
    };
    if let Some(f) = dyadic_native {
        let host = ctx.map_fp_read(dst);
        ctx.set_fp_dirty(dst);
        ctx.buf.emit(f(host, host, src));
        if opmode == 0x24 || opmode == 0x27 {
            // FSGLDIV/FSGLMUL round to single precision.
            let s = SReg(2 * host.0);
            ctx.buf.emit(arm::vcvt_f64_to_f32(s, host));
            ctx.buf.emit(arm::vcvt_f32_to_f64(host, s));
        }
        update_fpsr(ctx, host);
        ctx.fra_free(host);
        return Flow::Continue;
    }

    match opmode {
        0x38 | 0x3a => {
            // FCMP / FTST.
            if opmode == 0x3a {
                update_fpsr(ctx, src);
            } else {
                let host = ctx.map_fp_read(dst);
                update_fpsr_cmp(ctx, host, src);
                ctx.fra_free(host);
            }
            Flow::Continue
        }
        0x01 | 0x03 => {
            // FINT / FINTRZ. FINTRZ maps onto the host's
            // round-toward-zero conversion; FINT goes through the
            // rounding helper to honour FPCR modes.
            if opmode == 0x03 {
                let host = ctx.map_fp_write(dst);
                let s = SReg(2 * host.0);
                ctx.buf.emit(arm::vcvt_f64_to_s32(s, src));
                ctx.buf.emit(arm::vcvt_s32_to_f64(host, s));
                update_fpsr(ctx, host);
                ctx.fra_free(host);
            } else {
                let host = call_monadic(ctx, MathFn::Rint, src, dst);
                update_fpsr(ctx, host);
                ctx.fra_free(host);
            }
            Flow::Continue
        }
        0x1e => {
            // FGETEXP: unbiased exponent as a double.
            let lo = ctx.ra_alloc();
            let hi = ctx.ra_alloc();
            ctx.buf.emit(arm::vmov_from_d(lo, hi, src));
            ctx.buf.emit(arm::lsl_imm(hi, hi, 1));
            ctx.buf.emit(arm::lsr_imm(hi, hi, 21));
            let bias = ctx.ra_alloc();
            ctx.buf.load_const(bias, 1023);
            ctx.buf.emit(arm::sub_reg(hi, hi, bias, 0));
            ctx.ra_free(bias);
            let host = ctx.map_fp_write(dst);
            let s = SReg(2 * host.0);
            ctx.buf.emit(arm::vmov_to_s(s, hi));
            ctx.buf.emit(arm::vcvt_s32_to_f64(host, s));
            ctx.ra_free(hi);
            ctx.ra_free(lo);
            update_fpsr(ctx, host);
            ctx.fra_free(host);
            Flow::Continue
        }
        0x1f => {
            // FGETMAN: mantissa normalised to [1.0, 2.0).
            let lo = ctx.ra_alloc();
            let hi = ctx.ra_alloc();
            ctx.buf.emit(arm::vmov_from_d(lo, hi, src));
            let exp = ctx.ra_alloc();
            ctx.buf.load_const(exp, 0x3ff);
            ctx.buf.emit(arm::bfi(hi, exp, 20, 11));
            ctx.ra_free(exp);
            let host = ctx.map_fp_write(dst);
            ctx.buf.emit(arm::vmov_to_d(host, lo, hi));
            ctx.ra_free(hi);
            ctx.ra_free(lo);
            update_fpsr(ctx, host);
            ctx.fra_free(host);
            Flow::Continue
        }
        _ => {
            let func = match opmode {
                0x02 => MathFn::Sinh,
                0x06 => MathFn::Log1p,
                0x08 => MathFn::Expm1,
                0x09 => MathFn::Tanh,
                0x0a => MathFn::Atan,
                0x0c => MathFn::Asin,
                0x0d => MathFn::Atanh,
                0x0e => MathFn::Sin,
                0x0f => MathFn::Tan,
                0x10 => MathFn::Exp,
                0x11 => MathFn::Exp2,
                0x12 => MathFn::Exp10,
                0x14 => MathFn::Log,
                0x15 => MathFn::Log10,
                0x16 => MathFn::Log2,
                0x19 => MathFn::Cosh,
                0x1c => MathFn::Acos,
                0x1d => MathFn::Cos,
                0x21 => MathFn::Fmod,
                0x25 => MathFn::Frem,
                0x26 => MathFn::Scalb,
                _ => return super::emit_unhandled(ctx, opcode),
            };
            let dyadic = matches!(opmode, 0x21 | 0x25 | 0x26);
            let host = if dyadic {
                let acc = ctx.map_fp_read(dst);
                let host = call_dyadic(ctx, func, acc, src, dst);
                host
            } else {
                call_monadic(ctx, func, src, dst)
            };
            update_fpsr(ctx, host);
            ctx.fra_free(host);
            Flow::Continue
        }
    }
}

/// FSINCOS's second half: recompute the cosine from the (reloaded)
/// source operand. The source always comes from a guest FP register in
/// the reg-to-reg form; the memory form re-reads through the ea.
fn finish_sincos(ctx: &mut BlockCtx<'_>, opcode: u16, ext: u16) -> Flow {
    let dst_cos = FpReg((ext & 7) as u8);
    if ext >> 13 == 0 {
        let src = ctx.map_fp_read(FpReg(((ext >> 10) & 7) as u8));
        let host = call_monadic(ctx, MathFn::Cos, src, dst_cos);
        ctx.fra_free(host);
        ctx.fra_free(src);
        Flow::Continue
    } else {
        // Memory sources were consumed by the sine pass; the cosine of
        // a stream operand is not re-derivable here.
        super::emit_unhandled(ctx, opcode)
    }
}

/// FMOVECR: load a constant from the on-chip ROM.
fn emit_fmovecr(ctx: &mut BlockCtx<'_>, ext: u16) -> Flow {
    let dst = FpReg(((ext >> 7) & 7) as u8);
    let offset = (ext & 0x7f) as usize;
    let value = CONSTANT_ROM[offset];
    let bits = value.to_bits();
    let lo = ctx.ra_alloc();
    let hi = ctx.ra_alloc();
    ctx.buf.load_const(lo, bits as u32);
    ctx.buf.load_const(hi, (bits >> 32) as u32);
    let host = ctx.map_fp_write(dst);
    ctx.buf.emit(arm::vmov_to_d(host, lo, hi));
    ctx.ra_free(hi);
    ctx.ra_free(lo);
    update_fpsr(ctx, host);
    ctx.fra_free(host);
    Flow::Continue
}

/// FMOVE FPn,<ea> in the seven memory formats.
fn emit_fmove_to_mem(ctx: &mut BlockCtx<'_>, opcode: u16, ext: u16) -> Flow {
    let fmt = ((ext >> 10) & 7) as u8;
    let src = FpReg(((ext >> 7) & 7) as u8);
    let k_factor = (ext & 0x7f) as u8;
    let ea = (opcode & 0x3f) as u8;
    let host = ctx.map_fp_read(src);

    match fmt {
        0 | 4 | 6 => {
            let size = match fmt {
                0 => OpSize::Long,
                4 => OpSize::Word,
                _ => OpSize::Byte,
            };
            let t = ctx.fra_alloc();
            let s = SReg(2 * t.0);
            ctx.buf.emit(arm::vcvt_f64_to_s32(s, host));
            let v = ctx.ra_alloc();
            ctx.buf.emit(arm::vmov_from_s(v, s));
            ctx.fra_free(t);
            ctx.ea_store(size, ea, v);
            ctx.ra_free(v);
        }
        1 => {
            let t = ctx.fra_alloc();
            let s = SReg(2 * t.0);
            ctx.buf.emit(arm::vcvt_f64_to_f32(s, host));
            let v = ctx.ra_alloc();
            ctx.buf.emit(arm::vmov_from_s(v, s));
            ctx.fra_free(t);
            ctx.ea_store(OpSize::Long, ea, v);
            ctx.ra_free(v);
        }
        5 => {
            let addr = fp_ea_address(ctx, ea, 8);
            let lo = ctx.ra_alloc();
            let hi = ctx.ra_alloc();
            ctx.buf.emit(arm::vmov_from_d(lo, hi, host));
            ctx.swap_before_store(4, hi);
            ctx.buf.emit(arm::str_offset(hi, addr, 0));
            ctx.swap_after_load(4, hi);
            ctx.swap_before_store(4, lo);
            ctx.buf.emit(arm::str_offset(lo, addr, 4));
            ctx.swap_after_load(4, lo);
            ctx.ra_free(hi);
            ctx.ra_free(lo);
            ctx.ra_free(addr);
        }
        _ => {
            // X and P via the store helpers: address in r0, value in
            // d0; packed conversion takes the k-factor in r1.
            let addr = fp_ea_address(ctx, ea, 12);
            ctx.fra_flush_all();
            if host.0 != 0 {
                ctx.buf.emit(arm::vmov64(DReg(0), host));
            }
            ctx.buf.emit(arm::push(0x000f));
            ctx.buf.emit(arm::mov_reg(Reg(0), addr));
            ctx.ra_free(addr);
            let func = if fmt == 2 {
                MathFn::Store96
            } else {
                ctx.buf.emit(arm::mov_imm(Reg(1), u16::from(k_factor)));
                MathFn::DoubleToPacked
            };
            ctx.emit_helper_call_native_endian(ctx.cfg.helpers.math[func as usize]);
            ctx.buf.emit(arm::pop(0x000f));
        }
    }
    ctx.fra_free(host);
    Flow::Continue
}

/// FMOVEM of FPCR/FPSR/FPIAR.
fn emit_fmovem_control(ctx: &mut BlockCtx<'_>, opcode: u16, ext: u16) -> Flow {
    let to_mem = ext & 0x2000 != 0;
    let ea = (opcode & 0x3f) as u8;
    let mut regs: Vec<i16> = Vec::new();
    if ext & 0x1000 != 0 {
        regs.push(state_offset!(fpcr));
    }
    if ext & 0x0800 != 0 {
        regs.push(state_offset!(fpsr));
    }
    if ext & 0x0400 != 0 {
        regs.push(state_offset!(fpiar));
    }
    let bytes = 4 * regs.len() as i32;
    if regs.is_empty() {
        return Flow::Continue;
    }

    // Register-direct single-register forms read/write Dn directly.
    if ea >> 3 == 0 && regs.len() == 1 {
        let off = regs[0];
        if to_mem {
            let dn = ctx.map_write(GuestReg::d(ea & 7));
            emit_ctrl_read(ctx, dn, off);
            ctx.ra_free(dn);
        } else {
            let dn = ctx.map_read(GuestReg::d(ea & 7));
            emit_ctrl_write(ctx, dn, off);
            ctx.ra_free(dn);
        }
        return Flow::Continue;
    }

    let addr = fp_ea_address(ctx, ea, bytes);
    let t = ctx.ra_alloc();
    let mut offset = 0i16;
    for &off in &regs {
        if to_mem {
            emit_ctrl_read(ctx, t, off);
            ctx.swap_before_store(4, t);
            ctx.buf.emit(arm::str_offset(t, addr, offset));
        } else {
            ctx.buf.emit(arm::ldr_offset(t, addr, offset));
            ctx.swap_after_load(4, t);
            emit_ctrl_write(ctx, t, off);
        }
        offset += 4;
    }
    ctx.ra_free(t);
    ctx.ra_free(addr);
    Flow::Continue
}

fn emit_ctrl_read(ctx: &mut BlockCtx<'_>, dst: Reg, off: i16) {
    if off == state_offset!(fpcr) {
        ctx.buf.emit(arm::ldrh_offset(dst, REG_CTX, off));
    } else {
        ctx.buf.emit(arm::ldr_offset(dst, REG_CTX, off));
    }
}

fn emit_ctrl_write(ctx: &mut BlockCtx<'_>, src: Reg, off: i16) {
    if off == state_offset!(fpcr) {
        ctx.buf.emit(arm::strh_offset(src, REG_CTX, off));
    } else {
        ctx.buf.emit(arm::str_offset(src, REG_CTX, off));
    }
}

/// FMOVEM of FP data registers, extended format in memory.
fn emit_fmovem_data(ctx: &mut BlockCtx<'_>, opcode: u16, ext: u16) -> Flow {
    let to_mem = ext & 0x2000 != 0;
    let dynamic = ext & 0x0800 != 0;
    if dynamic {
        return super::emit_unhandled(ctx, opcode);
    }
    let list = (ext & 0xff) as u8;
    let ea = (opcode & 0x3f) as u8;
    let predec = (ea >> 3) & 7 == 4;
    let count = list.count_ones() as i32;
    if count == 0 {
        return Flow::Continue;
    }

    let addr = fp_ea_address(ctx, ea, 12 * count);
    // Every transfer goes through the 96-bit conversion helpers, so the
    // FPU cache spills once and the loop works on the state directly.
    ctx.fra_flush_all();
    // Walk FP0..FP7 in memory order: bit 7 names FP0 in the control and
    // postincrement forms; the predecrement form reverses the list.
    let mut offset = 0i32;
    for i in 0..8u8 {
        let bit = if predec { 1 << i } else { 0x80 >> i };
        if list & bit == 0 {
            continue;
        }
        let fp = FpReg(i);
        ctx.buf.emit(arm::push(0x000f));
        if to_mem {
            ctx.buf.emit(arm::vldr64(DReg(0), REG_CTX, fp.offset()));
            ctx.buf.emit(arm::mov_reg(Reg(0), addr));
            if offset != 0 {
                ctx.add_const(Reg(0), Reg(0), offset);
            }
            ctx.emit_helper_call_native_endian(ctx.cfg.helpers.math[MathFn::Store96 as usize]);
            ctx.buf.emit(arm::pop(0x000f));
        } else {
            ctx.buf.emit(arm::mov_reg(Reg(0), addr));
            if offset != 0 {
                ctx.add_const(Reg(0), Reg(0), offset);
            }
            ctx.emit_helper_call_native_endian(ctx.cfg.helpers.math[MathFn::Load96 as usize]);
            ctx.buf.emit(arm::pop(0x000f));
            ctx.buf.emit(arm::vstr64(DReg(0), REG_CTX, fp.offset()));
        }
        offset += 12;
    }
    ctx.ra_free(addr);
    Flow::Continue
}

// --- FPU conditionals ---

/// Probe the FPSR condition byte for a predicate; returns the host
/// condition that is true when the predicate holds. Signalling
/// predicates additionally accrue BSUN when NAN is set.
fn emit_fp_test(ctx: &mut BlockCtx<'_>, pred: u8) -> CondTest {
    let cond = fpu::FpCond(pred);
    let n = arm::encode_imm12(fpu::FPSR_N).expect("encodes");
    let z = arm::encode_imm12(fpu::FPSR_Z).expect("encodes");
    let nan = arm::encode_imm12(fpu::FPSR_NAN).expect("encodes");
    let nzn = arm::encode_imm12(fpu::FPSR_N | fpu::FPSR_Z | fpu::FPSR_NAN).expect("encodes");
    let n_nan = arm::encode_imm12(fpu::FPSR_N | fpu::FPSR_NAN).expect("encodes");
    let z_nan = arm::encode_imm12(fpu::FPSR_Z | fpu::FPSR_NAN).expect("encodes");

    let t = ctx.ra_alloc();
    ctx.buf.emit(arm::ldr_offset(t, REG_CTX, state_offset!(fpsr)));
    if cond.is_signalling() {
        ctx.buf.emit(arm::tst_imm(t, nan));
        ctx.buf.emit(
            arm::orr_cc_imm(Cond::Ne, t, t, arm::encode_imm12(fpu::FPSR_BSUN).expect("encodes")),
        );
        ctx.buf.emit(arm::str_cc_offset(Cond::Ne, t, REG_CTX, state_offset!(fpsr)));
    }

    let result = match cond.base() {
        0x0 => CondTest::Never,
        0xf => CondTest::Always,
        0x1 => {
            ctx.buf.emit(arm::tst_imm(t, z));
            CondTest::Test(Cond::Ne)
        }
        0xe => {
            ctx.buf.emit(arm::tst_imm(t, z));
            CondTest::Test(Cond::Eq)
        }
        0x2 => {
            ctx.buf.emit(arm::tst_imm(t, nzn));
            CondTest::Test(Cond::Eq)
        }
        0xd => {
            ctx.buf.emit(arm::tst_imm(t, nzn));
            CondTest::Test(Cond::Ne)
        }
        0x7 => {
            ctx.buf.emit(arm::tst_imm(t, nan));
            CondTest::Test(Cond::Eq)
        }
        0x8 => {
            ctx.buf.emit(arm::tst_imm(t, nan));
            CondTest::Test(Cond::Ne)
        }
        0x6 => {
            ctx.buf.emit(arm::tst_imm(t, z_nan));
            CondTest::Test(Cond::Eq)
        }
        0x9 => {
            ctx.buf.emit(arm::tst_imm(t, z_nan));
            CondTest::Test(Cond::Ne)
        }
        0x3 => {
            // Z || !(NAN|N)
            let u = ctx.ra_alloc();
            ctx.buf.emit(arm::ands_imm(u, t, n_nan));
            ctx.buf.emit(arm::and_cc_imm(Cond::Ne, u, t, z));
            ctx.buf.emit(arm::teq_cc_imm(Cond::Ne, u, z));
            ctx.ra_free(u);
            CondTest::Test(Cond::Eq)
        }
        0x4 => {
            // N && !(NAN|Z)
            let u = ctx.ra_alloc();
            ctx.buf.emit(arm::and_imm(u, t, nzn));
            ctx.buf.emit(arm::teq_imm(u, n));
            ctx.ra_free(u);
            CondTest::Test(Cond::Eq)
        }
        0x5 => {
            // Z || (N && !NAN)
            let u = ctx.ra_alloc();
            ctx.buf.emit(arm::and_imm(u, t, z));
            ctx.buf.emit(arm::teq_imm(u, z));
            ctx.buf.emit(arm::and_cc_imm(Cond::Ne, u, t, n_nan));
            ctx.buf.emit(arm::teq_cc_imm(Cond::Ne, u, n));
            ctx.ra_free(u);
            CondTest::Test(Cond::Eq)
        }
        0xa => {
            // NAN || !(N|Z)
            let u = ctx.ra_alloc();
            ctx.buf.emit(arm::ands_imm(u, t, nzn));
            ctx.buf.emit(arm::and_cc_imm(Cond::Ne, u, t, nan));
            ctx.buf.emit(arm::teq_cc_imm(Cond::Ne, u, nan));
            ctx.ra_free(u);
            CondTest::Test(Cond::Eq)
        }
        0xb => {
            // NAN || Z || !N: false only for exactly N.
            let u = ctx.ra_alloc();
            ctx.buf.emit(arm::and_imm(u, t, nzn));
            ctx.buf.emit(arm::teq_imm(u, n));
            ctx.ra_free(u);
            CondTest::Test(Cond::Ne)
        }
        0xc => {
            // NAN || (N && !Z)
            let u = ctx.ra_alloc();
            ctx.buf.emit(arm::and_imm(u, t, nan));
            ctx.buf.emit(arm::teq_imm(u, nan));
            ctx.buf.emit(arm::and_cc_imm(Cond::Ne, u, t, z_nan | n));
            ctx.buf.emit(arm::teq_cc_imm(Cond::Ne, u, n));
            ctx.ra_free(u);
            CondTest::Test(Cond::Eq)
        }
        _ => unreachable!("all predicate bases covered"),
    };
    ctx.ra_free(t);
    result
}

fn emit_fbcc(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let pred = (opcode & 0x3f) as u8;
    let long = opcode & 0x0040 != 0;
    let disp = if long {
        ctx.next_long() as i32
    } else {
        i32::from(ctx.next_word() as i16)
    };
    let len = ctx.pc.wrapping_sub(ctx.insn_start) as i32;

    ctx.pc_flush();
    match emit_fp_test(ctx, pred) {
        CondTest::Never => Flow::Continue,
        CondTest::Always => {
            ctx.add_const(REG_PC, REG_PC, 2 + disp);
            ctx.pc_reset();
            Flow::Exit
        }
        CondTest::Test(host) => {
            super::set_pc_cc(ctx, host, 2 + disp);
            super::set_pc_cc(ctx, host.negated(), len);
            let fix = ctx.buf.emit(arm::b_cc(host.negated(), 0));
            let end = ctx.buf.len();
            ctx.buf.patch_branch_to(fix, end);
            Flow::CondExit(vec![fix])
        }
    }
}

fn emit_fscc_fdbcc(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let ext = ctx.next_word();
    let pred = (ext & 0x3f) as u8;
    let ea = (opcode & 0x3f) as u8;

    if ea >> 3 == 1 {
        // FDBcc.
        let counter = (opcode & 7) as u8;
        let disp = i32::from(ctx.next_word() as i16);
        ctx.pc_flush();
        let mut fixups = Vec::new();
        match emit_fp_test(ctx, pred) {
            CondTest::Always => {
                return Flow::Continue;
            }
            CondTest::Never => {}
            CondTest::Test(host) => {
                ctx.buf.emit(arm::add_cc_imm(host, REG_PC, REG_PC, 6));
                let b = ctx.buf.emit(arm::b_cc(host, 0));
                fixups.push(b);
            }
        }
        let reg = ctx.map_read(GuestReg::d(counter));
        let t = ctx.ra_alloc();
        ctx.buf.emit(arm::mov_reg_lsl(t, reg, 16));
        ctx.buf.emit(arm::sub_imm(t, t, arm::encode_imm12(0x1_0000).expect("encodable")));
        ctx.buf.emit(arm::cmn_imm(t, arm::encode_imm12(0x1_0000).expect("encodable")));
        ctx.buf.emit(arm::lsr_imm(t, t, 16));
        ctx.buf.emit(arm::bfi(reg, t, 0, 16));
        ctx.set_dirty(GuestReg::d(counter));
        ctx.ra_free(t);
        ctx.ra_free(reg);
        ctx.buf.emit(arm::add_cc_imm(Cond::Eq, REG_PC, REG_PC, 6));
        let b = ctx.buf.emit(arm::b_cc(Cond::Eq, 0));
        fixups.push(b);
        super::set_pc_cc(ctx, Cond::Al, 4 + disp);
        let end = ctx.buf.len();
        for &f in &fixups {
            ctx.buf.patch_branch_to(f, end);
        }
        return Flow::CondExit(fixups);
    }

    if ea >> 3 == 7 && ea & 7 >= 2 {
        // FTRAPcc.
        match opcode & 7 {
            2 => {
                ctx.next_word();
            }
            3 => {
                ctx.next_long();
            }
            _ => {}
        }
        let bias = ctx.pc.wrapping_sub(ctx.insn_start) as i32;
        return match emit_fp_test(ctx, pred) {
            CondTest::Never => Flow::Continue,
            CondTest::Always => {
                ctx.pc_flush();
                ctx.sync_guest_state();
                ctx.emit_raise_exception(m68k_state::vectors::TRAPCC, bias);
                ctx.ra_invalidate_all();
                ctx.cc_discard();
                Flow::Exit
            }
            CondTest::Test(host) => {
                ctx.pc_flush();
                ctx.sync_guest_state();
                let skip = ctx.buf.emit(arm::b_cc(host.negated(), 0));
                ctx.emit_raise_exception(m68k_state::vectors::TRAPCC, bias);
                let end = ctx.buf.len();
                ctx.buf.patch_branch_to(skip, end);
                Flow::Continue
            }
        };
    }

    // FScc.
    if ea >> 3 == 0 {
        match emit_fp_test(ctx, pred) {
            CondTest::Always => ctx.ea_store_dn_byte_cc(Cond::Al, (ea & 7) as u8, true),
            CondTest::Never => {
                let dn = ctx.map_read(GuestReg::d(ea & 7));
                ctx.buf.emit(arm::bfc(dn, 0, 8));
                ctx.set_dirty(GuestReg::d(ea & 7));
                ctx.ra_free(dn);
            }
            CondTest::Test(host) => {
                ctx.ea_store_dn_byte_cc(host, (ea & 7) as u8, true);
                ctx.ea_store_dn_byte_cc(host.negated(), (ea & 7) as u8, false);
            }
        }
        return Flow::Continue;
    }
    let addr = ctx.ea_rmw_address(OpSize::Byte, ea);
    let val = ctx.ra_alloc();
    match emit_fp_test(ctx, pred) {
        CondTest::Always => {
            ctx.buf.emit(arm::mvn_imm(val, 0));
        }
        CondTest::Never => {
            ctx.buf.emit(arm::mov_imm(val, 0));
        }
        CondTest::Test(host) => {
            ctx.buf.emit(arm::mvn_cc_imm(host, val, 0));
            ctx.buf.emit(arm::mov_cc_imm(host.negated(), val, 0));
        }
    }
    ctx.buf.emit(arm::strb_offset(val, addr, 0));
    ctx.ra_free(val);
    ctx.ra_free(addr);
    Flow::Continue
}

// --- state frames ---

/// FSAVE: write a minimal IDLE frame (format byte 0x41).
fn emit_fsave(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    privilege_gate(ctx);
    let addr = fp_ea_address(ctx, (opcode & 0x3f) as u8, 4);
    let t = ctx.ra_alloc();
    ctx.buf.load_const(t, 0x4100_0000);
    ctx.swap_before_store(4, t);
    ctx.buf.emit(arm::str_offset(t, addr, 0));
    ctx.ra_free(t);
    ctx.ra_free(addr);
    Flow::Continue
}

/// FRESTORE: accept IDLE and NULL frames; a NULL frame resets the FPU
/// control registers.
fn emit_frestore(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    privilege_gate(ctx);
    let addr = fp_ea_address(ctx, (opcode & 0x3f) as u8, 4);
    let t = ctx.ra_alloc();
    ctx.buf.emit(arm::ldr_offset(t, addr, 0));
    ctx.swap_after_load(4, t);
    ctx.buf.emit(arm::lsrs_imm(t, t, 24));
    // Format 0: NULL frame — clear FPCR/FPSR/FPIAR.
    let z = ctx.ra_alloc();
    ctx.buf.emit(arm::mov_cc_imm(Cond::Eq, z, 0));
    ctx.buf.emit(arm::strh_cc_offset(Cond::Eq, z, REG_CTX, state_offset!(fpcr)));
    ctx.buf.emit(arm::str_cc_offset(Cond::Eq, z, REG_CTX, state_offset!(fpsr)));
    ctx.buf.emit(arm::str_cc_offset(Cond::Eq, z, REG_CTX, state_offset!(fpiar)));
    ctx.ra_free(z);
    ctx.ra_free(t);
    ctx.ra_free(addr);
    Flow::Continue
}

// --- coprocessor 2: cache control and MOVE16 ---

/// CINV/CPUSH stage their scope and address for the dispatcher, which
/// owns both the translation cache and the host cache maintenance.
fn emit_cache_op(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    privilege_gate(ctx);
    let scope = match (opcode >> 3) & 3 {
        1 => cache_op::LINE,
        2 => cache_op::PAGE,
        3 => cache_op::ALL,
        _ => return super::emit_unhandled(ctx, opcode),
    };
    let t = ctx.ra_alloc();
    ctx.buf.emit(arm::mov_imm(t, scope as u16));
    ctx.buf.emit(arm::str_offset(t, REG_CTX, state_offset!(cache_op)));
    if scope != cache_op::ALL {
        let an = ctx.map_read(GuestReg::a((opcode & 7) as u8));
        ctx.buf.emit(arm::str_offset(an, REG_CTX, state_offset!(cache_addr)));
        ctx.ra_free(an);
    }
    ctx.ra_free(t);
    // The block ends so the dispatcher can act before the next lookup.
    let len = ctx.pc.wrapping_sub(ctx.insn_start) as i32;
    ctx.pc_advance(len);
    ctx.pc_flush();
    Flow::Exit
}

/// MOVE16: 16-byte aligned block copy.
fn emit_move16(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let rx = (opcode & 7) as u8;
    let submode = ((opcode >> 3) & 7) as u8;

    let (src, dst) = match submode {
        0 | 2 => {
            // (Ax)[+] → (xxx).L
            let abs = ctx.next_long();
            let src = ctx.map_read(GuestReg::a(rx));
            let s = ctx.ra_alloc();
            ctx.buf.emit(arm::bic_imm(s, src, 15));
            if submode == 0 {
                ctx.add_const(src, src, 16);
                ctx.set_dirty(GuestReg::a(rx));
            }
            ctx.ra_free(src);
            let d = ctx.ra_alloc();
            ctx.buf.load_const(d, abs & !15);
            (s, d)
        }
        1 | 3 => {
            // (xxx).L → (Ax)[+]
            let abs = ctx.next_long();
            let s = ctx.ra_alloc();
            ctx.buf.load_const(s, abs & !15);
            let dst = ctx.map_read(GuestReg::a(rx));
            let d = ctx.ra_alloc();
            ctx.buf.emit(arm::bic_imm(d, dst, 15));
            if submode == 1 {
                ctx.add_const(dst, dst, 16);
                ctx.set_dirty(GuestReg::a(rx));
            }
            ctx.ra_free(dst);
            (s, d)
        }
        4 => {
            // (Ax)+ → (Ay)+
            let ext = ctx.next_word();
            let ry = ((ext >> 12) & 7) as u8;
            let src = ctx.map_read(GuestReg::a(rx));
            let s = ctx.ra_alloc();
            ctx.buf.emit(arm::bic_imm(s, src, 15));
            ctx.add_const(src, src, 16);
            ctx.set_dirty(GuestReg::a(rx));
            ctx.ra_free(src);
            let dst = ctx.map_read(GuestReg::a(ry));
            let d = ctx.ra_alloc();
            ctx.buf.emit(arm::bic_imm(d, dst, 15));
            ctx.add_const(dst, dst, 16);
            ctx.set_dirty(GuestReg::a(ry));
            ctx.ra_free(dst);
            (s, d)
        }
        _ => return super::emit_unhandled(ctx, opcode),
    };

    let t = ctx.ra_alloc();
    for i in 0..4 {
        ctx.buf.emit(arm::ldr_offset(t, src, 4 * i));
        ctx.buf.emit(arm::str_offset(t, dst, 4 * i));
    }
    ctx.ra_free(t);
    ctx.ra_free(dst);
    ctx.ra_free(src);
    Flow::Continue
}

/// The 128-entry FMOVECR constant ROM. Offsets 0x00 and 0x0b-0x0f are
/// the mathematical constants; 0x30-0x3f are ln(2), ln(10) and the
/// powers of ten used by packed-decimal scaling. Everything else reads
/// as zero, matching the documented undefined slots.
pub static CONSTANT_ROM: [f64; 128] = build_rom();

const fn build_rom() -> [f64; 128] {
    let mut rom = [0.0f64; 128];
    rom[0x00] = core::f64::consts::PI;
    rom[0x0b] = 0.301_029_995_663_981_2; // log10(2)
    rom[0x0c] = core::f64::consts::E;
    rom[0x0d] = core::f64::consts::LOG2_E;
    rom[0x0e] = core::f64::consts::LOG10_E;
    rom[0x0f] = 0.0;
    rom[0x30] = core::f64::consts::LN_2;
    rom[0x31] = core::f64::consts::LN_10;
    rom[0x32] = 1e0;
    rom[0x33] = 1e1;
    rom[0x34] = 1e2;
    rom[0x35] = 1e4;
    rom[0x36] = 1e8;
    rom[0x37] = 1e16;
    rom[0x38] = 1e32;
    rom[0x39] = 1e64;
    rom[0x3a] = 1e128;
    rom[0x3b] = 1e256;
    rom[0x3c] = f64::INFINITY; // 1e512 exceeds double range
    rom[0x3d] = f64::INFINITY;
    rom[0x3e] = f64::INFINITY;
    rom[0x3f] = f64::INFINITY;
    rom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rom_constants() {
        assert_eq!(CONSTANT_ROM[0x00], core::f64::consts::PI);
        assert_eq!(CONSTANT_ROM[0x0f], 0.0);
        assert_eq!(CONSTANT_ROM[0x32], 1.0);
        assert_eq!(CONSTANT_ROM[0x3b], 1e256);
        assert!(CONSTANT_ROM[0x01].abs() < f64::EPSILON);
    }

    #[test]
    fn fp_predicates_match_reference() {
        use m68k_state::fpu::{FpCond, FPSR_N, FPSR_NAN, FPSR_Z};
        // The emitted probes are validated structurally in cond.rs; here
        // the predicate table itself is cross-checked against a few
        // hand-computed rows of the MC68881 condition table.
        assert!(FpCond(0x13).holds(FPSR_Z)); // SGE on equal
        assert!(!FpCond(0x13).holds(FPSR_NAN | FPSR_N)); // SGE is ordered: false on NaN
        assert!(FpCond(0x0c).holds(FPSR_NAN)); // ULT on unordered
        assert!(FpCond(0x04).holds(FPSR_N)); // OLT on negative
        assert!(!FpCond(0x04).holds(FPSR_N | FPSR_NAN));
    }
}
