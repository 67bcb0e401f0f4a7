//! Line E: shift and rotate instructions in register, immediate and
//! memory forms, and the bit-field group.
//!
//! Shifted operands live in the top of a host register so the host
//! carry is the guest's "last bit shifted out" without extra masking.
//! Register-count forms honour the 68020 count-0 rules: N and Z are
//! still set, C is cleared, X is untouched.

use arm_asm as arm;
use arm_asm::Cond;
use m68k_state::sr;

use crate::ctx::{BlockCtx, Flow, REG_SR};
use crate::ea::OpSize;
use crate::regalloc::GuestReg;

/// Lower one shift, rotate or bit-field instruction.
pub fn emit(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    if opcode & 0x08c0 == 0x08c0 {
        return emit_bitfield(ctx, opcode);
    }
    if opcode & 0x00c0 == 0x00c0 {
        return emit_memory_shift(ctx, opcode);
    }
    emit_register_shift(ctx, opcode)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShiftKind {
    Arith,
    Logical,
    RotateX,
    Rotate,
}

fn shift_kind(bits: u16) -> ShiftKind {
    match bits & 3 {
        0 => ShiftKind::Arith,
        1 => ShiftKind::Logical,
        2 => ShiftKind::RotateX,
        _ => ShiftKind::Rotate,
    }
}

fn emit_register_shift(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let Some(size) = OpSize::from_bits((opcode >> 6) as u8) else {
        return super::emit_unhandled(ctx, opcode);
    };
    let left = opcode & 0x0100 != 0;
    let kind = shift_kind(opcode >> 3);
    let reg_idx = (opcode & 7) as u8;
    let by_register = opcode & 0x0020 != 0;
    let count_field = ((opcode >> 9) & 7) as u8;

    let dn = ctx.map_read(GuestReg::d(reg_idx));
    let mask = ctx.live_flags();

    if by_register {
        let count = ctx.copy_from(GuestReg::d(count_field));
        ctx.buf.emit(arm::and_imm(count, count, 0x3f));
        match kind {
            ShiftKind::Arith | ShiftKind::Logical => {
                shift_by_register(ctx, dn, size, left, kind, count, mask);
            }
            ShiftKind::Rotate => {
                rotate_by_register(ctx, dn, size, left, count, mask);
            }
            ShiftKind::RotateX => {
                rox_by_register(ctx, dn, size, left, count, mask);
            }
        }
        ctx.ra_free(count);
    } else {
        let n = if count_field == 0 { 8 } else { count_field };
        match kind {
            ShiftKind::Arith | ShiftKind::Logical => {
                shift_by_immediate(ctx, dn, size, left, kind, n, mask);
            }
            ShiftKind::Rotate => {
                rotate_by_immediate(ctx, dn, size, left, n, mask);
            }
            ShiftKind::RotateX => {
                rox_by_immediate(ctx, dn, size, left, n, mask);
            }
        }
    }
    ctx.set_dirty(GuestReg::d(reg_idx));
    ctx.ra_free(dn);
    Flow::Continue
}

/// Fold N/Z/C (and X) from the host flags after a flag-setting shift.
/// V in the mask is cleared here; ASL appends its own overflow test on
/// a predicate computed before the shift.
fn shift_flags(ctx: &mut BlockCtx<'_>, mask: u8, with_x: bool) {
    let x = if with_x { sr::X } else { 0 };
    let m = u16::from(mask) & (sr::N | sr::Z | sr::V | sr::C | x);
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
    if m & sr::C != 0 {
        ctx.buf.emit(arm::orr_cc_imm(Cond::Cs, REG_SR, REG_SR, sr::C));
    }
    if m & sr::X != 0 {
        ctx.buf.emit(arm::orr_cc_imm(Cond::Cs, REG_SR, REG_SR, sr::X));
    }
}

fn shift_by_immediate(
    ctx: &mut BlockCtx<'_>,
    dn: arm::Reg,
    size: OpSize,
    left: bool,
    kind: ShiftKind,
    n: u8,
    mask: u8,
) {
    let up = 32 - size.bits();
    let t = ctx.ra_alloc();
    ctx.buf.emit(arm::lsl_imm(t, dn, up));

    // ASL overflow: the top n+1 bits of the operand must agree, or the
    // sign changed at some point during the shift.
    let v_pred = if left && kind == ShiftKind::Arith && mask & sr::V as u8 != 0 {
        let p = ctx.ra_alloc();
        ctx.buf.emit(arm::asr_imm(p, t, 31 - n));
        ctx.buf.emit(arm::add_imm(p, p, 1));
        Some(p)
    } else {
        None
    };

    if left {
        ctx.buf.emit(arm::lsls_imm(t, t, n));
    } else if kind == ShiftKind::Arith {
        ctx.buf.emit(arm::asrs_imm(t, t, n));
    } else {
        ctx.buf.emit(arm::lsrs_imm(t, t, n));
    }
    shift_flags(ctx, mask, true);
    if let Some(p) = v_pred {
        ctx.buf.emit(arm::cmp_imm(p, 1));
        ctx.buf.emit(arm::orr_cc_imm(Cond::Hi, REG_SR, REG_SR, sr::V));
        ctx.ra_free(p);
    }

    ctx.buf.emit(arm::lsr_imm(t, t, up));
    ctx.buf.emit(arm::bfi(dn, t, 0, size.bits()));
    ctx.ra_free(t);
}

fn shift_by_register(
    ctx: &mut BlockCtx<'_>,
    dn: arm::Reg,
    size: OpSize,
    left: bool,
    kind: ShiftKind,
    count: arm::Reg,
    mask: u8,
) {
    let up = 32 - size.bits();
    let t = ctx.ra_alloc();
    // Count-0 rule: X survives, so only clear it on a real shift.
    if mask & sr::X as u8 != 0 {
        ctx.cc_modify();
        ctx.buf.emit(arm::cmp_imm(count, 0));
        ctx.buf.emit(arm::bic_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::X));
    }
    ctx.buf.emit(arm::lsl_imm(t, dn, up));
    // A zero count must read back C = 0: the compare-negative clears
    // the host carry and the zero-count shift leaves it alone.
    ctx.buf.emit(arm::cmn_imm(count, 0));
    if left {
        ctx.buf.emit(arm::lsls_reg(t, t, count));
    } else if kind == ShiftKind::Arith {
        ctx.buf.emit(arm::asrs_reg(t, t, count));
    } else {
        ctx.buf.emit(arm::lsrs_reg(t, t, count));
    }
    // X only joins for a non-zero count, which the carry choice above
    // already encodes; the separate clear keeps the stale X out.
    shift_flags(ctx, mask & !(sr::X as u8), false);
    if mask & sr::X as u8 != 0 {
        ctx.buf.emit(arm::orr_cc_imm(Cond::Cs, REG_SR, REG_SR, sr::X));
    }
    ctx.buf.emit(arm::lsr_imm(t, t, up));
    ctx.buf.emit(arm::bfi(dn, t, 0, size.bits()));
    ctx.ra_free(t);
}

/// Build the lane-replicated rotate pattern for sub-long sizes.
fn replicate(ctx: &mut BlockCtx<'_>, dst: arm::Reg, src: arm::Reg, size: OpSize) {
    match size {
        OpSize::Byte => {
            ctx.buf.emit(arm::uxtb(dst, src, 0));
            ctx.buf.emit(arm::orr_reg(dst, dst, dst, 8));
            ctx.buf.emit(arm::orr_reg(dst, dst, dst, 16));
        }
        OpSize::Word => {
            ctx.buf.emit(arm::uxth(dst, src, 0));
            ctx.buf.emit(arm::orr_reg(dst, dst, dst, 16));
        }
        OpSize::Long => {
            ctx.buf.emit(arm::mov_reg(dst, src));
        }
    }
}

fn rotate_carry(ctx: &mut BlockCtx<'_>, result: arm::Reg, size: OpSize, left: bool, mask: u8) {
    if mask & sr::C as u8 == 0 {
        return;
    }
    // ROL: the wrapped bit lands at bit 0. ROR: at the sized MSB.
    let bit = if left { 1u32 } else { 1 << (size.bits() - 1) };
    ctx.buf.emit(arm::tst_imm(result, arm::encode_imm12(bit).expect("single bit")));
    ctx.buf.emit(arm::orr_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::C));
}

fn rotate_by_immediate(ctx: &mut BlockCtx<'_>, dn: arm::Reg, size: OpSize, left: bool, n: u8, mask: u8) {
    let t = ctx.ra_alloc();
    replicate(ctx, t, dn, size);
    let amount = if left { (32 - u32::from(n)) & 31 } else { u32::from(n) & 31 };
    if amount != 0 {
        ctx.buf.emit(arm::ror_imm(t, t, amount as u8));
    }
    ctx.buf.emit(arm::bfi(dn, t, 0, size.bits()));
    // N, Z from the result; C from the wrapped bit; V cleared, X alone.
    super::flags_nz(ctx, t, size, mask);
    rotate_carry(ctx, t, size, left, mask);
    ctx.ra_free(t);
}

fn rotate_by_register(ctx: &mut BlockCtx<'_>, dn: arm::Reg, size: OpSize, left: bool, count: arm::Reg, mask: u8) {
    let t = ctx.ra_alloc();
    replicate(ctx, t, dn, size);
    if left {
        let nc = ctx.ra_alloc();
        ctx.buf.emit(arm::rsb_imm(nc, count, 32));
        ctx.buf.emit(arm::and_imm(nc, nc, 31));
        ctx.buf.emit(arm::ror_reg(t, t, nc));
        ctx.ra_free(nc);
    } else {
        ctx.buf.emit(arm::ror_reg(t, t, count));
    }
    ctx.buf.emit(arm::bfi(dn, t, 0, size.bits()));
    super::flags_nz(ctx, t, size, mask);
    if mask & sr::C as u8 != 0 {
        // Count 0 leaves C clear; otherwise the wrapped bit decides.
        ctx.buf.emit(arm::cmp_imm(count, 0));
        let skip = ctx.buf.emit(arm::b_cc(Cond::Eq, 0));
        rotate_carry(ctx, t, size, left, mask);
        let end = ctx.buf.len();
        ctx.buf.patch_branch_to(skip, end);
    }
    ctx.ra_free(t);
}

/// ROXL/ROXR by a translation-time count: a 33-bit rotate through X,
/// expressed as three shifts.
fn rox_by_immediate(ctx: &mut BlockCtx<'_>, dn: arm::Reg, size: OpSize, left: bool, n: u8, mask: u8) {
    let w = u32::from(size.bits());
    let n = u32::from(n) % (w + 1);
    ctx.cc_get();
    let x = ctx.ra_alloc();
    ctx.buf.emit(arm::and_imm(x, REG_SR, sr::X));
    ctx.buf.emit(arm::lsr_imm(x, x, 4));
    let v = ctx.ra_alloc();
    match size {
        OpSize::Byte => ctx.buf.emit(arm::uxtb(v, dn, 0)),
        OpSize::Word => ctx.buf.emit(arm::uxth(v, dn, 0)),
        OpSize::Long => ctx.buf.emit(arm::mov_reg(v, dn)),
    };

    let t = ctx.ra_alloc();
    if n == 0 {
        // Degenerate rotate: the value is unchanged and C = X.
        ctx.buf.emit(arm::mov_reg(t, v));
    } else {
        let (a, xb, b, carry_bit) = if left {
            (n, n - 1, w + 1 - n, w - n)
        } else {
            (w + 1 - n, w - n, n, n - 1)
        };
        // result = v <<rot a | x << xb | v >> b, all within the lane.
        if left {
            ctx.buf.emit(arm::lsl_imm(t, v, a as u8));
        } else {
            ctx.buf.emit(arm::lsr_imm(t, v, b as u8));
        }
        if xb < 32 {
            ctx.buf.emit(arm::orr_reg(t, t, x, xb as u8));
        }
        let other = if left { b } else { a };
        if other < 32 {
            if left {
                let t2 = ctx.ra_alloc();
                ctx.buf.emit(arm::lsr_imm(t2, v, other as u8));
                ctx.buf.emit(arm::orr_reg(t, t, t2, 0));
                ctx.ra_free(t2);
            } else {
                ctx.buf.emit(arm::orr_reg(t, t, v, other as u8));
            }
        }
        // C = X = the operand bit that fell off.
        if mask & (sr::C | sr::X) as u8 != 0 {
            ctx.cc_modify();
            ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, (sr::C | sr::X) & u16::from(mask)));
            ctx.buf.emit(arm::tst_imm(v, arm::encode_imm12(1 << carry_bit).expect("single bit")));
            if mask & sr::C as u8 != 0 {
                ctx.buf.emit(arm::orr_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::C));
            }
            if mask & sr::X as u8 != 0 {
                ctx.buf.emit(arm::orr_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::X));
            }
        }
    }
    ctx.buf.emit(arm::bfi(dn, t, 0, size.bits()));
    super::flags_nz(ctx, t, size, mask & !((sr::C | sr::X) as u8));
    if n == 0 && mask & sr::C as u8 != 0 {
        // C mirrors the unchanged X.
        ctx.cc_modify();
        ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, sr::C));
        ctx.buf.emit(arm::tst_imm(REG_SR, sr::X));
        ctx.buf.emit(arm::orr_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::C));
    }
    ctx.ra_free(t);
    ctx.ra_free(v);
    ctx.ra_free(x);
}

/// ROXL/ROXR by a register count: a short emitted loop stepping the
/// 33-bit rotate once per iteration.
fn rox_by_register(ctx: &mut BlockCtx<'_>, dn: arm::Reg, size: OpSize, left: bool, count: arm::Reg, mask: u8) {
    let w = size.bits();
    ctx.cc_get();
    let x = ctx.ra_alloc();
    ctx.buf.emit(arm::and_imm(x, REG_SR, sr::X));
    ctx.buf.emit(arm::lsr_imm(x, x, 4));
    let v = ctx.ra_alloc();
    match size {
        OpSize::Byte => ctx.buf.emit(arm::uxtb(v, dn, 0)),
        OpSize::Word => ctx.buf.emit(arm::uxth(v, dn, 0)),
        OpSize::Long => ctx.buf.emit(arm::mov_reg(v, dn)),
    };
    let t = ctx.ra_alloc();

    let head = ctx.buf.len();
    ctx.buf.emit(arm::cmp_imm(count, 0));
    let exit = ctx.buf.emit(arm::b_cc(Cond::Eq, 0));
    if left {
        // step: new X = bit w-1; v = (v << 1 | x) masked.
        ctx.buf.emit(arm::lsr_imm(t, v, w - 1));
        ctx.buf.emit(arm::and_imm(t, t, 1));
        ctx.buf.emit(arm::orr_reg(v, x, v, 1));
        if w < 32 {
            ctx.buf.emit(arm::bfc(v, w, 32 - w));
        }
        ctx.buf.emit(arm::mov_reg(x, t));
    } else {
        // step: new X = bit 0; v = (v >> 1) | x << (w-1).
        ctx.buf.emit(arm::and_imm(t, v, 1));
        ctx.buf.emit(arm::lsr_imm(v, v, 1));
        ctx.buf.emit(arm::orr_reg(v, v, x, w - 1));
        ctx.buf.emit(arm::mov_reg(x, t));
    }
    ctx.buf.emit(arm::sub_imm(count, count, 1));
    let back = ctx.buf.emit(arm::b(0));
    ctx.buf.patch_branch_to(back, head);
    let end = ctx.buf.len();
    ctx.buf.patch_branch_to(exit, end);

    ctx.buf.emit(arm::bfi(dn, v, 0, w));
    // C = X (always, even for count 0); N/Z from the result.
    if mask & ((sr::C | sr::X) as u8) != 0 {
        ctx.cc_modify();
        ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, (sr::C | sr::X) & u16::from(mask)));
        ctx.buf.emit(arm::cmp_imm(x, 0));
        if mask & sr::X as u8 != 0 {
            ctx.buf.emit(arm::orr_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::X));
        }
        if mask & sr::C as u8 != 0 {
            ctx.buf.emit(arm::orr_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::C));
        }
    }
    super::flags_nz(ctx, v, size, mask & !((sr::C | sr::X) as u8));
    ctx.ra_free(t);
    ctx.ra_free(v);
    ctx.ra_free(x);
}

/// Memory shifts operate on a word, by one, through the RMW helper.
fn emit_memory_shift(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let left = opcode & 0x0100 != 0;
    let kind = shift_kind(opcode >> 9);
    let ea = (opcode & 0x3f) as u8;

    let addr = ctx.ea_rmw_address(OpSize::Word, ea);
    let mask = ctx.live_flags();
    let val = ctx.ra_alloc();
    ctx.ea_emit_load(OpSize::Word, val, addr, 0);
    match kind {
        ShiftKind::Arith | ShiftKind::Logical => {
            shift_by_immediate(ctx, val, OpSize::Word, left, kind, 1, mask);
        }
        ShiftKind::Rotate => {
            rotate_by_immediate(ctx, val, OpSize::Word, left, 1, mask);
        }
        ShiftKind::RotateX => {
            rox_by_immediate(ctx, val, OpSize::Word, left, 1, mask);
        }
    }
    ctx.ea_emit_store(OpSize::Word, val, addr, 0);
    ctx.ra_free(val);
    ctx.ra_free(addr);
    Flow::Continue
}

/// Bit-field group. Register operands support static and dynamic
/// offset/width; memory operands support the static forms whose field
/// fits the four bytes at the base address.
fn emit_bitfield(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let ext = ctx.next_word();
    let op = ((opcode >> 8) & 7) as u8;
    let ea = (opcode & 0x3f) as u8;
    let dyn_offset = ext & 0x0800 != 0;
    let dyn_width = ext & 0x0020 != 0;
    let other_reg = ((ext >> 12) & 7) as u8;

    if ea >> 3 == 0 {
        return emit_bitfield_dn(ctx, opcode, ext, op, ea & 7, other_reg);
    }
    if dyn_offset || dyn_width {
        return super::emit_unhandled(ctx, opcode);
    }
    let offset = ((ext >> 6) & 31) as u32;
    let width_field = (ext & 31) as u32;
    let width = if width_field == 0 { 32 } else { width_field };
    if (offset & 7) + width > 32 {
        // Field spans a fifth byte: not lowered.
        return super::emit_unhandled(ctx, opcode);
    }

    let base = ctx.ea_lea(ea);
    let mask = ctx.live_flags();
    ctx.add_const(base, base, (offset >> 3) as i32);
    let val = ctx.ra_alloc();
    ctx.buf.emit(arm::ldr_offset(val, base, 0));
    ctx.swap_after_load(4, val);
    let o = offset & 7;

    let writeback = bitfield_apply(ctx, op, val, o, width, mask, other_reg);
    if writeback {
        ctx.swap_before_store(4, val);
        ctx.buf.emit(arm::str_offset(val, base, 0));
    }
    ctx.ra_free(val);
    ctx.ra_free(base);
    Flow::Continue
}

/// Shared field logic over a 32-bit container with a static offset and
/// width. Returns whether the container was modified.
fn bitfield_apply(
    ctx: &mut BlockCtx<'_>,
    op: u8,
    container: arm::Reg,
    offset: u32,
    width: u32,
    mask: u8,
    other_reg: u8,
) -> bool {
    // Left-justify the field: a rotate left by the offset, emitted as a
    // rotate right by its complement.
    let t = ctx.ra_alloc();
    if offset == 0 {
        ctx.buf.emit(arm::mov_reg(t, container));
    } else {
        ctx.buf.emit(arm::ror_imm(t, container, ((32 - offset) & 31) as u8));
    }

    // Field N/Z.
    bitfield_flags(ctx, t, width, mask);

    let m_lj: u32 = if width == 32 { !0 } else { !0 << (32 - width) };
    let m_normal = m_lj.rotate_right(offset);

    let modified = match op {
        0 | 1 | 3 | 5 => false,
        _ => true,
    };

    match op {
        0 => {} // BFTST
        1 | 3 => {
            // BFEXTU/BFEXTS into the register named by the extension.
            let dst = ctx.map_write(GuestReg::d(other_reg));
            if width == 32 {
                ctx.buf.emit(arm::mov_reg(dst, t));
            } else if op == 1 {
                ctx.buf.emit(arm::lsr_imm(dst, t, (32 - width) as u8));
            } else {
                ctx.buf.emit(arm::asr_imm(dst, t, (32 - width) as u8));
            }
            ctx.ra_free(dst);
        }
        5 => {
            // BFFFO: offset plus leading zeros, clamped to the width.
            let dst = ctx.map_write(GuestReg::d(other_reg));
            ctx.buf.emit(arm::clz(dst, t));
            ctx.buf.emit(arm::cmp_imm(dst, arm::encode_imm12(width).expect("width fits")));
            ctx.buf.emit(arm::mov_cc_imm(Cond::Gt, dst, arm::encode_imm12(width).expect("width fits")));
            if offset != 0 {
                ctx.add_const(dst, dst, offset as i32);
            }
            ctx.ra_free(dst);
        }
        2 | 4 | 6 => {
            // BFCHG/BFCLR/BFSET through a constant mask.
            let m = ctx.ra_alloc();
            ctx.buf.load_const(m, m_normal);
            match op {
                2 => ctx.buf.emit(arm::eor_reg(container, container, m, 0)),
                4 => ctx.buf.emit(arm::bic_reg(container, container, m, 0)),
                _ => ctx.buf.emit(arm::orr_reg(container, container, m, 0)),
            };
            ctx.ra_free(m);
        }
        _ => {
            // BFINS: flags come from the inserted value, not the old
            // field — recompute them on the left-justified source.
            let src = ctx.map_read(GuestReg::d(other_reg));
            let ins = ctx.ra_alloc();
            ctx.buf.emit(arm::lsl_imm(ins, src, (32 - width) as u8));
            bitfield_flags(ctx, ins, width, mask);
            let m = ctx.ra_alloc();
            ctx.buf.load_const(m, m_normal);
            ctx.buf.emit(arm::bic_reg(container, container, m, 0));
            if offset == 0 {
                ctx.buf.emit(arm::and_reg(ins, ins, m, 0));
                ctx.buf.emit(arm::orr_reg(container, container, ins, 0));
            } else {
                ctx.buf.emit(arm::ror_imm(ins, ins, offset as u8));
                ctx.buf.emit(arm::and_reg(ins, ins, m, 0));
                ctx.buf.emit(arm::orr_reg(container, container, ins, 0));
            }
            ctx.ra_free(m);
            ctx.ra_free(ins);
            ctx.ra_free(src);
            return true;
        }
    }
    modified
}

/// N from the field's leading bit, Z from the whole field; V and C
/// clear.
fn bitfield_flags(ctx: &mut BlockCtx<'_>, left_justified: arm::Reg, width: u32, mask: u8) {
    let m = u16::from(mask) & (sr::N | sr::Z | sr::V | sr::C);
    if m == 0 {
        return;
    }
    ctx.cc_modify();
    ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, m));
    if m & sr::N != 0 {
        ctx.buf.emit(arm::tst_imm(left_justified, arm::encode_imm12(0x8000_0000).expect("sign bit")));
        ctx.buf.emit(arm::orr_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::N));
    }
    if m & sr::Z != 0 {
        if width == 32 {
            ctx.buf.emit(arm::cmp_imm(left_justified, 0));
        } else {
            let t = ctx.ra_alloc();
            ctx.buf.emit(arm::lsrs_imm(t, left_justified, (32 - width) as u8));
            ctx.ra_free(t);
        }
        ctx.buf.emit(arm::orr_cc_imm(Cond::Eq, REG_SR, REG_SR, sr::Z));
    }
}

/// Register-operand bit-fields, including dynamic offset and width.
fn emit_bitfield_dn(
    ctx: &mut BlockCtx<'_>,
    opcode: u16,
    ext: u16,
    op: u8,
    dn_idx: u8,
    other_reg: u8,
) -> Flow {
    let dyn_offset = ext & 0x0800 != 0;
    let dyn_width = ext & 0x0020 != 0;
    let dn = ctx.map_read(GuestReg::d(dn_idx));
    let mask = ctx.live_flags();

    if !dyn_offset && !dyn_width {
        let offset = ((ext >> 6) & 31) as u32;
        let width_field = (ext & 31) as u32;
        let width = if width_field == 0 { 32 } else { width_field };
        let modified = bitfield_apply(ctx, op, dn, offset, width, mask, other_reg);
        if modified {
            ctx.set_dirty(GuestReg::d(dn_idx));
        }
        ctx.ra_free(dn);
        return Flow::Continue;
    }

    // Dynamic forms: compute the left-justified field with register
    // shifts, then apply through a computed mask.
    let off = if dyn_offset {
        let r = ctx.copy_from(GuestReg::d(((ext >> 6) & 7) as u8));
        ctx.buf.emit(arm::and_imm(r, r, 31));
        r
    } else {
        let r = ctx.ra_alloc();
        ctx.buf.emit(arm::mov_imm(r, ((ext >> 6) & 31) as u16));
        r
    };
    let wid = if dyn_width {
        let r = ctx.copy_from(GuestReg::d((ext & 7) as u8));
        ctx.buf.emit(arm::and_imm(r, r, 31));
        // Width 0 encodes 32.
        ctx.buf.emit(arm::cmp_imm(r, 0));
        ctx.buf.emit(arm::mov_cc_imm(Cond::Eq, r, 32));
        r
    } else {
        let r = ctx.ra_alloc();
        let w = ext & 31;
        ctx.buf.emit(arm::mov_imm(r, if w == 0 { 32 } else { w }));
        r
    };

    // Left-justify: t = dn rotated left by offset (ror by 32-off).
    let t = ctx.ra_alloc();
    let sh = ctx.ra_alloc();
    ctx.buf.emit(arm::rsb_imm(sh, off, 32));
    ctx.buf.emit(arm::and_imm(sh, sh, 31));
    ctx.buf.emit(arm::ror_reg(t, dn, sh));

    // Field mask, left-justified: ~0 << (32 - width).
    let m = ctx.ra_alloc();
    ctx.buf.emit(arm::mvn_imm(m, 0));
    ctx.buf.emit(arm::rsb_imm(sh, wid, 32));
    ctx.buf.emit(arm::lsl_reg(m, m, sh));

    // Flags: N from bit 31 of t, Z from t & m.
    if mask & super::NZVC != 0 {
        ctx.cc_modify();
        ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, u16::from(mask & super::NZVC)));
        if mask & sr::N as u8 != 0 {
            ctx.buf.emit(arm::tst_imm(t, arm::encode_imm12(0x8000_0000).expect("sign bit")));
            ctx.buf.emit(arm::orr_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::N));
        }
        if mask & sr::Z as u8 != 0 {
            let z = ctx.ra_alloc();
            ctx.buf.emit(arm::ands_reg(z, t, m, 0));
            ctx.buf.emit(arm::orr_cc_imm(Cond::Eq, REG_SR, REG_SR, sr::Z));
            ctx.ra_free(z);
        }
    }

    let mut modified = false;
    match op {
        0 => {}
        1 | 3 => {
            let dst = ctx.map_write(GuestReg::d(other_reg));
            ctx.buf.emit(arm::and_reg(dst, t, m, 0));
            ctx.buf.emit(arm::rsb_imm(sh, wid, 32));
            if op == 1 {
                ctx.buf.emit(arm::lsr_reg(dst, dst, sh));
            } else {
                ctx.buf.emit(arm::asr_reg(dst, dst, sh));
            }
            ctx.ra_free(dst);
        }
        5 => {
            let dst = ctx.map_write(GuestReg::d(other_reg));
            let z = ctx.ra_alloc();
            ctx.buf.emit(arm::and_reg(z, t, m, 0));
            ctx.buf.emit(arm::clz(dst, z));
            ctx.buf.emit(arm::cmp_reg(dst, wid));
            ctx.buf.emit(arm::mov_cc_reg(Cond::Gt, dst, wid));
            ctx.buf.emit(arm::add_reg(dst, dst, off, 0));
            ctx.ra_free(z);
            ctx.ra_free(dst);
        }
        2 | 4 | 6 => {
            // Rotate the mask into place and apply.
            let mn = ctx.ra_alloc();
            ctx.buf.emit(arm::ror_reg(mn, m, off));
            match op {
                2 => ctx.buf.emit(arm::eor_reg(dn, dn, mn, 0)),
                4 => ctx.buf.emit(arm::bic_reg(dn, dn, mn, 0)),
                _ => ctx.buf.emit(arm::orr_reg(dn, dn, mn, 0)),
            };
            ctx.ra_free(mn);
            modified = true;
        }
        _ => {
            // BFINS.
            let src = ctx.map_read(GuestReg::d(other_reg));
            let ins = ctx.ra_alloc();
            ctx.buf.emit(arm::rsb_imm(sh, wid, 32));
            ctx.buf.emit(arm::lsl_reg(ins, src, sh));
            ctx.buf.emit(arm::and_reg(ins, ins, m, 0));
            // Flags reflect the inserted value.
            if mask & (sr::N | sr::Z) as u8 != 0 {
                ctx.cc_modify();
                ctx.buf.emit(arm::bic_imm(REG_SR, REG_SR, u16::from(mask) & (sr::N | sr::Z)));
                if mask & sr::N as u8 != 0 {
                    ctx.buf.emit(arm::tst_imm(ins, arm::encode_imm12(0x8000_0000).expect("sign bit")));
                    ctx.buf.emit(arm::orr_cc_imm(Cond::Ne, REG_SR, REG_SR, sr::N));
                }
                if mask & sr::Z as u8 != 0 {
                    ctx.buf.emit(arm::cmp_imm(ins, 0));
                    ctx.buf.emit(arm::orr_cc_imm(Cond::Eq, REG_SR, REG_SR, sr::Z));
                }
            }
            let mn = ctx.ra_alloc();
            ctx.buf.emit(arm::ror_reg(mn, m, off));
            ctx.buf.emit(arm::bic_reg(dn, dn, mn, 0));
            ctx.buf.emit(arm::ror_reg(ins, ins, off));
            ctx.buf.emit(arm::orr_reg(dn, dn, ins, 0));
            ctx.ra_free(mn);
            ctx.ra_free(ins);
            ctx.ra_free(src);
            modified = true;
        }
    }

    if modified {
        ctx.set_dirty(GuestReg::d(dn_idx));
    }
    ctx.ra_free(sh);
    ctx.ra_free(m);
    ctx.ra_free(t);
    ctx.ra_free(wid);
    ctx.ra_free(off);
    ctx.ra_free(dn);
    Flow::Continue
}
