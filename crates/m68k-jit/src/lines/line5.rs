//! Line 5: ADDQ/SUBQ, Scc, DBcc and TRAPcc.

use arm_asm as arm;
use arm_asm::Cond;
use m68k_state::{vectors, Condition};

use super::{flags_from_host, set_pc_cc};
use crate::cond::{emit_test, CondTest};
use crate::ctx::{BlockCtx, Flow, REG_PC};
use crate::ea::OpSize;
use crate::regalloc::GuestReg;

/// Lower one line-5 instruction.
pub fn emit(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    if opcode & 0x00c0 == 0x00c0 {
        let cond = Condition::from_bits((opcode >> 8) as u8);
        return match opcode & 0x0038 {
            0x0008 => emit_dbcc(ctx, opcode, cond),
            0x0038 => emit_trapcc(ctx, opcode, cond),
            _ => emit_scc(ctx, opcode, cond),
        };
    }
    emit_addq_subq(ctx, opcode)
}

fn quick_data(opcode: u16) -> u32 {
    let d = (opcode >> 9) & 7;
    if d == 0 { 8 } else { u32::from(d) }
}

fn emit_addq_subq(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let Some(size) = OpSize::from_bits((opcode >> 6) as u8) else {
        return super::emit_unhandled(ctx, opcode);
    };
    let ea = (opcode & 0x3f) as u8;
    let data = quick_data(opcode);
    let subtract = opcode & 0x0100 != 0;

    if ea >> 3 == 1 {
        // Address destination: the whole register, no flags, even .W.
        let an = ctx.map_read(GuestReg::a(ea & 7));
        let delta = if subtract { -(data as i32) } else { data as i32 };
        ctx.add_const(an, an, delta);
        ctx.set_dirty(GuestReg::a(ea & 7));
        ctx.ra_free(an);
        return Flow::Continue;
    }

    let apply = |ctx: &mut BlockCtx<'_>, reg: arm::Reg, mask: u8| {
        match size {
            OpSize::Long => {
                let e = arm::encode_imm12(data).expect("1..8 is encodable");
                if subtract {
                    ctx.buf.emit(arm::subs_imm(reg, reg, e));
                } else {
                    ctx.buf.emit(arm::adds_imm(reg, reg, e));
                }
                flags_from_host(ctx, mask, subtract);
            }
            _ => {
                let up = 32 - size.bits();
                let t = ctx.ra_alloc();
                ctx.buf.emit(arm::lsl_imm(t, reg, up));
                let e = arm::encode_imm12(data << up).expect("shifted quick data encodes");
                if subtract {
                    ctx.buf.emit(arm::subs_imm(t, t, e));
                } else {
                    ctx.buf.emit(arm::adds_imm(t, t, e));
                }
                flags_from_host(ctx, mask, subtract);
                ctx.buf.emit(arm::lsr_imm(t, t, up));
                ctx.buf.emit(arm::bfi(reg, t, 0, size.bits()));
                ctx.ra_free(t);
            }
        };
    };

    if ea >> 3 == 0 {
        let dn = ctx.map_read(GuestReg::d(ea & 7));
        let mask = ctx.live_flags();
        apply(ctx, dn, mask);
        ctx.set_dirty(GuestReg::d(ea & 7));
        ctx.ra_free(dn);
    } else {
        let addr = ctx.ea_rmw_address(size, ea);
        let mask = ctx.live_flags();
        let val = ctx.ra_alloc();
        ctx.ea_emit_load(size, val, addr, 0);
        apply(ctx, val, mask);
        ctx.ea_emit_store(size, val, addr, 0);
        ctx.ra_free(val);
        ctx.ra_free(addr);
    }
    Flow::Continue
}

/// Scc: set the destination byte to all-ones when the condition holds,
/// zero otherwise.
fn emit_scc(ctx: &mut BlockCtx<'_>, opcode: u16, cond: Condition) -> Flow {
    let ea = (opcode & 0x3f) as u8;
    if ea >> 3 == 0 {
        match emit_test(ctx, cond) {
            CondTest::Always => {
                ctx.ea_store_dn_byte_cc(Cond::Al, (ea & 7) as u8, true);
            }
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
    match emit_test(ctx, cond) {
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

/// DBcc: if the condition holds the loop terminates without touching
/// the counter. Otherwise the low word of Dn decrements; wrapping from
/// 0 to -1 terminates, anything else loops back to the target.
fn emit_dbcc(ctx: &mut BlockCtx<'_>, opcode: u16, cond: Condition) -> Flow {
    let counter = (opcode & 7) as u8;
    let disp = i32::from(ctx.next_word() as i16);

    // DBT never decrements and never branches.
    if cond == Condition::T {
        return Flow::Continue;
    }

    ctx.pc_flush(); // REG_PC now holds the DBcc's own address
    let mut fixups = Vec::new();

    if cond != Condition::F {
        let CondTest::Test(host) = emit_test(ctx, cond) else {
            unreachable!("T and F handled above")
        };
        // Condition satisfied: step past the instruction and leave the
        // loop, continuing the block at the fall-through.
        ctx.buf.emit(arm::add_cc_imm(host, REG_PC, REG_PC, 4));
        let b = ctx.buf.emit(arm::b_cc(host, 0));
        fixups.push(b);
    }

    // Decrement the low word, watching for the 0 → -1 wrap.
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

    // Counter expired: exit the loop at the fall-through.
    ctx.buf.emit(arm::add_cc_imm(Cond::Eq, REG_PC, REG_PC, 4));
    let b = ctx.buf.emit(arm::b_cc(Cond::Eq, 0));
    fixups.push(b);

    // Loop taken: the target is relative to the displacement word.
    set_pc_cc(ctx, Cond::Al, 2 + disp);

    let end = ctx.buf.len();
    for &f in &fixups {
        ctx.buf.patch_branch_to(f, end);
    }
    Flow::CondExit(fixups)
}

/// TRAPcc (and TRAPcc.W/.L with their ignored operand words).
fn emit_trapcc(ctx: &mut BlockCtx<'_>, opcode: u16, cond: Condition) -> Flow {
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
    match emit_test(ctx, cond) {
        CondTest::Never => Flow::Continue,
        CondTest::Always => {
            ctx.pc_flush();
            ctx.sync_guest_state();
            ctx.emit_raise_exception(vectors::TRAPCC, bias);
            ctx.ra_invalidate_all();
            ctx.cc_discard();
            Flow::Exit
        }
        CondTest::Test(host) => {
            ctx.pc_flush();
            ctx.sync_guest_state();
            let skip = ctx.buf.emit(arm::b_cc(host.negated(), 0));
            ctx.emit_raise_exception(vectors::TRAPCC, bias);
            let end = ctx.buf.len();
            ctx.buf.patch_branch_to(skip, end);
            Flow::Continue
        }
    }
}
