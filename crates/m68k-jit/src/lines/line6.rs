//! Line 6: BRA, BSR and Bcc with 8-, 16- and 32-bit displacements.

use arm_asm as arm;
use m68k_state::Condition;

use super::set_pc_cc;
use crate::cond::{emit_test, CondTest};
use crate::ctx::{BlockCtx, Flow, REG_PC};
use crate::regalloc::GuestReg;

/// Lower one branch instruction.
pub fn emit(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let disp = match opcode & 0xff {
        0x00 => i32::from(ctx.next_word() as i16),
        0xff => ctx.next_long() as i32,
        d => i32::from(d as i8),
    };
    let len = ctx.pc.wrapping_sub(ctx.insn_start) as i32;

    match (opcode >> 8) & 0xf {
        0x0 => {
            // BRA.
            ctx.pc_flush();
            ctx.add_const(REG_PC, REG_PC, 2 + disp);
            ctx.pc_reset();
            Flow::Exit
        }
        0x1 => {
            // BSR: push the fall-through address, then branch.
            ctx.pc_flush();
            let ret = ctx.pc;
            let a7 = ctx.map_read(GuestReg::a(7));
            let t = ctx.ra_alloc();
            ctx.buf.load_const(t, ret);
            ctx.swap_before_store(4, t);
            ctx.buf.emit(arm::str_offset_preindex(t, a7, -4));
            ctx.set_dirty(GuestReg::a(7));
            ctx.ra_free(t);
            ctx.ra_free(a7);
            ctx.add_const(REG_PC, REG_PC, 2 + disp);
            ctx.pc_reset();
            Flow::Exit
        }
        bits => {
            let cond = Condition::from_bits(bits as u8);
            ctx.pc_flush();
            match emit_test(ctx, cond) {
                CondTest::Always | CondTest::Never => {
                    // T and F encode BRA/BSR above; unreachable, but keep
                    // the conservative lowering.
                    ctx.add_const(REG_PC, REG_PC, 2 + disp);
                    ctx.pc_reset();
                    Flow::Exit
                }
                CondTest::Test(host) => {
                    // Taken: branch target, fall into the exit epilogue.
                    // Not taken: fall-through address, continue the block.
                    set_pc_cc(ctx, host, 2 + disp);
                    set_pc_cc(ctx, host.negated(), len);
                    let fix = ctx.buf.emit(arm::b_cc(host.negated(), 0));
                    let end = ctx.buf.len();
                    ctx.buf.patch_branch_to(fix, end);
                    Flow::CondExit(vec![fix])
                }
            }
        }
    }
}
