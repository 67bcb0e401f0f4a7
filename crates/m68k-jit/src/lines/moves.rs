//! Lines 1, 2 and 3: MOVE and MOVEA in all EA combinations.

use arm_asm as arm;

use super::flags_nz;
use crate::ctx::{BlockCtx, Flow};
use crate::ea::OpSize;
use crate::regalloc::GuestReg;

/// Lower one MOVE or MOVEA instruction.
pub fn emit(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let size = match opcode >> 12 {
        1 => OpSize::Byte,
        3 => OpSize::Word,
        _ => OpSize::Long,
    };
    let src_ea = (opcode & 0x3f) as u8;
    let dst_mode = ((opcode >> 6) & 7) as u8;
    let dst_reg = ((opcode >> 9) & 7) as u8;
    let dst_ea = (dst_mode << 3) | dst_reg;

    if dst_mode == 1 {
        // MOVEA: word sources sign-extend, no flags.
        let val = ctx.ea_load(size, src_ea, false);
        if size == OpSize::Word {
            ctx.buf.emit(arm::sxth(val, val, 0));
        }
        let an = ctx.map_write(GuestReg::a(dst_reg));
        ctx.buf.emit(arm::mov_reg(an, val));
        ctx.ra_free(an);
        ctx.ra_free(val);
        return Flow::Continue;
    }

    // A long register-to-register move is a plain host move between the
    // two mappings; everything else goes through the EA helpers.
    let val = ctx.ea_load(size, src_ea, true);
    let mask = ctx.live_flags();
    flags_nz(ctx, val, size, mask);
    ctx.ea_store(size, dst_ea, val);
    ctx.ra_free(val);
    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::{JitConfig, REG_CTX};
    use m68k_state::FlatMemory;

    fn lower(bytes: &[u8]) -> (BlockCtx<'_>, Flow) {
        // The memory leaks into the context lifetime; tests keep it
        // alive by leaking a boxed copy.
        let mut mem = FlatMemory::new(0x1000);
        mem.load(0x100, bytes);
        let mem = Box::leak(Box::new(mem));
        let mut ctx = BlockCtx::new(JitConfig::default(), mem, 0x100);
        ctx.insn_start = 0x100;
        let opcode = ctx.next_word();
        let flow = emit(&mut ctx, opcode);
        (ctx, flow)
    }

    #[test]
    fn move_long_dn_to_dn() {
        // MOVE.L D1,D0 = 0x2001
        let (ctx, flow) = lower(&[0x20, 0x01]);
        assert_eq!(flow, Flow::Continue);
        let words = ctx.buf.words();
        // Load D1, set N/Z (cmp + bic + 2 conditional orrs), move to D0.
        assert_eq!(words[0], arm::ldr_offset(arm::Reg(0), REG_CTX, 4));
        assert!(words.iter().any(|&w| w & 0x0fff_fff0 == 0x01a0_0000), "register move expected");
    }

    #[test]
    fn movea_word_sign_extends_without_flags() {
        // MOVEA.W D2,A3 = 0x3642
        let (ctx, _) = lower(&[0x36, 0x42]);
        let words = ctx.buf.words();
        // No SR access at all: MOVEA never touches flags.
        let sr_off = core::mem::offset_of!(m68k_state::GuestState, sr) as i16;
        let sr_load = arm::ldrh_offset(crate::ctx::REG_SR, REG_CTX, sr_off);
        assert!(words.iter().all(|&w| w != sr_load));
        assert!(words.iter().any(|&w| w & 0x0ff0_0ff0 == 0x06b0_0070), "sxth expected");
    }

    #[test]
    fn move_byte_to_memory_stores_byte() {
        // MOVE.B D0,(A1) = 0x1280
        let (ctx, _) = lower(&[0x12, 0x80]);
        let words = ctx.buf.words();
        assert!(
            words.iter().any(|&w| w & 0x0fd0_0000 == 0x05c0_0000),
            "byte store expected in {words:x?}"
        );
    }
}
