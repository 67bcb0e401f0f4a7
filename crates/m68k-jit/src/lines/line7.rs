//! Line 7: MOVEQ.

use m68k_state::sr;

use super::flags_static;
use crate::ctx::{BlockCtx, Flow};
use crate::regalloc::GuestReg;

/// Lower MOVEQ.
pub fn emit(ctx: &mut BlockCtx<'_>, opcode: u16) -> Flow {
    let value = i32::from(opcode as i8);
    let dn = ctx.map_write(GuestReg::d(((opcode >> 9) & 7) as u8));
    ctx.buf.load_const(dn, value as u32);
    ctx.ra_free(dn);

    // The moved value is a translation-time constant, so the flags are
    // too.
    let mask = ctx.live_flags() & super::NZVC;
    let mut values = 0u8;
    if value == 0 {
        values |= sr::Z as u8;
    }
    if value < 0 {
        values |= sr::N as u8;
    }
    flags_static(ctx, mask, values);
    Flow::Continue
}
