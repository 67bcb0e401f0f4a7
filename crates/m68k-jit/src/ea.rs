//! Effective-address compilation.
//!
//! The 6-bit EA field (3-bit mode, 3-bit register) plus any brief or full
//! extension words is compiled into host code yielding either the operand
//! value or the effective address in a host register.
//!
//! Conventions:
//! - Memory loads of byte/word operands zero-extend; callers that need
//!   sign semantics extend explicitly.
//! - `(An)+` / `-(An)` adjust the address register as a side effect of
//!   value loads and stores; address-only queries ([`BlockCtx::ea_lea`])
//!   leave the adjustment to the caller.
//! - Byte quantum on A7 is 2 to keep the stack word-aligned.
//! - PC-relative modes compute their base from the address of the
//!   extension word (one word past the opcode), via the batched PC offset.

use arm_asm as arm;
use arm_asm::{Cond, Reg};

use crate::ctx::{BlockCtx, REG_CTX, REG_PC};
use crate::regalloc::GuestReg;
use m68k_state::GuestState;

/// Operand size of a guest memory or register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpSize {
    /// 8-bit.
    Byte,
    /// 16-bit.
    Word,
    /// 32-bit.
    Long,
}

impl OpSize {
    /// Decode the common 2-bit size field (00=B, 01=W, 10=L).
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits & 3 {
            0 => Some(Self::Byte),
            1 => Some(Self::Word),
            2 => Some(Self::Long),
            _ => None,
        }
    }

    /// Access width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u8 {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Long => 4,
        }
    }

    /// Bits in the operand.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.bytes() * 8
    }
}

/// Base register of an indexed EA computation.
enum IndexBase {
    /// `(d8,An,Xn)` / full-format with An base.
    Addr(u8),
    /// `(d8,PC,Xn)` / full-format with PC base.
    Pc,
}

impl BlockCtx<'_> {
    /// `rd = rn + value` for an arbitrary 32-bit constant.
    pub fn add_const(&mut self, rd: Reg, rn: Reg, value: i32) {
        if value == 0 {
            if rd != rn {
                self.buf.emit(arm::mov_reg(rd, rn));
            }
        } else if let Some(imm) = arm::encode_imm12(value.unsigned_abs()) {
            if value > 0 {
                self.buf.emit(arm::add_imm(rd, rn, imm));
            } else {
                self.buf.emit(arm::sub_imm(rd, rn, imm));
            }
        } else {
            let tmp = self.ra_alloc();
            self.buf.load_const(tmp, value as u32);
            self.buf.emit(arm::add_reg(rd, rn, tmp, 0));
            self.ra_free(tmp);
        }
    }

    /// Auto-increment step for the mode: byte on A7 moves by 2.
    fn ea_step(size: OpSize, reg: u8) -> i16 {
        if size == OpSize::Byte && reg == 7 {
            2
        } else {
            i16::from(size.bytes())
        }
    }

    /// Fetch the index register named by a brief/full extension word:
    /// `Xn.W` is sign-extended, `Xn.L` taken whole. Returns a scratch.
    fn ea_index(&mut self, brief: u16) -> Reg {
        let n = ((brief >> 12) & 7) as u8;
        let guest = if brief & 0x8000 != 0 { GuestReg::a(n) } else { GuestReg::d(n) };
        let idx = self.copy_from(guest);
        if brief & (1 << 11) == 0 {
            self.buf.emit(arm::sxth(idx, idx, 0));
        }
        idx
    }

    /// Emit a value load of `size` from the address in `base` with a
    /// shifted register offset, honouring the halfword limitation.
    fn ea_load_indexed(&mut self, size: OpSize, dst: Reg, base: Reg, idx: Reg, scale: u8) {
        match size {
            OpSize::Long => {
                self.buf.emit(arm::ldr_regoffset(dst, base, idx, scale));
            }
            OpSize::Word => {
                // Halfword transfers have no shifted-index form.
                if scale != 0 {
                    self.buf.emit(arm::lsl_imm(idx, idx, scale));
                }
                self.buf.emit(arm::ldrh_regoffset(dst, base, idx));
            }
            OpSize::Byte => {
                self.buf.emit(arm::ldrb_regoffset(dst, base, idx, scale));
            }
        }
        self.swap_after_load(size.bytes(), dst);
    }

    /// Compute a mode-6-style indexed EA (brief or full format) into a
    /// fresh scratch register. Shared by An-based and PC-based modes.
    fn ea_indexed_address(&mut self, base: IndexBase) -> Reg {
        // A PC base is the address of the extension word itself, so it
        // must be captured before that word is consumed.
        let pc_rel = match base {
            IndexBase::Pc => Some(self.ea_pc_rel_offset()),
            IndexBase::Addr(_) => None,
        };
        let brief = self.next_word();
        let scale = ((brief >> 9) & 3) as u8;
        let dst = self.ra_alloc();

        let base_reg = |ctx: &mut Self, into: Reg| match base {
            IndexBase::Addr(n) => {
                let an = ctx.map_read(GuestReg::a(n));
                ctx.buf.emit(arm::mov_reg(into, an));
                ctx.ra_free(an);
            }
            IndexBase::Pc => {
                let rel = pc_rel.expect("captured before the extension word");
                ctx.add_const(into, REG_PC, rel);
            }
        };

        if brief & 0x0100 == 0 {
            // Brief format: d8 + base + scaled index.
            let d8 = (brief & 0xff) as i8;
            base_reg(self, dst);
            self.add_const(dst, dst, i32::from(d8));
            let idx = self.ea_index(brief);
            self.buf.emit(arm::add_reg(dst, dst, idx, scale));
            self.ra_free(idx);
            return dst;
        }

        // Full format.
        let base_suppressed = brief & 0x0080 != 0;
        let index_suppressed = brief & 0x0040 != 0;
        let bd = match (brief >> 4) & 3 {
            2 => i32::from(self.next_word() as i16),
            3 => self.next_long() as i32,
            _ => 0,
        };
        let iis = (brief & 7) as u8;

        // Inner address: base + bd.
        if base_suppressed {
            self.buf.load_const(dst, bd as u32);
        } else {
            base_reg(self, dst);
            self.add_const(dst, dst, bd);
        }

        let index = if index_suppressed { None } else { Some(self.ea_index(brief)) };

        match iis {
            0 => {
                // No memory indirection.
                if let Some(idx) = index {
                    self.buf.emit(arm::add_reg(dst, dst, idx, scale));
                    self.ra_free(idx);
                }
            }
            1..=3 => {
                // Preindexed: index participates in the inner fetch.
                if let Some(idx) = index {
                    self.buf.emit(arm::add_reg(dst, dst, idx, scale));
                    self.ra_free(idx);
                }
                let od = self.ea_outer_displacement(iis);
                self.buf.emit(arm::ldr_offset(dst, dst, 0));
                self.swap_after_load(4, dst);
                self.add_const(dst, dst, od);
            }
            _ => {
                // Postindexed: indirection first, index added after.
                let od = self.ea_outer_displacement(iis);
                self.buf.emit(arm::ldr_offset(dst, dst, 0));
                self.swap_after_load(4, dst);
                if let Some(idx) = index {
                    self.buf.emit(arm::add_reg(dst, dst, idx, scale));
                    self.ra_free(idx);
                }
                self.add_const(dst, dst, od);
            }
        }
        dst
    }

    fn ea_outer_displacement(&mut self, iis: u8) -> i32 {
        match iis & 3 {
            2 => i32::from(self.next_word() as i16),
            3 => self.next_long() as i32,
            _ => 0,
        }
    }

    /// Offset of the next unconsumed word relative to the batched guest
    /// PC register (which tracks the start of the current instruction).
    fn ea_pc_rel_offset(&mut self) -> i32 {
        let delta = self.pc.wrapping_sub(self.insn_start) as i32;
        self.pc_get_offset(delta)
    }

    /// Compile an EA into the operand *value*.
    ///
    /// `read_only` operands mapped from guest registers come back as the
    /// live mapping; otherwise a scratch copy is returned.
    pub fn ea_load(&mut self, size: OpSize, ea: u8, read_only: bool) -> Reg {
        let mode = (ea >> 3) & 7;
        let reg = ea & 7;
        match mode {
            0 => {
                if read_only {
                    self.map_read(GuestReg::d(reg))
                } else {
                    self.copy_from(GuestReg::d(reg))
                }
            }
            1 => {
                if read_only {
                    self.map_read(GuestReg::a(reg))
                } else {
                    self.copy_from(GuestReg::a(reg))
                }
            }
            2 => {
                let an = self.map_read(GuestReg::a(reg));
                let dst = self.ra_alloc();
                self.ea_emit_load(size, dst, an, 0);
                self.ra_free(an);
                dst
            }
            3 => {
                let an = self.map_read(GuestReg::a(reg));
                self.set_dirty(GuestReg::a(reg));
                let dst = self.ra_alloc();
                let step = Self::ea_step(size, reg);
                match size {
                    OpSize::Long => self.buf.emit(arm::ldr_offset_postindex(dst, an, step)),
                    OpSize::Word => self.buf.emit(arm::ldrh_offset_postindex(dst, an, step)),
                    OpSize::Byte => self.buf.emit(arm::ldrb_offset_postindex(dst, an, step)),
                };
                self.swap_after_load(size.bytes(), dst);
                self.ra_free(an);
                dst
            }
            4 => {
                let an = self.map_read(GuestReg::a(reg));
                self.set_dirty(GuestReg::a(reg));
                let dst = self.ra_alloc();
                let step = Self::ea_step(size, reg);
                match size {
                    OpSize::Long => self.buf.emit(arm::ldr_offset_preindex(dst, an, -step)),
                    OpSize::Word => self.buf.emit(arm::ldrh_offset_preindex(dst, an, -step)),
                    OpSize::Byte => self.buf.emit(arm::ldrb_offset_preindex(dst, an, -step)),
                };
                self.swap_after_load(size.bytes(), dst);
                self.ra_free(an);
                dst
            }
            5 => {
                let d16 = self.next_word() as i16;
                let an = self.map_read(GuestReg::a(reg));
                let dst = self.ra_alloc();
                if Self::offset_fits(size, d16) {
                    self.ea_emit_load(size, dst, an, d16);
                } else {
                    let off = self.ra_alloc();
                    self.buf.load_const(off, d16 as i32 as u32);
                    self.ea_load_indexed(size, dst, an, off, 0);
                    self.ra_free(off);
                }
                self.ra_free(an);
                dst
            }
            6 => {
                let addr = self.ea_indexed_address(IndexBase::Addr(reg));
                self.ea_emit_load(size, addr, addr, 0);
                addr
            }
            _ => match reg {
                0 => {
                    let addr = i32::from(self.next_word() as i16) as u32;
                    let dst = self.ra_alloc();
                    self.buf.load_const(dst, addr);
                    self.ea_emit_load(size, dst, dst, 0);
                    dst
                }
                1 => {
                    let addr = self.next_long();
                    let dst = self.ra_alloc();
                    self.buf.load_const(dst, addr);
                    self.ea_emit_load(size, dst, dst, 0);
                    dst
                }
                2 => {
                    let rel = self.ea_pc_rel_offset();
                    let d16 = i32::from(self.next_word() as i16);
                    let dst = self.ra_alloc();
                    let total = rel + d16;
                    if Self::offset_fits_i32(size, total) {
                        self.ea_emit_load(size, dst, REG_PC, total as i16);
                    } else {
                        self.add_const(dst, REG_PC, total);
                        self.ea_emit_load(size, dst, dst, 0);
                    }
                    dst
                }
                3 => {
                    let addr = self.ea_indexed_address(IndexBase::Pc);
                    self.ea_emit_load(size, addr, addr, 0);
                    addr
                }
                4 => {
                    let value = match size {
                        OpSize::Byte => u32::from(self.next_word() & 0xff),
                        OpSize::Word => u32::from(self.next_word()),
                        OpSize::Long => self.next_long(),
                    };
                    let dst = self.ra_alloc();
                    self.buf.load_const(dst, value);
                    dst
                }
                _ => {
                    // Reserved submode: trap at run time, keep translating.
                    let dst = self.ra_alloc();
                    self.buf.emit(arm::udf(0x00ea));
                    dst
                }
            },
        }
    }

    /// Compile an EA into the effective *address*.
    ///
    /// Register-direct modes return the host address of the backing
    /// `GuestState` cell. Auto-increment modes return the current An and
    /// leave the adjustment to the caller.
    pub fn ea_lea(&mut self, ea: u8) -> Reg {
        let mode = (ea >> 3) & 7;
        let reg = ea & 7;
        match mode {
            0 => {
                let dst = self.ra_alloc();
                self.buf.emit(arm::add_imm(
                    dst,
                    REG_CTX,
                    arm::encode_imm12(GuestReg::d(reg).offset() as u32).unwrap_or(0),
                ));
                dst
            }
            1 => {
                let dst = self.ra_alloc();
                self.buf.emit(arm::add_imm(
                    dst,
                    REG_CTX,
                    arm::encode_imm12(GuestReg::a(reg).offset() as u32).unwrap_or(0),
                ));
                dst
            }
            2..=4 => {
                let an = self.map_read(GuestReg::a(reg));
                let dst = self.ra_alloc();
                self.buf.emit(arm::mov_reg(dst, an));
                self.ra_free(an);
                dst
            }
            5 => {
                let d16 = i32::from(self.next_word() as i16);
                let an = self.map_read(GuestReg::a(reg));
                let dst = self.ra_alloc();
                self.add_const(dst, an, d16);
                self.ra_free(an);
                dst
            }
            6 => self.ea_indexed_address(IndexBase::Addr(reg)),
            _ => match reg {
                0 => {
                    let addr = i32::from(self.next_word() as i16) as u32;
                    let dst = self.ra_alloc();
                    self.buf.load_const(dst, addr);
                    dst
                }
                1 => {
                    let addr = self.next_long();
                    let dst = self.ra_alloc();
                    self.buf.load_const(dst, addr);
                    dst
                }
                2 => {
                    let rel = self.ea_pc_rel_offset();
                    let d16 = i32::from(self.next_word() as i16);
                    let dst = self.ra_alloc();
                    self.add_const(dst, REG_PC, rel + d16);
                    dst
                }
                3 => self.ea_indexed_address(IndexBase::Pc),
                _ => {
                    let dst = self.ra_alloc();
                    self.buf.emit(arm::udf(0x00ea));
                    dst
                }
            },
        }
    }

    /// Compile a store of `value` into the EA. Mirrors [`Self::ea_load`];
    /// byte and word stores into data registers insert into the low bits,
    /// preserving the rest.
    pub fn ea_store(&mut self, size: OpSize, ea: u8, value: Reg) {
        let mode = (ea >> 3) & 7;
        let reg = ea & 7;
        match mode {
            0 => match size {
                OpSize::Long => {
                    let dn = self.map_write(GuestReg::d(reg));
                    self.buf.emit(arm::mov_reg(dn, value));
                    self.ra_free(dn);
                }
                OpSize::Word => {
                    let dn = self.map_read(GuestReg::d(reg));
                    self.buf.emit(arm::bfi(dn, value, 0, 16));
                    self.set_dirty(GuestReg::d(reg));
                    self.ra_free(dn);
                }
                OpSize::Byte => {
                    let dn = self.map_read(GuestReg::d(reg));
                    self.buf.emit(arm::bfi(dn, value, 0, 8));
                    self.set_dirty(GuestReg::d(reg));
                    self.ra_free(dn);
                }
            },
            1 => {
                // Address registers always take the full long.
                let an = self.map_write(GuestReg::a(reg));
                self.buf.emit(arm::mov_reg(an, value));
                self.ra_free(an);
            }
            2 => {
                let an = self.map_read(GuestReg::a(reg));
                self.ea_emit_store(size, value, an, 0);
                self.ra_free(an);
            }
            3 => {
                let an = self.map_read(GuestReg::a(reg));
                self.set_dirty(GuestReg::a(reg));
                let step = Self::ea_step(size, reg);
                self.swap_before_store(size.bytes(), value);
                match size {
                    OpSize::Long => self.buf.emit(arm::str_offset_postindex(value, an, step)),
                    OpSize::Word => self.buf.emit(arm::strh_offset_postindex(value, an, step)),
                    OpSize::Byte => self.buf.emit(arm::strb_offset_postindex(value, an, step)),
                };
                self.swap_after_load(size.bytes(), value);
                self.ra_free(an);
            }
            4 => {
                let an = self.map_read(GuestReg::a(reg));
                self.set_dirty(GuestReg::a(reg));
                let step = Self::ea_step(size, reg);
                self.swap_before_store(size.bytes(), value);
                match size {
                    OpSize::Long => self.buf.emit(arm::str_offset_preindex(value, an, -step)),
                    OpSize::Word => self.buf.emit(arm::strh_offset_preindex(value, an, -step)),
                    OpSize::Byte => self.buf.emit(arm::strb_offset_preindex(value, an, -step)),
                };
                self.swap_after_load(size.bytes(), value);
                self.ra_free(an);
            }
            5 => {
                let d16 = self.next_word() as i16;
                let an = self.map_read(GuestReg::a(reg));
                if Self::offset_fits(size, d16) {
                    self.ea_emit_store(size, value, an, d16);
                } else {
                    let addr = self.ra_alloc();
                    self.add_const(addr, an, i32::from(d16));
                    self.ea_emit_store(size, value, addr, 0);
                    self.ra_free(addr);
                }
                self.ra_free(an);
            }
            6 => {
                let addr = self.ea_indexed_address(IndexBase::Addr(reg));
                self.ea_emit_store(size, value, addr, 0);
                self.ra_free(addr);
            }
            _ => match reg {
                0 => {
                    let target = i32::from(self.next_word() as i16) as u32;
                    let addr = self.ra_alloc();
                    self.buf.load_const(addr, target);
                    self.ea_emit_store(size, value, addr, 0);
                    self.ra_free(addr);
                }
                1 => {
                    let target = self.next_long();
                    let addr = self.ra_alloc();
                    self.buf.load_const(addr, target);
                    self.ea_emit_store(size, value, addr, 0);
                    self.ra_free(addr);
                }
                _ => {
                    // PC-relative and immediate destinations are illegal.
                    self.buf.emit(arm::udf(0x00eb));
                }
            },
        }
    }

    /// Effective address for a read-modify-write memory operand. The
    /// auto-increment/decrement side effect is applied exactly once,
    /// here; the caller then loads and stores through the returned
    /// scratch register.
    pub fn ea_rmw_address(&mut self, size: OpSize, ea: u8) -> Reg {
        let mode = (ea >> 3) & 7;
        let reg = ea & 7;
        match mode {
            2 => {
                let an = self.map_read(GuestReg::a(reg));
                let addr = self.ra_alloc();
                self.buf.emit(arm::mov_reg(addr, an));
                self.ra_free(an);
                addr
            }
            3 => {
                let an = self.map_read(GuestReg::a(reg));
                self.set_dirty(GuestReg::a(reg));
                let addr = self.ra_alloc();
                let step = Self::ea_step(size, reg);
                self.buf.emit(arm::mov_reg(addr, an));
                self.buf.emit(arm::add_imm(an, an, arm::encode_imm12(step as u32).unwrap_or(0)));
                self.ra_free(an);
                addr
            }
            4 => {
                let an = self.map_read(GuestReg::a(reg));
                self.set_dirty(GuestReg::a(reg));
                let addr = self.ra_alloc();
                let step = Self::ea_step(size, reg);
                self.buf.emit(arm::sub_imm(an, an, arm::encode_imm12(step as u32).unwrap_or(0)));
                self.buf.emit(arm::mov_reg(addr, an));
                self.ra_free(an);
                addr
            }
            _ => self.ea_lea(ea),
        }
    }

    fn offset_fits(size: OpSize, offset: i16) -> bool {
        match size {
            OpSize::Word => (-255..=255).contains(&offset),
            _ => (-4095..=4095).contains(&offset),
        }
    }

    fn offset_fits_i32(size: OpSize, offset: i32) -> bool {
        match size {
            OpSize::Word => (-255..=255).contains(&offset),
            _ => (-4095..=4095).contains(&offset),
        }
    }

    /// Sized load with immediate offset plus the byte-swap fixup.
    pub(crate) fn ea_emit_load(&mut self, size: OpSize, dst: Reg, base: Reg, offset: i16) {
        match size {
            OpSize::Long => self.buf.emit(arm::ldr_offset(dst, base, offset)),
            OpSize::Word => self.buf.emit(arm::ldrh_offset(dst, base, offset)),
            OpSize::Byte => self.buf.emit(arm::ldrb_offset(dst, base, offset)),
        };
        self.swap_after_load(size.bytes(), dst);
    }

    /// Sized store with immediate offset plus the byte-swap fixup. The
    /// value register is restored afterwards when swapping applies.
    pub(crate) fn ea_emit_store(&mut self, size: OpSize, value: Reg, base: Reg, offset: i16) {
        self.swap_before_store(size.bytes(), value);
        match size {
            OpSize::Long => self.buf.emit(arm::str_offset(value, base, offset)),
            OpSize::Word => self.buf.emit(arm::strh_offset(value, base, offset)),
            OpSize::Byte => self.buf.emit(arm::strb_offset(value, base, offset)),
        };
        self.swap_after_load(size.bytes(), value);
    }

    /// Store into a data register with a conditional move: `Scc` support.
    pub fn ea_store_dn_byte_cc(&mut self, cond: Cond, reg: u8, set: bool) {
        let dn = self.map_read(GuestReg::d(reg));
        if set {
            self.buf.emit(arm::orr_cc_imm(cond, dn, dn, 0xff));
        } else {
            self.buf.emit(arm::bfc_cc(cond, dn, 0, 8));
        }
        self.set_dirty(GuestReg::d(reg));
        self.ra_free(dn);
    }

    /// Number of extension words the EA consumes for a given operand
    /// size; used by the length decoder and the liveness scan.
    #[must_use]
    pub fn ea_length(mem: &dyn m68k_state::GuestMem, pc: u32, ea: u8, size: OpSize) -> u32 {
        let mode = (ea >> 3) & 7;
        let reg = ea & 7;
        match mode {
            0..=4 => 0,
            5 => 1,
            6 => Self::indexed_length(mem, pc),
            _ => match reg {
                0 | 2 => 1,
                1 => 2,
                3 => Self::indexed_length(mem, pc),
                4 => {
                    if size == OpSize::Long {
                        2
                    } else {
                        1
                    }
                }
                _ => 0,
            },
        }
    }

    fn indexed_length(mem: &dyn m68k_state::GuestMem, pc: u32) -> u32 {
        let brief = mem.read_u16(pc);
        if brief & 0x0100 == 0 {
            return 1;
        }
        let mut words = 1;
        match (brief >> 4) & 3 {
            2 => words += 1,
            3 => words += 2,
            _ => {}
        }
        match brief & 3 {
            2 => words += 1,
            3 => words += 2,
            _ => {}
        }
        words
    }
}

/// Compile-time checks that the hot state offsets stay in the immediate
/// range of the sized load/store encodings.
const _: () = {
    assert!(core::mem::offset_of!(GuestState, sr) < 0xff);
    assert!(core::mem::offset_of!(GuestState, pc) < 0xfff);
    assert!(core::mem::offset_of!(GuestState, fp) < 0x3ff);
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::JitConfig;
    use m68k_state::FlatMemory;

    fn fresh(mem: &FlatMemory, pc: u32) -> BlockCtx<'_> {
        let mut ctx = BlockCtx::new(JitConfig::default(), mem, pc);
        ctx.insn_start = pc.wrapping_sub(2);
        ctx
    }

    #[test]
    fn dn_read_only_returns_live_mapping() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = fresh(&mem, 0x100);
        let r = ctx.ea_load(OpSize::Long, 0b000_011, true);
        assert_eq!(ctx.ra_mapping(GuestReg::d(3)), Some(r));
        ctx.ra_free(r);
        let copy = ctx.ea_load(OpSize::Long, 0b000_011, false);
        assert_ne!(copy, r);
    }

    #[test]
    fn postincrement_long_loads_and_bumps() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = fresh(&mem, 0x100);
        let val = ctx.ea_load(OpSize::Long, 0b011_001, true); // (A1)+
        ctx.ra_free(val);
        let an = ctx.ra_mapping(GuestReg::a(1)).expect("A1 mapped");
        assert_eq!(ctx.buf.word(1), arm::ldr_offset_postindex(val, an, 4));
    }

    #[test]
    fn predecrement_byte_on_a7_steps_by_two() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = fresh(&mem, 0x100);
        let val = ctx.ea_load(OpSize::Byte, 0b100_111, true); // -(A7)
        ctx.ra_free(val);
        let a7 = ctx.ra_mapping(GuestReg::a(7)).expect("A7 mapped");
        assert_eq!(ctx.buf.word(1), arm::ldrb_offset_preindex(val, a7, -2));
    }

    #[test]
    fn displacement_folds_into_the_load() {
        let mut mem = FlatMemory::new(0x1000);
        mem.load(0x102, &[0x00, 0x40]); // d16 = 0x40
        let mut ctx = fresh(&mem, 0x102);
        let val = ctx.ea_load(OpSize::Long, 0b101_010, true); // (0x40,A2)
        ctx.ra_free(val);
        let an = ctx.ra_mapping(GuestReg::a(2)).expect("A2 mapped");
        assert_eq!(ctx.buf.word(1), arm::ldr_offset(val, an, 0x40));
        assert_eq!(ctx.pc, 0x104);
    }

    #[test]
    fn wide_word_displacement_materialises() {
        let mut mem = FlatMemory::new(0x1000);
        mem.load(0x102, &[0x7f, 0xff]); // d16 = 0x7fff: too wide for ldrh
        let mut ctx = fresh(&mem, 0x102);
        let val = ctx.ea_load(OpSize::Word, 0b101_000, true);
        ctx.ra_free(val);
        // movw + halfword reg-offset load.
        let words = ctx.buf.words();
        assert!(words.iter().any(|&w| w & 0x0ff0_0000 == 0x0300_0000), "movw expected");
    }

    #[test]
    fn absolute_word_sign_extends() {
        let mut mem = FlatMemory::new(0x10000);
        mem.load(0x102, &[0x80, 0x00]); // (0xffff8000).W
        let mut ctx = fresh(&mem, 0x102);
        let val = ctx.ea_load(OpSize::Word, 0b111_000, true);
        ctx.ra_free(val);
        // The materialised constant is sign-extended.
        assert_eq!(ctx.buf.word(0), arm::movw(val, 0x8000));
        assert_eq!(ctx.buf.word(1), arm::movt(val, 0xffff));
    }

    #[test]
    fn immediate_byte_consumes_one_word() {
        let mut mem = FlatMemory::new(0x1000);
        mem.load(0x102, &[0x00, 0x7f]);
        let mut ctx = fresh(&mem, 0x102);
        let val = ctx.ea_load(OpSize::Byte, 0b111_100, true);
        ctx.ra_free(val);
        assert_eq!(ctx.pc, 0x104);
        assert_eq!(ctx.buf.word(0), arm::mov_imm(val, 0x7f));
    }

    #[test]
    fn pc_relative_folds_against_reg_pc() {
        let mut mem = FlatMemory::new(0x1000);
        mem.load(0x102, &[0x00, 0x10]); // (0x10,PC)
        let mut ctx = fresh(&mem, 0x102);
        let val = ctx.ea_load(OpSize::Word, 0b111_010, true);
        ctx.ra_free(val);
        // Extension word sits 2 bytes past the opcode: base offset 2 + 0x10.
        assert_eq!(ctx.buf.word(0), arm::ldrh_offset(val, REG_PC, 0x12));
    }

    #[test]
    fn byte_store_to_dn_preserves_high_bits() {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = fresh(&mem, 0x100);
        let v = ctx.ra_alloc();
        ctx.ea_store(OpSize::Byte, 0b000_101, v);
        ctx.ra_free(v);
        let dn = ctx.ra_mapping(GuestReg::d(5)).expect("D5 mapped");
        assert_eq!(ctx.buf.word(1), arm::bfi(dn, v, 0, 8));
    }

    #[test]
    fn brief_indexed_mode_scales_the_index() {
        let mut mem = FlatMemory::new(0x1000);
        // (0x04,A0,D1.L*4): brief word 0x1c04 = D1, long, scale 2, d8 4
        mem.load(0x102, &[0x1c, 0x04]);
        let mut ctx = fresh(&mem, 0x102);
        let val = ctx.ea_load(OpSize::Long, 0b110_000, true);
        ctx.ra_free(val);
        let words = ctx.buf.words();
        // Final instruction: ldr val, [base, idx, lsl #2]
        let last = words[words.len() - 1];
        assert_eq!(last & 0x0ff0_0ff0, 0x0790_0100, "scaled reg-offset load, got {last:#010x}");
    }

    #[test]
    fn full_format_memory_indirect_preindexed() {
        let mut mem = FlatMemory::new(0x1000);
        // ([bd,A0,D1.W],od): full format, bd word, preindex with word od
        // brief = 0x1000 | 0x0100 | (2<<4) | 2 = 0x1122
        mem.load(0x102, &[0x11, 0x22, 0x00, 0x08, 0x00, 0x04]); // bd=8, od=4
        let mut ctx = fresh(&mem, 0x102);
        let val = ctx.ea_lea(0b110_000);
        ctx.ra_free(val);
        assert_eq!(ctx.pc, 0x108); // brief + bd + od consumed
        let words = ctx.buf.words();
        assert!(words.iter().any(|&w| w & 0x0fff_0000 == 0x0590_0000 || w & 0x0fff_0000 == 0x0510_0000),
            "memory indirection load expected");
    }

    #[test]
    fn pc_indexed_brief_bases_at_the_extension_word() {
        let mut mem = FlatMemory::new(0x1000);
        // (0x04,PC,D1.L*4): brief word 0x1c04 at 0x102, one word past
        // the opcode.
        mem.load(0x102, &[0x1c, 0x04]);
        let mut ctx = fresh(&mem, 0x102);
        let addr = ctx.ea_lea(0b111_011);
        ctx.ra_free(addr);
        // The base is REG_PC + 2 — the extension word's own address —
        // not REG_PC + 4.
        assert_eq!(
            ctx.buf.word(0),
            arm::add_imm(addr, REG_PC, arm::encode_imm12(2).expect("fits"))
        );
        // Then the displacement and the scaled index.
        assert_eq!(
            ctx.buf.word(1),
            arm::add_imm(addr, addr, arm::encode_imm12(4).expect("fits"))
        );
        let words = ctx.buf.words();
        let last = words[words.len() - 1];
        assert_eq!(last & 0x0ff0_0f80, 0x0080_0100, "scaled index add, got {last:#010x}");
    }

    #[test]
    fn pc_indexed_full_format_bases_at_the_extension_word() {
        let mut mem = FlatMemory::new(0x1000);
        // ([bd,PC,D1.W],od): full format, word bd and word od, as in the
        // An-based test but with the PC base.
        mem.load(0x102, &[0x11, 0x22, 0x00, 0x08, 0x00, 0x04]); // bd=8, od=4
        let mut ctx = fresh(&mem, 0x102);
        let addr = ctx.ea_lea(0b111_011);
        ctx.ra_free(addr);
        assert_eq!(ctx.pc, 0x108); // brief + bd + od consumed
        // The base materialises as REG_PC + 2 before anything else.
        assert_eq!(
            ctx.buf.word(0),
            arm::add_imm(addr, REG_PC, arm::encode_imm12(2).expect("fits"))
        );
        let words = ctx.buf.words();
        assert!(
            words.iter().any(|&w| w & 0x0fff_0000 == 0x0590_0000 || w & 0x0fff_0000 == 0x0510_0000),
            "memory indirection load expected"
        );
    }

    #[test]
    fn ea_length_decodes_extension_words() {
        let mut mem = FlatMemory::new(0x1000);
        assert_eq!(BlockCtx::ea_length(&mem, 0, 0b000_000, OpSize::Long), 0);
        assert_eq!(BlockCtx::ea_length(&mem, 0, 0b101_000, OpSize::Long), 1);
        assert_eq!(BlockCtx::ea_length(&mem, 0, 0b111_001, OpSize::Long), 2);
        assert_eq!(BlockCtx::ea_length(&mem, 0, 0b111_100, OpSize::Word), 1);
        assert_eq!(BlockCtx::ea_length(&mem, 0, 0b111_100, OpSize::Long), 2);
        // Full format with long bd and word od.
        mem.load(0, &[0x01, 0xb2]);
        assert_eq!(BlockCtx::ea_length(&mem, 0, 0b110_000, OpSize::Long), 4);
    }
}
