//! VFP double-precision encoders used by the FPU lowerings.
//!
//! Restricted to d0..d15 so the top register bit is always clear; the FPU
//! allocator never hands out anything higher.

use crate::{Cond, DReg, Reg, SReg};

/// `vldr.64 dd, [rn, #offset]` — offset is in bytes, must be word-aligned.
#[must_use]
pub const fn vldr64(dd: DReg, rn: Reg, offset: i16) -> u32 {
    let (u, off) = if offset >= 0 { (1u32 << 23, offset as u32) } else { (0, (-offset) as u32) };
    Cond::Al.bits() | 0x0d10_0b00 | u | (rn.idx() << 16) | (dd.idx() << 12) | ((off >> 2) & 0xff)
}

/// `vstr.64 dd, [rn, #offset]`.
#[must_use]
pub const fn vstr64(dd: DReg, rn: Reg, offset: i16) -> u32 {
    let (u, off) = if offset >= 0 { (1u32 << 23, offset as u32) } else { (0, (-offset) as u32) };
    Cond::Al.bits() | 0x0d00_0b00 | u | (rn.idx() << 16) | (dd.idx() << 12) | ((off >> 2) & 0xff)
}

/// `vadd.f64 dd, dn, dm`.
#[must_use]
pub const fn vadd64(dd: DReg, dn: DReg, dm: DReg) -> u32 {
    Cond::Al.bits() | 0x0e30_0b00 | (dn.idx() << 16) | (dd.idx() << 12) | dm.idx()
}
/// `vsub.f64 dd, dn, dm`.
#[must_use]
pub const fn vsub64(dd: DReg, dn: DReg, dm: DReg) -> u32 {
    Cond::Al.bits() | 0x0e30_0b40 | (dn.idx() << 16) | (dd.idx() << 12) | dm.idx()
}
/// `vmul.f64 dd, dn, dm`.
#[must_use]
pub const fn vmul64(dd: DReg, dn: DReg, dm: DReg) -> u32 {
    Cond::Al.bits() | 0x0e20_0b00 | (dn.idx() << 16) | (dd.idx() << 12) | dm.idx()
}
/// `vdiv.f64 dd, dn, dm`.
#[must_use]
pub const fn vdiv64(dd: DReg, dn: DReg, dm: DReg) -> u32 {
    Cond::Al.bits() | 0x0e80_0b00 | (dn.idx() << 16) | (dd.idx() << 12) | dm.idx()
}
/// `vabs.f64 dd, dm`.
#[must_use]
pub const fn vabs64(dd: DReg, dm: DReg) -> u32 {
    Cond::Al.bits() | 0x0eb0_0bc0 | (dd.idx() << 12) | dm.idx()
}
/// `vneg.f64 dd, dm`.
#[must_use]
pub const fn vneg64(dd: DReg, dm: DReg) -> u32 {
    Cond::Al.bits() | 0x0eb1_0b40 | (dd.idx() << 12) | dm.idx()
}
/// `vsqrt.f64 dd, dm`.
#[must_use]
pub const fn vsqrt64(dd: DReg, dm: DReg) -> u32 {
    Cond::Al.bits() | 0x0eb1_0bc0 | (dd.idx() << 12) | dm.idx()
}
/// `vmov.f64 dd, dm`.
#[must_use]
pub const fn vmov64(dd: DReg, dm: DReg) -> u32 {
    Cond::Al.bits() | 0x0eb0_0b40 | (dd.idx() << 12) | dm.idx()
}
/// `vcmp.f64 dd, dm`.
#[must_use]
pub const fn vcmp64(dd: DReg, dm: DReg) -> u32 {
    Cond::Al.bits() | 0x0eb4_0b40 | (dd.idx() << 12) | dm.idx()
}
/// `vcmp.f64 dd, #0.0`.
#[must_use]
pub const fn vcmp64_zero(dd: DReg) -> u32 {
    Cond::Al.bits() | 0x0eb5_0b40 | (dd.idx() << 12)
}
/// `vmrs apsr_nzcv, fpscr`: copy VFP comparison flags into host flags.
#[must_use]
pub const fn vmrs_flags() -> u32 {
    0xeef1_fa10
}

/// `vmov dm, rt, rt2`: two core registers into a double.
#[must_use]
pub const fn vmov_to_d(dm: DReg, rt: Reg, rt2: Reg) -> u32 {
    Cond::Al.bits() | 0x0c40_0b10 | (rt2.idx() << 16) | (rt.idx() << 12) | dm.idx()
}
/// `vmov rt, rt2, dm`: a double into two core registers.
#[must_use]
pub const fn vmov_from_d(rt: Reg, rt2: Reg, dm: DReg) -> u32 {
    Cond::Al.bits() | 0x0c50_0b10 | (rt2.idx() << 16) | (rt.idx() << 12) | dm.idx()
}
/// `vmov sn, rt`.
#[must_use]
pub const fn vmov_to_s(sn: SReg, rt: Reg) -> u32 {
    Cond::Al.bits() | 0x0e00_0a10 | (((sn.0 >> 1) as u32) << 16) | (rt.idx() << 12) | (((sn.0 & 1) as u32) << 7)
}
/// `vmov rt, sn`.
#[must_use]
pub const fn vmov_from_s(rt: Reg, sn: SReg) -> u32 {
    Cond::Al.bits() | 0x0e10_0a10 | (((sn.0 >> 1) as u32) << 16) | (rt.idx() << 12) | (((sn.0 & 1) as u32) << 7)
}

/// `vcvt.f64.s32 dd, sm`: signed 32-bit integer to double.
#[must_use]
pub const fn vcvt_s32_to_f64(dd: DReg, sm: SReg) -> u32 {
    Cond::Al.bits() | 0x0eb8_0bc0 | (dd.idx() << 12) | ((sm.0 >> 1) as u32) | (((sm.0 & 1) as u32) << 5)
}
/// `vcvt.s32.f64 sd, dm`: double to signed 32-bit, round toward zero.
#[must_use]
pub const fn vcvt_f64_to_s32(sd: SReg, dm: DReg) -> u32 {
    Cond::Al.bits() | 0x0ebd_0bc0 | (((sd.0 >> 1) as u32) << 12) | (((sd.0 & 1) as u32) << 22) | dm.idx()
}
/// `vcvt.f64.f32 dd, sm`: single to double.
#[must_use]
pub const fn vcvt_f32_to_f64(dd: DReg, sm: SReg) -> u32 {
    Cond::Al.bits() | 0x0eb7_0ac0 | (dd.idx() << 12) | ((sm.0 >> 1) as u32) | (((sm.0 & 1) as u32) << 5)
}
/// `vcvt.f32.f64 sd, dm`: double to single.
#[must_use]
pub const fn vcvt_f64_to_f32(sd: SReg, dm: DReg) -> u32 {
    Cond::Al.bits() | 0x0eb7_0bc0 | (((sd.0 >> 1) as u32) << 12) | (((sd.0 & 1) as u32) << 22) | dm.idx()
}

/// `vpush {dd..dd+count-1}`.
#[must_use]
pub const fn vpush(first: DReg, count: u8) -> u32 {
    Cond::Al.bits() | 0x0d2d_0b00 | (first.idx() << 12) | ((count as u32) * 2)
}
/// `vpop {dd..dd+count-1}`.
#[must_use]
pub const fn vpop(first: DReg, count: u8) -> u32 {
    Cond::Al.bits() | 0x0cbd_0b00 | (first.idx() << 12) | ((count as u32) * 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_store() {
        assert_eq!(vldr64(DReg(0), Reg(11), 8), 0xed9b_0b02);
        assert_eq!(vstr64(DReg(1), Reg(11), -8), 0xed0b_1b02);
    }

    #[test]
    fn arithmetic() {
        assert_eq!(vadd64(DReg(0), DReg(1), DReg(2)), 0xee31_0b02);
        assert_eq!(vsub64(DReg(0), DReg(1), DReg(2)), 0xee31_0b42);
        assert_eq!(vmul64(DReg(3), DReg(4), DReg(5)), 0xee24_3b05);
        assert_eq!(vdiv64(DReg(0), DReg(1), DReg(2)), 0xee81_0b02);
        assert_eq!(vsqrt64(DReg(0), DReg(1)), 0xeeb1_0bc1);
        assert_eq!(vneg64(DReg(0), DReg(1)), 0xeeb1_0b41);
        assert_eq!(vabs64(DReg(0), DReg(1)), 0xeeb0_0bc1);
    }

    #[test]
    fn compare_and_moves() {
        assert_eq!(vcmp64(DReg(0), DReg(1)), 0xeeb4_0b41);
        assert_eq!(vcmp64_zero(DReg(2)), 0xeeb5_2b40);
        assert_eq!(vmrs_flags(), 0xeef1_fa10);
        assert_eq!(vmov_to_d(DReg(0), Reg(0), Reg(1)), 0xec41_0b10);
        assert_eq!(vmov_from_d(Reg(0), Reg(1), DReg(2)), 0xec51_0b12);
        assert_eq!(vmov64(DReg(0), DReg(7)), 0xeeb0_0b47);
    }

    #[test]
    fn conversions() {
        assert_eq!(vcvt_s32_to_f64(DReg(0), SReg(0)), 0xeeb8_0bc0);
        assert_eq!(vcvt_f64_to_s32(SReg(0), DReg(1)), 0xeebd_0bc1);
        assert_eq!(vcvt_f32_to_f64(DReg(0), SReg(1)), 0xeeb7_0ae0);
    }
}
