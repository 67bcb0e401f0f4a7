//! Data-processing, multiply, shift, bit-field and extend encoders.
//!
//! Register-operand forms take an optional left-shift amount applied to the
//! second operand, matching the translator's use of folded shifts for index
//! scaling.

use crate::{Cond, Reg};

const fn dp_imm(cc: Cond, op: u32, s: u32, rn: Reg, rd: Reg, imm12: u16) -> u32 {
    cc.bits() | 0x0200_0000 | (op << 21) | (s << 20) | (rn.idx() << 16) | (rd.idx() << 12) | imm12 as u32
}

const fn dp_reg(cc: Cond, op: u32, s: u32, rn: Reg, rd: Reg, rm: Reg, lsl: u8) -> u32 {
    cc.bits()
        | (op << 21)
        | (s << 20)
        | (rn.idx() << 16)
        | (rd.idx() << 12)
        | (((lsl & 31) as u32) << 7)
        | rm.idx()
}

macro_rules! dp_pair {
    ($name:ident, $name_cc:ident, $names:ident, $names_cc:ident, $op:expr) => {
        /// Immediate form, condition `AL`.
        #[must_use]
        pub const fn $name(rd: Reg, rn: Reg, imm12: u16) -> u32 {
            $name_cc(Cond::Al, rd, rn, imm12)
        }
        /// Immediate form with explicit condition.
        #[must_use]
        pub const fn $name_cc(cc: Cond, rd: Reg, rn: Reg, imm12: u16) -> u32 {
            dp_imm(cc, $op, 0, rn, rd, imm12)
        }
        /// Flag-setting immediate form, condition `AL`.
        #[must_use]
        pub const fn $names(rd: Reg, rn: Reg, imm12: u16) -> u32 {
            $names_cc(Cond::Al, rd, rn, imm12)
        }
        /// Flag-setting immediate form with explicit condition.
        #[must_use]
        pub const fn $names_cc(cc: Cond, rd: Reg, rn: Reg, imm12: u16) -> u32 {
            dp_imm(cc, $op, 1, rn, rd, imm12)
        }
    };
}

macro_rules! dp_reg_pair {
    ($name:ident, $name_cc:ident, $names:ident, $names_cc:ident, $op:expr) => {
        /// Register form, condition `AL`. `lsl` left-shifts the second operand.
        #[must_use]
        pub const fn $name(rd: Reg, rn: Reg, rm: Reg, lsl: u8) -> u32 {
            $name_cc(Cond::Al, rd, rn, rm, lsl)
        }
        /// Register form with explicit condition.
        #[must_use]
        pub const fn $name_cc(cc: Cond, rd: Reg, rn: Reg, rm: Reg, lsl: u8) -> u32 {
            dp_reg(cc, $op, 0, rn, rd, rm, lsl)
        }
        /// Flag-setting register form, condition `AL`.
        #[must_use]
        pub const fn $names(rd: Reg, rn: Reg, rm: Reg, lsl: u8) -> u32 {
            $names_cc(Cond::Al, rd, rn, rm, lsl)
        }
        /// Flag-setting register form with explicit condition.
        #[must_use]
        pub const fn $names_cc(cc: Cond, rd: Reg, rn: Reg, rm: Reg, lsl: u8) -> u32 {
            dp_reg(cc, $op, 1, rn, rd, rm, lsl)
        }
    };
}

dp_pair!(and_imm, and_cc_imm, ands_imm, ands_cc_imm, 0x0);
dp_pair!(eor_imm, eor_cc_imm, eors_imm, eors_cc_imm, 0x1);
dp_pair!(sub_imm, sub_cc_imm, subs_imm, subs_cc_imm, 0x2);
dp_pair!(rsb_imm, rsb_cc_imm, rsbs_imm, rsbs_cc_imm, 0x3);
dp_pair!(add_imm, add_cc_imm, adds_imm, adds_cc_imm, 0x4);
dp_pair!(adc_imm, adc_cc_imm, adcs_imm, adcs_cc_imm, 0x5);
dp_pair!(sbc_imm, sbc_cc_imm, sbcs_imm, sbcs_cc_imm, 0x6);
dp_pair!(rsc_imm, rsc_cc_imm, rscs_imm, rscs_cc_imm, 0x7);
dp_pair!(orr_imm, orr_cc_imm, orrs_imm, orrs_cc_imm, 0xc);
dp_pair!(bic_imm, bic_cc_imm, bics_imm, bics_cc_imm, 0xe);

dp_reg_pair!(and_reg, and_cc_reg, ands_reg, ands_cc_reg, 0x0);
dp_reg_pair!(eor_reg, eor_cc_reg, eors_reg, eors_cc_reg, 0x1);
dp_reg_pair!(sub_reg, sub_cc_reg, subs_reg, subs_cc_reg, 0x2);
dp_reg_pair!(rsb_reg, rsb_cc_reg, rsbs_reg, rsbs_cc_reg, 0x3);
dp_reg_pair!(add_reg, add_cc_reg, adds_reg, adds_cc_reg, 0x4);
dp_reg_pair!(adc_reg, adc_cc_reg, adcs_reg, adcs_cc_reg, 0x5);
dp_reg_pair!(sbc_reg, sbc_cc_reg, sbcs_reg, sbcs_cc_reg, 0x6);
dp_reg_pair!(orr_reg, orr_cc_reg, orrs_reg, orrs_cc_reg, 0xc);
dp_reg_pair!(bic_reg, bic_cc_reg, bics_reg, bics_cc_reg, 0xe);

// Compare/test forms: S is implied, Rd is zero.

/// `cmp rn, #imm` with explicit condition.
#[must_use]
pub const fn cmp_cc_imm(cc: Cond, rn: Reg, imm12: u16) -> u32 {
    dp_imm(cc, 0xa, 1, rn, Reg(0), imm12)
}
/// `cmp rn, #imm`.
#[must_use]
pub const fn cmp_imm(rn: Reg, imm12: u16) -> u32 {
    cmp_cc_imm(Cond::Al, rn, imm12)
}
/// `cmp rn, rm` with explicit condition.
#[must_use]
pub const fn cmp_cc_reg(cc: Cond, rn: Reg, rm: Reg) -> u32 {
    dp_reg(cc, 0xa, 1, rn, Reg(0), rm, 0)
}
/// `cmp rn, rm`.
#[must_use]
pub const fn cmp_reg(rn: Reg, rm: Reg) -> u32 {
    cmp_cc_reg(Cond::Al, rn, rm)
}
/// `cmn rn, #imm` with explicit condition.
#[must_use]
pub const fn cmn_cc_imm(cc: Cond, rn: Reg, imm12: u16) -> u32 {
    dp_imm(cc, 0xb, 1, rn, Reg(0), imm12)
}
/// `cmn rn, #imm`.
#[must_use]
pub const fn cmn_imm(rn: Reg, imm12: u16) -> u32 {
    cmn_cc_imm(Cond::Al, rn, imm12)
}
/// `cmn rn, rm`.
#[must_use]
pub const fn cmn_reg(rn: Reg, rm: Reg) -> u32 {
    dp_reg(Cond::Al, 0xb, 1, rn, Reg(0), rm, 0)
}
/// `tst rn, #imm` with explicit condition.
#[must_use]
pub const fn tst_cc_imm(cc: Cond, rn: Reg, imm12: u16) -> u32 {
    dp_imm(cc, 0x8, 1, rn, Reg(0), imm12)
}
/// `tst rn, #imm`.
#[must_use]
pub const fn tst_imm(rn: Reg, imm12: u16) -> u32 {
    tst_cc_imm(Cond::Al, rn, imm12)
}
/// `tst rn, rm, lsl #n` with explicit condition.
#[must_use]
pub const fn tst_cc_reg(cc: Cond, rn: Reg, rm: Reg, lsl: u8) -> u32 {
    dp_reg(cc, 0x8, 1, rn, Reg(0), rm, lsl)
}
/// `tst rn, rm, lsl #n`.
#[must_use]
pub const fn tst_reg(rn: Reg, rm: Reg, lsl: u8) -> u32 {
    tst_cc_reg(Cond::Al, rn, rm, lsl)
}
/// `teq rn, #imm` with explicit condition.
#[must_use]
pub const fn teq_cc_imm(cc: Cond, rn: Reg, imm12: u16) -> u32 {
    dp_imm(cc, 0x9, 1, rn, Reg(0), imm12)
}
/// `teq rn, #imm`.
#[must_use]
pub const fn teq_imm(rn: Reg, imm12: u16) -> u32 {
    teq_cc_imm(Cond::Al, rn, imm12)
}
/// `teq rn, rm`.
#[must_use]
pub const fn teq_reg(rn: Reg, rm: Reg) -> u32 {
    dp_reg(Cond::Al, 0x9, 1, rn, Reg(0), rm, 0)
}

// Moves.

/// `mov rd, rm` with explicit condition.
#[must_use]
pub const fn mov_cc_reg(cc: Cond, rd: Reg, rm: Reg) -> u32 {
    dp_reg(cc, 0xd, 0, Reg(0), rd, rm, 0)
}
/// `mov rd, rm`.
#[must_use]
pub const fn mov_reg(rd: Reg, rm: Reg) -> u32 {
    mov_cc_reg(Cond::Al, rd, rm)
}
/// `mov rd, rm, lsl #n`.
#[must_use]
pub const fn mov_reg_lsl(rd: Reg, rm: Reg, lsl: u8) -> u32 {
    dp_reg(Cond::Al, 0xd, 0, Reg(0), rd, rm, lsl)
}
/// `mov rd, #imm8` with explicit condition.
#[must_use]
pub const fn mov_cc_imm(cc: Cond, rd: Reg, imm12: u16) -> u32 {
    dp_imm(cc, 0xd, 0, Reg(0), rd, imm12)
}
/// `mov rd, #imm8`.
#[must_use]
pub const fn mov_imm(rd: Reg, imm12: u16) -> u32 {
    mov_cc_imm(Cond::Al, rd, imm12)
}
/// Flag-setting `movs rd, #imm8`.
#[must_use]
pub const fn movs_imm(rd: Reg, imm12: u16) -> u32 {
    dp_imm(Cond::Al, 0xd, 1, Reg(0), rd, imm12)
}
/// `mvn rd, #imm8` with explicit condition.
#[must_use]
pub const fn mvn_cc_imm(cc: Cond, rd: Reg, imm12: u16) -> u32 {
    dp_imm(cc, 0xf, 0, Reg(0), rd, imm12)
}
/// `mvn rd, #imm8`.
#[must_use]
pub const fn mvn_imm(rd: Reg, imm12: u16) -> u32 {
    mvn_cc_imm(Cond::Al, rd, imm12)
}
/// `mvn rd, rm`.
#[must_use]
pub const fn mvn_reg(rd: Reg, rm: Reg) -> u32 {
    dp_reg(Cond::Al, 0xf, 0, Reg(0), rd, rm, 0)
}
/// Flag-setting `mvns rd, rm`.
#[must_use]
pub const fn mvns_reg(rd: Reg, rm: Reg) -> u32 {
    dp_reg(Cond::Al, 0xf, 1, Reg(0), rd, rm, 0)
}

/// `movw rd, #imm16`: load low halfword, zero the rest.
#[must_use]
pub const fn movw_cc(cc: Cond, rd: Reg, imm16: u16) -> u32 {
    cc.bits() | 0x0300_0000 | (((imm16 as u32) >> 12) << 16) | (rd.idx() << 12) | ((imm16 as u32) & 0xfff)
}
/// `movw rd, #imm16`.
#[must_use]
pub const fn movw(rd: Reg, imm16: u16) -> u32 {
    movw_cc(Cond::Al, rd, imm16)
}
/// `movt rd, #imm16`: load high halfword, keep the rest.
#[must_use]
pub const fn movt_cc(cc: Cond, rd: Reg, imm16: u16) -> u32 {
    cc.bits() | 0x0340_0000 | (((imm16 as u32) >> 12) << 16) | (rd.idx() << 12) | ((imm16 as u32) & 0xfff)
}
/// `movt rd, #imm16`.
#[must_use]
pub const fn movt(rd: Reg, imm16: u16) -> u32 {
    movt_cc(Cond::Al, rd, imm16)
}

// Shifts as explicit mnemonics (MOV with shift sub-opcode).

const fn shift_imm(cc: Cond, s: u32, ty: u32, rd: Reg, rm: Reg, amount: u8) -> u32 {
    cc.bits() | 0x01a0_0000 | (s << 20) | (rd.idx() << 12) | (((amount & 31) as u32) << 7) | (ty << 5) | rm.idx()
}

const fn shift_reg(cc: Cond, s: u32, ty: u32, rd: Reg, rm: Reg, rs: Reg) -> u32 {
    cc.bits() | 0x01a0_0010 | (s << 20) | (rd.idx() << 12) | (rs.idx() << 8) | (ty << 5) | rm.idx()
}

macro_rules! shift_group {
    ($imm:ident, $imm_cc:ident, $imms:ident, $reg:ident, $regs:ident, $ty:expr) => {
        /// Immediate-count shift.
        #[must_use]
        pub const fn $imm(rd: Reg, rm: Reg, amount: u8) -> u32 {
            shift_imm(Cond::Al, 0, $ty, rd, rm, amount)
        }
        /// Immediate-count shift with explicit condition.
        #[must_use]
        pub const fn $imm_cc(cc: Cond, rd: Reg, rm: Reg, amount: u8) -> u32 {
            shift_imm(cc, 0, $ty, rd, rm, amount)
        }
        /// Flag-setting immediate-count shift.
        #[must_use]
        pub const fn $imms(rd: Reg, rm: Reg, amount: u8) -> u32 {
            shift_imm(Cond::Al, 1, $ty, rd, rm, amount)
        }
        /// Register-count shift.
        #[must_use]
        pub const fn $reg(rd: Reg, rm: Reg, rs: Reg) -> u32 {
            shift_reg(Cond::Al, 0, $ty, rd, rm, rs)
        }
        /// Flag-setting register-count shift.
        #[must_use]
        pub const fn $regs(rd: Reg, rm: Reg, rs: Reg) -> u32 {
            shift_reg(Cond::Al, 1, $ty, rd, rm, rs)
        }
    };
}

shift_group!(lsl_imm, lsl_cc_imm, lsls_imm, lsl_reg, lsls_reg, 0);
shift_group!(lsr_imm, lsr_cc_imm, lsrs_imm, lsr_reg, lsrs_reg, 1);
shift_group!(asr_imm, asr_cc_imm, asrs_imm, asr_reg, asrs_reg, 2);
shift_group!(ror_imm, ror_cc_imm, rors_imm, ror_reg, rors_reg, 3);

/// `rrx rd, rm`: rotate right with extend (ROR with zero amount).
#[must_use]
pub const fn rrx(rd: Reg, rm: Reg) -> u32 {
    shift_imm(Cond::Al, 0, 3, rd, rm, 0)
}
/// Flag-setting `rrxs rd, rm`.
#[must_use]
pub const fn rrxs(rd: Reg, rm: Reg) -> u32 {
    shift_imm(Cond::Al, 1, 3, rd, rm, 0)
}

// Multiply family.

/// `mul rd, rm, rs`.
#[must_use]
pub const fn mul(rd: Reg, rm: Reg, rs: Reg) -> u32 {
    Cond::Al.bits() | 0x0000_0090 | (rd.idx() << 16) | (rs.idx() << 8) | rm.idx()
}
/// Flag-setting `muls rd, rm, rs`.
#[must_use]
pub const fn muls(rd: Reg, rm: Reg, rs: Reg) -> u32 {
    mul(rd, rm, rs) | (1 << 20)
}
/// `umull rdlo, rdhi, rm, rs`.
#[must_use]
pub const fn umull(rdhi: Reg, rdlo: Reg, rm: Reg, rs: Reg) -> u32 {
    Cond::Al.bits() | 0x0080_0090 | (rdhi.idx() << 16) | (rdlo.idx() << 12) | (rs.idx() << 8) | rm.idx()
}
/// Flag-setting `umulls`.
#[must_use]
pub const fn umulls(rdhi: Reg, rdlo: Reg, rm: Reg, rs: Reg) -> u32 {
    umull(rdhi, rdlo, rm, rs) | (1 << 20)
}
/// `smull rdlo, rdhi, rm, rs`.
#[must_use]
pub const fn smull(rdhi: Reg, rdlo: Reg, rm: Reg, rs: Reg) -> u32 {
    Cond::Al.bits() | 0x00c0_0090 | (rdhi.idx() << 16) | (rdlo.idx() << 12) | (rs.idx() << 8) | rm.idx()
}
/// Flag-setting `smulls`.
#[must_use]
pub const fn smulls(rdhi: Reg, rdlo: Reg, rm: Reg, rs: Reg) -> u32 {
    smull(rdhi, rdlo, rm, rs) | (1 << 20)
}

// Bit-field, count-leading-zeros and extend.

/// `bfc rd, #lsb, #width` with explicit condition.
#[must_use]
pub const fn bfc_cc(cc: Cond, rd: Reg, lsb: u8, width: u8) -> u32 {
    cc.bits() | 0x07c0_001f | (rd.idx() << 12) | ((lsb as u32) << 7) | (((lsb + width - 1) as u32) << 16)
}
/// `bfc rd, #lsb, #width`.
#[must_use]
pub const fn bfc(rd: Reg, lsb: u8, width: u8) -> u32 {
    bfc_cc(Cond::Al, rd, lsb, width)
}
/// `bfi rd, rn, #lsb, #width` with explicit condition.
#[must_use]
pub const fn bfi_cc(cc: Cond, rd: Reg, rn: Reg, lsb: u8, width: u8) -> u32 {
    cc.bits() | 0x07c0_0010 | (rd.idx() << 12) | ((lsb as u32) << 7) | (((lsb + width - 1) as u32) << 16) | rn.idx()
}
/// `bfi rd, rn, #lsb, #width`.
#[must_use]
pub const fn bfi(rd: Reg, rn: Reg, lsb: u8, width: u8) -> u32 {
    bfi_cc(Cond::Al, rd, rn, lsb, width)
}
/// `clz rd, rm`.
#[must_use]
pub const fn clz(rd: Reg, rm: Reg) -> u32 {
    Cond::Al.bits() | 0x016f_0f10 | (rd.idx() << 12) | rm.idx()
}

/// `sxtb rd, rm, ror #(8*rot)` with explicit condition.
#[must_use]
pub const fn sxtb_cc(cc: Cond, rd: Reg, rm: Reg, rot: u8) -> u32 {
    cc.bits() | 0x06af_0070 | (rd.idx() << 12) | rm.idx() | (((rot & 3) as u32) << 10)
}
/// `sxtb rd, rm`.
#[must_use]
pub const fn sxtb(rd: Reg, rm: Reg, rot: u8) -> u32 {
    sxtb_cc(Cond::Al, rd, rm, rot)
}
/// `sxth rd, rm, ror #(8*rot)` with explicit condition.
#[must_use]
pub const fn sxth_cc(cc: Cond, rd: Reg, rm: Reg, rot: u8) -> u32 {
    cc.bits() | 0x06bf_0070 | (rd.idx() << 12) | rm.idx() | (((rot & 3) as u32) << 10)
}
/// `sxth rd, rm`.
#[must_use]
pub const fn sxth(rd: Reg, rm: Reg, rot: u8) -> u32 {
    sxth_cc(Cond::Al, rd, rm, rot)
}
/// `uxtb rd, rm, ror #(8*rot)` with explicit condition.
#[must_use]
pub const fn uxtb_cc(cc: Cond, rd: Reg, rm: Reg, rot: u8) -> u32 {
    cc.bits() | 0x06ef_0070 | (rd.idx() << 12) | rm.idx() | (((rot & 3) as u32) << 10)
}
/// `uxtb rd, rm`.
#[must_use]
pub const fn uxtb(rd: Reg, rm: Reg, rot: u8) -> u32 {
    uxtb_cc(Cond::Al, rd, rm, rot)
}
/// `uxth rd, rm, ror #(8*rot)` with explicit condition.
#[must_use]
pub const fn uxth_cc(cc: Cond, rd: Reg, rm: Reg, rot: u8) -> u32 {
    cc.bits() | 0x06ff_0070 | (rd.idx() << 12) | rm.idx() | (((rot & 3) as u32) << 10)
}
/// `uxth rd, rm`.
#[must_use]
pub const fn uxth(rd: Reg, rm: Reg, rot: u8) -> u32 {
    uxth_cc(Cond::Al, rd, rm, rot)
}
/// `uxtah rd, rn, rm`: rn + zero-extended halfword.
#[must_use]
pub const fn uxtah(rd: Reg, rn: Reg, rm: Reg, rot: u8) -> u32 {
    Cond::Al.bits() | 0x06f0_0070 | (rd.idx() << 12) | (rn.idx() << 16) | rm.idx() | (((rot & 3) as u32) << 10)
}
/// `uxtab rd, rn, rm`: rn + zero-extended byte.
#[must_use]
pub const fn uxtab(rd: Reg, rn: Reg, rm: Reg, rot: u8) -> u32 {
    Cond::Al.bits() | 0x06e0_0070 | (rd.idx() << 12) | (rn.idx() << 16) | rm.idx() | (((rot & 3) as u32) << 10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Reg;

    // Expected words cross-checked against GNU as output for armv7-a.

    #[test]
    fn add_sub_encodings() {
        assert_eq!(add_imm(Reg(0), Reg(1), 4), 0xe281_0004);
        assert_eq!(subs_imm(Reg(2), Reg(2), 1), 0xe252_2001);
        assert_eq!(add_reg(Reg(0), Reg(1), Reg(2), 0), 0xe081_0002);
        assert_eq!(add_reg(Reg(0), Reg(1), Reg(2), 2), 0xe081_0102);
        assert_eq!(rsbs_imm(Reg(3), Reg(4), 0), 0xe274_3000);
    }

    #[test]
    fn conditional_forms() {
        assert_eq!(add_cc_imm(Cond::Eq, Reg(0), Reg(0), 2), 0x0280_0002);
        assert_eq!(mov_cc_imm(Cond::Ne, Reg(5), 0xff), 0x13a0_50ff);
        assert_eq!(orr_cc_imm(Cond::Mi, Reg(10), Reg(10), 8), 0x438a_a008);
    }

    #[test]
    fn compare_and_test() {
        assert_eq!(cmp_imm(Reg(1), 0), 0xe351_0000);
        assert_eq!(cmp_reg(Reg(1), Reg(2)), 0xe151_0002);
        assert_eq!(tst_imm(Reg(10), 4), 0xe31a_0004);
        assert_eq!(teq_imm(Reg(3), 8), 0xe333_0008);
        assert_eq!(cmn_imm(Reg(7), 0x801), 0xe377_0801);
    }

    #[test]
    fn mov_family() {
        assert_eq!(mov_reg(Reg(4), Reg(5)), 0xe1a0_4005);
        assert_eq!(mov_reg_lsl(Reg(4), Reg(5), 16), 0xe1a0_4805);
        assert_eq!(mvn_imm(Reg(0), 0), 0xe3e0_0000);
        assert_eq!(movw(Reg(1), 0x1234), 0xe301_1234);
        assert_eq!(movt(Reg(1), 0xabcd), 0xe34a_1bcd);
    }

    #[test]
    fn shifts() {
        assert_eq!(lsl_imm(Reg(0), Reg(1), 8), 0xe1a0_0401);
        assert_eq!(lsr_imm(Reg(0), Reg(1), 16), 0xe1a0_0821);
        assert_eq!(asrs_imm(Reg(2), Reg(2), 31), 0xe1b0_2fc2);
        assert_eq!(ror_imm(Reg(3), Reg(3), 24), 0xe1a0_3c63);
        assert_eq!(lsl_reg(Reg(0), Reg(1), Reg(2)), 0xe1a0_0211);
        assert_eq!(rors_reg(Reg(0), Reg(1), Reg(2)), 0xe1b0_0271);
    }

    #[test]
    fn multiplies() {
        assert_eq!(mul(Reg(0), Reg(1), Reg(2)), 0xe000_0291);
        assert_eq!(umull(Reg(1), Reg(0), Reg(2), Reg(3)), 0xe081_0392);
        assert_eq!(smulls(Reg(1), Reg(0), Reg(2), Reg(3)), 0xe0d1_0392);
    }

    #[test]
    fn bitfield_and_extend() {
        assert_eq!(bfc(Reg(0), 0, 8), 0xe7c7_001f);
        assert_eq!(bfi(Reg(0), Reg(1), 0, 16), 0xe7cf_0011);
        assert_eq!(bfi(Reg(0), Reg(1), 16, 16), 0xe7df_0811);
        assert_eq!(sxth(Reg(0), Reg(1), 0), 0xe6bf_0071);
        assert_eq!(uxtb(Reg(2), Reg(3), 1), 0xe6ef_2473);
        assert_eq!(clz(Reg(0), Reg(1)), 0xe16f_0f11);
    }
}
