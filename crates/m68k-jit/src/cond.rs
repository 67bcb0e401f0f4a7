//! Lowering of guest condition codes onto host condition codes.
//!
//! The cached SR is probed with `tst`/`teq` sequences so that a single
//! host condition afterwards reflects the guest predicate. The same
//! lowering is shared by `Bcc`, `DBcc`, `Scc` and `TRAPcc`.

use arm_asm as arm;
use arm_asm::Cond;
use m68k_state::sr;
use m68k_state::Condition;

use crate::ctx::{BlockCtx, REG_SR};

/// Outcome of lowering a guest condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondTest {
    /// Condition is statically true.
    Always,
    /// Condition is statically false.
    Never,
    /// Evaluate the given host condition after the emitted test.
    Test(Cond),
}

/// Emit the flag probe for `cond` and return the host condition that is
/// true exactly when the guest condition holds.
pub fn emit_test(ctx: &mut BlockCtx<'_>, cond: Condition) -> CondTest {
    use Condition as M;

    if cond == M::T {
        return CondTest::Always;
    }
    if cond == M::F {
        return CondTest::Never;
    }

    ctx.cc_get();
    let host = match cond {
        M::Eq => {
            ctx.buf.emit(arm::tst_imm(REG_SR, sr::Z));
            Cond::Ne
        }
        M::Ne => {
            ctx.buf.emit(arm::tst_imm(REG_SR, sr::Z));
            Cond::Eq
        }
        M::Cs => {
            ctx.buf.emit(arm::tst_imm(REG_SR, sr::C));
            Cond::Ne
        }
        M::Cc => {
            ctx.buf.emit(arm::tst_imm(REG_SR, sr::C));
            Cond::Eq
        }
        M::Mi => {
            ctx.buf.emit(arm::tst_imm(REG_SR, sr::N));
            Cond::Ne
        }
        M::Pl => {
            ctx.buf.emit(arm::tst_imm(REG_SR, sr::N));
            Cond::Eq
        }
        M::Vs => {
            ctx.buf.emit(arm::tst_imm(REG_SR, sr::V));
            Cond::Ne
        }
        M::Vc => {
            ctx.buf.emit(arm::tst_imm(REG_SR, sr::V));
            Cond::Eq
        }
        M::Ls => {
            // C == 1 || Z == 1
            ctx.buf.emit(arm::tst_imm(REG_SR, sr::Z | sr::C));
            Cond::Ne
        }
        M::Hi => {
            // C == 0 && Z == 0
            ctx.buf.emit(arm::tst_imm(REG_SR, sr::Z));
            ctx.buf.emit(arm::tst_cc_imm(Cond::Eq, REG_SR, sr::C));
            Cond::Eq
        }
        M::Ge => {
            // N == V: both clear, or equal when compared against the pair
            let tmp = ctx.ra_alloc();
            ctx.buf.emit(arm::ands_imm(tmp, REG_SR, sr::N | sr::V));
            ctx.buf.emit(arm::teq_cc_imm(Cond::Ne, tmp, sr::N | sr::V));
            ctx.ra_free(tmp);
            Cond::Eq
        }
        M::Lt => {
            let tmp = ctx.ra_alloc();
            ctx.buf.emit(arm::and_imm(tmp, REG_SR, sr::N | sr::V));
            ctx.buf.emit(arm::teq_imm(tmp, sr::N));
            ctx.buf.emit(arm::teq_cc_imm(Cond::Ne, tmp, sr::V));
            ctx.ra_free(tmp);
            Cond::Eq
        }
        M::Gt => {
            let tmp = ctx.ra_alloc();
            ctx.buf.emit(arm::ands_imm(tmp, REG_SR, sr::N | sr::V | sr::Z));
            ctx.buf.emit(arm::teq_cc_imm(Cond::Ne, tmp, sr::N | sr::V));
            ctx.ra_free(tmp);
            Cond::Eq
        }
        M::Le => {
            let tmp = ctx.ra_alloc();
            ctx.buf.emit(arm::and_imm(tmp, REG_SR, sr::N | sr::V));
            ctx.buf.emit(arm::teq_imm(tmp, sr::N));
            ctx.buf.emit(arm::teq_cc_imm(Cond::Ne, tmp, sr::V));
            ctx.buf.emit(arm::and_cc_imm(Cond::Ne, tmp, REG_SR, sr::Z));
            ctx.buf.emit(arm::teq_cc_imm(Cond::Ne, tmp, sr::Z));
            ctx.ra_free(tmp);
            Cond::Eq
        }
        M::T | M::F => unreachable!(),
    };
    CondTest::Test(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::JitConfig;
    use m68k_state::FlatMemory;

    fn lower(cond: Condition) -> (Vec<u32>, CondTest) {
        let mem = FlatMemory::new(0x1000);
        let mut ctx = BlockCtx::new(JitConfig::default(), &mem, 0);
        let test = emit_test(&mut ctx, cond);
        (ctx.buf.into_words(), test)
    }

    /// Interpret the emitted probe over a guest SR value and report the
    /// resulting host Z flag, which every multi-instruction test ends on.
    fn probe_result(words: &[u32], sr_value: u16) -> bool {
        // Simulates only the tst/teq/and(s) subset the lowering emits.
        let mut z = false;
        let mut tmp = 0u32;
        for &w in words {
            let cond = (w >> 28) & 0xf;
            let passes = match cond {
                0x0 => z,
                0x1 => !z,
                0xe => true,
                _ => panic!("unexpected condition in probe"),
            };
            if !passes {
                continue;
            }
            let imm = arm::decode_imm12((w & 0xfff) as u16);
            let opcode = (w >> 21) & 0xf;
            let s = (w >> 20) & 1;
            let rn = (w >> 16) & 0xf;
            let src = if rn == 10 { u32::from(sr_value) } else { tmp };
            match opcode {
                0x8 => z = src & imm == 0,          // tst
                0x9 => z = src ^ imm == 0,          // teq
                0x0 => {
                    tmp = src & imm;                // and(s)
                    if s == 1 {
                        z = tmp == 0;
                    }
                }
                _ => panic!("unexpected opcode {opcode:#x}"),
            }
        }
        z
    }

    #[test]
    fn static_conditions() {
        assert_eq!(lower(Condition::T).1, CondTest::Always);
        assert_eq!(lower(Condition::F).1, CondTest::Never);
    }

    #[test]
    fn every_condition_matches_the_reference_evaluator() {
        for bits in 2..16u8 {
            let cond = Condition::from_bits(bits);
            let (words, test) = lower(cond);
            let CondTest::Test(host) = test else {
                panic!("dynamic condition expected")
            };
            for sr_value in 0..32u16 {
                let z = probe_result(&words[1..], sr_value);
                let host_true = match host {
                    Cond::Eq => z,
                    Cond::Ne => !z,
                    _ => panic!("unexpected host condition"),
                };
                assert_eq!(
                    host_true,
                    cond.holds(sr_value),
                    "cc {bits:#x} sr {sr_value:#07b}"
                );
            }
        }
    }
}
