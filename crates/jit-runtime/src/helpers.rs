//! Runtime routines callable from emitted code.
//!
//! Everything here has C linkage and the AAPCS signatures the literal
//! pools in the translator expect. The guest address space is identity
//! mapped, so the exception helper reaches guest memory through raw
//! byte accesses.

use m68k_jit::{HelperTable, MathFn};
use m68k_state::{exceptions, GuestMem, GuestState};

/// Guest memory as seen by the runtime helpers: the identity mapping.
struct IdentityMem;

#[allow(unsafe_code)]
impl GuestMem for IdentityMem {
    fn read_u8(&self, addr: u32) -> u8 {
        // SAFETY: guest addresses are identity-mapped host addresses by
        // the machine contract.
        unsafe { core::ptr::read_volatile(addr as usize as *const u8) }
    }

    fn write_u8(&mut self, addr: u32, value: u8) {
        // SAFETY: as above.
        unsafe { core::ptr::write_volatile(addr as usize as *mut u8, value) }
    }
}

/// Raise a guest exception: called from emitted code with the state
/// base, the vector offset and the architectural return address.
#[allow(unsafe_code)]
pub extern "C" fn raise_exception(state: *mut GuestState, vector: u32, return_pc: u32) {
    // SAFETY: emitted code passes the dispatcher's exclusive state.
    let state = unsafe { &mut *state };
    exceptions::enter(state, &mut IdentityMem, vector, return_pc);
}

/// Full SR write with supervisor-stack re-aliasing.
#[allow(unsafe_code)]
pub extern "C" fn write_sr(state: *mut GuestState, value: u32) {
    // SAFETY: as above.
    let state = unsafe { &mut *state };
    state.write_sr(value as u16);
}

/// Signed quotient/remainder, quotient in the low word of the return.
pub extern "C" fn idivmod(n: i32, d: i32) -> u64 {
    let q = n.wrapping_div(d) as u32;
    let r = n.wrapping_rem(d) as u32;
    u64::from(q) | (u64::from(r) << 32)
}

/// Unsigned quotient/remainder.
pub extern "C" fn uidivmod(n: u32, d: u32) -> u64 {
    u64::from(n / d) | (u64::from(n % d) << 32)
}

macro_rules! monadic {
    ($name:ident, $method:ident) => {
        /// Math-library shim.
        pub extern "C" fn $name(x: f64) -> f64 {
            x.$method()
        }
    };
}

monadic!(m_sin, sin);
monadic!(m_cos, cos);
monadic!(m_tan, tan);
monadic!(m_asin, asin);
monadic!(m_acos, acos);
monadic!(m_atan, atan);
monadic!(m_atanh, atanh);
monadic!(m_sinh, sinh);
monadic!(m_cosh, cosh);
monadic!(m_tanh, tanh);
monadic!(m_log, ln);
monadic!(m_log10, log10);
monadic!(m_log2, log2);
monadic!(m_log1p, ln_1p);
monadic!(m_exp, exp);
monadic!(m_exp2, exp2);
monadic!(m_expm1, exp_m1);

/// 10^x.
pub extern "C" fn m_exp10(x: f64) -> f64 {
    10f64.powf(x)
}

/// Truncating remainder (FMOD).
pub extern "C" fn m_fmod(x: f64, y: f64) -> f64 {
    x % y
}

/// IEEE remainder (FREM).
pub extern "C" fn m_frem(x: f64, y: f64) -> f64 {
    let q = (x / y).round_ties_even();
    x - q * y
}

/// x * 2^trunc(y) (FSCALE).
pub extern "C" fn m_scalb(x: f64, y: f64) -> f64 {
    let n = y.trunc() as i32;
    x * 2f64.powi(n)
}

/// Round to nearest integral value (FINT).
pub extern "C" fn m_rint(x: f64) -> f64 {
    x.round_ties_even()
}

/// Read a 96-bit extended-precision value from guest memory as a
/// double. The layout is the m68881 one: 16-bit exponent word, 16 bits
/// of padding, then the 64-bit explicit-integer mantissa.
pub extern "C" fn load_96bit(addr: u32) -> f64 {
    let mem = IdentityMem;
    let exp_word = mem.read_u16(addr);
    let mantissa = (u64::from(mem.read_u32(addr + 4)) << 32) | u64::from(mem.read_u32(addr + 8));
    let sign = exp_word & 0x8000 != 0;
    let exp = i32::from(exp_word & 0x7fff);

    if mantissa == 0 {
        return if sign { -0.0 } else { 0.0 };
    }
    if exp == 0x7fff {
        let v = if mantissa << 1 == 0 { f64::INFINITY } else { f64::NAN };
        return if sign { -v } else { v };
    }
    // value = mantissa * 2^(exp - 16383 - 63)
    let v = mantissa as f64 * 2f64.powi(exp - 16383 - 63);
    if sign { -v } else { v }
}

/// Store a double into guest memory in the 96-bit extended layout.
pub extern "C" fn store_96bit(addr: u32, value: f64) {
    let mut mem = IdentityMem;
    let sign = value.is_sign_negative();
    let mag = value.abs();

    let (exp_word, mantissa) = if mag == 0.0 {
        (0u16, 0u64)
    } else if mag.is_infinite() {
        (0x7fff, 0)
    } else if mag.is_nan() {
        (0x7fff, u64::MAX)
    } else {
        let bits = mag.to_bits();
        let e = ((bits >> 52) & 0x7ff) as i32;
        let frac = bits & 0x000f_ffff_ffff_ffff;
        if e == 0 {
            // Subnormal double: normalise into the explicit-1 format.
            let lz = frac.leading_zeros() as i32;
            ((15372 - lz) as u16, frac << lz)
        } else {
            ((e - 1023 + 16383) as u16, (1u64 << 63) | (frac << 11))
        }
    };

    let mut w0 = u32::from(exp_word) << 16;
    if sign {
        w0 |= 0x8000_0000;
    }
    mem.write_u32(addr, w0);
    mem.write_u32(addr + 4, (mantissa >> 32) as u32);
    mem.write_u32(addr + 8, mantissa as u32);
}

/// Packed-decimal (m68881 P format) to double.
pub extern "C" fn packed_to_double(addr: u32) -> f64 {
    let mem = IdentityMem;
    let w0 = mem.read_u32(addr);
    let mantissa_hi = mem.read_u32(addr + 4);
    let mantissa_lo = mem.read_u32(addr + 8);

    let sign = w0 & 0x8000_0000 != 0;
    let exp_sign = w0 & 0x4000_0000 != 0;
    let mut exponent = 0i32;
    for shift in [24, 20, 16] {
        exponent = exponent * 10 + ((w0 >> shift) & 0xf) as i32;
    }
    if exp_sign {
        exponent = -exponent;
    }

    let mut mantissa = f64::from(w0 & 0xf);
    let digits = (u64::from(mantissa_hi) << 32) | u64::from(mantissa_lo);
    let mut scale = 0i32;
    for i in (0..16).rev() {
        let digit = ((digits >> (4 * i)) & 0xf) as f64;
        mantissa = mantissa * 10.0 + digit;
        scale += 1;
    }
    let v = mantissa * 10f64.powi(exponent - scale);
    if sign { -v } else { v }
}

/// Double to packed decimal with the signed k-factor digit count.
pub extern "C" fn double_to_packed(addr: u32, value: f64, k: i32) {
    let mut mem = IdentityMem;
    let sign = value.is_sign_negative();
    let mag = value.abs();
    let k = k.clamp(-64, 63);
    // Significant digits requested; k <= 0 means digits right of the
    // decimal point, folded into a fixed 17 here.
    let digits = if k > 0 { k.min(17) } else { 17 };

    let (mantissa_digits, exponent) = if mag == 0.0 {
        ([0u8; 17], 0i32)
    } else {
        let exp10 = mag.log10().floor() as i32;
        let mut m = mag / 10f64.powi(exp10);
        let mut out = [0u8; 17];
        for d in out.iter_mut().take(digits as usize) {
            let digit = m.floor().clamp(0.0, 9.0);
            *d = digit as u8;
            m = (m - digit) * 10.0;
        }
        (out, exp10)
    };

    let abs_exp = exponent.unsigned_abs().min(999);
    let mut w0 = (abs_exp / 100) << 24 | (abs_exp / 10 % 10) << 20 | (abs_exp % 10) << 16;
    if sign {
        w0 |= 0x8000_0000;
    }
    if exponent < 0 {
        w0 |= 0x4000_0000;
    }
    w0 |= u32::from(mantissa_digits[0]);
    let mut rest = 0u64;
    for &d in &mantissa_digits[1..] {
        rest = (rest << 4) | u64::from(d);
    }
    mem.write_u32(addr, w0);
    mem.write_u32(addr + 4, (rest >> 32) as u32);
    mem.write_u32(addr + 8, rest as u32);
}

/// Build a helper table pointing at the shims above.
#[must_use]
pub fn helper_table() -> HelperTable {
    let mut math = [0u32; 32];
    math[MathFn::Sin as usize] = m_sin as usize as u32;
    math[MathFn::Cos as usize] = m_cos as usize as u32;
    math[MathFn::Tan as usize] = m_tan as usize as u32;
    math[MathFn::Asin as usize] = m_asin as usize as u32;
    math[MathFn::Acos as usize] = m_acos as usize as u32;
    math[MathFn::Atan as usize] = m_atan as usize as u32;
    math[MathFn::Atanh as usize] = m_atanh as usize as u32;
    math[MathFn::Sinh as usize] = m_sinh as usize as u32;
    math[MathFn::Cosh as usize] = m_cosh as usize as u32;
    math[MathFn::Tanh as usize] = m_tanh as usize as u32;
    math[MathFn::Log as usize] = m_log as usize as u32;
    math[MathFn::Log10 as usize] = m_log10 as usize as u32;
    math[MathFn::Log2 as usize] = m_log2 as usize as u32;
    math[MathFn::Log1p as usize] = m_log1p as usize as u32;
    math[MathFn::Exp as usize] = m_exp as usize as u32;
    math[MathFn::Exp2 as usize] = m_exp2 as usize as u32;
    math[MathFn::Exp10 as usize] = m_exp10 as usize as u32;
    math[MathFn::Expm1 as usize] = m_expm1 as usize as u32;
    math[MathFn::Fmod as usize] = m_fmod as usize as u32;
    math[MathFn::Frem as usize] = m_frem as usize as u32;
    math[MathFn::Scalb as usize] = m_scalb as usize as u32;
    math[MathFn::Rint as usize] = m_rint as usize as u32;
    math[MathFn::PackedToDouble as usize] = packed_to_double as usize as u32;
    math[MathFn::DoubleToPacked as usize] = double_to_packed as usize as u32;
    math[MathFn::Load96 as usize] = load_96bit as usize as u32;
    math[MathFn::Store96 as usize] = store_96bit as usize as u32;

    HelperTable {
        raise_exception: raise_exception as usize as u32,
        write_sr: write_sr as usize as u32,
        idivmod: idivmod as usize as u32,
        uidivmod: uidivmod as usize as u32,
        math,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_packs_quotient_and_remainder() {
        let qr = idivmod(-7, 2);
        assert_eq!(qr as u32 as i32, -3);
        assert_eq!((qr >> 32) as u32 as i32, -1);
        let qr = uidivmod(100, 7);
        assert_eq!(qr as u32, 14);
        assert_eq!((qr >> 32) as u32, 2);
    }

    #[test]
    fn scalb_truncates_the_scale() {
        assert_eq!(m_scalb(1.5, 3.7), 12.0);
        assert_eq!(m_scalb(8.0, -2.0), 2.0);
    }

    #[test]
    fn frem_rounds_to_nearest() {
        // IEEE remainder of 5 by 3 is -1 (quotient rounds to 2).
        assert_eq!(m_frem(5.0, 3.0), -1.0);
        assert_eq!(m_fmod(5.0, 3.0), 2.0);
    }

    #[test]
    fn helper_table_is_fully_populated() {
        let table = helper_table();
        assert_ne!(table.raise_exception, 0);
        assert_ne!(table.write_sr, 0);
        for f in [MathFn::Sin, MathFn::Store96, MathFn::Rint] {
            assert_ne!(table.math[f as usize], 0, "{f:?}");
        }
    }
}
