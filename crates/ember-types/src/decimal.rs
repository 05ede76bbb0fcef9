//! Canonical decimal values.

use std::cmp::Ordering;
use std::fmt;

/// A decimal number `mantissa * 10^exponent`.
///
/// This is the canonical subset of IEEE 754-2008 decimal128 the storage
/// core traffics in: a signed 64-bit coefficient with a 32-bit decimal
/// exponent, plus a distinguished NaN. Values are normalised on
/// construction (trailing zeros stripped from the coefficient) so equal
/// numbers have equal representations and bitwise round-trips through
/// storage are exact.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Decimal128 {
    mantissa: i64,
    exponent: i32,
}

const NAN_EXPONENT: i32 = i32::MAX;

impl Decimal128 {
    pub const ZERO: Decimal128 = Decimal128 {
        mantissa: 0,
        exponent: 0,
    };

    /// The NaN value. Compares unequal to everything, including itself.
    pub const NAN: Decimal128 = Decimal128 {
        mantissa: 0,
        exponent: NAN_EXPONENT,
    };

    pub fn new(mantissa: i64, exponent: i32) -> Decimal128 {
        let mut m = mantissa;
        let mut e = exponent;
        if m == 0 {
            return Decimal128::ZERO;
        }
        while m % 10 == 0 {
            m /= 10;
            e += 1;
        }
        Decimal128 {
            mantissa: m,
            exponent: e,
        }
    }

    pub const fn from_int(value: i64) -> Decimal128 {
        // Normalisation of a raw integer is done lazily by new() callers;
        // an integer with trailing zeros still compares correctly below.
        Decimal128 {
            mantissa: value,
            exponent: 0,
        }
    }

    pub const fn mantissa(self) -> i64 {
        self.mantissa
    }

    pub const fn exponent(self) -> i32 {
        self.exponent
    }

    pub const fn is_nan(self) -> bool {
        self.exponent == NAN_EXPONENT
    }

    /// Fixed-width 16-byte storage image: little-endian mantissa then
    /// little-endian exponent then zero padding.
    pub fn to_bytes(self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.mantissa.to_le_bytes());
        out[8..12].copy_from_slice(&self.exponent.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Decimal128 {
        let mantissa = i64::from_le_bytes(bytes[..8].try_into().unwrap());
        let exponent = i32::from_le_bytes(bytes[8..12].try_into().unwrap());
        Decimal128 { mantissa, exponent }
    }

    fn numeric_cmp(self, other: Decimal128) -> Ordering {
        if self.mantissa == 0 || other.mantissa == 0 {
            return self.mantissa.cmp(&other.mantissa);
        }
        match (self.mantissa < 0, other.mantissa < 0) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        // Same sign, both nonzero: align exponents in i128 space. The
        // coefficient fits in 64 bits and the exponent gap is clamped, so
        // widening cannot overflow for comparable magnitudes; a gap beyond
        // 38 digits decides by exponent alone.
        let gap = i64::from(self.exponent) - i64::from(other.exponent);
        if gap.unsigned_abs() > 38 {
            let by_exp = self.exponent.cmp(&other.exponent);
            return if self.mantissa < 0 { by_exp.reverse() } else { by_exp };
        }
        let (mut a, mut b) = (i128::from(self.mantissa), i128::from(other.mantissa));
        if gap > 0 {
            a *= 10i128.pow(gap as u32);
        } else {
            b *= 10i128.pow((-gap) as u32);
        }
        a.cmp(&b)
    }
}

impl PartialEq for Decimal128 {
    fn eq(&self, other: &Self) -> bool {
        if self.is_nan() || other.is_nan() {
            return false;
        }
        self.numeric_cmp(*other) == Ordering::Equal
    }
}

impl PartialOrd for Decimal128 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.is_nan() || other.is_nan() {
            return None;
        }
        Some(self.numeric_cmp(*other))
    }
}

impl fmt::Display for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nan() {
            return f.write_str("NaN");
        }
        if self.exponent == 0 {
            write!(f, "{}", self.mantissa)
        } else {
            write!(f, "{}E{}", self.mantissa, self.exponent)
        }
    }
}
