use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

/// Fixed-point decimal value: an i128 mantissa at a known scale.
///
/// Backends hand decimals to the bridge as text; parsing into a scaled
/// mantissa keeps the value exact until it is rescaled to the column's scale
/// right before encoding. 38 digits (the ClickHouse maximum) fit an i128 with
/// room to spare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    mantissa: i128,
    scale: u32,
}

impl Decimal {
    pub const ZERO: Decimal = Decimal { mantissa: 0, scale: 0 };

    pub fn new(mantissa: i128, scale: u32) -> Self {
        Decimal { mantissa, scale }
    }

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Returns the mantissa re-expressed at `scale`, rounding half away from
    /// zero when digits are dropped.
    pub fn rescale(&self, scale: u32) -> Result<i128, BridgeError> {
        if scale >= self.scale {
            let factor = pow10(scale - self.scale)?;
            self.mantissa
                .checked_mul(factor)
                .ok_or_else(|| BridgeError::encoding(format!("decimal overflow rescaling {self} to scale {scale}")))
        } else {
            let factor = pow10(self.scale - scale)?;
            let quotient = self.mantissa / factor;
            let remainder = (self.mantissa % factor).abs();
            if remainder * 2 >= factor {
                Ok(quotient + self.mantissa.signum())
            } else {
                Ok(quotient)
            }
        }
    }

    /// Whether the value at the given scale fits `precision` total digits.
    pub fn fits(&self, precision: i32, scale: u32) -> Result<bool, BridgeError> {
        let mantissa = self.rescale(scale)?;
        Ok(mantissa.unsigned_abs() < pow10(precision as u32)? as u128)
    }
}

fn pow10(exp: u32) -> Result<i128, BridgeError> {
    10i128
        .checked_pow(exp)
        .ok_or_else(|| BridgeError::encoding(format!("unsupported decimal scale {exp}")))
}

impl FromStr for Decimal {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || BridgeError::parse(format!("invalid decimal value [{s}]"));

        let (negative, digits) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            Some(_) => (false, s),
            None => return Err(bad()),
        };

        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };

        if int_part.is_empty() && frac_part.is_empty() {
            return Err(bad());
        }

        let mut mantissa: i128 = 0;
        for b in int_part.bytes().chain(frac_part.bytes()) {
            if !b.is_ascii_digit() {
                return Err(bad());
            }
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add((b - b'0') as i128))
                .ok_or_else(bad)?;
        }

        if negative {
            mantissa = -mantissa;
        }

        Ok(Decimal { mantissa, scale: frac_part.len() as u32 })
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }

        let sign = if self.mantissa < 0 { "-" } else { "" };
        let digits = self.mantissa.unsigned_abs().to_string();
        if digits.len() <= self.scale as usize {
            write!(f, "{sign}0.{digits:0>width$}", width = self.scale as usize)
        } else {
            let split = digits.len() - self.scale as usize;
            write!(f, "{sign}{}.{}", &digits[..split], &digits[split..])
        }
    }
}
