//! Fixed-point quantity/money type.
//!
//! spec.md §9 rules out binary floating point for inventory and money math.
//! Grounded directly in the teacher's `backtest_v2::ledger::Amount` (an
//! `i128` scaled by 1e8, "like satoshis but for USDC") — reused here at a
//! coarser scale (1e6) since inventory quantities and per-unit costs need
//! fewer decimal places than sub-cent trading P&L.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Scale factor: 1 unit = 1_000_000 ticks (six decimal places).
pub const SCALE: i128 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fixed(pub i128);

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);

    pub fn from_f64(value: f64) -> Self {
        Fixed((value * SCALE as f64).round() as i128)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    pub fn from_ticks(ticks: i128) -> Self {
        Fixed(ticks)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn abs(self) -> Fixed {
        Fixed(self.0.abs())
    }

    pub fn min(self, other: Fixed) -> Fixed {
        if self < other {
            self
        } else {
            other
        }
    }

    pub fn max(self, other: Fixed) -> Fixed {
        if self > other {
            self
        } else {
            other
        }
    }

    /// Ceiling of a non-negative quantity, used by the reorder suggestion
    /// generator (spec.md §4.12) which wants whole-unit suggestions.
    pub fn ceil_units(self) -> i64 {
        if self.0 <= 0 {
            return 0;
        }
        ((self.0 + SCALE - 1) / SCALE) as i64
    }
}

impl Default for Fixed {
    fn default() -> Self {
        Fixed::ZERO
    }
}

impl Add for Fixed {
    type Output = Fixed;
    fn add(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 + rhs.0)
    }
}

impl AddAssign for Fixed {
    fn add_assign(&mut self, rhs: Fixed) {
        self.0 += rhs.0;
    }
}

impl Sub for Fixed {
    type Output = Fixed;
    fn sub(self, rhs: Fixed) -> Fixed {
        Fixed(self.0 - rhs.0)
    }
}

impl SubAssign for Fixed {
    fn sub_assign(&mut self, rhs: Fixed) {
        self.0 -= rhs.0;
    }
}

impl Neg for Fixed {
    type Output = Fixed;
    fn neg(self) -> Fixed {
        Fixed(-self.0)
    }
}

/// Multiplying two fixed-point values divides the scale out once.
impl Mul for Fixed {
    type Output = Fixed;
    fn mul(self, rhs: Fixed) -> Fixed {
        Fixed((self.0 * rhs.0) / SCALE)
    }
}

impl Div for Fixed {
    type Output = Fixed;
    fn div(self, rhs: Fixed) -> Fixed {
        Fixed((self.0 * SCALE) / rhs.0)
    }
}

impl fmt::Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_roundtrips() {
        let a = Fixed::from_f64(10.5);
        let b = Fixed::from_f64(3.25);
        assert!((((a + b).to_f64()) - 13.75).abs() < 1e-9);
        assert!((((a - b).to_f64()) - 7.25).abs() < 1e-9);
    }

    #[test]
    fn mul_div_scale_correctly() {
        let qty = Fixed::from_f64(10.0);
        let price = Fixed::from_f64(2.5);
        let total = qty * price;
        assert!((total.to_f64() - 25.0).abs() < 1e-6);
        let back = total / price;
        assert!((back.to_f64() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn ceil_units_rounds_up_nonnegative() {
        assert_eq!(Fixed::from_f64(2.1).ceil_units(), 3);
        assert_eq!(Fixed::from_f64(2.0).ceil_units(), 2);
        assert_eq!(Fixed::from_f64(-1.0).ceil_units(), 0);
        assert_eq!(Fixed::ZERO.ceil_units(), 0);
    }
}
