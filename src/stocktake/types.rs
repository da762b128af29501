//! Stock-take data model (spec.md §3, §4.9).

use serde::{Deserialize, Serialize};

use crate::money::Fixed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockTakeStatus {
    InProgress,
    PendingApproval,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum VarianceSeverity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// `variancePct` is `variance / theoretical · 100`, with the `0/0 -> 0`,
/// `x/0 -> 100·sign(x)` edge cases spec.md §4.9 calls out explicitly.
pub fn variance_pct(variance: Fixed, theoretical: Fixed) -> Fixed {
    if theoretical.is_zero() {
        if variance.is_zero() {
            Fixed::ZERO
        } else if variance.is_positive() {
            Fixed::from_f64(100.0)
        } else {
            Fixed::from_f64(-100.0)
        }
    } else {
        (variance / theoretical) * Fixed::from_f64(100.0)
    }
}

/// Severity bands use the *absolute* percentage (spec.md §4.9):
/// none(0) | low(<2%) | medium(<5%) | high(<10%) | critical(>=10%).
pub fn classify_severity(variance_pct: Fixed) -> VarianceSeverity {
    let abs_pct = variance_pct.abs();
    if abs_pct.is_zero() {
        VarianceSeverity::None
    } else if abs_pct < Fixed::from_f64(2.0) {
        VarianceSeverity::Low
    } else if abs_pct < Fixed::from_f64(5.0) {
        VarianceSeverity::Medium
    } else if abs_pct < Fixed::from_f64(10.0) {
        VarianceSeverity::High
    } else {
        VarianceSeverity::Critical
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockTakeLine {
    pub ingredient_id: String,
    pub theoretical_qty: Fixed,
    pub theoretical_wac: Fixed,
    pub counted_qty: Option<Fixed>,
    pub variance: Option<Fixed>,
    pub variance_pct: Option<Fixed>,
    pub severity: Option<VarianceSeverity>,
    pub batch_number: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub counted_by: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variance_pct_handles_zero_theoretical() {
        assert_eq!(variance_pct(Fixed::ZERO, Fixed::ZERO), Fixed::ZERO);
        assert_eq!(variance_pct(Fixed::from_f64(3.0), Fixed::ZERO), Fixed::from_f64(100.0));
        assert_eq!(variance_pct(Fixed::from_f64(-3.0), Fixed::ZERO), Fixed::from_f64(-100.0));
    }

    #[test]
    fn severity_bands_use_absolute_percentage() {
        assert_eq!(classify_severity(Fixed::from_f64(0.0)), VarianceSeverity::None);
        assert_eq!(classify_severity(Fixed::from_f64(-1.5)), VarianceSeverity::Low);
        assert_eq!(classify_severity(Fixed::from_f64(4.9)), VarianceSeverity::Medium);
        assert_eq!(classify_severity(Fixed::from_f64(-9.99)), VarianceSeverity::High);
        assert_eq!(classify_severity(Fixed::from_f64(10.0)), VarianceSeverity::Critical);
    }
}
