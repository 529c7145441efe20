// Threshold evaluation: spend vs limit ratios and the spending velocity rule.
//
// Everything here is pure. No clocks, no storage.

use serde::{Deserialize, Serialize};

use super::model::Severity;
use crate::core::config::{Thresholds, VelocitySettings};

/// Classify `spent` against `limit` into the single highest severity reached.
/// A missing, non-positive or non-finite limit means nothing to alert on.
pub fn evaluate(spent: f64, limit: f64, thresholds: &Thresholds) -> Option<Severity> {
    if !limit.is_finite() || limit <= 0.0 {
        return None;
    }
    let spent = if spent.is_finite() { spent.max(0.0) } else { 0.0 };
    let ratio = spent / limit;

    if ratio >= thresholds.exceeded {
        Some(Severity::Exceeded)
    } else if ratio >= thresholds.critical {
        Some(Severity::Critical)
    } else if ratio >= thresholds.warning {
        Some(Severity::Warning)
    } else {
        None
    }
}

/// Today's spend is running well ahead of the trailing daily average.
/// A zero average (no history) never triggers.
pub fn is_velocity_spike(today_total: f64, average: f64, settings: &VelocitySettings) -> bool {
    average > 0.0 && today_total > settings.multiplier * average
}

/// Coarse budget standing for a projected month total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    WithinBudget,
    NearBudget,
    OverBudget,
}

/// Over when the projection is more than 10% above the limit, near when above 90%.
pub fn budget_status(projected_total: f64, limit: f64) -> BudgetStatus {
    if projected_total > limit * 1.1 {
        BudgetStatus::OverBudget
    } else if projected_total > limit * 0.9 {
        BudgetStatus::NearBudget
    } else {
        BudgetStatus::WithinBudget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn defaults() -> Thresholds {
        Thresholds::default()
    }

    #[test]
    fn test_tiers_at_boundaries() {
        let t = defaults();
        assert_eq!(evaluate(799.0, 1000.0, &t), None);
        assert_eq!(evaluate(800.0, 1000.0, &t), Some(Severity::Warning));
        assert_eq!(evaluate(949.0, 1000.0, &t), Some(Severity::Warning));
        assert_eq!(evaluate(950.0, 1000.0, &t), Some(Severity::Critical));
        assert_eq!(evaluate(999.99, 1000.0, &t), Some(Severity::Critical));
        assert_eq!(evaluate(1000.0, 1000.0, &t), Some(Severity::Exceeded));
        assert_eq!(evaluate(5000.0, 1000.0, &t), Some(Severity::Exceeded));
    }

    #[test]
    fn test_no_limit_means_no_severity() {
        let t = defaults();
        assert_eq!(evaluate(100.0, 0.0, &t), None);
        assert_eq!(evaluate(100.0, -5.0, &t), None);
        assert_eq!(evaluate(100.0, f64::NAN, &t), None);
        assert_eq!(evaluate(100.0, f64::INFINITY, &t), None);
    }

    #[test]
    fn test_invalid_spend_treated_as_zero() {
        let t = defaults();
        assert_eq!(evaluate(-50.0, 100.0, &t), None);
        assert_eq!(evaluate(f64::NAN, 100.0, &t), None);
    }

    #[test]
    fn test_custom_thresholds() {
        let t = Thresholds {
            warning: 0.5,
            critical: 0.75,
            exceeded: 0.9,
        };
        assert_eq!(evaluate(60.0, 100.0, &t), Some(Severity::Warning));
        assert_eq!(evaluate(90.0, 100.0, &t), Some(Severity::Exceeded));
    }

    #[test]
    fn test_velocity_rule() {
        let v = VelocitySettings::default();
        assert!(is_velocity_spike(250.0, 100.0, &v));
        assert!(!is_velocity_spike(150.0, 100.0, &v));
        assert!(!is_velocity_spike(200.0, 100.0, &v), "strictly greater than 2x");
        assert!(!is_velocity_spike(1_000.0, 0.0, &v));
    }

    #[test]
    fn test_budget_status() {
        assert_eq!(budget_status(8_000.0, 10_000.0), BudgetStatus::WithinBudget);
        assert_eq!(budget_status(9_500.0, 10_000.0), BudgetStatus::NearBudget);
        assert_eq!(budget_status(11_500.0, 10_000.0), BudgetStatus::OverBudget);
    }

    proptest! {
        #[test]
        fn prop_monotonic_in_spend(limit in 0.01f64..1e7, a in 0.0f64..2e7, b in 0.0f64..2e7) {
            let t = defaults();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(evaluate(lo, limit, &t) <= evaluate(hi, limit, &t));
        }

        #[test]
        fn prop_non_positive_limit_never_alerts(spent in -1e7f64..1e7, limit in -1e7f64..=0.0) {
            prop_assert_eq!(evaluate(spent, limit, &defaults()), None);
        }
    }
}
