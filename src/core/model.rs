use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type CategoryName = String;

/// A single expense, as recorded upstream by the expense-entry flow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpenseEvent {
    pub amount: f64,
    pub category: CategoryName,
    pub occurred_at: DateTime<Utc>,
}

impl ExpenseEvent {
    pub fn new(amount: f64, category: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            amount,
            category: category.into(),
            occurred_at,
        }
    }
}

/// Budget limits supplied fresh by the caller on every event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    /// Aggregate (monthly) limit
    pub overall: f64,
    /// Per-category limits
    #[serde(default)]
    pub categories: HashMap<CategoryName, f64>,
}

impl BudgetSnapshot {
    pub fn new(overall: f64) -> Self {
        Self {
            overall,
            categories: HashMap::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>, limit: f64) -> Self {
        self.categories.insert(category.into(), limit);
        self
    }

    /// Limit for a category; 0 when none is configured.
    pub fn category_limit(&self, category: &str) -> f64 {
        self.categories.get(category).copied().unwrap_or(0.0)
    }
}

/// Spend-to-date totals computed by the caller. Never stored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendTotals {
    pub overall: f64,
    #[serde(default)]
    pub categories: HashMap<CategoryName, f64>,
}

impl SpendTotals {
    pub fn new(overall: f64) -> Self {
        Self {
            overall,
            categories: HashMap::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>, spent: f64) -> Self {
        self.categories.insert(category.into(), spent);
        self
    }

    pub fn category_spent(&self, category: &str) -> f64 {
        self.categories.get(category).copied().unwrap_or(0.0)
    }
}

/// Clamp a caller-supplied money value: negatives and non-finite values become 0.
pub fn sanitize_amount(value: f64, what: &str) -> f64 {
    if !value.is_finite() || value < 0.0 {
        warn!("Ignoring invalid {} value {}; treating as 0", what, value);
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_category_reads_as_zero() {
        let budget = BudgetSnapshot::new(10_000.0).with_category("food", 2_000.0);
        assert_eq!(budget.category_limit("food"), 2_000.0);
        assert_eq!(budget.category_limit("transport"), 0.0);

        let totals = SpendTotals::new(500.0);
        assert_eq!(totals.category_spent("food"), 0.0);
    }

    #[test]
    fn test_sanitize_amount() {
        assert_eq!(sanitize_amount(12.5, "amount"), 12.5);
        assert_eq!(sanitize_amount(-3.0, "amount"), 0.0);
        assert_eq!(sanitize_amount(f64::NAN, "amount"), 0.0);
        assert_eq!(sanitize_amount(f64::INFINITY, "amount"), 0.0);
    }

    #[test]
    fn test_snapshot_deserializes_without_categories() {
        let budget: BudgetSnapshot = serde_json::from_str(r#"{"overall": 5000}"#).unwrap();
        assert_eq!(budget.overall, 5000.0);
        assert!(budget.categories.is_empty());
    }
}
