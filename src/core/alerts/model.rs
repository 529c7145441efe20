// Alert model types: severities, subject keys, alert records and monitor events.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Severity tier. Ordering is `Warning < Critical < Exceeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Spend crossed the warning ratio (default 80%)
    Warning,
    /// Spend crossed the critical ratio (default 95%)
    Critical,
    /// Spend reached or passed the limit
    Exceeded,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Exceeded => "exceeded",
        }
    }

    pub fn all() -> &'static [Severity] {
        &[Self::Warning, Self::Critical, Self::Exceeded]
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an alert (and its cooldown) is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SubjectKey {
    Overall,
    Category(String),
    Velocity(NaiveDate),
}

impl SubjectKey {
    pub fn category(name: impl Into<String>) -> Self {
        Self::Category(name.into())
    }

    /// Short label used for per-type statistics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Overall => "overall",
            Self::Category(_) => "category",
            Self::Velocity(_) => "velocity",
        }
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overall => f.write_str("overall"),
            Self::Category(name) => write!(f, "category:{}", name),
            Self::Velocity(date) => write!(f, "velocity:{}", date.format("%Y-%m-%d")),
        }
    }
}

/// Follow-up a user can take from an alert card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    IncreaseBudget,
    ReviewSpending,
    SetDailyLimit,
    ViewTips,
    ViewBreakdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub id: String,
    pub label: String,
    pub kind: ActionKind,
}

impl SuggestedAction {
    pub fn new(id: &str, label: &str, kind: ActionKind) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind,
        }
    }
}

/// Subject-specific payload of an alert. The subject key is derived from it,
/// so an alert can never carry numbers that belong to a different subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AlertKind {
    Category {
        category: String,
        spent: f64,
        limit: f64,
        percentage: f64,
    },
    Overall {
        spent: f64,
        limit: f64,
        percentage: f64,
    },
    Velocity {
        date: NaiveDate,
        today_total: f64,
        average: f64,
        ratio: f64,
    },
}

impl AlertKind {
    pub fn subject_key(&self) -> SubjectKey {
        match self {
            Self::Category { category, .. } => SubjectKey::Category(category.clone()),
            Self::Overall { .. } => SubjectKey::Overall,
            Self::Velocity { date, .. } => SubjectKey::Velocity(*date),
        }
    }
}

/// Alert record delivered to subscribers. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub icon: String,
    pub suggested_actions: Vec<SuggestedAction>,
    pub data: AlertKind,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn subject_key(&self) -> SubjectKey {
        self.data.subject_key()
    }
}

/// Event broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum MonitorEvent {
    /// One batch per processed expense that fired at least one alert
    #[serde(rename = "alerts")]
    Alerts { alerts: Vec<Alert> },
    /// Liveness signal from the periodic timer. Carries no budget verdict.
    #[serde(rename = "system/periodic_check")]
    PeriodicCheck {
        at: DateTime<Utc>,
        history_len: usize,
        total_alerts: usize,
    },
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Alerts { .. } => "alerts",
            Self::PeriodicCheck { .. } => "system/periodic_check",
        }
    }
}
