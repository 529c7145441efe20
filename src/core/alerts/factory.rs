// Alert factory: turns (subject, severity, amounts) into alert records.
//
// Amounts are rendered as plain decimals; currency and locale formatting
// belong to whoever displays the alert.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, Utc};

use super::model::{ActionKind, Alert, AlertKind, Severity, SubjectKey, SuggestedAction};

#[derive(Debug, Default)]
pub struct AlertFactory {
    sequence: AtomicU64,
}

impl AlertFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unique per call: subject, creation time and a monotonic counter.
    fn next_id(&self, subject: &SubjectKey, now: DateTime<Utc>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", subject, now.timestamp_millis(), seq)
    }

    pub fn build_category_alert(
        &self,
        category: &str,
        spent: f64,
        limit: f64,
        severity: Severity,
        now: DateTime<Utc>,
    ) -> Alert {
        let percentage = percent(spent, limit);
        let (title, message) = match severity {
            Severity::Exceeded => (
                format!("{} budget exceeded", category),
                format!(
                    "You've spent {:.2} against your {:.2} {} budget ({:.0}%).",
                    spent, limit, category, percentage
                ),
            ),
            Severity::Critical => (
                format!("{} budget almost used up", category),
                format!(
                    "{:.0}% of your {} budget is gone. Only {:.2} left.",
                    percentage,
                    category,
                    (limit - spent).max(0.0)
                ),
            ),
            Severity::Warning => (
                format!("{} budget at {:.0}%", category, percentage),
                format!("You've used {:.2} of {:.2} for {}.", spent, limit, category),
            ),
        };

        let data = AlertKind::Category {
            category: category.to_string(),
            spent,
            limit,
            percentage,
        };
        self.assemble(data, severity, title, message, now)
    }

    pub fn build_overall_alert(&self, spent: f64, limit: f64, severity: Severity, now: DateTime<Utc>) -> Alert {
        let percentage = percent(spent, limit);
        let (title, message) = match severity {
            Severity::Exceeded => (
                "Monthly budget exceeded".to_string(),
                format!(
                    "Total spending is {:.2}, over your {:.2} monthly budget ({:.0}%).",
                    spent, limit, percentage
                ),
            ),
            Severity::Critical => (
                "Monthly budget almost used up".to_string(),
                format!(
                    "{:.0}% of your monthly budget is spent. {:.2} remaining.",
                    percentage,
                    (limit - spent).max(0.0)
                ),
            ),
            Severity::Warning => (
                format!("Monthly budget at {:.0}%", percentage),
                format!("You've spent {:.2} of your {:.2} monthly budget.", spent, limit),
            ),
        };

        let data = AlertKind::Overall {
            spent,
            limit,
            percentage,
        };
        self.assemble(data, severity, title, message, now)
    }

    /// Velocity alerts are always warnings.
    pub fn build_velocity_alert(
        &self,
        date: NaiveDate,
        today_total: f64,
        average: f64,
        now: DateTime<Utc>,
    ) -> Alert {
        let ratio = if average > 0.0 { today_total / average } else { 0.0 };
        let data = AlertKind::Velocity {
            date,
            today_total,
            average,
            ratio,
        };
        let title = "Spending faster than usual".to_string();
        let message = format!(
            "Today's spending of {:.2} is {:.1}x your recent daily average of {:.2}.",
            today_total, ratio, average
        );
        self.assemble(data, Severity::Warning, title, message, now)
    }

    fn assemble(&self, data: AlertKind, severity: Severity, title: String, message: String, now: DateTime<Utc>) -> Alert {
        let subject = data.subject_key();
        Alert {
            id: self.next_id(&subject, now),
            severity,
            title,
            message,
            icon: icon_for(&subject, severity).to_string(),
            suggested_actions: actions_for(&subject, severity),
            data,
            created_at: now,
        }
    }
}

fn percent(spent: f64, limit: f64) -> f64 {
    if limit > 0.0 {
        spent / limit * 100.0
    } else {
        0.0
    }
}

fn icon_for(subject: &SubjectKey, severity: Severity) -> &'static str {
    match (subject, severity) {
        (SubjectKey::Velocity(_), _) => "trending-up",
        (_, Severity::Exceeded) => "alert-octagon",
        (_, Severity::Critical) => "alert-triangle",
        (_, Severity::Warning) => "info",
    }
}

fn actions_for(subject: &SubjectKey, severity: Severity) -> Vec<SuggestedAction> {
    if let SubjectKey::Velocity(_) = subject {
        return vec![
            SuggestedAction::new("review_spending", "Review today's spending", ActionKind::ReviewSpending),
            SuggestedAction::new("set_daily_limit", "Set a daily limit", ActionKind::SetDailyLimit),
        ];
    }
    match severity {
        Severity::Exceeded => vec![
            SuggestedAction::new("increase_budget", "Increase budget", ActionKind::IncreaseBudget),
            SuggestedAction::new("review_spending", "Review & cut back", ActionKind::ReviewSpending),
        ],
        Severity::Critical => vec![
            SuggestedAction::new("set_daily_limit", "Set a daily limit", ActionKind::SetDailyLimit),
            SuggestedAction::new("view_breakdown", "See where it went", ActionKind::ViewBreakdown),
        ],
        Severity::Warning => vec![SuggestedAction::new("view_tips", "View tips", ActionKind::ViewTips)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 2, 18, 30, 0).unwrap()
    }

    fn action_kinds(alert: &Alert) -> Vec<ActionKind> {
        alert.suggested_actions.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn test_category_exceeded() {
        let factory = AlertFactory::new();
        let alert = factory.build_category_alert("food", 2100.0, 2000.0, Severity::Exceeded, now());

        assert_eq!(alert.subject_key(), SubjectKey::category("food"));
        assert_eq!(alert.severity, Severity::Exceeded);
        assert!(alert.title.contains("food"));
        assert!(alert.message.contains("105%"));
        assert_eq!(action_kinds(&alert), vec![ActionKind::IncreaseBudget, ActionKind::ReviewSpending]);
        match alert.data {
            AlertKind::Category { percentage, .. } => assert!((percentage - 105.0).abs() < 1e-9),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_overall_actions_by_severity() {
        let factory = AlertFactory::new();
        let critical = factory.build_overall_alert(9600.0, 10000.0, Severity::Critical, now());
        assert_eq!(critical.subject_key(), SubjectKey::Overall);
        assert_eq!(action_kinds(&critical), vec![ActionKind::SetDailyLimit, ActionKind::ViewBreakdown]);
        assert!(critical.message.contains("400.00"));

        let warning = factory.build_overall_alert(8100.0, 10000.0, Severity::Warning, now());
        assert_eq!(action_kinds(&warning), vec![ActionKind::ViewTips]);
    }

    #[test]
    fn test_velocity_alert() {
        let factory = AlertFactory::new();
        let date = now().date_naive();
        let alert = factory.build_velocity_alert(date, 250.0, 100.0, now());

        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(alert.subject_key(), SubjectKey::Velocity(date));
        assert!(alert.message.contains("2.5x"));
        assert_eq!(alert.icon, "trending-up");
    }

    #[test]
    fn test_ids_unique_for_identical_input() {
        let factory = AlertFactory::new();
        let ids: HashSet<String> = (0..50)
            .map(|_| factory.build_overall_alert(9000.0, 10000.0, Severity::Warning, now()).id)
            .collect();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn test_templates_deterministic() {
        let factory = AlertFactory::new();
        let a = factory.build_category_alert("rent", 960.0, 1000.0, Severity::Critical, now());
        let b = factory.build_category_alert("rent", 960.0, 1000.0, Severity::Critical, now());
        assert_eq!(a.title, b.title);
        assert_eq!(a.message, b.message);
        assert_eq!(a.suggested_actions, b.suggested_actions);
        assert_ne!(a.id, b.id);
    }
}
