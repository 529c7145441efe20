// Bounded alert history (FIFO eviction) and statistics over what it retains.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use super::model::{Alert, Severity};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertStats {
    pub total_alerts: usize,
    /// Keyed by subject kind: "overall", "category", "velocity"
    pub by_type: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

pub struct AlertHistory {
    capacity: usize,
    alerts: VecDeque<Alert>,
}

impl AlertHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            alerts: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, alert: Alert) {
        while self.alerts.len() >= self.capacity {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    /// The most recent `limit` alerts, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        self.alerts.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> AlertStats {
        let mut stats = AlertStats {
            total_alerts: self.alerts.len(),
            ..AlertStats::default()
        };
        for alert in &self.alerts {
            *stats
                .by_type
                .entry(alert.subject_key().kind_label().to_string())
                .or_insert(0) += 1;
            *stats.by_severity.entry(alert.severity).or_insert(0) += 1;
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }
}
