// Alert manager - orchestrates evaluation, cooldowns, history and delivery.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Datelike, NaiveDate};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::cooldown::CooldownRegistry;
use super::factory::AlertFactory;
use super::history::{AlertHistory, AlertStats};
use super::model::{Alert, MonitorEvent, Severity, SubjectKey};
use super::subscribers::{SubscriberError, SubscriberRegistry, Subscription};
use super::triggers::{budget_status, evaluate, is_velocity_spike, BudgetStatus};
use crate::core::clock::Clock;
use crate::core::config::{ConfigError, MonitorSettings};
use crate::core::model::{sanitize_amount, BudgetSnapshot, ExpenseEvent, SpendTotals};
use crate::core::store::{KeyValueStore, ReadBudget, WriteBehind};
use crate::core::velocity::VelocityTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorState {
    Stopped,
    Monitoring,
}

/// State mutated by expense processing. Only ever touched under one lock,
/// so check-then-mark on a cooldown cannot interleave.
struct EvaluationState {
    cooldowns: CooldownRegistry,
    velocity: VelocityTracker,
}

pub struct AlertManager {
    settings: MonitorSettings,
    clock: Arc<dyn Clock>,
    writer: WriteBehind,
    factory: AlertFactory,
    evaluation: Mutex<EvaluationState>,
    history: Arc<Mutex<AlertHistory>>,
    subscribers: Arc<SubscriberRegistry>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl AlertManager {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self::build(MonitorSettings::default(), store, clock)
    }

    pub fn with_settings(
        settings: MonitorSettings,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self::build(settings, store, clock))
    }

    fn build(settings: MonitorSettings, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let writer = WriteBehind::new(store, settings.storage_timeout());
        let evaluation = EvaluationState {
            cooldowns: CooldownRegistry::new(settings.cooldowns, writer.clone()),
            velocity: VelocityTracker::new(writer.clone(), settings.velocity.window_days),
        };
        Self {
            history: Arc::new(Mutex::new(AlertHistory::new(settings.history_capacity))),
            settings,
            clock,
            writer,
            factory: AlertFactory::new(),
            evaluation: Mutex::new(evaluation),
            subscribers: Arc::new(SubscriberRegistry::new()),
            timer: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Evaluate one recorded expense. Returns the alerts that fired, which may
    /// be none. Storage and subscriber faults are logged, never returned.
    ///
    /// Only the event's own category is evaluated; other categories' totals
    /// did not change. Store reads share one storage timeout per call.
    pub fn process_expense_event(
        &self,
        user_id: &str,
        event: &ExpenseEvent,
        budget: &BudgetSnapshot,
        totals: &SpendTotals,
    ) -> Vec<Alert> {
        let now = self.clock.now();
        let reads = self.writer.read_budget();
        let thresholds = &self.settings.thresholds;
        let amount = sanitize_amount(event.amount, "expense amount");
        let mut alerts = Vec::new();

        {
            let mut state = lock(&self.evaluation);
            state.cooldowns.prune(now);
            state
                .velocity
                .record_expense(user_id, amount, &event.category, event.occurred_at, now, &reads);

            let spent = sanitize_amount(totals.category_spent(&event.category), "category total");
            let limit = budget.category_limit(&event.category);
            if let Some(severity) = evaluate(spent, limit, thresholds) {
                let subject = SubjectKey::category(event.category.as_str());
                if Self::claim(&mut state.cooldowns, &subject, severity, now, &reads) {
                    alerts.push(
                        self.factory
                            .build_category_alert(&event.category, spent, limit, severity, now),
                    );
                }
            }

            let spent = sanitize_amount(totals.overall, "overall total");
            if let Some(severity) = evaluate(spent, budget.overall, thresholds) {
                if Self::claim(&mut state.cooldowns, &SubjectKey::Overall, severity, now, &reads) {
                    alerts.push(self.factory.build_overall_alert(spent, budget.overall, severity, now));
                }
            }

            if self.settings.velocity.enabled {
                let reading = state
                    .velocity
                    .reading(user_id, now, self.settings.velocity.window_days, &reads);
                if let Some(reading) = reading {
                    if is_velocity_spike(reading.today_total, reading.average, &self.settings.velocity) {
                        let date = VelocityTracker::bucket_date(now);
                        let subject = SubjectKey::Velocity(date);
                        if Self::claim(&mut state.cooldowns, &subject, Severity::Warning, now, &reads) {
                            alerts.push(self.factory.build_velocity_alert(
                                date,
                                reading.today_total,
                                reading.average,
                                now,
                            ));
                        }
                    }
                }
            }
        }

        if alerts.is_empty() {
            return alerts;
        }

        {
            let mut history = lock(&self.history);
            for alert in &alerts {
                debug!("Alert fired: {} {} ({})", alert.subject_key(), alert.severity, alert.id);
                history.push(alert.clone());
            }
        }
        self.subscribers.broadcast(MonitorEvent::Alerts {
            alerts: alerts.clone(),
        });
        alerts
    }

    /// Check suppression and mark the cooldown in one step.
    fn claim(
        cooldowns: &mut CooldownRegistry,
        subject: &SubjectKey,
        severity: Severity,
        now: chrono::DateTime<chrono::Utc>,
        reads: &ReadBudget,
    ) -> bool {
        if cooldowns.is_suppressed(subject, severity, now, reads) {
            return false;
        }
        cooldowns.mark_fired(subject, severity, now);
        true
    }

    /// Where the month's overall spend is heading, projected linearly from
    /// spend to date. `None` when there is no overall budget.
    pub fn budget_status(&self, totals: &SpendTotals, budget: &BudgetSnapshot) -> Option<BudgetStatus> {
        let limit = sanitize_amount(budget.overall, "overall limit");
        if limit <= 0.0 {
            return None;
        }
        let today = self.clock.now().date_naive();
        let elapsed = f64::from(today.day());
        let projected = sanitize_amount(totals.overall, "overall total") / elapsed * f64::from(days_in_month(today));
        Some(budget_status(projected, limit))
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MonitorEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    /// Most recent alerts, newest first.
    pub fn history(&self, limit: usize) -> Vec<Alert> {
        lock(&self.history).recent(limit)
    }

    pub fn stats(&self) -> AlertStats {
        lock(&self.history).stats()
    }

    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }

    pub fn state(&self) -> MonitorState {
        match lock(&self.timer).as_ref() {
            Some(task) if !task.is_finished() => MonitorState::Monitoring,
            _ => MonitorState::Stopped,
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.state() == MonitorState::Monitoring
    }

    /// Arm the periodic heartbeat. Needs a tokio runtime; without one the
    /// monitor stays stopped.
    pub fn start(&self) -> MonitorState {
        let mut timer = lock(&self.timer);
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Alert monitor already running");
            return MonitorState::Monitoring;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!("No tokio runtime; alert monitor not started");
            return MonitorState::Stopped;
        };

        let period = self.settings.check_interval();
        let history = Arc::clone(&self.history);
        let subscribers = Arc::clone(&self.subscribers);
        let clock = Arc::clone(&self.clock);

        *timer = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let (history_len, total_alerts) = {
                    let history = lock(&history);
                    (history.len(), history.stats().total_alerts)
                };
                subscribers.broadcast(MonitorEvent::PeriodicCheck {
                    at: clock.now(),
                    history_len,
                    total_alerts,
                });
            }
        }));
        info!("Alert monitor started, checking every {:?}", period);
        MonitorState::Monitoring
    }

    /// Disarm the heartbeat and wait for pending storage writes.
    pub async fn stop(&self) {
        let task = lock(&self.timer).take();
        if let Some(task) = task {
            task.abort();
            info!("Alert monitor stopped");
        }
        self.flush().await;
    }

    /// Wait for every storage write queued so far.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(31, |last| last.day())
}

impl Drop for AlertManager {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.timer).take() {
            task.abort();
        }
    }
}
