//! Per-user daily spend buckets and trailing daily averages.
//!
//! Days are bucketed by UTC calendar date. Buckets are loaded from the store
//! the first time they are needed. A bucket whose read failed stays unconfirmed:
//! expenses recorded into it are held in memory and merged behind the stored
//! entries once a later read succeeds, and only then written back.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::store::{ReadBudget, StoreKey, WriteBehind};

/// How far ahead of the clock an expense may be dated before it is ignored.
const MAX_FUTURE_SKEW_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendEntry {
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub category: String,
}

/// Today's spend against the trailing average, read from confirmed buckets only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityReading {
    pub today_total: f64,
    pub average: f64,
}

type BucketKey = (String, NaiveDate);

fn store_key(key: &BucketKey) -> StoreKey {
    StoreKey::DailySpend {
        user: key.0.clone(),
        date: key.1,
    }
}

pub struct VelocityTracker {
    writer: WriteBehind,
    /// Days kept before a bucket is pruned (in addition to the current day)
    retention_days: u32,
    buckets: HashMap<BucketKey, Vec<SpendEntry>>,
    /// Buckets whose stored copy has been read
    hydrated: HashSet<BucketKey>,
}

impl VelocityTracker {
    pub fn new(writer: WriteBehind, retention_days: u32) -> Self {
        Self {
            writer,
            retention_days: retention_days.max(7),
            buckets: HashMap::new(),
            hydrated: HashSet::new(),
        }
    }

    pub fn bucket_date(timestamp: DateTime<Utc>) -> NaiveDate {
        timestamp.date_naive()
    }

    /// Append an expense to its day's bucket and persist the bucket.
    ///
    /// Expenses dated more than a day ahead of `now` are ignored. Smaller skew
    /// is clamped to `now`. Expenses older than the retention window are ignored.
    pub fn record_expense(
        &mut self,
        user: &str,
        amount: f64,
        category: &str,
        occurred_at: DateTime<Utc>,
        now: DateTime<Utc>,
        budget: &ReadBudget,
    ) {
        let today = Self::bucket_date(now);
        self.prune(today);

        if occurred_at > now + Duration::hours(MAX_FUTURE_SKEW_HOURS) {
            warn!(
                "Ignoring expense for {} dated {} for velocity, clock reads {}",
                user, occurred_at, now
            );
            return;
        }
        let timestamp = occurred_at.min(now);
        let date = Self::bucket_date(timestamp);
        if self.cutoff(today).is_some_and(|cutoff| date < cutoff) {
            debug!("Expense for {} on {} is older than the velocity window", user, date);
            return;
        }

        let key = (user.to_string(), date);
        let confirmed = self.load(std::slice::from_ref(&key), budget);
        self.buckets.entry(key.clone()).or_default().push(SpendEntry {
            amount,
            timestamp,
            category: category.to_string(),
        });

        if confirmed {
            self.persist(&key);
        } else {
            debug!("Holding spend for {} on {} until its bucket can be read", user, date);
        }
    }

    /// Spend recorded in memory for one day. Call after the day is loaded.
    fn day_total(&self, user: &str, date: NaiveDate) -> f64 {
        self.buckets
            .get(&(user.to_string(), date))
            .map(|entries| entries.iter().map(|e| e.amount).sum())
            .unwrap_or(0.0)
    }

    pub fn today_total(&mut self, user: &str, now: DateTime<Utc>, budget: &ReadBudget) -> f64 {
        let today = Self::bucket_date(now);
        self.load(&[(user.to_string(), today)], budget);
        self.day_total(user, today)
    }

    /// Mean daily spend over the `days` calendar days before `now`'s date,
    /// counting only days that have recorded spend. 0 when there are none.
    pub fn trailing_average(&mut self, user: &str, now: DateTime<Utc>, days: u32, budget: &ReadBudget) -> f64 {
        let today = Self::bucket_date(now);
        let window = Self::window(user, today, days);
        self.load(&window, budget);
        self.average(user, &window)
    }

    /// Today's total and the trailing average, or `None` while any of the
    /// days involved could not be read from the store.
    pub fn reading(
        &mut self,
        user: &str,
        now: DateTime<Utc>,
        days: u32,
        budget: &ReadBudget,
    ) -> Option<VelocityReading> {
        let today = Self::bucket_date(now);
        let window = Self::window(user, today, days);
        let mut wanted = window.clone();
        wanted.push((user.to_string(), today));

        if !self.load(&wanted, budget) {
            warn!("Spend history for {} is incomplete, skipping velocity check", user);
            return None;
        }
        Some(VelocityReading {
            today_total: self.day_total(user, today),
            average: self.average(user, &window),
        })
    }

    fn window(user: &str, today: NaiveDate, days: u32) -> Vec<BucketKey> {
        (1..=u64::from(days))
            .map_while(|back| today.checked_sub_days(Days::new(back)))
            .map(|date| (user.to_string(), date))
            .collect()
    }

    fn average(&self, user: &str, window: &[BucketKey]) -> f64 {
        let totals: Vec<f64> = window
            .iter()
            .map(|(_, date)| self.day_total(user, *date))
            .filter(|total| *total > 0.0)
            .collect();
        if totals.is_empty() {
            0.0
        } else {
            totals.iter().sum::<f64>() / totals.len() as f64
        }
    }

    /// Read every bucket in `keys` not yet confirmed. Returns true when all of
    /// them are confirmed afterwards.
    fn load(&mut self, keys: &[BucketKey], budget: &ReadBudget) -> bool {
        let missing: Vec<BucketKey> = keys
            .iter()
            .filter(|key| !self.hydrated.contains(*key))
            .cloned()
            .collect();
        if missing.is_empty() {
            return true;
        }

        let store_keys: Vec<StoreKey> = missing.iter().map(store_key).collect();
        let results = self.writer.get_many(&store_keys, budget);

        let mut confirmed = true;
        for ((key, store_key), result) in missing.into_iter().zip(store_keys).zip(results) {
            match result {
                Ok(raw) => self.merge_stored(key, &store_key, raw),
                Err(e) => {
                    warn!("Spend bucket read for {} failed: {}", store_key.render(), e);
                    confirmed = false;
                }
            }
        }
        confirmed
    }

    /// Put stored entries ahead of anything recorded while the bucket was
    /// unconfirmed, then write back if that changed the stored copy.
    fn merge_stored(&mut self, key: BucketKey, store_key: &StoreKey, raw: Option<String>) {
        let stored = match raw {
            Some(raw) => serde_json::from_str::<Vec<SpendEntry>>(&raw).unwrap_or_else(|e| {
                warn!("Discarding corrupt spend bucket {}: {}", store_key.render(), e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        self.hydrated.insert(key.clone());

        let pending = self.buckets.remove(&key).unwrap_or_default();
        let held_back = !pending.is_empty();
        let mut merged = stored;
        merged.extend(pending);
        if !merged.is_empty() {
            self.buckets.insert(key.clone(), merged);
        }
        if held_back {
            self.persist(&key);
        }
    }

    fn persist(&self, key: &BucketKey) {
        let Some(bucket) = self.buckets.get(key) else {
            return;
        };
        match serde_json::to_string(bucket) {
            Ok(value) => self.writer.set(store_key(key), value),
            Err(e) => warn!("Could not serialize spend bucket for {} on {}: {}", key.0, key.1, e),
        }
    }

    fn cutoff(&self, today: NaiveDate) -> Option<NaiveDate> {
        today.checked_sub_days(Days::new(u64::from(self.retention_days)))
    }

    /// Drop every bucket and lookup marker that fell out of the retention window.
    fn prune(&mut self, today: NaiveDate) {
        let Some(cutoff) = self.cutoff(today) else {
            return;
        };
        let stale: Vec<BucketKey> = self
            .buckets
            .keys()
            .filter(|(_, date)| *date < cutoff)
            .cloned()
            .collect();

        for key in stale {
            self.buckets.remove(&key);
            self.writer.remove(store_key(&key));
        }
        self.hydrated.retain(|(_, date)| *date >= cutoff);
    }

    #[cfg(test)]
    fn tracked_days(&self) -> usize {
        self.buckets.len().max(self.hydrated.len())
    }
}
