// Cooldown registry: last-fired timestamps per (subject, severity).
//
// Entries are hydrated lazily from the store and written back through the
// write-behind queue. Expired entries are pruned from memory. Velocity
// markers are dropped entirely once their day is over, since each day is a
// new subject.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::{debug, warn};

use super::model::{Severity, SubjectKey};
use crate::core::config::CooldownSettings;
use crate::core::store::{ReadBudget, StoreKey, WriteBehind};

type CooldownKey = (SubjectKey, Severity);

pub struct CooldownRegistry {
    settings: CooldownSettings,
    writer: WriteBehind,
    last_fired: HashMap<CooldownKey, DateTime<Utc>>,
    /// Keys already looked up in the store
    hydrated: HashSet<CooldownKey>,
}

impl CooldownRegistry {
    pub fn new(settings: CooldownSettings, writer: WriteBehind) -> Self {
        Self {
            settings,
            writer,
            last_fired: HashMap::new(),
            hydrated: HashSet::new(),
        }
    }

    /// True iff the pair fired less than its severity's window ago.
    pub fn is_suppressed(
        &mut self,
        subject: &SubjectKey,
        severity: Severity,
        now: DateTime<Utc>,
        budget: &ReadBudget,
    ) -> bool {
        let Some(last) = self.last_fired(subject, severity, budget) else {
            return false;
        };
        let suppressed = now.signed_duration_since(last) < self.settings.window(severity);
        if suppressed {
            debug!("Suppressing {} {} (last fired {})", subject, severity, last);
        }
        suppressed
    }

    /// Record an emitted alert. Call once per alert actually delivered.
    pub fn mark_fired(&mut self, subject: &SubjectKey, severity: Severity, now: DateTime<Utc>) {
        let key = (subject.clone(), severity);
        self.last_fired.insert(key.clone(), now);
        self.hydrated.insert(key);

        match serde_json::to_string(&now) {
            Ok(value) => self.writer.set(
                StoreKey::Cooldown {
                    subject: subject.clone(),
                    severity,
                },
                value,
            ),
            Err(e) => warn!("Could not serialize cooldown for {} {}: {}", subject, severity, e),
        }
    }

    pub fn last_fired(
        &mut self,
        subject: &SubjectKey,
        severity: Severity,
        budget: &ReadBudget,
    ) -> Option<DateTime<Utc>> {
        let key = (subject.clone(), severity);
        if !self.hydrated.contains(&key) {
            self.hydrate(&key, budget);
        }
        self.last_fired.get(&key).copied()
    }

    /// Forget entries whose window has passed. A pruned entry reads back as
    /// expired from the store, so only memory is touched.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        let settings = &self.settings;
        self.last_fired
            .retain(|(_, severity), at| now.signed_duration_since(*at) < settings.window(*severity));
        self.last_fired.retain(|(subject, _), _| !is_past_day(subject, today));
        self.hydrated.retain(|(subject, _)| !is_past_day(subject, today));
    }

    #[cfg(test)]
    fn tracked(&self) -> (usize, usize) {
        (self.last_fired.len(), self.hydrated.len())
    }

    fn hydrate(&mut self, key: &CooldownKey, budget: &ReadBudget) {
        let store_key = StoreKey::Cooldown {
            subject: key.0.clone(),
            severity: key.1,
        };
        match self.writer.get(&store_key, budget) {
            Ok(Some(raw)) => {
                match serde_json::from_str::<DateTime<Utc>>(&raw) {
                    Ok(at) => {
                        self.last_fired.insert(key.clone(), at);
                    }
                    Err(e) => warn!("Discarding corrupt cooldown {}: {}", store_key.render(), e),
                }
                self.hydrated.insert(key.clone());
            }
            Ok(None) => {
                self.hydrated.insert(key.clone());
            }
            // Not marked hydrated: the next check retries the read.
            Err(e) => warn!("Cooldown read for {} failed, not suppressing: {}", store_key.render(), e),
        }
    }
}

fn is_past_day(subject: &SubjectKey, today: chrono::NaiveDate) -> bool {
    matches!(subject, SubjectKey::Velocity(date) if *date < today)
}
