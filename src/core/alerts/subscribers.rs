// Subscriber registry: observers of alert batches and heartbeat events.
//
// Each subscriber is called behind its own error boundary. On a tokio runtime
// every delivery runs on the blocking pool, so a slow subscriber holds up
// neither the other subscribers nor the caller.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, warn};
use tokio::runtime::Handle;

use super::model::MonitorEvent;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SubscriberError(pub String);

impl SubscriberError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type SubscriberFn = dyn Fn(&MonitorEvent) -> Result<(), SubscriberError> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Entries = Mutex<Vec<(SubscriptionId, Arc<SubscriberFn>)>>;

/// Handle returned by `subscribe`. Dropping it keeps the subscription alive;
/// call `unsubscribe` to remove it.
pub struct Subscription {
    id: SubscriptionId,
    entries: Weak<Entries>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(entries) = self.entries.upgrade() else {
            return false;
        };
        let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(id, _)| *id != self.id);
        before != entries.len()
    }
}

#[derive(Default)]
pub struct SubscriberRegistry {
    entries: Arc<Entries>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MonitorEvent) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: Arc<SubscriberFn> = Arc::new(callback);
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, callback));
        debug!("Subscriber {} registered", id);
        Subscription {
            id,
            entries: Arc::downgrade(&self.entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire-and-forget delivery to every current subscriber.
    pub fn broadcast(&self, event: MonitorEvent) {
        let targets: Vec<(SubscriptionId, Arc<SubscriberFn>)> =
            self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if targets.is_empty() {
            return;
        }

        let event = Arc::new(event);
        match Handle::try_current() {
            Ok(handle) => {
                for (id, callback) in targets {
                    let event = Arc::clone(&event);
                    handle.spawn_blocking(move || deliver(id, callback.as_ref(), &event));
                }
            }
            Err(_) => {
                for (id, callback) in targets {
                    deliver(id, callback.as_ref(), &event);
                }
            }
        }
    }
}

fn deliver(id: SubscriptionId, callback: &SubscriberFn, event: &MonitorEvent) {
    match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Subscriber {} failed handling {}: {}", id, event.name(), e),
        Err(_) => warn!("Subscriber {} panicked handling {}", id, event.name()),
    }
}
