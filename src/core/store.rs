//! Key-value persistence for cooldown marks and daily spend buckets.
//!
//! Values are small JSON blobs. Keys are typed (`StoreKey`) and rendered to
//! namespaced strings in one place only.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use log::{debug, warn};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use super::alerts::model::{Severity, SubjectKey};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Composite key for everything the monitor persists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Cooldown { subject: SubjectKey, severity: Severity },
    DailySpend { user: String, date: NaiveDate },
}

impl StoreKey {
    pub fn render(&self) -> String {
        match self {
            Self::Cooldown { subject, severity } => {
                format!("alert_cooldown_{}_{}", subject, severity)
            }
            Self::DailySpend { user, date } => {
                format!("spending_velocity_{}_{}", user, date.format("%Y-%m-%d"))
            }
        }
    }
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &StoreKey) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &StoreKey, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &StoreKey) -> Result<(), StoreError>;
}

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &StoreKey) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.get(&key.render()).cloned())
    }

    fn set(&self, key: &StoreKey, value: &str) -> Result<(), StoreError> {
        self.lock()?.insert(key.render(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &StoreKey) -> Result<(), StoreError> {
        self.lock()?.remove(&key.render());
        Ok(())
    }
}

/// One JSON file per key inside a data directory.
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn path_for(&self, key: &StoreKey) -> PathBuf {
        // Category names are user text; keep filenames portable.
        let name: String = key
            .render()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.data_dir.join(format!("{}.json", name))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &StoreKey) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &StoreKey, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.data_dir)?;
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &StoreKey) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

enum WriteOp {
    Set(String),
    Remove,
}

enum Command {
    Write(StoreKey, WriteOp),
    Flush(oneshot::Sender<()>),
}

/// Time left for store reads during one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ReadBudget {
    deadline: Instant,
}

impl ReadBudget {
    pub fn new(limit: Duration) -> Self {
        Self {
            deadline: Instant::now() + limit,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_spent(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Write-behind front for a `KeyValueStore`.
///
/// Writes are queued to a single writer task and applied in submission order,
/// so the last value submitted for a key is the one that lands. Failures are
/// logged and dropped. Outside a tokio runtime writes happen inline.
///
/// Reads run on helper threads and give up when their `ReadBudget` runs out.
#[derive(Clone)]
pub struct WriteBehind {
    store: Arc<dyn KeyValueStore>,
    timeout: Duration,
    queue: Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>,
}

impl WriteBehind {
    pub fn new(store: Arc<dyn KeyValueStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            queue: Arc::new(Mutex::new(None)),
        }
    }

    /// A fresh read budget of one storage timeout.
    pub fn read_budget(&self) -> ReadBudget {
        ReadBudget::new(self.timeout)
    }

    pub fn get(&self, key: &StoreKey, budget: &ReadBudget) -> Result<Option<String>, StoreError> {
        self.get_many(std::slice::from_ref(key), budget)
            .pop()
            .unwrap_or(Ok(None))
    }

    /// Read several keys in parallel. Keys still outstanding when the budget
    /// runs out come back as `StoreError::Timeout`.
    pub fn get_many(&self, keys: &[StoreKey], budget: &ReadBudget) -> Vec<Result<Option<String>, StoreError>> {
        let mut results: Vec<Option<Result<Option<String>, StoreError>>> = keys.iter().map(|_| None).collect();

        if !budget.is_spent() {
            let (tx, rx) = std_mpsc::channel();
            for (index, key) in keys.iter().enumerate() {
                let store = Arc::clone(&self.store);
                let key = key.clone();
                let tx = tx.clone();
                let spawned = thread::Builder::new()
                    .name("store-read".into())
                    .spawn(move || {
                        let _ = tx.send((index, store.get(&key)));
                    });
                if let Err(e) = spawned {
                    results[index] = Some(Err(StoreError::Io(e)));
                }
            }
            drop(tx);

            let mut outstanding = results.iter().filter(|r| r.is_none()).count();
            while outstanding > 0 {
                match rx.recv_timeout(budget.remaining()) {
                    Ok((index, result)) => {
                        results[index] = Some(result);
                        outstanding -= 1;
                    }
                    Err(_) => break,
                }
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(StoreError::Timeout(self.timeout))))
            .collect()
    }

    pub fn set(&self, key: StoreKey, value: String) {
        self.submit(key, WriteOp::Set(value));
    }

    pub fn remove(&self, key: StoreKey) {
        self.submit(key, WriteOp::Remove);
    }

    fn submit(&self, key: StoreKey, op: WriteOp) {
        let command = match self.sender() {
            Some(tx) => match tx.send(Command::Write(key, op)) {
                Ok(()) => return,
                Err(mpsc::error::SendError(command)) => command,
            },
            None => Command::Write(key, op),
        };
        if let Command::Write(key, op) = command {
            if let Err(e) = apply(self.store.as_ref(), &key, &op) {
                warn!("Storage write for {} failed: {}", key.render(), e);
            }
        }
    }

    /// The live writer queue, starting the writer task if a runtime is available.
    fn sender(&self) -> Option<mpsc::UnboundedSender<Command>> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = queue.as_ref().filter(|tx| !tx.is_closed()) {
            return Some(tx.clone());
        }
        let handle = Handle::try_current().ok()?;
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(run_writer(Arc::clone(&self.store), self.timeout, rx));
        *queue = Some(tx.clone());
        Some(tx)
    }

    /// Wait for every write submitted so far.
    pub async fn flush(&self) {
        let tx = {
            let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.as_ref().filter(|tx| !tx.is_closed()).cloned()
        };
        let Some(tx) = tx else {
            return;
        };
        let (done, finished) = oneshot::channel();
        if tx.send(Command::Flush(done)).is_ok() {
            let _ = finished.await;
        }
    }
}

async fn run_writer(store: Arc<dyn KeyValueStore>, timeout: Duration, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Write(key, op) => write_in_order(Arc::clone(&store), timeout, key, op).await,
        }
    }
}

/// Apply one write. A write past its timeout is reported but still awaited, so
/// a later write to the same key can never land before it.
async fn write_in_order(store: Arc<dyn KeyValueStore>, timeout: Duration, key: StoreKey, op: WriteOp) {
    let rendered = key.render();
    let mut task = tokio::task::spawn_blocking(move || apply(store.as_ref(), &key, &op));
    let outcome = match tokio::time::timeout(timeout, &mut task).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!("Storage write for {} is slow: {}", rendered, StoreError::Timeout(timeout));
            task.await
        }
    };
    match outcome {
        Ok(Ok(())) => debug!("Persisted {}", rendered),
        Ok(Err(e)) => warn!("Storage write for {} failed: {}", rendered, e),
        Err(join) => warn!("Storage write for {} aborted: {}", rendered, join),
    }
}

fn apply(store: &dyn KeyValueStore, key: &StoreKey, op: &WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::Set(value) => store.set(key, value),
        WriteOp::Remove => store.remove(key),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Store whose every operation fails.
    pub(crate) struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &StoreKey) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }
        fn set(&self, _key: &StoreKey, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }
        fn remove(&self, _key: &StoreKey) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }
    }

    /// Memory store with configurable latency on reads and on the first write.
    #[derive(Default)]
    pub(crate) struct LaggyStore {
        pub(crate) inner: MemoryStore,
        pub(crate) read_delay: Duration,
        pub(crate) first_write_delay: Duration,
        writes: AtomicUsize,
    }

    impl LaggyStore {
        pub(crate) fn slow_reads(delay: Duration) -> Self {
            Self {
                read_delay: delay,
                ..Self::default()
            }
        }

        pub(crate) fn slow_first_write(delay: Duration) -> Self {
            Self {
                first_write_delay: delay,
                ..Self::default()
            }
        }
    }

    impl KeyValueStore for LaggyStore {
        fn get(&self, key: &StoreKey) -> Result<Option<String>, StoreError> {
            thread::sleep(self.read_delay);
            self.inner.get(key)
        }
        fn set(&self, key: &StoreKey, value: &str) -> Result<(), StoreError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) == 0 {
                thread::sleep(self.first_write_delay);
            }
            self.inner.set(key, value)
        }
        fn remove(&self, key: &StoreKey) -> Result<(), StoreError> {
            self.inner.remove(key)
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bucket_key(day: u32) -> StoreKey {
        StoreKey::DailySpend {
            user: "u1".to_string(),
            date: date(2025, 1, day),
        }
    }

    #[test]
    fn test_key_rendering() {
        let key = StoreKey::Cooldown {
            subject: SubjectKey::category("food"),
            severity: Severity::Critical,
        };
        assert_eq!(key.render(), "alert_cooldown_category:food_critical");

        let key = StoreKey::DailySpend {
            user: "u42".to_string(),
            date: date(2025, 1, 9),
        };
        assert_eq!(key.render(), "spending_velocity_u42_2025-01-09");
    }

    #[test]
    fn test_file_store_roundtrip_and_remove() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("kv"));
        let key = StoreKey::Cooldown {
            subject: SubjectKey::category("eating out / bars"),
            severity: Severity::Warning,
        };

        assert_eq!(store.get(&key).unwrap(), None);
        store.set(&key, r#""2025-01-01T00:00:00Z""#).unwrap();

        let reopened = JsonFileStore::new(dir.path().join("kv"));
        assert_eq!(reopened.get(&key).unwrap().as_deref(), Some(r#""2025-01-01T00:00:00Z""#));

        reopened.remove(&key).unwrap();
        assert_eq!(reopened.get(&key).unwrap(), None);
        // Removing twice is fine
        reopened.remove(&key).unwrap();
    }

    #[test]
    fn test_write_behind_without_runtime_writes_inline() {
        let store = Arc::new(MemoryStore::new());
        let writer = WriteBehind::new(store.clone(), Duration::from_secs(2));

        writer.set(bucket_key(1), "[]".to_string());
        assert_eq!(store.get(&bucket_key(1)).unwrap().as_deref(), Some("[]"));

        writer.remove(bucket_key(1));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_write_behind_flush_completes_writes() {
        let store = Arc::new(MemoryStore::new());
        let writer = WriteBehind::new(store.clone(), Duration::from_secs(2));
        for day in 1..=5 {
            writer.set(bucket_key(day), "[]".to_string());
        }

        writer.flush().await;
        assert_eq!(store.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_last_write_wins_behind_slow_write() {
        let store = Arc::new(LaggyStore::slow_first_write(Duration::from_millis(300)));
        let writer = WriteBehind::new(store.clone(), Duration::from_millis(100));

        writer.set(bucket_key(1), "first".to_string());
        writer.set(bucket_key(1), "second".to_string());
        writer.set(bucket_key(2), "kept".to_string());
        writer.remove(bucket_key(2));
        writer.flush().await;

        assert_eq!(store.inner.get(&bucket_key(1)).unwrap().as_deref(), Some("second"));
        assert_eq!(store.inner.get(&bucket_key(2)).unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_behind_swallows_failures() {
        let writer = WriteBehind::new(Arc::new(BrokenStore), Duration::from_secs(2));
        writer.set(bucket_key(1), "[]".to_string());
        writer.flush().await;
    }

    #[test]
    fn test_reads_give_up_at_budget() {
        let store = Arc::new(LaggyStore::slow_reads(Duration::from_millis(800)));
        store.inner.set(&bucket_key(1), "[]").unwrap();
        let writer = WriteBehind::new(store, Duration::from_millis(100));

        let started = Instant::now();
        let budget = writer.read_budget();
        let results = writer.get_many(&[bucket_key(1), bucket_key(2), bucket_key(3)], &budget);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| matches!(r, Err(StoreError::Timeout(_)))));

        // A spent budget fails straight away.
        assert!(matches!(writer.get(&bucket_key(1), &budget), Err(StoreError::Timeout(_))));
    }

    #[test]
    fn test_parallel_reads_share_one_budget() {
        let store = Arc::new(LaggyStore::slow_reads(Duration::from_millis(100)));
        store.inner.set(&bucket_key(4), "[1]").unwrap();
        let writer = WriteBehind::new(store, Duration::from_secs(2));

        let keys: Vec<StoreKey> = (1..=8).map(bucket_key).collect();
        let started = Instant::now();
        let results = writer.get_many(&keys, &writer.read_budget());
        assert!(started.elapsed() < Duration::from_millis(700));
        assert_eq!(results[3].as_ref().unwrap().as_deref(), Some("[1]"));
        assert!(results[0].as_ref().unwrap().is_none());
    }
}
