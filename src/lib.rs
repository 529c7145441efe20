#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
pub mod core;

pub use crate::core::alerts::engine::{AlertManager, MonitorState};
pub use crate::core::alerts::model::{Alert, AlertKind, MonitorEvent, Severity, SubjectKey};
pub use crate::core::alerts::triggers::BudgetStatus;
pub use crate::core::clock::{Clock, ManualClock, SystemClock};
pub use crate::core::config::{ConfigManager, MonitorSettings};
pub use crate::core::model::{BudgetSnapshot, ExpenseEvent, SpendTotals};
pub use crate::core::store::{JsonFileStore, KeyValueStore, MemoryStore};
