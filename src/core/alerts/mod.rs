// Budget alert subsystem.
//
// Architecture:
// - model.rs: Severities, subject keys, alert records and monitor events
// - triggers.rs: Threshold and velocity evaluation (pure)
// - cooldown.rs: Per (subject, severity) suppression windows, persisted
// - factory.rs: Builds alert records with titles and suggested actions
// - history.rs: Bounded alert history and stats
// - subscribers.rs: Observer registry with per-subscriber error boundary
// - engine.rs: Orchestrates the above for each expense event

pub mod cooldown;
pub mod engine;
pub mod factory;
pub mod history;
pub mod model;
pub mod subscribers;
pub mod triggers;
