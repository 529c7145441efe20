use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use super::alerts::model::Severity;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Invalid thresholds: {0}")]
    InvalidThresholds(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

/// Spend/limit ratios at which each severity starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
    pub exceeded: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: 0.80,
            critical: 0.95,
            exceeded: 1.0,
        }
    }
}

/// Per-severity cooldown windows in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownSettings {
    pub warning_secs: u64,
    pub critical_secs: u64,
    pub exceeded_secs: u64,
}

impl Default for CooldownSettings {
    fn default() -> Self {
        Self {
            warning_secs: 6 * 60 * 60,
            critical_secs: 3 * 60 * 60,
            exceeded_secs: 60 * 60,
        }
    }
}

impl CooldownSettings {
    pub fn window(&self, severity: Severity) -> chrono::Duration {
        let secs = match severity {
            Severity::Warning => self.warning_secs,
            Severity::Critical => self.critical_secs,
            Severity::Exceeded => self.exceeded_secs,
        };
        let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
        chrono::Duration::seconds(secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocitySettings {
    pub enabled: bool,
    /// Today's total must be strictly greater than `multiplier * average`
    pub multiplier: f64,
    /// Number of previous calendar days in the trailing window
    pub window_days: u32,
}

impl Default for VelocitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            multiplier: 2.0,
            window_days: 7,
        }
    }
}

/// Monitor settings. Fixed for the lifetime of an `AlertManager`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub thresholds: Thresholds,
    pub cooldowns: CooldownSettings,
    pub velocity: VelocitySettings,
    pub history_capacity: usize,
    pub check_interval_secs: u64,
    pub storage_timeout_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            cooldowns: CooldownSettings::default(),
            velocity: VelocitySettings::default(),
            history_capacity: 100,
            check_interval_secs: 5 * 60,
            storage_timeout_ms: 2_000,
        }
    }
}

impl MonitorSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        for (name, value) in [("warning", t.warning), ("critical", t.critical), ("exceeded", t.exceeded)] {
            if !value.is_finite() || value <= 0.0 || value > 10.0 {
                return Err(ConfigError::InvalidThresholds(format!(
                    "{} ratio {} must be within (0, 10]",
                    name, value
                )));
            }
        }
        if !(t.warning < t.critical && t.critical < t.exceeded) {
            return Err(ConfigError::InvalidThresholds(format!(
                "expected warning < critical < exceeded, got {} / {} / {}",
                t.warning, t.critical, t.exceeded
            )));
        }
        if !self.velocity.multiplier.is_finite() || self.velocity.multiplier <= 0.0 {
            return Err(ConfigError::InvalidSetting(format!(
                "velocity multiplier {} must be positive",
                self.velocity.multiplier
            )));
        }
        if self.velocity.window_days == 0 {
            return Err(ConfigError::InvalidSetting("velocity window_days must be at least 1".into()));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::InvalidSetting("history_capacity must be at least 1".into()));
        }
        if self.check_interval_secs == 0 {
            return Err(ConfigError::InvalidSetting("check_interval_secs must be at least 1".into()));
        }
        Ok(())
    }
}

pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(app_config_dir: PathBuf) -> Self {
        Self {
            config_path: app_config_dir.join("settings.json"),
        }
    }

    /// Load settings, falling back to defaults when the file is missing,
    /// unreadable or fails validation.
    pub fn load(&self) -> MonitorSettings {
        match self.try_load() {
            Ok(Some(settings)) => settings,
            Ok(None) => MonitorSettings::default(),
            Err(e) => {
                warn!("Using default monitor settings, {:?} rejected: {}", self.config_path, e);
                MonitorSettings::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<MonitorSettings>, ConfigError> {
        if !self.config_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.config_path)?;
        let settings: MonitorSettings = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(Some(settings))
    }

    pub fn save(&self, settings: &MonitorSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.config_path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().to_path_buf());

        let default = manager.load();
        assert_eq!(default.history_capacity, 100);
        assert_eq!(default.check_interval_secs, 300);

        let mut new_settings = MonitorSettings::default();
        new_settings.thresholds.warning = 0.7;
        new_settings.cooldowns.exceeded_secs = 120;

        manager.save(&new_settings).unwrap();
        let loaded = manager.load();

        assert_eq!(loaded.thresholds.warning, 0.7);
        assert_eq!(loaded.cooldowns.exceeded_secs, 120);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("settings.json"),
            r#"{"thresholds": {"warning": 0.5}, "history_capacity": 20}"#,
        )
        .unwrap();

        let loaded = ConfigManager::new(dir.path().to_path_buf()).load();
        assert_eq!(loaded.thresholds.warning, 0.5);
        assert_eq!(loaded.thresholds.critical, 0.95);
        assert_eq!(loaded.history_capacity, 20);
        assert_eq!(loaded.cooldowns, CooldownSettings::default());
    }

    #[test]
    fn test_invalid_file_falls_back_to_default() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("settings.json"),
            r#"{"thresholds": {"warning": 0.99, "critical": 0.95}}"#,
        )
        .unwrap();
        let loaded = ConfigManager::new(dir.path().to_path_buf()).load();
        assert_eq!(loaded, MonitorSettings::default());

        fs::write(dir.path().join("settings.json"), "not json").unwrap();
        let loaded = ConfigManager::new(dir.path().to_path_buf()).load();
        assert_eq!(loaded, MonitorSettings::default());
    }

    #[test]
    fn test_save_rejects_invalid_settings() {
        let dir = tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().to_path_buf());
        let mut settings = MonitorSettings::default();
        settings.history_capacity = 0;
        assert!(matches!(manager.save(&settings), Err(ConfigError::InvalidSetting(_))));
        assert!(!dir.path().join("settings.json").exists());
    }

    #[test]
    fn test_cooldown_windows() {
        let cooldowns = CooldownSettings::default();
        assert_eq!(cooldowns.window(Severity::Warning), chrono::Duration::hours(6));
        assert_eq!(cooldowns.window(Severity::Critical), chrono::Duration::hours(3));
        assert_eq!(cooldowns.window(Severity::Exceeded), chrono::Duration::hours(1));
    }
}
