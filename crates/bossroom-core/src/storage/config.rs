//! TOML-based application configuration.
//!
//! Stores the tunables of the battle engine and its satellites:
//! - Distraction grace, offline reconcile thresholds, freeze tokens
//! - Rest prompt threshold
//! - Reminder lead time
//! - Day boundary (UTC offset)
//!
//! Configuration is stored at `~/.config/bossroom/config.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::battle::EngineConfig;
use crate::calendar::DayCalendar;
use crate::error::{ConfigError, Result};
use crate::reminder::ReminderScheduler;
use crate::rest_prompt::RestPromptService;

/// Rest prompt configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestConfig {
    #[serde(default = "default_rest_threshold_min")]
    pub threshold_min: u64,
}

/// Reminder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_lead_time_min")]
    pub lead_time_min: u32,
}

/// Day boundary configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/bossroom/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    /// Start the next queued task as soon as one ends.
    #[serde(default)]
    pub auto_advance: bool,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
}

fn default_rest_threshold_min() -> u64 {
    50
}
fn default_lead_time_min() -> u32 {
    5
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            threshold_min: default_rest_threshold_min(),
        }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            lead_time_min: default_lead_time_min(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as integer")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    fn path() -> Result<PathBuf> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or return default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing defaults there if the file is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
                .into()
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Set a config value by key and save.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.set_value(key, value)?;
        self.save()
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    pub fn calendar(&self) -> DayCalendar {
        DayCalendar::with_offset_minutes(self.calendar.utc_offset_minutes)
    }

    pub fn rest_prompt(&self) -> RestPromptService {
        RestPromptService::new(self.rest.threshold_min.saturating_mul(60))
    }

    pub fn reminder_scheduler(&self) -> ReminderScheduler {
        ReminderScheduler::new(self.reminders.lead_time_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn config_default_values() {
        let cfg = Config::default();
        assert_eq!(cfg.engine.distraction_grace_secs, 10);
        assert_eq!(cfg.engine.reconcile_negligible_secs, 30);
        assert_eq!(cfg.engine.reconcile_retreat_secs, 300);
        assert_eq!(cfg.engine.freeze_token_cap, 3);
        assert_eq!(cfg.rest.threshold_min, 50);
        assert_eq!(cfg.reminders.lead_time_min, 5);
        assert_eq!(cfg.calendar.utc_offset_minutes, 0);
        assert!(!cfg.auto_advance);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: Config = toml::from_str("[engine]\nfreeze_token_cap = 5\n").unwrap();
        assert_eq!(cfg.engine.freeze_token_cap, 5);
        assert_eq!(cfg.engine.distraction_grace_secs, 10);
        assert_eq!(cfg.rest.threshold_min, 50);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("engine.freeze_token_cap").as_deref(), Some("3"));
        assert_eq!(cfg.get("rest.threshold_min").as_deref(), Some("50"));
        assert!(cfg.get("engine.missing_key").is_none());
        assert!(cfg.get("").is_none());
    }

    #[test]
    fn set_value_parses_bools() {
        let mut cfg = Config::default();
        cfg.set_value("auto_advance", "true").unwrap();
        assert!(cfg.auto_advance);
        assert!(cfg.set_value("auto_advance", "maybe").is_err());
    }

    #[test]
    fn set_value_updates_nested_number() {
        let mut cfg = Config::default();
        cfg.set_value("reminders.lead_time_min", "15").unwrap();
        assert_eq!(cfg.reminders.lead_time_min, 15);
    }

    #[test]
    fn set_value_accepts_negative_offsets() {
        let mut cfg = Config::default();
        cfg.set_value("calendar.utc_offset_minutes", "-300").unwrap();
        assert_eq!(cfg.calendar().utc_offset_minutes(), -300);
    }

    #[test]
    fn set_value_rejects_unknown_key() {
        let mut cfg = Config::default();
        let err = cfg.set_value("engine.nonexistent", "1").unwrap_err();
        assert!(matches!(
            err,
            crate::CoreError::Config(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn set_value_rejects_invalid_type() {
        let mut cfg = Config::default();
        assert!(cfg.set_value("engine.freeze_token_cap", "lots").is_err());
        assert_eq!(cfg.engine.freeze_token_cap, 3);
    }

    #[test]
    fn load_from_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut cfg = Config::default();
        cfg.set_value("rest.threshold_min", "25").unwrap();
        cfg.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().rest.threshold_min, 25);
    }

    #[test]
    fn runtime_services_follow_config() {
        let mut cfg = Config::default();
        cfg.rest.threshold_min = 1;
        cfg.reminders.lead_time_min = 9;
        assert_eq!(cfg.rest_prompt().threshold_secs(), 60);
        assert_eq!(cfg.reminder_scheduler().lead_time_min(), 9);
    }
}
