use crate::db::Database;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const SETTING_KEYS: &[&str] = &["api_url", "request_timeout_secs"];

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Unknown setting key: {0}")]
    UnknownKey(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_url: String,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Reads the stored settings, falling back to defaults for anything
    /// missing or unreadable.
    pub fn load(db: &Database) -> Self {
        let defaults = Self::default();
        let api_url = db
            .get_setting("api_url")
            .ok()
            .flatten()
            .unwrap_or(defaults.api_url);
        let request_timeout = db
            .get_setting("request_timeout_secs")
            .ok()
            .flatten()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);
        Self {
            api_url,
            request_timeout,
        }
    }
}

pub fn get_settings(db: &Database) -> Result<HashMap<String, String>, SettingsError> {
    let mut map = HashMap::new();
    for key in SETTING_KEYS {
        if let Some(value) = db.get_setting(key)? {
            map.insert(key.to_string(), value);
        }
    }
    Ok(map)
}

pub fn set_setting(db: &Database, key: &str, value: &str) -> Result<(), SettingsError> {
    if !SETTING_KEYS.contains(&key) {
        return Err(SettingsError::UnknownKey(key.to_string()));
    }
    let valid = match key {
        "api_url" => value.starts_with("http://") || value.starts_with("https://"),
        "request_timeout_secs" => value.trim().parse::<u64>().is_ok_and(|secs| secs > 0),
        _ => true,
    };
    if !valid {
        return Err(SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    db.set_setting(key, value)?;
    Ok(())
}

pub fn delete_setting(db: &Database, key: &str) -> Result<(), SettingsError> {
    if !SETTING_KEYS.contains(&key) {
        return Err(SettingsError::UnknownKey(key.to_string()));
    }
    db.delete_setting(key)?;
    Ok(())
}
