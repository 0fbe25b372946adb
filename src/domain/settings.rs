//! Transport and logging settings persisted as JSON

use crate::domain::uuid::METAWEAR_SERVICE_UUID;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How often the log file rolls over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Rolling file output; absent means console only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLogSettings {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub rotation: LogRotation,
}

impl Default for FileLogSettings {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            prefix: default_prefix(),
            rotation: LogRotation::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// EnvFilter directive, e.g. `info` or `metawear_btle=debug`
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_console")]
    pub console: bool,
    #[serde(default)]
    pub file: Option<FileLogSettings>,
    #[serde(default)]
    pub show_file_line: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console: default_console(),
            file: None,
            show_file_line: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_console() -> bool {
    true
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_prefix() -> String {
    "metawear_btle".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    // Discovery
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    #[serde(default)]
    pub device_identifier: Option<String>,
    #[serde(default = "default_scan_window_ms")]
    pub scan_window_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    // Teardown
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            device_identifier: None,
            scan_window_ms: default_scan_window_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
            log_settings: LogSettings::default(),
        }
    }
}

impl TransportSettings {
    /// Runtime knobs handed to the transport
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            service_uuid: self.service_uuid.clone(),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            disconnect_timeout: Duration::from_millis(self.disconnect_timeout_ms),
        }
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }
}

fn default_service_uuid() -> String {
    METAWEAR_SERVICE_UUID.to_string()
}
fn default_scan_window_ms() -> u64 {
    2000
}
fn default_settle_delay_ms() -> u64 {
    500
}
fn default_disconnect_timeout_ms() -> u64 {
    3000
}

/// Timing and filter configuration used by [`crate::BleTransport`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Service UUID a peripheral must advertise to be a candidate
    pub service_uuid: String,
    /// Pause after `connect()` before checking the connection state
    pub settle_delay: Duration,
    /// Hard ceiling on how long `disconnect()` may block
    pub disconnect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportSettings::default().transport_config()
    }
}

pub struct SettingsService {
    settings: TransportSettings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load settings from an explicit file, falling back to defaults
    pub fn with_path(settings_path: impl Into<PathBuf>) -> Self {
        let settings_path = settings_path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                TransportSettings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("MetaWearBtle");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<TransportSettings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut TransportSettings {
        &mut self.settings
    }

    /// Remember the peripheral to reconnect to on the next run
    pub fn set_device_identifier(&mut self, identifier: Option<String>) -> anyhow::Result<()> {
        if self.settings.device_identifier != identifier {
            self.settings.device_identifier = identifier;
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = TransportSettings::default();
        assert_eq!(settings.service_uuid, METAWEAR_SERVICE_UUID);
        assert_eq!(settings.scan_window(), Duration::from_millis(2000));

        let config = settings.transport_config();
        assert_eq!(config.settle_delay, Duration::from_millis(500));
        assert_eq!(config.disconnect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: TransportSettings =
            serde_json::from_str(r#"{ "scan_window_ms": 5000, "log_settings": { "level": "debug" } }"#)
                .unwrap();
        assert_eq!(settings.scan_window_ms, 5000);
        assert_eq!(settings.settle_delay_ms, 500);
        assert_eq!(settings.log_settings.level, "debug");
        assert!(settings.log_settings.console);
        assert!(settings.log_settings.file.is_none());
        assert!(settings.device_identifier.is_none());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettingsService::with_path(dir.path().join("absent.json"));
        assert_eq!(service.get().disconnect_timeout_ms, 3000);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut service = SettingsService::with_path(&path);
        service.get_mut().scan_window_ms = 7000;
        service
            .set_device_identifier(Some("37b0d50a-0a93-b6b3-8670-7bb95122fc86".to_string()))
            .unwrap();
        assert!(path.exists());

        let reloaded = SettingsService::with_path(&path);
        assert_eq!(reloaded.get().scan_window_ms, 7000);
        assert_eq!(
            reloaded.get().device_identifier.as_deref(),
            Some("37b0d50a-0a93-b6b3-8670-7bb95122fc86")
        );
    }

    #[test]
    fn test_identifier_unchanged_skips_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::with_path(&path);
        service.set_device_identifier(None).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_file_log_settings_from_json() {
        let settings: LogSettings =
            serde_json::from_str(r#"{ "file": { "rotation": "hourly" } }"#).unwrap();
        let file = settings.file.unwrap();
        assert_eq!(file.rotation, LogRotation::Hourly);
        assert_eq!(file.dir, PathBuf::from("logs"));
        assert_eq!(file.prefix, "metawear_btle");
        assert_eq!(settings.level, "info");

        assert!(serde_json::from_str::<LogSettings>(r#"{ "file": { "rotation": "weekly" } }"#)
            .is_err());
    }
}
