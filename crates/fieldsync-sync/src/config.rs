//! # Sync Configuration
//!
//! Configuration management for the queues, the document cache and the
//! remote store adapter.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FIELDSYNC_REMOTE_URL=https://api.example.com                       │
//! │     FIELDSYNC_DEVICE_ID=abc-123                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/fieldsync/fieldsync.toml (Linux)                         │
//! │     ~/Library/Application Support/com.fieldsync.agent/... (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     auto-generated device id, 3 concurrent uploads, 100/500 MB warns   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # fieldsync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Rep tablet 12"
//!
//! [remote]
//! base_url = "https://api.example.com/v1"
//! api_key = "secret"
//! request_timeout_secs = 30
//!
//! [upload]
//! concurrency = 3
//! transfer_timeout_secs = 120
//!
//! [data]
//! transfer_timeout_secs = 30
//!
//! [cache]
//! download_timeout_secs = 300
//! soft_warning_mb = 100
//! strong_warning_mb = 500
//!
//! [storage]
//! data_dir = "/var/lib/fieldsync"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

const MB: u64 = 1024 * 1024;

// =============================================================================
// Device Configuration
// =============================================================================

/// Identity of this device, sent with every remote create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Rep tablet 12").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Field Device".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Remote Store Settings
// =============================================================================

/// Where the remote document store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL of the remote API (http:// or https://).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token. Omitted from requests when unset.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout applied by the HTTP client (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            base_url: default_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Queue Settings
// =============================================================================

/// Upload queue behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSettings {
    /// Maximum number of uploads in flight at once.
    #[serde(default = "default_upload_concurrency")]
    pub concurrency: usize,

    /// Deadline for one upload attempt (seconds).
    #[serde(default = "default_upload_timeout")]
    pub transfer_timeout_secs: u64,
}

fn default_upload_concurrency() -> usize {
    3
}

fn default_upload_timeout() -> u64 {
    120
}

impl Default for UploadSettings {
    fn default() -> Self {
        UploadSettings {
            concurrency: default_upload_concurrency(),
            transfer_timeout_secs: default_upload_timeout(),
        }
    }
}

impl UploadSettings {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

/// Data queue behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Deadline for one remote create (seconds).
    #[serde(default = "default_data_timeout")]
    pub transfer_timeout_secs: u64,
}

fn default_data_timeout() -> u64 {
    30
}

impl Default for DataSettings {
    fn default() -> Self {
        DataSettings {
            transfer_timeout_secs: default_data_timeout(),
        }
    }
}

impl DataSettings {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

// =============================================================================
// Cache Settings
// =============================================================================

/// Document cache behaviour and storage warnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Deadline for one document download (seconds).
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    /// Cache size above which a soft warning is shown (MB).
    #[serde(default = "default_soft_warning_mb")]
    pub soft_warning_mb: u64,

    /// Cache size above which a strong warning is shown (MB).
    #[serde(default = "default_strong_warning_mb")]
    pub strong_warning_mb: u64,
}

fn default_download_timeout() -> u64 {
    300
}

fn default_soft_warning_mb() -> u64 {
    fieldsync_core::CACHE_SOFT_WARNING_BYTES / MB
}

fn default_strong_warning_mb() -> u64 {
    fieldsync_core::CACHE_STRONG_WARNING_BYTES / MB
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            download_timeout_secs: default_download_timeout(),
            soft_warning_mb: default_soft_warning_mb(),
            strong_warning_mb: default_strong_warning_mb(),
        }
    }
}

impl CacheSettings {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn soft_warning_bytes(&self) -> u64 {
        self.soft_warning_mb * MB
    }

    pub fn strong_warning_bytes(&self) -> u64 {
        self.strong_warning_mb * MB
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Local storage locations.
///
/// Unset paths resolve under `data_dir`, which itself defaults to the
/// platform data directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// SQLite item store file.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Root of the local file store.
    #[serde(default)]
    pub files_dir: Option<PathBuf>,
}

impl StorageSettings {
    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| {
                directories::ProjectDirs::from("com", "fieldsync", "agent")
                    .map(|dirs| dirs.data_dir().to_path_buf())
            })
            .unwrap_or_else(|| PathBuf::from("fieldsync-data"))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("fieldsync.db"))
    }

    pub fn files_dir(&self) -> PathBuf {
        self.files_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("files"))
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete FieldSync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub upload: UploadSettings,

    #[serde(default)]
    pub data: DataSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (fieldsync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Like [`load`](Self::load), but first writes a default config file
    /// when none exists, so the generated device id survives restarts.
    ///
    /// ## Errors
    /// `ConfigSaveFailed` or an I/O error if the new file cannot be written.
    pub fn load_or_init(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let path = config_path.or_else(Self::default_config_path);

        if let Some(path) = path.as_ref().filter(|path| !path.exists()) {
            let fresh = Self::default();
            fresh.save(Some(path.clone()))?;
            info!(?path, device_id = %fresh.device.id, "Generated device config");
        }

        Self::load(path)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        let url = url::Url::parse(&self.remote.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "Remote URL must start with http:// or https://, got: {}",
                self.remote.base_url
            )));
        }

        if self.upload.concurrency == 0 {
            return Err(SyncError::InvalidConfig(
                "upload.concurrency must be greater than 0".into(),
            ));
        }

        for (name, secs) in [
            ("remote.request_timeout_secs", self.remote.request_timeout_secs),
            ("upload.transfer_timeout_secs", self.upload.transfer_timeout_secs),
            ("data.transfer_timeout_secs", self.data.transfer_timeout_secs),
            ("cache.download_timeout_secs", self.cache.download_timeout_secs),
        ] {
            if secs == 0 {
                return Err(SyncError::InvalidConfig(format!(
                    "{} must be at least 1 second",
                    name
                )));
            }
        }

        if self.cache.soft_warning_mb >= self.cache.strong_warning_mb {
            return Err(SyncError::InvalidConfig(format!(
                "cache.soft_warning_mb ({}) must be below cache.strong_warning_mb ({})",
                self.cache.soft_warning_mb, self.cache.strong_warning_mb
            )));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(id) = var("FIELDSYNC_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(name) = var("FIELDSYNC_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Some(url) = var("FIELDSYNC_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.remote.base_url = url;
        }

        if let Some(key) = var("FIELDSYNC_API_KEY") {
            self.remote.api_key = Some(key);
        }

        if let Some(concurrency) = var("FIELDSYNC_UPLOAD_CONCURRENCY") {
            match concurrency.parse::<usize>() {
                Ok(n) => self.upload.concurrency = n,
                Err(_) => warn!(
                    value = %concurrency,
                    "Ignoring invalid FIELDSYNC_UPLOAD_CONCURRENCY"
                ),
            }
        }

        if let Some(dir) = var("FIELDSYNC_DATA_DIR") {
            debug!(dir = %dir, "Overriding data directory from environment");
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "fieldsync", "agent")
            .map(|dirs| dirs.config_dir().join("fieldsync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn remote_url(&self) -> &str {
        &self.remote.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.device.id.is_empty());
        assert_eq!(config.upload.concurrency, 3);
        assert_eq!(config.cache.soft_warning_bytes(), 100 * MB);
        assert_eq!(config.cache.strong_warning_bytes(), 500 * MB);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.device.id = String::new();
        assert!(matches!(config.validate(), Err(SyncError::MissingDeviceId)));

        config.device.id = "tablet-1".into();
        config.remote.base_url = "ftp://files.example.com".into();
        assert!(config.validate().unwrap_err().is_config_error());

        config.remote.base_url = "https://api.example.com".into();
        config.upload.concurrency = 0;
        assert!(config.validate().is_err());

        config.upload.concurrency = 2;
        config.data.transfer_timeout_secs = 0;
        assert!(config.validate().is_err());

        config.data.transfer_timeout_secs = 10;
        config.cache.soft_warning_mb = 600;
        assert!(config.validate().is_err());

        config.cache.soft_warning_mb = 50;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FIELDSYNC_DEVICE_ID", "tablet-9"),
            ("FIELDSYNC_REMOTE_URL", "https://sync.example.com"),
            ("FIELDSYNC_API_KEY", "k3y"),
            ("FIELDSYNC_UPLOAD_CONCURRENCY", "5"),
            ("FIELDSYNC_DATA_DIR", "/tmp/fieldsync"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.device_id(), "tablet-9");
        assert_eq!(config.remote_url(), "https://sync.example.com");
        assert_eq!(config.remote.api_key.as_deref(), Some("k3y"));
        assert_eq!(config.upload.concurrency, 5);
        assert_eq!(
            config.storage.database_path(),
            PathBuf::from("/tmp/fieldsync/fieldsync.db")
        );
        assert_eq!(config.storage.files_dir(), PathBuf::from("/tmp/fieldsync/files"));
    }

    #[test]
    fn test_invalid_concurrency_override_is_ignored() {
        let mut config = SyncConfig::default();
        config.apply_overrides(|key| {
            (key == "FIELDSYNC_UPLOAD_CONCURRENCY").then(|| "many".to_string())
        });
        assert_eq!(config.upload.concurrency, 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [device]
            id = "tablet-3"

            [upload]
            concurrency = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.device.name, "Field Device");
        assert_eq!(config.upload.concurrency, 1);
        assert_eq!(config.upload.transfer_timeout_secs, 120);
        assert_eq!(config.cache.strong_warning_mb, 500);
    }

    #[test]
    fn test_load_or_init_keeps_device_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent").join("fieldsync.toml");

        let first = SyncConfig::load_or_init(Some(path.clone())).unwrap();
        assert!(path.exists());

        let second = SyncConfig::load_or_init(Some(path.clone())).unwrap();
        assert_eq!(second.device_id(), first.device_id());

        let stored: SyncConfig = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored.device.id, first.device.id);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("fieldsync.toml");

        let mut config = SyncConfig::default();
        config.device.name = "Rep tablet 12".into();
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[device]"));
        assert!(contents.contains("[upload]"));

        let loaded: SyncConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.device.id, config.device.id);
        assert_eq!(loaded.device.name, "Rep tablet 12");
    }
}
