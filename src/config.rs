//! Settings file
//!
//! TOML at `~/.config/hidtray/settings.toml` by default. Every field has a
//! default, so partial or empty files are valid. A file that fails to
//! parse is moved aside and replaced with defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Settings shared between the daemon and its poll loops
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Top-level settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub native: NativeSettings,
}

/// Native HID discovery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeSettings {
    /// Device discovery on/off
    pub enabled: bool,
    /// Seconds between HID++ discovery retries
    pub retry_time: u64,
    /// Seconds between battery polls
    pub poll_period: u64,
    /// Device keys or names that are never published
    pub disabled_devices: Vec<String>,
}

impl Default for NativeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_time: 10,
            poll_period: 600,
            disabled_devices: Vec::new(),
        }
    }
}

impl NativeSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_period.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_time.max(1))
    }

    /// Whether a device is disabled by key or by display name
    pub fn is_disabled(&self, device_id: &str, device_name: &str) -> bool {
        self.disabled_devices
            .iter()
            .any(|d| d == device_id || d.eq_ignore_ascii_case(device_name))
    }
}

impl Settings {
    /// Default settings path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hidtray")
            .join("settings.toml")
    }

    pub fn into_shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }

    /// Load settings from a file, or return defaults if not found
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(settings)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Load settings, writing defaults when the file is missing or broken
    ///
    /// A file that cannot be parsed is renamed to `<name>.bak` first.
    pub fn load_or_init(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Writing default settings");
            let settings = Self::default();
            settings.save(path)?;
            return Ok(settings);
        }

        match Self::load(path) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                let backup = backup_path(path);
                warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    "Settings unreadable, resetting to defaults: {e:#}"
                );
                std::fs::rename(path, &backup)
                    .with_context(|| format!("moving {} aside", path.display()))?;
                let settings = Self::default();
                settings.save(path)?;
                Ok(settings)
            }
        }
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}
