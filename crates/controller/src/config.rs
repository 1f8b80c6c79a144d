use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use common::Tag;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TagboxConfig {
    pub version: u32,
    pub audio_root: String,
    pub broker_addr: String,
    pub broker_key: String,
    /// Listen address of the admin process.
    pub admin_addr: String,
    pub player_command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_tag: Option<Tag>,
    pub long_timeout_secs: u64,
    pub short_timeout_secs: u64,
    pub long_click_ms: u64,
    pub watch_library: bool,
    pub watch_debounce_secs: u64,
    pub system_volume: u32,
    /// Tags that play a file from `system/` instead of a playlist.
    pub special_tags: BTreeMap<Tag, String>,
}

impl Default for TagboxConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            audio_root: "audio".to_string(),
            broker_addr: "127.0.0.1:50000".to_string(),
            broker_key: "tagbox".to_string(),
            admin_addr: "0.0.0.0:8080".to_string(),
            player_command: "mpg123".to_string(),
            interrupt_tag: None,
            long_timeout_secs: 20 * 60,
            short_timeout_secs: 5 * 60,
            long_click_ms: 1500,
            watch_library: true,
            watch_debounce_secs: 2,
            system_volume: 2,
            special_tags: BTreeMap::new(),
        }
    }
}

impl TagboxConfig {
    pub fn long_timeout(&self) -> Duration {
        Duration::from_secs(nonzero(self.long_timeout_secs, 20 * 60))
    }

    pub fn short_timeout(&self) -> Duration {
        Duration::from_secs(nonzero(self.short_timeout_secs, 5 * 60))
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_secs(nonzero(self.watch_debounce_secs, 2))
    }
}

fn nonzero(value: u64, fallback: u64) -> u64 {
    if value == 0 {
        fallback
    } else {
        value
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(TagboxConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: TagboxConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.broker_addr.trim().is_empty() {
            config.broker_addr = TagboxConfig::default().broker_addr;
        }
        if config.player_command.trim().is_empty() {
            config.player_command = "mpg123".to_string();
        }
        return Ok((config, false));
    }

    let config = TagboxConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &TagboxConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}
