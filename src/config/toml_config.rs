//! TOML Configuration with Environment Variable Overrides
//!
//! Supports:
//! - TOML configuration file under the user config directory
//! - Environment variable overrides (after `.env` is loaded)
//! - Atomic writes with backup

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "levelkeeper";
const CONFIG_FILE: &str = "config.toml";
const DATA_FILE: &str = "user_data.json";

pub const DEFAULT_MAX_LEVEL: u32 = 9999;
pub const DEFAULT_CARD_COLOR: [u8; 3] = [0, 255, 255];
pub const DEFAULT_CARD_BACKGROUND: &str = "https://i.ibb.co/9337ZnxF/wdwdwd.jpg";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub leveling: LevelingConfig,
    #[serde(default)]
    pub rewards: RewardsConfig,
    #[serde(default)]
    pub cards: CardsConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
}

fn default_data_file() -> PathBuf {
    app_dir().join(DATA_FILE)
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LevelingConfig {
    #[serde(default = "default_max_level")]
    pub max_level: u32,
}

fn default_max_level() -> u32 {
    DEFAULT_MAX_LEVEL
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            max_level: DEFAULT_MAX_LEVEL,
        }
    }
}

/// Inclusive reward range sampled uniformly
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardRange {
    pub min: u64,
    pub max: u64,
}

impl RewardRange {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    /// Range with bounds put in order, so a swapped config still samples.
    pub fn as_range(&self) -> RangeInclusive<u64> {
        self.min.min(self.max)..=self.min.max(self.max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardsConfig {
    #[serde(default = "default_message_xp")]
    pub message_xp: RewardRange,
    #[serde(default = "default_message_coins")]
    pub message_coins: RewardRange,
    #[serde(default = "default_voice_xp_per_minute")]
    pub voice_xp_per_minute: RewardRange,
}

fn default_message_xp() -> RewardRange {
    RewardRange::new(1, 10)
}
fn default_message_coins() -> RewardRange {
    RewardRange::new(1, 100)
}
fn default_voice_xp_per_minute() -> RewardRange {
    RewardRange::new(5, 15)
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            message_xp: default_message_xp(),
            message_coins: default_message_coins(),
            voice_xp_per_minute: default_voice_xp_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardsConfig {
    #[serde(default = "default_card_color")]
    pub default_color: [u8; 3],
    #[serde(default = "default_card_background")]
    pub default_background: String,
}

fn default_card_color() -> [u8; 3] {
    DEFAULT_CARD_COLOR
}
fn default_card_background() -> String {
    DEFAULT_CARD_BACKGROUND.to_string()
}

impl Default for CardsConfig {
    fn default() -> Self {
        Self {
            default_color: DEFAULT_CARD_COLOR,
            default_background: DEFAULT_CARD_BACKGROUND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub level_up_channel: Option<String>,
}

fn app_dir() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    path
}

pub fn get_config_path() -> PathBuf {
    app_dir().join(CONFIG_FILE)
}

/// Load config from the default location, then apply `.env` and
/// environment overrides. A missing file yields defaults.
pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_path())
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let config = if path.exists() {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = toml::from_str::<Config>(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        tracing::info!("Loaded TOML config from {:?}", path);
        config
    } else {
        tracing::debug!("No config file at {:?}, using defaults", path);
        Config::default()
    };

    Ok(apply_env_overrides(config))
}

pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Create backup if file exists
    if path.exists() {
        let backup_path = path.with_extension("toml.bak");
        let _ = fs::copy(path, &backup_path);
    }

    let contents = toml::to_string_pretty(config)?;

    // Write to temp file first, then rename over the target
    let temp_path = path.with_extension("toml.tmp");
    fs::write(&temp_path, &contents)?;
    fs::rename(&temp_path, path)?;

    tracing::info!("Saved TOML config to {:?}", path);
    Ok(())
}

fn apply_env_overrides(config: Config) -> Config {
    apply_overrides_from(config, |key| std::env::var(key).ok())
}

fn apply_overrides_from<F>(mut config: Config, lookup: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(data_file) = lookup("LEVELKEEPER_DATA_FILE") {
        if !data_file.is_empty() {
            config.storage.data_file = PathBuf::from(data_file);
        }
    }

    if let Some(max_level) = lookup("LEVELKEEPER_MAX_LEVEL") {
        match max_level.parse::<u32>() {
            Ok(level) if level >= 1 => config.leveling.max_level = level,
            _ => tracing::warn!("Ignoring invalid LEVELKEEPER_MAX_LEVEL={:?}", max_level),
        }
    }

    if let Some(channel) = lookup("LEVELKEEPER_LEVEL_UP_CHANNEL") {
        if !channel.is_empty() {
            config.discord.level_up_channel = Some(channel);
        }
    }

    if let Some(token) = lookup("BOT_TOKEN") {
        if !token.is_empty() {
            config.discord.bot_token = Some(token);
        }
    }

    config
}
