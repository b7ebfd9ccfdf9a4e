//! Config module - TOML settings with environment overrides

pub mod toml_config;

pub use toml_config::{
    get_config_path, load_config, load_config_from, save_config, CardsConfig, Config,
    DiscordConfig, LevelingConfig, RewardRange, RewardsConfig, StorageConfig,
    DEFAULT_CARD_BACKGROUND, DEFAULT_CARD_COLOR, DEFAULT_MAX_LEVEL,
};
