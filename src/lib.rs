//! Levelkeeper - progression and timed-grant engine for chat communities
//!
//! Tracks member activity (messages, voice time), converts it into experience
//! and levels, keeps a currency wallet per member, and grants roles for a
//! bounded time with recovery across restarts.
//!
//! Layout, bottom-up:
//! - `store` - the single JSON document on disk
//! - `progression` / `engine` - leveling state machine and wallet
//! - `activity` - message and voice accrual
//! - `scheduler` - timed role grants
//! - `channels` - chat platform collaborators (Discord REST)

pub mod activity;
pub mod channels;
pub mod config;
pub mod engine;
pub mod progression;
pub mod scheduler;
pub mod store;
pub mod utils;

pub use activity::{ActivityAccrual, MessageReward, VoiceReward, VoiceSession};
pub use channels::{ChannelError, DiscordClient, LogNotifier, LogRoleManager, Notifier, RoleManager};
pub use config::Config;
pub use engine::{Engine, EngineSettings};
pub use progression::{
    threshold, CardPreference, CardSnapshot, CurrencyKind, LevelChange, ProgressionRecord,
};
pub use scheduler::{ExpiryOutcome, GrantScheduler, TimedGrant};
pub use store::{Document, Store, StoreError};
pub use utils::{parse_duration, DurationError};
