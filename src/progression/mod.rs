//! Progression system
//! Per-member levels, experience and wallet balances, plus card preferences
//!
//! - `leveling` - threshold function and the level-up loop
//! - `ledger` - in-memory member -> record map
//! - `cards` - level card preferences and the renderer snapshot

pub mod cards;
pub mod ledger;
pub mod leveling;

pub use cards::{parse_color, validate_background, Balances, CardError, CardPreference, CardSnapshot};
pub use ledger::Ledger;
pub use leveling::{apply_experience, threshold, LevelChange};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Platform member identity (snowflake)
pub type MemberId = String;
/// Platform group (guild) identity
pub type GroupId = String;
/// Platform role identity
pub type RoleId = String;
/// Platform text channel identity
pub type ChannelId = String;

/// Progression state of a single member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressionRecord {
    pub level: u32,
    pub xp: u64,
    pub total_xp: u64,
    pub coins: u64,
    pub diamonds: u64,
    pub deluxe_coins: u64,
}

impl Default for ProgressionRecord {
    fn default() -> Self {
        Self {
            level: 1,
            xp: 0,
            total_xp: 0,
            coins: 0,
            diamonds: 0,
            deluxe_coins: 0,
        }
    }
}

impl ProgressionRecord {
    pub fn balance(&self, kind: CurrencyKind) -> u64 {
        match kind {
            CurrencyKind::Coins => self.coins,
            CurrencyKind::Diamonds => self.diamonds,
            CurrencyKind::DeluxeCoins => self.deluxe_coins,
        }
    }

    /// Apply a signed delta to one balance, clamping at zero.
    pub fn adjust(&mut self, kind: CurrencyKind, delta: i64) -> u64 {
        let balance = match kind {
            CurrencyKind::Coins => &mut self.coins,
            CurrencyKind::Diamonds => &mut self.diamonds,
            CurrencyKind::DeluxeCoins => &mut self.deluxe_coins,
        };
        *balance = if delta >= 0 {
            balance.saturating_add(delta.unsigned_abs())
        } else {
            balance.saturating_sub(delta.unsigned_abs())
        };
        *balance
    }

    pub fn balances(&self) -> Balances {
        Balances {
            coins: self.coins,
            diamonds: self.diamonds,
            deluxe_coins: self.deluxe_coins,
        }
    }
}

/// Wallet currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrencyKind {
    Coins,
    Diamonds,
    DeluxeCoins,
}

impl fmt::Display for CurrencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CurrencyKind::Coins => write!(f, "coins"),
            CurrencyKind::Diamonds => write!(f, "diamonds"),
            CurrencyKind::DeluxeCoins => write!(f, "deluxe_coins"),
        }
    }
}

impl FromStr for CurrencyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "coin" | "coins" => Ok(CurrencyKind::Coins),
            "diamond" | "diamonds" | "gem" | "gems" => Ok(CurrencyKind::Diamonds),
            "deluxe" | "deluxe_coin" | "deluxe_coins" => Ok(CurrencyKind::DeluxeCoins),
            other => Err(format!("unknown currency: {}", other)),
        }
    }
}
