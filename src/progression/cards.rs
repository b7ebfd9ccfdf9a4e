//! Level card preferences
//!
//! A member may pick a progress-bar color and a background image for their
//! level card. The renderer itself lives outside this crate; it receives a
//! [`CardSnapshot`].

use serde::{Deserialize, Serialize};
use url::Url;

use super::leveling::threshold;
use super::ProgressionRecord;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CardError {
    #[error("Invalid color {0:?}: use R,G,B between 0-255")]
    InvalidColor(String),

    #[error("Invalid background URL {0:?}: {1}")]
    InvalidBackground(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPreference {
    pub color: [u8; 3],
    pub background_reference: String,
}

impl CardPreference {
    /// Build a preference, validating the background locator
    pub fn new(color: [u8; 3], background: &str) -> Result<Self, CardError> {
        let background = validate_background(background)?;
        Ok(Self {
            color,
            background_reference: background.to_string(),
        })
    }
}

/// Accept only absolute `http`/`https` URLs with a host
pub fn validate_background(input: &str) -> Result<Url, CardError> {
    let trimmed = input.trim();
    let url = Url::parse(trimmed)
        .map_err(|e| CardError::InvalidBackground(trimmed.to_string(), e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host().is_some() => Ok(url),
        "http" | "https" => Err(CardError::InvalidBackground(
            trimmed.to_string(),
            "missing host".to_string(),
        )),
        other => Err(CardError::InvalidBackground(
            trimmed.to_string(),
            format!("unsupported scheme {}", other),
        )),
    }
}

/// Parse member input of the form `R,G,B`
pub fn parse_color(input: &str) -> Result<[u8; 3], CardError> {
    let parts: Vec<&str> = input.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(CardError::InvalidColor(input.to_string()));
    }
    let mut color = [0u8; 3];
    for (slot, part) in color.iter_mut().zip(parts) {
        *slot = part
            .parse::<u8>()
            .map_err(|_| CardError::InvalidColor(input.to_string()))?;
    }
    Ok(color)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub coins: u64,
    pub diamonds: u64,
    pub deluxe_coins: u64,
}

/// Everything the card renderer needs for one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSnapshot {
    pub username: String,
    pub level: u32,
    pub xp: u64,
    pub xp_threshold: u64,
    pub total_xp: u64,
    pub balances: Balances,
    pub preference: CardPreference,
}

impl CardSnapshot {
    pub fn new(username: &str, record: &ProgressionRecord, preference: CardPreference) -> Self {
        Self {
            username: username.to_string(),
            level: record.level,
            xp: record.xp,
            xp_threshold: threshold(record.level),
            total_xp: record.total_xp,
            balances: record.balances(),
            preference,
        }
    }
}
