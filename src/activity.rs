//! Activity accrual
//! Turns chat messages and voice sessions into experience and coins
//!
//! Voice sessions live only in memory: a restart drops every open session and
//! the time spent in it is never credited.

use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::channels::{notify_best_effort, Notifier};
use crate::config::{Config, RewardRange, RewardsConfig};
use crate::engine::Engine;
use crate::progression::{ChannelId, CurrencyKind, LevelChange, MemberId};

const SECS_PER_MINUTE: u64 = 60;

/// An open voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceSession {
    pub started_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageReward {
    pub experience: u64,
    pub coins: u64,
    pub change: LevelChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceReward {
    pub minutes: u64,
    pub experience: u64,
    pub change: LevelChange,
}

pub struct ActivityAccrual {
    engine: Engine,
    notifier: Arc<dyn Notifier>,
    rewards: RewardsConfig,
    level_up_channel: Option<ChannelId>,
    sessions: Mutex<HashMap<MemberId, VoiceSession>>,
}

impl ActivityAccrual {
    pub fn new(
        engine: Engine,
        notifier: Arc<dyn Notifier>,
        rewards: RewardsConfig,
        level_up_channel: Option<ChannelId>,
    ) -> Self {
        Self {
            engine,
            notifier,
            rewards,
            level_up_channel,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(engine: Engine, notifier: Arc<dyn Notifier>, config: &Config) -> Self {
        Self::new(
            engine,
            notifier,
            config.rewards.clone(),
            config.discord.level_up_channel.clone(),
        )
    }

    /// Credit one qualifying message. No deduplication.
    pub async fn on_message(&self, member_id: &str) -> MessageReward {
        let (experience, coins) = {
            let mut rng = rand::thread_rng();
            (
                sample(&mut rng, self.rewards.message_xp),
                sample(&mut rng, self.rewards.message_coins),
            )
        };

        let change = self.engine.grant_experience(member_id, experience).await;
        if coins > 0 {
            let delta = i64::try_from(coins).unwrap_or(i64::MAX);
            self.engine
                .adjust_currency(member_id, CurrencyKind::Coins, delta)
                .await;
        }
        self.announce_level_up(member_id, change).await;

        MessageReward {
            experience,
            coins,
            change,
        }
    }

    /// Start a session. A repeated join restarts the clock (last write wins),
    /// so a missed leave never credits the gap between joins.
    /// Returns the session that was replaced, if any.
    pub fn on_voice_join(&self, member_id: &str, now: u64) -> Option<VoiceSession> {
        let Ok(mut sessions) = self.sessions.lock() else {
            tracing::error!("Voice session table lock poisoned");
            return None;
        };
        let previous = sessions.insert(member_id.to_string(), VoiceSession { started_at: now });
        match previous {
            Some(old) => tracing::debug!(
                "Voice session for {} restarted (was open since {})",
                member_id,
                old.started_at
            ),
            None => tracing::debug!("Voice session started for {}", member_id),
        }
        previous
    }

    /// Close a session and credit one reward sample per whole minute.
    /// Sessions shorter than a minute (or unknown members) credit nothing.
    pub async fn on_voice_leave(&self, member_id: &str, now: u64) -> Option<VoiceReward> {
        let session = {
            let mut sessions = self.sessions.lock().ok()?;
            sessions.remove(member_id)?
        };

        let minutes = now.saturating_sub(session.started_at) / SECS_PER_MINUTE;
        if minutes == 0 {
            tracing::debug!("Voice session of {} under a minute, nothing credited", member_id);
            return None;
        }

        let experience = {
            let mut rng = rand::thread_rng();
            (0..minutes)
                .map(|_| sample(&mut rng, self.rewards.voice_xp_per_minute))
                .fold(0u64, u64::saturating_add)
        };

        let change = self.engine.grant_experience(member_id, experience).await;
        notify_best_effort(
            self.notifier.as_ref(),
            self.level_up_channel.as_deref(),
            &format!(
                "<@{}> earned {} XP for {} minute{} in voice chat",
                member_id,
                experience,
                minutes,
                if minutes == 1 { "" } else { "s" }
            ),
        )
        .await;
        self.announce_level_up(member_id, change).await;

        Some(VoiceReward {
            minutes,
            experience,
            change,
        })
    }

    pub fn active_voice_sessions(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    async fn announce_level_up(&self, member_id: &str, change: LevelChange) {
        if !change.leveled_up() {
            return;
        }
        tracing::info!(
            "Member {} leveled from {} to {}",
            member_id,
            change.previous,
            change.current
        );
        notify_best_effort(
            self.notifier.as_ref(),
            self.level_up_channel.as_deref(),
            &format!(
                "**Leveled up**\n<@{}> leveled from {} to {}",
                member_id, change.previous, change.current
            ),
        )
        .await;
    }
}

fn sample<R: Rng>(rng: &mut R, range: RewardRange) -> u64 {
    rng.gen_range(range.as_range())
}
