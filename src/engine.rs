//! Progression engine
//!
//! The single service object owning the working copy of the durable document.
//! Every mutate-then-persist sequence runs under one async mutex, and the save
//! happens before the lock is released, so saves never interleave and each one
//! captures the full accumulated state.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::progression::{
    CardError, CardPreference, CardSnapshot, CurrencyKind, LevelChange, MemberId, ProgressionRecord,
};
use crate::scheduler::TimedGrant;
use crate::store::{Document, Store, StoreError};

/// Engine knobs taken from config
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub max_level: u32,
    pub default_color: [u8; 3],
    pub default_background: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_level: config.leveling.max_level.max(1),
            default_color: config.cards.default_color,
            default_background: config.cards.default_background.clone(),
        }
    }
}

struct EngineInner {
    store: Store,
    settings: EngineSettings,
    document: Mutex<Document>,
}

/// Cheaply cloneable handle to the shared engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Load the document from `store` and take ownership of it
    pub async fn open(store: Store, settings: EngineSettings) -> Self {
        let document = store.load().await;
        Self::with_document(store, settings, document)
    }

    pub fn with_document(store: Store, settings: EngineSettings, document: Document) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                settings,
                document: Mutex::new(document),
            }),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Run `f` against the document and persist the result before unlocking.
    /// A failed save is logged; the in-memory state stays authoritative.
    async fn mutate<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let mut document = self.inner.document.lock().await;
        let result = f(&mut document);
        if let Err(e) = self.inner.store.save(&document).await {
            tracing::error!("Failed to persist store: {}", e);
        }
        result
    }

    async fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        let document = self.inner.document.lock().await;
        f(&document)
    }

    // ------------------------------------------------------------------
    // Progression
    // ------------------------------------------------------------------

    /// Record for `member_id`, inserting a zero-value record if absent.
    /// The insert is not persisted until the next save.
    pub async fn get_or_create(&self, member_id: &str) -> ProgressionRecord {
        let mut document = self.inner.document.lock().await;
        document.progression.get_or_create(member_id).clone()
    }

    pub async fn record(&self, member_id: &str) -> Option<ProgressionRecord> {
        self.read(|doc| doc.progression.get(member_id).cloned()).await
    }

    /// Record for `member_id`, or a zero-value record without inserting one
    pub async fn record_or_default(&self, member_id: &str) -> ProgressionRecord {
        self.record(member_id).await.unwrap_or_default()
    }

    pub async fn grant_experience(&self, member_id: &str, amount: u64) -> LevelChange {
        if amount == 0 {
            let level = self.get_or_create(member_id).await.level;
            return LevelChange::unchanged(level);
        }

        let max_level = self.inner.settings.max_level;
        let change = self
            .mutate(|doc| doc.progression.grant_experience(member_id, amount, max_level))
            .await;

        tracing::debug!(
            "Granted {} xp to {} (level {} -> {})",
            amount,
            member_id,
            change.previous,
            change.current
        );
        change
    }

    /// Apply a signed delta to one balance, clamped at zero. Returns the new balance.
    pub async fn adjust_currency(&self, member_id: &str, kind: CurrencyKind, delta: i64) -> u64 {
        let balance = self
            .mutate(|doc| doc.progression.adjust_currency(member_id, kind, delta))
            .await;
        tracing::debug!("Adjusted {} of {} by {} -> {}", kind, member_id, delta, balance);
        balance
    }

    pub async fn set_level(&self, member_id: &str, level: u32) -> LevelChange {
        let max_level = self.inner.settings.max_level;
        let change = self
            .mutate(|doc| doc.progression.set_level(member_id, level, max_level))
            .await;
        tracing::info!("Set level of {} from {} to {}", member_id, change.previous, change.current);
        change
    }

    pub async fn leaderboard(&self, limit: usize) -> Vec<(MemberId, ProgressionRecord)> {
        self.read(|doc| doc.progression.leaderboard(limit)).await
    }

    // ------------------------------------------------------------------
    // Card preferences
    // ------------------------------------------------------------------

    fn default_preference(&self) -> CardPreference {
        CardPreference {
            color: self.inner.settings.default_color,
            background_reference: self.inner.settings.default_background.clone(),
        }
    }

    /// Stored preference, or the configured defaults
    pub async fn card_preference(&self, member_id: &str) -> CardPreference {
        self.read(|doc| doc.card_preferences.get(member_id).cloned())
            .await
            .unwrap_or_else(|| self.default_preference())
    }

    pub async fn set_card_preference(
        &self,
        member_id: &str,
        color: [u8; 3],
        background: &str,
    ) -> Result<CardPreference, CardError> {
        let preference = CardPreference::new(color, background)?;
        let stored = preference.clone();
        self.mutate(|doc| {
            doc.card_preferences.insert(member_id.to_string(), stored);
        })
        .await;
        Ok(preference)
    }

    /// Fall back to the default background, keeping the member's color.
    /// Used when the renderer cannot load the stored background.
    pub async fn reset_card_background(&self, member_id: &str) -> CardPreference {
        let default = self.default_preference();
        let preference = self
            .mutate(|doc| {
                let entry = doc
                    .card_preferences
                    .entry(member_id.to_string())
                    .or_insert_with(|| default.clone());
                entry.background_reference = default.background_reference.clone();
                entry.clone()
            })
            .await;
        tracing::info!("Reset card background of {} to default", member_id);
        preference
    }

    /// Renderer input for one member. Creates the record if absent.
    pub async fn card_snapshot(&self, member_id: &str, username: &str) -> CardSnapshot {
        let record = self.get_or_create(member_id).await;
        let preference = self.card_preference(member_id).await;
        CardSnapshot::new(username, &record, preference)
    }

    // ------------------------------------------------------------------
    // Durable grant set
    // ------------------------------------------------------------------

    pub async fn grants(&self) -> Vec<TimedGrant> {
        self.read(|doc| doc.timed_grants.clone()).await
    }

    pub async fn has_grant(&self, grant: &TimedGrant) -> bool {
        self.read(|doc| doc.timed_grants.contains(grant)).await
    }

    pub(crate) async fn add_grant(&self, grant: TimedGrant) {
        self.mutate(|doc| doc.timed_grants.push(grant)).await;
    }

    /// Remove one entry equal to `grant`. Persists only when something was removed.
    pub(crate) async fn remove_grant(&self, grant: &TimedGrant) -> bool {
        let mut document = self.inner.document.lock().await;
        let Some(index) = document.timed_grants.iter().position(|g| g == grant) else {
            return false;
        };
        document.timed_grants.remove(index);
        if let Err(e) = self.inner.store.save(&document).await {
            tracing::error!("Failed to persist store: {}", e);
        }
        true
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Final save at teardown
    pub async fn flush(&self) -> Result<(), StoreError> {
        let document = self.inner.document.lock().await;
        self.inner.store.save(&document).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progression::threshold;
    use tempfile::{tempdir, TempDir};

    async fn engine_with(max_level: u32) -> (TempDir, Engine) {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("user_data.json"));
        let settings = EngineSettings {
            max_level,
            ..EngineSettings::default()
        };
        let engine = Engine::open(store, settings).await;
        (dir, engine)
    }

    #[tokio::test]
    async fn test_get_or_create_is_not_persisted() {
        let (_dir, engine) = engine_with(9999).await;
        let record = engine.get_or_create("1").await;
        assert_eq!(record, ProgressionRecord::default());
        assert!(!engine.store().path().exists());
    }

    #[tokio::test]
    async fn test_grant_experience_persists() {
        let (_dir, engine) = engine_with(9999).await;
        let change = engine.grant_experience("1", 150).await;
        assert_eq!(change, LevelChange { previous: 1, current: 2 });

        let reloaded = engine.store().load().await;
        let record = reloaded.progression.get("1").unwrap();
        assert_eq!((record.level, record.xp, record.total_xp), (2, 50, 150));
    }

    #[tokio::test]
    async fn test_grant_to_max_level() {
        let max = 30;
        let (_dir, engine) = engine_with(max).await;
        engine.set_level("1", max - 1).await;
        engine.grant_experience("1", threshold(max - 1) - 1).await;

        let change = engine.grant_experience("1", 1).await;
        assert_eq!(change.current, max);
        let record = engine.record("1").await.unwrap();
        assert_eq!(record.level, max);
        assert_eq!(record.xp, 0);
    }

    #[tokio::test]
    async fn test_adjust_currency_clamps_and_persists() {
        let (_dir, engine) = engine_with(9999).await;
        assert_eq!(engine.adjust_currency("1", CurrencyKind::Coins, 40).await, 40);
        assert_eq!(engine.adjust_currency("1", CurrencyKind::Coins, -100).await, 0);
        assert_eq!(engine.adjust_currency("1", CurrencyKind::DeluxeCoins, 5).await, 5);

        let reloaded = engine.store().load().await;
        let record = reloaded.progression.get("1").unwrap();
        assert_eq!(record.coins, 0);
        assert_eq!(record.deluxe_coins, 5);
    }

    #[tokio::test]
    async fn test_card_preferences() {
        let (_dir, engine) = engine_with(9999).await;
        let default = engine.card_preference("1").await;
        assert_eq!(default.color, [0, 255, 255]);

        assert!(engine
            .set_card_preference("1", [1, 2, 3], "javascript:alert(1)")
            .await
            .is_err());
        assert_eq!(engine.card_preference("1").await, default);

        engine
            .set_card_preference("1", [1, 2, 3], "https://example.com/bg.png")
            .await
            .unwrap();
        let reset = engine.reset_card_background("1").await;
        assert_eq!(reset.color, [1, 2, 3]);
        assert_eq!(reset.background_reference, default.background_reference);

        let reloaded = engine.store().load().await;
        assert_eq!(reloaded.card_preferences.get("1"), Some(&reset));
    }

    #[tokio::test]
    async fn test_card_snapshot() {
        let (_dir, engine) = engine_with(9999).await;
        engine.grant_experience("1", 150).await;
        engine.adjust_currency("1", CurrencyKind::Diamonds, 9).await;

        let snapshot = engine.card_snapshot("1", "sam").await;
        assert_eq!(snapshot.username, "sam");
        assert_eq!(snapshot.level, 2);
        assert_eq!(snapshot.xp_threshold, threshold(2));
        assert_eq!(snapshot.balances.diamonds, 9);
    }

    #[tokio::test]
    async fn test_remove_grant_removes_single_entry() {
        let (_dir, engine) = engine_with(9999).await;
        let grant = TimedGrant::new("1", "2", "3", 10);
        engine.add_grant(grant.clone()).await;
        engine.add_grant(grant.clone()).await;

        assert!(engine.remove_grant(&grant).await);
        assert_eq!(engine.grants().await, vec![grant.clone()]);
        assert!(engine.remove_grant(&grant).await);
        assert!(!engine.remove_grant(&grant).await);
        assert!(engine.store().load().await.timed_grants.is_empty());
    }

    /// Engine whose saves always fail: the document's parent is a regular file.
    async fn unwritable_engine() -> (TempDir, Engine) {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let store = Store::new(blocker.join("user_data.json"));
        assert!(store.save(&Document::default()).await.is_err());
        let engine = Engine::open(store, EngineSettings::default()).await;
        (dir, engine)
    }

    #[tokio::test]
    async fn test_failed_save_keeps_in_memory_result() {
        let (_dir, engine) = unwritable_engine().await;

        let change = engine.grant_experience("1", 150).await;
        assert_eq!(change, LevelChange { previous: 1, current: 2 });
        let record = engine.record("1").await.unwrap();
        assert_eq!((record.level, record.xp, record.total_xp), (2, 50, 150));

        assert_eq!(engine.adjust_currency("1", CurrencyKind::Coins, 7).await, 7);
        let grant = TimedGrant::new("1", "2", "3", 10);
        engine.add_grant(grant.clone()).await;
        assert!(engine.remove_grant(&grant).await);
        assert!(engine.grants().await.is_empty());

        assert!(engine.flush().await.is_err());
    }

    #[tokio::test]
    async fn test_record_or_default_does_not_insert() {
        let (_dir, engine) = engine_with(9999).await;
        assert_eq!(engine.record_or_default("1").await, ProgressionRecord::default());
        assert!(engine.record("1").await.is_none());

        engine.flush().await.unwrap();
        assert!(engine.store().load().await.progression.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_grants_are_not_lost() {
        let (_dir, engine) = engine_with(9999).await;
        let mut handles = Vec::new();
        for i in 0..20 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.grant_experience(&format!("m{}", i % 4), 10).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let reloaded = engine.store().load().await;
        let total: u64 = reloaded.progression.iter().map(|(_, r)| r.total_xp).sum();
        assert_eq!(total, 200);
    }
}
