//! Timed role grants
//!
//! A grant moves through `Requested -> Persisted -> Armed -> Completed`.
//! Registration persists the grant before arming it, so a crash in between
//! still leaves a durable record for [`GrantScheduler::recover`] to re-arm.
//!
//! Expiry is best-effort and at-most-once: the role collaborator is called
//! once and the grant leaves the durable set whether or not the call worked.

mod timer;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::channels::RoleManager;
use crate::engine::Engine;
use crate::progression::{GroupId, MemberId, RoleId};
use crate::utils::current_timestamp;
use timer::{spawn_timer_loop, TimerHandle};

/// A role held by a member until `expires_at` (unix seconds)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedGrant {
    pub member_id: MemberId,
    pub group_id: GroupId,
    pub role_id: RoleId,
    pub expires_at: u64,
}

impl TimedGrant {
    pub fn new(member_id: &str, group_id: &str, role_id: &str, expires_at: u64) -> Self {
        Self {
            member_id: member_id.to_string(),
            group_id: group_id.to_string(),
            role_id: role_id.to_string(),
            expires_at,
        }
    }
}

/// What happened when a grant came due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    Removed,
    RemovalFailed,
    /// Already expired or cancelled; nothing was called
    AlreadyGone,
}

/// Run the expiry action for one grant.
pub(crate) async fn expire(engine: &Engine, roles: &dyn RoleManager, grant: &TimedGrant) -> ExpiryOutcome {
    if !engine.has_grant(grant).await {
        tracing::debug!(
            "Skipping expiry of role {} for {}: no longer pending",
            grant.role_id,
            grant.member_id
        );
        return ExpiryOutcome::AlreadyGone;
    }

    let outcome = match roles
        .remove_role(&grant.group_id, &grant.member_id, &grant.role_id)
        .await
    {
        Ok(()) => {
            tracing::info!(
                "Timed role {} expired for member {} in group {}",
                grant.role_id,
                grant.member_id,
                grant.group_id
            );
            ExpiryOutcome::Removed
        }
        Err(e) => {
            tracing::warn!(
                "Failed to remove timed role {} from member {} in group {}: {}",
                grant.role_id,
                grant.member_id,
                grant.group_id,
                e
            );
            ExpiryOutcome::RemovalFailed
        }
    };

    engine.remove_grant(grant).await;
    outcome
}

pub struct GrantScheduler {
    engine: Engine,
    roles: Arc<dyn RoleManager>,
    timer: TimerHandle,
    shutdown: CancellationToken,
}

impl GrantScheduler {
    /// Spawn the timer loop. Must be called inside a tokio runtime.
    pub fn start(engine: Engine, roles: Arc<dyn RoleManager>) -> Self {
        let shutdown = CancellationToken::new();
        let timer = spawn_timer_loop(engine.clone(), Arc::clone(&roles), shutdown.clone());
        Self {
            engine,
            roles,
            timer,
            shutdown,
        }
    }

    /// Persist a new grant, then arm it. A grant that is already due expires
    /// before this returns.
    pub async fn register(
        &self,
        member_id: &str,
        group_id: &str,
        role_id: &str,
        expires_at: u64,
    ) -> TimedGrant {
        let grant = TimedGrant::new(member_id, group_id, role_id, expires_at);
        self.engine.add_grant(grant.clone()).await;

        let now = current_timestamp();
        if grant.expires_at <= now {
            expire(&self.engine, self.roles.as_ref(), &grant).await;
        } else {
            self.arm(grant.clone(), now);
            tracing::info!(
                "Registered timed role {} for member {} until {}",
                grant.role_id,
                grant.member_id,
                grant.expires_at
            );
        }
        grant
    }

    /// Register a grant lasting `duration` from now
    pub async fn register_for(
        &self,
        member_id: &str,
        group_id: &str,
        role_id: &str,
        duration: Duration,
    ) -> TimedGrant {
        let expires_at = current_timestamp().saturating_add(duration.as_secs());
        self.register(member_id, group_id, role_id, expires_at).await
    }

    /// Arm every persisted grant without re-persisting. Call once at startup
    /// before accepting new events. Returns the number of grants armed.
    pub async fn recover(&self) -> usize {
        let grants = self.engine.grants().await;
        let now = current_timestamp();
        let mut armed = 0;
        for grant in grants {
            if self.arm(grant, now) {
                armed += 1;
            }
        }
        tracing::info!("Recovered {} timed role grants", armed);
        armed
    }

    /// Drop a pending grant from the durable set. An armed entry for it
    /// becomes a no-op when it fires.
    pub async fn cancel(&self, grant: &TimedGrant) -> bool {
        let removed = self.engine.remove_grant(grant).await;
        if removed {
            tracing::info!(
                "Cancelled timed role {} for member {}",
                grant.role_id,
                grant.member_id
            );
        }
        removed
    }

    /// Grants still waiting to expire
    pub async fn pending(&self) -> Vec<TimedGrant> {
        self.engine.grants().await
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn arm(&self, grant: TimedGrant, now: u64) -> bool {
        let armed = self.timer.arm(grant, now);
        if !armed {
            tracing::warn!("Grant timer loop is not running; grant left pending");
        }
        armed
    }
}

impl Drop for GrantScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::testing::RecordingRoleManager;
    use crate::engine::EngineSettings;
    use crate::store::{Document, Store};
    use tempfile::{tempdir, TempDir};

    async fn setup(document: Document) -> (TempDir, Engine) {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path().join("user_data.json"));
        store.save(&document).await.unwrap();
        let engine = Engine::open(store, EngineSettings::default()).await;
        (dir, engine)
    }

    fn removal(grant: &TimedGrant) -> (String, String, String) {
        (grant.group_id.clone(), grant.member_id.clone(), grant.role_id.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_persists_then_expires() {
        let (_dir, engine) = setup(Document::default()).await;
        let roles = Arc::new(RecordingRoleManager::default());
        let scheduler = GrantScheduler::start(engine.clone(), roles.clone());

        let grant = scheduler
            .register_for("10", "1", "99", Duration::from_secs(3_600))
            .await;
        assert_eq!(engine.store().load().await.timed_grants, vec![grant.clone()]);

        tokio::time::sleep(Duration::from_secs(1_800)).await;
        assert!(roles.removals().is_empty());

        tokio::time::sleep(Duration::from_secs(1_801)).await;
        assert_eq!(roles.removals(), vec![removal(&grant)]);
        assert!(scheduler.pending().await.is_empty());
        assert!(engine.store().load().await.timed_grants.is_empty());
    }

    #[tokio::test]
    async fn test_past_grant_expires_before_register_returns() {
        let (_dir, engine) = setup(Document::default()).await;
        let roles = Arc::new(RecordingRoleManager::default());
        let scheduler = GrantScheduler::start(engine.clone(), roles.clone());

        let past = current_timestamp() - 10;
        let grant = scheduler.register("10", "1", "99", past).await;

        assert_eq!(roles.removals(), vec![removal(&grant)]);
        assert!(!engine.has_grant(&grant).await);
        assert!(engine.store().load().await.timed_grants.is_empty());
    }

    #[tokio::test]
    async fn test_failed_removal_still_clears_grant() {
        let (_dir, engine) = setup(Document::default()).await;
        let roles = Arc::new(RecordingRoleManager::failing());
        let grant = TimedGrant::new("10", "1", "99", 0);
        engine.add_grant(grant.clone()).await;

        let outcome = expire(&engine, roles.as_ref(), &grant).await;
        assert_eq!(outcome, ExpiryOutcome::RemovalFailed);
        assert_eq!(roles.removals().len(), 1);
        assert!(engine.grants().await.is_empty());

        // No retry: a second expiry finds nothing to do
        let outcome = expire(&engine, roles.as_ref(), &grant).await;
        assert_eq!(outcome, ExpiryOutcome::AlreadyGone);
        assert_eq!(roles.removals().len(), 1);
    }

    #[tokio::test]
    async fn test_expiry_with_failing_save_still_drops_grant() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let engine = Engine::open(
            Store::new(blocker.join("user_data.json")),
            EngineSettings::default(),
        )
        .await;
        let roles = Arc::new(RecordingRoleManager::default());
        let scheduler = GrantScheduler::start(engine.clone(), roles.clone());

        let grant = scheduler
            .register("10", "1", "99", current_timestamp() - 1)
            .await;
        assert_eq!(roles.removals(), vec![removal(&grant)]);
        assert!(engine.grants().await.is_empty());

        let other = TimedGrant::new("11", "1", "99", 0);
        engine.add_grant(other.clone()).await;
        assert_eq!(expire(&engine, roles.as_ref(), &other).await, ExpiryOutcome::Removed);
        assert!(engine.grants().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_role_manager_does_not_stop_timer() {
        let (_dir, engine) = setup(Document::default()).await;
        let roles = Arc::new(RecordingRoleManager::panicking_on("66"));
        let scheduler = GrantScheduler::start(engine.clone(), roles.clone());

        let crashing = scheduler
            .register_for("10", "1", "66", Duration::from_secs(30))
            .await;
        let healthy = scheduler
            .register_for("11", "1", "99", Duration::from_secs(60))
            .await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(roles.removals(), vec![removal(&crashing), removal(&healthy)]);
        // the crashed expiry never completed, so recovery picks it up again
        assert_eq!(engine.grants().await, vec![crashing]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_arms_persisted_grants() {
        let now = current_timestamp();
        let due = TimedGrant::new("10", "1", "99", now - 60);
        let later = TimedGrant::new("11", "1", "98", now + 600);
        let document = Document {
            timed_grants: vec![due.clone(), later.clone()],
            ..Document::default()
        };
        let (_dir, engine) = setup(document).await;
        let roles = Arc::new(RecordingRoleManager::default());
        let scheduler = GrantScheduler::start(engine.clone(), roles.clone());

        assert_eq!(scheduler.recover().await, 2);
        // recovery does not re-persist or duplicate entries
        assert_eq!(engine.grants().await.len(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(roles.removals(), vec![removal(&due)]);
        assert_eq!(engine.grants().await, vec![later.clone()]);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(roles.removals(), vec![removal(&due), removal(&later)]);
        assert!(engine.grants().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_twice_removes_each_role_once() {
        let now = current_timestamp();
        let a = TimedGrant::new("10", "1", "99", now + 30);
        let b = TimedGrant::new("11", "1", "99", now + 60);
        let document = Document {
            timed_grants: vec![a.clone(), b.clone()],
            ..Document::default()
        };
        let (_dir, engine) = setup(document).await;
        let roles = Arc::new(RecordingRoleManager::default());
        let scheduler = GrantScheduler::start(engine.clone(), roles.clone());

        assert_eq!(scheduler.recover().await, 2);
        assert_eq!(scheduler.recover().await, 2);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(roles.removals(), vec![removal(&a), removal(&b)]);
        assert!(engine.grants().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_grant_never_fires() {
        let (_dir, engine) = setup(Document::default()).await;
        let roles = Arc::new(RecordingRoleManager::default());
        let scheduler = GrantScheduler::start(engine.clone(), roles.clone());

        let grant = scheduler
            .register_for("10", "1", "99", Duration::from_secs(60))
            .await;
        assert!(scheduler.cancel(&grant).await);
        assert!(!scheduler.cancel(&grant).await);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(roles.removals().is_empty());
        assert!(engine.store().load().await.timed_grants.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_grants_per_member() {
        let (_dir, engine) = setup(Document::default()).await;
        let roles = Arc::new(RecordingRoleManager::default());
        let scheduler = GrantScheduler::start(engine.clone(), roles.clone());

        let short = scheduler
            .register_for("10", "1", "98", Duration::from_secs(60))
            .await;
        let long = scheduler
            .register_for("10", "1", "99", Duration::from_secs(120))
            .await;
        assert_eq!(scheduler.pending().await.len(), 2);

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(scheduler.pending().await, vec![long.clone()]);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(roles.removals(), vec![removal(&short), removal(&long)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_expiry() {
        let (_dir, engine) = setup(Document::default()).await;
        let roles = Arc::new(RecordingRoleManager::default());
        let scheduler = GrantScheduler::start(engine.clone(), roles.clone());

        let grant = scheduler
            .register_for("10", "1", "99", Duration::from_secs(60))
            .await;
        scheduler.shutdown();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(roles.removals().is_empty());
        // still durable for the next process to recover
        assert_eq!(engine.store().load().await.timed_grants, vec![grant]);
    }
}
