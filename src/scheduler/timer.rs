//! Expiry timer loop
//!
//! One task services every armed grant from a min-heap keyed by deadline.
//! New grants arrive over an unbounded channel; the loop sleeps until the
//! earliest deadline, expires everything due, and repeats until cancelled.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{expire, TimedGrant};
use crate::channels::RoleManager;
use crate::engine::Engine;

#[derive(Debug)]
pub(crate) struct ArmedGrant {
    deadline: Instant,
    seq: u64,
    grant: TimedGrant,
}

impl PartialEq for ArmedGrant {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for ArmedGrant {}

impl PartialOrd for ArmedGrant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArmedGrant {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Sending side of the timer loop
pub(crate) struct TimerHandle {
    tx: mpsc::UnboundedSender<ArmedGrant>,
    seq: AtomicU64,
}

impl TimerHandle {
    /// Arm `grant` to fire `expires_at - now_unix` seconds from now (zero if past).
    /// Returns false once the loop has stopped.
    pub(crate) fn arm(&self, grant: TimedGrant, now_unix: u64) -> bool {
        let delay = Duration::from_secs(grant.expires_at.saturating_sub(now_unix));
        let armed = ArmedGrant {
            deadline: Instant::now() + delay,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            grant,
        };
        self.tx.send(armed).is_ok()
    }
}

pub(crate) fn spawn_timer_loop(
    engine: Engine,
    roles: Arc<dyn RoleManager>,
    shutdown: CancellationToken,
) -> TimerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(rx, engine, roles, shutdown));
    TimerHandle {
        tx,
        seq: AtomicU64::new(0),
    }
}

async fn sleep_until_next(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<ArmedGrant>,
    engine: Engine,
    roles: Arc<dyn RoleManager>,
    shutdown: CancellationToken,
) {
    let mut heap: BinaryHeap<Reverse<ArmedGrant>> = BinaryHeap::new();
    tracing::debug!("Grant timer loop started");

    loop {
        let next_deadline = heap.peek().map(|Reverse(armed)| armed.deadline);

        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                tracing::info!("Grant timer loop stopped with {} armed grants", heap.len());
                break;
            }
            armed = rx.recv() => match armed {
                Some(armed) => heap.push(Reverse(armed)),
                None => {
                    tracing::debug!("Grant timer channel closed");
                    break;
                }
            },
            _ = sleep_until_next(next_deadline) => {
                let now = Instant::now();
                while heap.peek().map_or(false, |Reverse(armed)| armed.deadline <= now) {
                    if let Some(Reverse(armed)) = heap.pop() {
                        run_expiry(&engine, &roles, armed.grant).await;
                    }
                }
            }
        }
    }
}

/// Expire on its own task so a panicking collaborator cannot take the loop down.
/// The grant stays in the durable set and is retried on the next recovery.
async fn run_expiry(engine: &Engine, roles: &Arc<dyn RoleManager>, grant: TimedGrant) {
    let engine = engine.clone();
    let roles = Arc::clone(roles);
    let task = tokio::spawn(async move { expire(&engine, roles.as_ref(), &grant).await });
    if let Err(e) = task.await {
        tracing::error!("Timed grant expiry task failed: {}", e);
    }
}
