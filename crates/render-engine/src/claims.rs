//! Claims on jobs and render targets, shared across processes.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use cutlog_common::clock::SharedClock;
use cutlog_common::error::CutlogResult;
use cutlog_project_model::claim::Claim;
use cutlog_project_model::collection::Database;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Takes, renews and releases claims on behalf of one render queue.
#[derive(Debug)]
pub struct Claims {
    db: Arc<Database>,
    clock: SharedClock,
    owner: String,
    lease: chrono::Duration,
    renew_every: Duration,
}

impl Claims {
    pub fn new(db: Arc<Database>, clock: SharedClock, lease_secs: u64) -> Self {
        let lease_secs = lease_secs.clamp(1, u32::MAX as u64);
        Self {
            db,
            clock,
            owner: format!("queue-{}", uuid::Uuid::new_v4()),
            lease: chrono::Duration::seconds(lease_secs as i64),
            renew_every: Duration::from_secs(lease_secs) / 3,
        }
    }

    /// Take `key` if it is free or its holder stopped renewing it.
    pub fn try_acquire(self: &Arc<Self>, key: &str) -> CutlogResult<Option<ClaimGuard>> {
        let claims = &self.db.claims;
        let claim = Claim::new(key, &self.owner, self.clock.now());
        if !claims.insert_new(&claim)? {
            let now = self.clock.now();
            let evicted = claims.remove_if(key, |held| Ok(held.is_stale(now, self.lease)))?;
            if !evicted || !claims.insert_new(&claim)? {
                return Ok(None);
            }
            tracing::warn!(key, owner = %self.owner, "Took over abandoned claim");
        }
        Ok(Some(ClaimGuard::start(Arc::clone(self), key)))
    }

    /// Wait until `key` can be taken.
    pub async fn acquire(self: &Arc<Self>, key: &str) -> CutlogResult<ClaimGuard> {
        let mut logged = false;
        loop {
            if let Some(guard) = self.try_acquire(key)? {
                return Ok(guard);
            }
            if !logged {
                tracing::debug!(key, "Waiting for claim held by another queue");
                logged = true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Whether some queue holds a live claim on `key`.
    pub fn is_held(&self, key: &str) -> CutlogResult<bool> {
        let now = self.clock.now();
        Ok(self
            .db
            .claims
            .get(key)?
            .is_some_and(|claim| !claim.is_stale(now, self.lease)))
    }

    fn renew(&self, key: &str) -> CutlogResult<bool> {
        let now = self.clock.now();
        self.db.claims.update(key, |claim| {
            if claim.owner != self.owner {
                return Ok(false);
            }
            claim.renewed_at = now;
            Ok(true)
        })
    }

    fn release(&self, key: &str) -> CutlogResult<bool> {
        self.db
            .claims
            .remove_if(key, |claim| Ok(claim.owner == self.owner))
    }
}

/// A held claim. Renewed in the background until dropped.
#[derive(Debug)]
pub struct ClaimGuard {
    claims: Arc<Claims>,
    key: String,
    heartbeat: JoinHandle<()>,
}

impl ClaimGuard {
    fn start(claims: Arc<Claims>, key: &str) -> Self {
        let heartbeat = tokio::spawn(heartbeat(Arc::clone(&claims), key.to_string()));
        Self {
            claims,
            key: key.to_string(),
            heartbeat,
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.heartbeat.abort();
        if let Err(e) = self.claims.release(&self.key) {
            tracing::warn!(key = %self.key, error = %e, "Failed to release claim");
        }
    }
}

async fn heartbeat(claims: Arc<Claims>, key: String) {
    let mut ticker = tokio::time::interval(claims.renew_every);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match claims.renew(&key) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(key, "Claim was taken over by another queue");
                break;
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to renew claim");
                break;
            }
        }
    }
}
