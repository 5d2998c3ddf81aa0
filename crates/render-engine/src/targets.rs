//! Exclusive ownership of render targets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use cutlog_common::error::CutlogResult;
use cutlog_project_model::claim::Claim;

use crate::claims::{ClaimGuard, Claims};

/// Per-artifact locks, held across a whole render.
///
/// Workers of one queue wait on an in-process mutex; the claim record then
/// excludes every other queue on the same storage root.
#[derive(Debug)]
pub struct TargetLocks {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    claims: Arc<Claims>,
}

/// Held while a target is being checked, rendered and pointed to.
#[derive(Debug)]
pub struct TargetGuard {
    _claim: ClaimGuard,
    _local: OwnedMutexGuard<()>,
}

impl TargetLocks {
    pub fn new(claims: Arc<Claims>) -> Self {
        Self {
            slots: Mutex::default(),
            claims,
        }
    }

    /// Wait for exclusive ownership of the artifact `key`.
    pub async fn lock(&self, key: &str) -> CutlogResult<TargetGuard> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            // Drop slots nobody holds or waits on.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(key.to_string()).or_default())
        };
        let local = slot.lock_owned().await;
        let claim = self.claims.acquire(&Claim::for_target(key)).await?;
        Ok(TargetGuard {
            _claim: claim,
            _local: local,
        })
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
