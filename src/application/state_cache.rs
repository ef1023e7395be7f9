//! Campaign state cache
//!
//! Typed access to the shared cache. Every read-modify-write of a campaign's
//! [`CampaignCacheState`] must happen while holding the guard returned by
//! [`CampaignStateCache::lock`], which serializes writers per campaign id.

use crate::domain::cache::CacheStore;
use crate::domain::dial_state::{CampaignCacheState, LegSnapshot, LiveLegs};
use crate::domain::shared::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

pub fn campaign_key(campaign_id: Uuid) -> String {
    campaign_id.to_string()
}

pub fn leg_key(leg_sid: &str) -> String {
    format!("leg:{}", leg_sid)
}

pub fn conversation_key(conversation_id: Uuid) -> String {
    format!("conversation:{}", conversation_id)
}

pub fn job_key(dedupe_id: &str) -> String {
    format!("job:{}", dedupe_id)
}

pub struct CampaignStateCache {
    store: Arc<dyn CacheStore>,
    /// Per-campaign writer locks (campaign_id -> lock)
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CampaignStateCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the single-writer guard of a campaign. Not reentrant.
    pub async fn lock(&self, campaign_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(campaign_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub async fn get(&self, campaign_id: Uuid) -> Result<Option<CampaignCacheState>> {
        self.read(&campaign_key(campaign_id)).await
    }

    pub async fn put(&self, state: &CampaignCacheState) -> Result<()> {
        debug!(
            "Caching state of campaign {} (pointer {}, {:?})",
            state.campaign_id, state.current_sequence, state.status
        );
        self.write(&campaign_key(state.campaign_id), state).await
    }

    /// Remove a campaign's state; the campaign stops reacting to webhooks
    pub async fn delete(&self, campaign_id: Uuid) -> Result<()> {
        self.store.delete(&campaign_key(campaign_id)).await?;

        // Drop lock entries nobody holds
        let mut locks = self.locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(())
    }

    pub async fn put_leg(&self, leg_sid: &str, snapshot: &LegSnapshot) -> Result<()> {
        self.write(&leg_key(leg_sid), snapshot).await
    }

    pub async fn get_leg(&self, leg_sid: &str) -> Result<Option<LegSnapshot>> {
        self.read(&leg_key(leg_sid)).await
    }

    pub async fn put_live_legs(&self, conversation_id: Uuid, legs: &LiveLegs) -> Result<()> {
        self.write(&conversation_key(conversation_id), legs).await
    }

    pub async fn get_live_legs(&self, conversation_id: Uuid) -> Result<Option<LiveLegs>> {
        self.read(&conversation_key(conversation_id)).await
    }

    pub async fn delete_key(&self, key: &str) -> Result<()> {
        self.store.delete(key).await
    }

    pub async fn is_job_done(&self, dedupe_id: &str) -> Result<bool> {
        Ok(self.store.get(&job_key(dedupe_id)).await?.is_some())
    }

    pub async fn mark_job_done(&self, dedupe_id: &str) -> Result<()> {
        self.store.set(&job_key(dedupe_id), b"1".to_vec()).await
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    warn!("Corrupt cache entry {}: {}", key, e);
                    Err(e.into())
                }
            },
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(key, bytes).await
    }
}
