//! Stable-id resolution with a small last-access-evicting cache.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;
use tracing::debug;

use whatsline_core::{
    error::ClientError,
    identity::{is_device_scoped, strip_device_suffix},
};

use crate::transport::Transport;

const DEFAULT_CAPACITY: usize = 4_096;

#[derive(Debug, Clone)]
struct CacheSlot {
    stable_id: String,
    last_access: u64,
}

#[derive(Debug, Default)]
struct ResolverCache {
    entries: HashMap<String, CacheSlot>,
    clock: u64,
}

impl ResolverCache {
    fn get(&mut self, id: &str) -> Option<String> {
        self.clock += 1;
        let clock = self.clock;
        let slot = self.entries.get_mut(id)?;
        slot.last_access = clock;
        Some(slot.stable_id.clone())
    }

    fn insert(&mut self, id: String, stable_id: String, capacity: usize) {
        self.clock += 1;
        if self.entries.len() >= capacity && !self.entries.contains_key(&id) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            id,
            CacheSlot {
                stable_id,
                last_access: self.clock,
            },
        );
    }
}

/// Maps alternate-namespace (device-scoped) ids to stable chat ids.
///
/// Ids that are not in the alternate namespace pass through with only
/// their device suffix stripped and never touch the transport.
pub struct IdentityResolver {
    transport: Arc<dyn Transport>,
    cache: Mutex<ResolverCache>,
    capacity: usize,
}

impl IdentityResolver {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_capacity(transport, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(transport: Arc<dyn Transport>, capacity: usize) -> Self {
        Self {
            transport,
            cache: Mutex::new(ResolverCache::default()),
            capacity: capacity.max(1),
        }
    }

    /// Resolve one id to its stable form.
    ///
    /// An alternate-namespace id the engine cannot map is an
    /// `identity_not_found` error; transport faults propagate as-is.
    pub async fn resolve(&self, id: &str) -> Result<String, ClientError> {
        let bare = strip_device_suffix(id);
        if !is_device_scoped(&bare) {
            return Ok(bare);
        }

        if let Some(hit) = self.cache.lock().await.get(&bare) {
            return Ok(hit);
        }

        let stable = match self.transport.resolve_stable_id(&bare).await? {
            Some(mapped) => strip_device_suffix(&mapped),
            None => return Err(ClientError::identity_not_found(&bare)),
        };
        debug!(alt = %bare, stable = %stable, "resolved alternate-namespace id");
        self.cache
            .lock()
            .await
            .insert(bare, stable.clone(), self.capacity);
        Ok(stable)
    }

    /// Seed a known mapping, e.g. from a history sync contact record.
    pub async fn seed(&self, alt_id: &str, stable_id: &str) {
        let bare = strip_device_suffix(alt_id);
        self.cache.lock().await.insert(
            bare,
            strip_device_suffix(stable_id),
            self.capacity,
        );
    }
}
