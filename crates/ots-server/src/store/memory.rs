use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use super::model::SecretRecord;
use super::{new_id, SecretStore, StoreError};

pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

type Secrets = HashMap<String, SecretRecord>;

/// Process-local store. Contents are lost on restart.
///
/// The whole map sits behind one reader/writer lock: `count` takes the read
/// side, everything that mutates takes the write side. Expired records are
/// swept by a background task owned by the store and aborted on drop.
pub struct MemoryStore {
    secrets: Arc<RwLock<Secrets>>,
    sweeper: Option<JoinHandle<()>>,
}

impl MemoryStore {
    /// A store without a background sweep. Expired records are still
    /// invisible to readers; they just linger until [`MemoryStore::prune`].
    pub fn new() -> Self {
        Self {
            secrets: Arc::new(RwLock::new(HashMap::new())),
            sweeper: None,
        }
    }

    /// A store that prunes expired records every `interval`. A zero
    /// interval falls back to [`DEFAULT_PRUNE_INTERVAL`].
    /// Must be called from within a Tokio runtime.
    pub fn spawn(interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            warn!("prune interval must be non-zero, using default");
            DEFAULT_PRUNE_INTERVAL
        } else {
            interval
        };
        let mut store = Self::new();
        let secrets = Arc::clone(&store.secrets);
        store.sweeper = Some(tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                prune_map(&secrets);
            }
        }));
        store
    }

    /// Remove every expired record. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        prune_map(&self.secrets)
    }

    fn read(&self) -> RwLockReadGuard<'_, Secrets> {
        read_lock(&self.secrets)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Secrets> {
        write_lock(&self.secrets)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.read().len() as u64)
    }

    async fn create(&self, ciphertext: String, expire_in: Duration) -> Result<String, StoreError> {
        let id = new_id();
        let record = SecretRecord::new(ciphertext, expire_in, Instant::now());
        self.write().insert(id.clone(), record);
        debug!(id = %id, "stored secret");
        Ok(id)
    }

    async fn read_and_destroy(&self, id: &str) -> Result<String, StoreError> {
        // Lookup, expiry check and removal share one write guard.
        let record = self.write().remove(id).ok_or(StoreError::NotFound)?;

        // The sweeper may simply not have reached this record yet.
        if record.is_expired(Instant::now()) {
            debug!(id = %id, "lazy-evicted expired secret");
            return Err(StoreError::NotFound);
        }
        Ok(record.ciphertext)
    }
}

fn prune_map(secrets: &RwLock<Secrets>) -> usize {
    let now = Instant::now();
    let mut map = write_lock(secrets);
    let before = map.len();
    map.retain(|_, record| !record.is_expired(now));
    let removed = before - map.len();
    if removed > 0 {
        info!(removed, "pruned expired secrets");
    }
    removed
}

// A panic while holding the lock cannot leave a record half-written, so a
// poisoned map is still consistent.
fn read_lock(secrets: &RwLock<Secrets>) -> RwLockReadGuard<'_, Secrets> {
    secrets.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock(secrets: &RwLock<Secrets>) -> RwLockWriteGuard<'_, Secrets> {
    secrets.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
