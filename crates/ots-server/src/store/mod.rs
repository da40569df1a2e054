//! Expiring, single-read secret storage.
//!
//! Every backend implements [`SecretStore`]. A secret can be handed out by
//! [`SecretStore::read_and_destroy`] at most once; after that, and after its
//! expiry, it behaves as if it never existed.

pub mod memory;
pub mod model;
pub mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use model::SecretRecord;
pub use redis_store::RedisStore;

/// Failures surfaced by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unknown id, already consumed, or expired. Callers cannot tell these apart.
    #[error("secret not found")]
    NotFound,
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("redis pool: {0}")]
    Pool(String),
    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("storage configuration: {0}")]
    Config(String),
}

/// The capability set shared by all backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Approximate number of stored secrets. Racy under concurrent writes.
    async fn count(&self) -> Result<u64, StoreError>;

    /// Store `ciphertext` under a fresh random id. `Duration::ZERO` never expires.
    async fn create(&self, ciphertext: String, expire_in: Duration) -> Result<String, StoreError>;

    /// Atomically fetch and remove the secret stored under `id`.
    async fn read_and_destroy(&self, id: &str) -> Result<String, StoreError>;
}

/// Shared handle used by the HTTP layer.
pub type DynStore = Arc<dyn SecretStore>;

/// Backend selection plus the settings each backend needs.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// `mem` or `redis`.
    pub kind: String,
    pub prune_interval: Duration,
    pub redis_url: Option<String>,
    pub redis_key_prefix: Option<String>,
    pub redis_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: "mem".into(),
            prune_interval: memory::DEFAULT_PRUNE_INTERVAL,
            redis_url: None,
            redis_key_prefix: None,
            redis_timeout: redis_store::DEFAULT_TIMEOUT,
        }
    }
}

/// Build the backend named by `cfg.kind`.
///
/// The in-memory backend starts its pruning task here, so this must run
/// inside a Tokio runtime.
pub fn open(cfg: &StorageConfig) -> Result<DynStore, StoreError> {
    match cfg.kind.as_str() {
        "mem" => {
            if cfg.prune_interval.is_zero() {
                return Err(StoreError::Config("prune interval must be non-zero".into()));
            }
            Ok(Arc::new(MemoryStore::spawn(cfg.prune_interval)))
        }
        "redis" => {
            let url = cfg
                .redis_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| StoreError::Config("REDIS_URL is not set".into()))?;
            if cfg.redis_timeout.is_zero() {
                return Err(StoreError::Config("redis timeout must be non-zero".into()));
            }
            let store = RedisStore::connect(url, cfg.redis_key_prefix.as_deref(), cfg.redis_timeout)?;
            Ok(Arc::new(store))
        }
        other => Err(StoreError::Config(format!("unknown storage type {other:?}"))),
    }
}

/// Generate a fresh secret id.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
