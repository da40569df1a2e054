pub mod customize;
pub mod handlers;
pub mod server;
pub mod store;

use std::sync::Arc;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: store::DynStore,
    /// Instance policy, also served from `/api/settings`.
    pub customize: Arc<customize::Customize>,
    /// Default secret lifetime in seconds; 0 means no expiry.
    pub secret_expiry: u64,
}

pub use customize::Customize;
pub use server::{router, run, ServerConfig};
pub use store::{SecretStore, StorageConfig, StoreError};
