use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    customize::Customize,
    handlers::{create_secret, get_secret, is_writable, settings},
    store::{self, StorageConfig},
    AppState,
};

pub struct ServerConfig {
    /// `host:port`; a bare `:port` binds all interfaces.
    pub listen: String,
    pub storage: StorageConfig,
    /// Default lifetime of new secrets in seconds; 0 keeps them until read.
    pub secret_expiry: u64,
    /// Optional TOML policy file.
    pub customize_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: std::env::var("OTS_LISTEN").unwrap_or_else(|_| ":3000".into()),
            storage: StorageConfig {
                kind: std::env::var("OTS_STORAGE_TYPE").unwrap_or_else(|_| "mem".into()),
                prune_interval: env_secs("OTS_PRUNE_INTERVAL")
                    .unwrap_or(store::memory::DEFAULT_PRUNE_INTERVAL),
                redis_url: std::env::var("REDIS_URL").ok(),
                redis_key_prefix: std::env::var("REDIS_KEY").ok(),
                redis_timeout: env_secs("OTS_REDIS_TIMEOUT")
                    .unwrap_or(store::redis_store::DEFAULT_TIMEOUT),
            },
            secret_expiry: std::env::var("OTS_SECRET_EXPIRY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            customize_path: std::env::var("OTS_CUSTOMIZE").ok().map(PathBuf::from),
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
}

/// Build the `/api` router around `state`.
pub fn router(state: AppState) -> Router {
    // Oversized bodies are cut off well before JSON decoding; the exact
    // limit is enforced against the decoded secret.
    let body_limit = usize::try_from(state.customize.max_secret_size.saturating_mul(2))
        .unwrap_or(usize::MAX);

    let api = Router::new()
        .route("/create", post(create_secret))
        .route("/get/{id}", get(get_secret))
        .route("/isWritable", get(is_writable))
        .route("/settings", get(settings));

    Router::new()
        .nest("/api", api)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let customize = Customize::load(cfg.customize_path.as_deref())?;
    let store = store::open(&cfg.storage).context("initialize storage")?;
    info!(storage = %cfg.storage.kind, secret_expiry = cfg.secret_expiry, "storage ready");

    let state = AppState {
        store,
        customize: Arc::new(customize),
        secret_expiry: cfg.secret_expiry,
    };
    let app = router(state);

    let addr = parse_listen(&cfg.listen)?;
    info!(%addr, "ots server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

fn parse_listen(listen: &str) -> Result<SocketAddr> {
    let addr = if listen.starts_with(':') {
        format!("0.0.0.0{listen}")
    } else {
        listen.to_owned()
    };
    addr.parse()
        .with_context(|| format!("invalid listen address: {listen}"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "installing ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
