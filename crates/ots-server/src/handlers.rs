use std::time::Duration;

use axum::{
    extract::{FromRequest, Path, Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    store::{model::effective_ttl, DynStore, StoreError},
    AppState,
};

// ── Wire types ────────────────────────────────────────────────────────────────

/// Body of every `/api/create` and `/api/get` response.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    /// Opaque reference to a server-side log entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateQuery {
    /// Requested lifetime in seconds. Unparseable values are ignored.
    pub expire: Option<String>,
}

// ── Create ────────────────────────────────────────────────────────────────────

pub async fn create_secret(
    State(state): State<AppState>,
    Query(query): Query<CreateQuery>,
    request: Request,
) -> Response {
    let requested = query.expire.as_deref().and_then(|v| v.parse::<u64>().ok());
    let expiry = resolve_expiry(
        state.secret_expiry,
        requested,
        state.customize.disable_expiry_override,
    );

    let body = match read_create_body(request, &state).await {
        Ok(body) => body,
        Err(detail) => {
            debug!(reason = "invalid_body", %detail, "rejected secret");
            return error_response(StatusCode::BAD_REQUEST, None);
        }
    };

    if body.secret.is_empty() {
        debug!(reason = "secret_missing", "rejected secret");
        return error_response(StatusCode::BAD_REQUEST, None);
    }

    let max = state.customize.max_secret_size;
    if max > 0 && body.secret.len() as u64 > max {
        debug!(reason = "secret_size", size = body.secret.len(), max, "rejected secret");
        return error_response(StatusCode::BAD_REQUEST, None);
    }

    match state
        .store
        .create(body.secret, Duration::from_secs(expiry))
        .await
    {
        Ok(id) => {
            let expires_at = expires_at(expiry);
            info!(expiry_secs = expiry, "secret created");
            refresh_count(state.store.clone());
            json_response(
                StatusCode::CREATED,
                &ApiResponse {
                    success: true,
                    expires_at,
                    secret_id: Some(id),
                    ..Default::default()
                },
            )
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(("creating secret", e)),
        ),
    }
}

/// JSON bodies when the client says so, form fields otherwise.
async fn read_create_body(request: Request, state: &AppState) -> Result<CreateRequest, String> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    if is_json {
        Json::<CreateRequest>::from_request(request, state)
            .await
            .map(|Json(body)| body)
            .map_err(|rejection| rejection.body_text())
    } else {
        Form::<CreateRequest>::from_request(request, state)
            .await
            .map(|Form(body)| body)
            .map_err(|rejection| rejection.body_text())
    }
}

/// The configured default applies unless the client asks for something
/// shorter, or the default is "never" and overrides are allowed.
fn resolve_expiry(default: u64, requested: Option<u64>, override_disabled: bool) -> u64 {
    match requested {
        Some(ev) if !override_disabled && (ev < default || default == 0) => ev,
        _ => default,
    }
}

/// Deadline reported to the client; `None` whenever the store keeps the
/// secret until read.
fn expires_at(expiry: u64) -> Option<DateTime<Utc>> {
    let ttl = effective_ttl(Duration::from_secs(expiry))?;
    let secs = i64::try_from(ttl.as_secs()).ok()?;
    Utc::now().checked_add_signed(chrono::Duration::try_seconds(secs)?)
}

// ── Read ──────────────────────────────────────────────────────────────────────

pub async fn get_secret(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.read_and_destroy(&id).await {
        Ok(secret) => {
            info!("secret read and destroyed");
            refresh_count(state.store.clone());
            json_response(
                StatusCode::OK,
                &ApiResponse {
                    success: true,
                    secret: Some(secret),
                    ..Default::default()
                },
            )
        }
        Err(StoreError::NotFound) => {
            debug!(reason = "secret_not_found", "read failed");
            error_response(StatusCode::NOT_FOUND, None)
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(("reading & destroying secret", e)),
        ),
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

pub async fn settings(State(state): State<AppState>) -> Response {
    json_response(StatusCode::OK, state.customize.as_ref())
}

pub async fn is_writable() -> StatusCode {
    StatusCode::NO_CONTENT
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Every API response is destructive or policy data; none may be cached.
fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, max-age=0"),
    );
    response
}

/// Respond with a fresh error reference. Backend details only reach the log.
fn error_response(status: StatusCode, cause: Option<(&str, StoreError)>) -> Response {
    let err_id = uuid::Uuid::new_v4().to_string();
    if let Some((desc, e)) = cause {
        error!(err_id = %err_id, error = %e, "{desc}");
    }
    json_response(
        status,
        &ApiResponse {
            error: Some(err_id),
            ..Default::default()
        },
    )
}

fn refresh_count(store: DynStore) {
    tokio::spawn(async move {
        match store.count().await {
            Ok(n) => debug!(stored_secrets = n, "updated stored secret count"),
            Err(e) => warn!(error = %e, "counting stored secrets"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_defaults_without_request() {
        assert_eq!(resolve_expiry(3600, None, false), 3600);
        assert_eq!(resolve_expiry(0, None, false), 0);
    }

    #[test]
    fn shorter_request_wins() {
        assert_eq!(resolve_expiry(3600, Some(60), false), 60);
        assert_eq!(resolve_expiry(3600, Some(7200), false), 3600);
    }

    #[test]
    fn any_request_wins_over_never() {
        assert_eq!(resolve_expiry(0, Some(7200), false), 7200);
    }

    #[test]
    fn override_can_be_disabled() {
        assert_eq!(resolve_expiry(3600, Some(60), true), 3600);
        assert_eq!(resolve_expiry(0, Some(60), true), 0);
    }

    #[test]
    fn no_expiry_has_no_timestamp() {
        assert!(expires_at(0).is_none());
        let at = expires_at(60).unwrap();
        let delta = at - Utc::now();
        assert!(delta.num_seconds() > 50 && delta.num_seconds() <= 60);
    }

    #[test]
    fn oversized_expiry_reports_no_deadline() {
        assert!(expires_at(18_446_744_073_709_552).is_none());
        assert!(expires_at(u64::MAX).is_none());
    }

    #[test]
    fn error_body_carries_only_reference() {
        let body = ApiResponse {
            error: Some("ref".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "ref"}));
    }
}
