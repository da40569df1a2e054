use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use reqwest::{header::HeaderMap, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::crypto::{KeyDerivation, Pbkdf2Sha512};
use crate::envelope::Secret;
use crate::error::ClientError;

const PASSWORD_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Settings for talking to an instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound for every request, connection setup included.
    pub request_timeout: Duration,
    /// Sent with every request so operators can tell clients apart.
    pub user_agent: String,
    pub password_length: usize,
    pub kdf: Arc<dyn KeyDerivation>,
    /// Extra headers, e.g. `Authorization` for instances behind a proxy.
    pub default_headers: HeaderMap,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            user_agent: concat!("ots-client/", env!("CARGO_PKG_VERSION")).to_owned(),
            password_length: 20,
            kdf: Arc::new(Pbkdf2Sha512::default()),
            default_headers: HeaderMap::new(),
        }
    }
}

/// Result of [`Client::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSecret {
    /// Instance URL with `#<id>|<passphrase>` appended. Browsers never send
    /// the fragment, so the passphrase stays off the wire.
    pub url: String,
    /// `None` when the instance keeps the secret until it is read.
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    secret_id: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    secret: String,
}

/// Client for one-time secret instances. Encryption happens here; the
/// instance only ever sees ciphertext.
#[derive(Debug, Clone)]
pub struct Client {
    pub(crate) http: reqwest::Client,
    password_length: usize,
    kdf: Arc<dyn KeyDerivation>,
}

impl Client {
    /// Fails when `password_length` is zero: an empty passphrase would
    /// upload the secret unencrypted.
    pub fn new(cfg: ClientConfig) -> Result<Self, ClientError> {
        if cfg.password_length == 0 {
            return Err(ClientError::Passphrase("password length must be non-zero".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .user_agent(cfg.user_agent)
            .default_headers(cfg.default_headers)
            .build()?;

        Ok(Self {
            http,
            password_length: cfg.password_length,
            kdf: cfg.kdf,
        })
    }

    /// Encrypt `secret` under a fresh passphrase and store it on the
    /// instance at `instance_url` (its frontend URL, not the API path).
    ///
    /// `expire_in` of zero leaves the lifetime to the instance, which may
    /// also shorten what was asked for.
    pub async fn create(
        &self,
        instance_url: &str,
        secret: &Secret,
        expire_in: Duration,
    ) -> Result<CreatedSecret, ClientError> {
        let mut base = parse_url(instance_url)?;
        base.set_fragment(None);

        let pass = generate_passphrase(self.password_length)?;
        let data = secret.serialize(&pass, self.kdf.as_ref())?;

        let mut create_url = api_url(&base, &["create"])?;
        if expire_in > Duration::from_secs(1) {
            create_url
                .query_pairs_mut()
                .append_pair("expire", &expire_in.as_secs().to_string());
        }

        debug!(url = %create_url, "creating secret");
        let resp = self
            .http
            .post(create_url)
            .json(&serde_json::json!({ "secret": data }))
            .send()
            .await?;

        if resp.status() != StatusCode::CREATED {
            return Err(status_error(resp).await);
        }
        let payload: CreateResponse = resp.json().await?;

        base.set_fragment(Some(&format!("{}|{}", payload.secret_id, pass)));
        Ok(CreatedSecret {
            url: base.into(),
            expires_at: payload.expires_at,
        })
    }

    /// Retrieve, and thereby destroy, the secret behind `secret_url`.
    /// Secrets without attachments come back with an empty attachment list.
    pub async fn fetch(&self, secret_url: &str) -> Result<Secret, ClientError> {
        let mut url = parse_url(secret_url)?;
        let (id, pass) = split_fragment(url.fragment().unwrap_or_default())?;
        url.set_fragment(None);

        let fetch_url = api_url(&url, &["get", &id])?;
        debug!(url = %fetch_url, "fetching secret");
        let resp = self.http.get(fetch_url).send().await?;

        if resp.status() != StatusCode::OK {
            return Err(status_error(resp).await);
        }
        let payload: FetchResponse = resp.json().await?;

        Ok(Secret::deserialize(
            payload.secret.as_bytes(),
            &pass,
            self.kdf.as_ref(),
        )?)
    }
}

/// Random alphanumeric passphrase from the OS RNG.
///
/// Bytes that would bias the modulo are discarded, and sampling repeats
/// until `len` characters have been collected. `len` must be non-zero.
pub fn generate_passphrase(len: usize) -> Result<String, ClientError> {
    if len == 0 {
        return Err(ClientError::Passphrase("password length must be non-zero".into()));
    }
    let limit = 256 - (256 % PASSWORD_CHARSET.len());
    let mut pass = String::with_capacity(len);
    let mut buf = [0u8; 32];

    while pass.len() < len {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| ClientError::Passphrase(e.to_string()))?;
        for &b in buf.iter().filter(|&&b| (b as usize) < limit) {
            if pass.len() == len {
                break;
            }
            pass.push(PASSWORD_CHARSET[b as usize % PASSWORD_CHARSET.len()] as char);
        }
    }
    Ok(pass)
}

pub(crate) fn parse_url(raw: &str) -> Result<Url, ClientError> {
    Url::parse(raw).map_err(|e| ClientError::InvalidUrl(format!("{raw}: {e}")))
}

/// `base` with `api/<segments>` appended to its path.
pub(crate) fn api_url(base: &Url, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidUrl(format!("{base} cannot carry a path")))?
        .pop_if_empty()
        .push("api")
        .extend(segments);
    Ok(url)
}

/// Split `<id>|<passphrase>`, accepting a percent-encoded separator.
/// Both parts must be non-empty; reading destroys the secret, so a URL
/// that cannot decrypt it is rejected before any request.
fn split_fragment(fragment: &str) -> Result<(String, String), ClientError> {
    let decoded = urlencoding::decode(fragment).map_err(|_| ClientError::MissingFragment)?;
    match decoded.split_once('|') {
        Some((id, pass)) if !id.is_empty() && !pass.is_empty() => {
            Ok((id.to_owned(), pass.to_owned()))
        }
        _ => Err(ClientError::MissingFragment),
    }
}

async fn status_error(resp: reqwest::Response) -> ClientError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    ClientError::Status { status, body }
}
