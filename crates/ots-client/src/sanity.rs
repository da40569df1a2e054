//! Advisory pre-submission checks against an instance's published policy.
//!
//! The instance cannot see inside a secret, so attachment rules are only
//! enforceable here, before encryption.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::client::{api_url, parse_url, Client};
use crate::envelope::{Attachment, Secret};
use crate::error::{ClientError, PolicyViolation};

static MIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z]+|\*)/(?:[a-zA-Z0-9.+_-]+|\*)$").expect("static MIME pattern")
});

/// Public policy as served by `GET /api/settings`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub accepted_file_types: String,
    pub disable_file_attachment: bool,
    pub max_attachment_size_total: u64,
    pub max_secret_size: u64,
    pub disable_expiry_override: bool,
    pub expiry_choices: Vec<u64>,
}

impl Settings {
    /// Validate `secret` against this policy. Rules are checked in order:
    /// attachments enabled, total size, then allowed types.
    pub fn check(&self, secret: &Secret) -> Result<(), PolicyViolation> {
        if self.disable_file_attachment && !secret.attachments.is_empty() {
            return Err(PolicyViolation::AttachmentsDisabled);
        }

        let total: u64 = secret
            .attachments
            .iter()
            .map(|a| a.content.len() as u64)
            .sum();
        if self.max_attachment_size_total > 0 && total > self.max_attachment_size_total {
            return Err(PolicyViolation::AttachmentsTooLarge);
        }

        if !self.accepted_file_types.trim().is_empty() {
            let allowed: Vec<&str> = self
                .accepted_file_types
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .collect();
            if let Some(bad) = secret
                .attachments
                .iter()
                .find(|a| !attachment_allowed(a, &allowed))
            {
                debug!(name = %bad.name, mime_type = %bad.mime_type, "attachment rejected");
                return Err(PolicyViolation::AttachmentTypeNotAllowed);
            }
        }

        Ok(())
    }
}

/// Entries of the form `type/subtype` are MIME globs, entries starting
/// with `.` are filename suffixes; anything else never matches.
fn attachment_allowed(file: &Attachment, allowed: &[&str]) -> bool {
    allowed.iter().any(|entry| {
        if MIME_PATTERN.is_match(entry) {
            glob::Pattern::new(entry)
                .map(|p| p.matches(&file.mime_type))
                .unwrap_or(false)
        } else if entry.starts_with('.') {
            file.name.ends_with(entry)
        } else {
            false
        }
    })
}

impl Client {
    /// Fetch the instance policy. `None` when the instance predates the
    /// settings endpoint.
    pub async fn settings(&self, instance_url: &str) -> Result<Option<Settings>, ClientError> {
        let url = api_url(&parse_url(instance_url)?, &["settings"])?;
        let resp = self.http.get(url).send().await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::OK => {
                let body = resp.bytes().await?;
                serde_json::from_slice(&body)
                    .map(Some)
                    .map_err(|e| ClientError::Settings(e.to_string()))
            }
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(ClientError::Status { status, body })
            }
        }
    }

    /// Check `secret` against the instance policy, skipping the check when
    /// the instance publishes none.
    pub async fn sanity_check(&self, instance_url: &str, secret: &Secret) -> Result<(), ClientError> {
        match self.settings(instance_url).await? {
            Some(settings) => Ok(settings.check(secret)?),
            None => {
                debug!("instance has no settings endpoint, skipping sanity check");
                Ok(())
            }
        }
    }
}
