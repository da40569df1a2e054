//! Instance policy: attachment rules, size limits and expiry choices.
//!
//! Loaded once at startup from an optional TOML file and handed to the HTTP
//! layer. The public part is served as JSON from `/api/settings` so clients
//! can pre-validate secrets.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Upper bound for a stored (encrypted) secret when the file sets none.
/// The web client caps attachments at 64 MiB before base64 inflation.
pub const DEFAULT_MAX_SECRET_SIZE: u64 = 65 * 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Customize {
    /// Comma separated MIME globs (`image/*`) and extensions (`.pdf`).
    pub accepted_file_types: String,
    pub disable_file_attachment: bool,
    /// Total attachment bytes per secret; 0 means unlimited.
    pub max_attachment_size_total: u64,
    /// Maximum length of the submitted ciphertext in bytes.
    pub max_secret_size: u64,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disable_expiry_override: bool,
    /// Expiry options in seconds offered to clients.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expiry_choices: Vec<u64>,
}

impl Customize {
    /// Load the policy file at `path`. No path yields the defaults; a path
    /// that does not exist is logged and also yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cust = match path {
            None => Self::default(),
            Some(path) => match std::fs::read_to_string(path) {
                Ok(raw) => toml::from_str(&raw)
                    .with_context(|| format!("decode customize file: {}", path.display()))?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(path = %path.display(), "customize file given but not found");
                    Self::default()
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("read customize file: {}", path.display()))
                }
            },
        };
        cust.apply_fixes();
        Ok(cust)
    }

    fn apply_fixes(&mut self) {
        if self.max_secret_size == 0 {
            self.max_secret_size = DEFAULT_MAX_SECRET_SIZE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_file_uses_defaults() {
        let cust = Customize::load(None).unwrap();
        assert_eq!(cust.max_secret_size, DEFAULT_MAX_SECRET_SIZE);
        assert!(!cust.disable_file_attachment);
        assert!(cust.accepted_file_types.is_empty());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cust = Customize::load(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(cust.max_secret_size, DEFAULT_MAX_SECRET_SIZE);
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("customize.toml");
        std::fs::write(
            &path,
            r#"
acceptedFileTypes = "text/*,image/png,.gif"
disableFileAttachment = true
maxAttachmentSizeTotal = 64
disableExpiryOverride = true
expiryChoices = [3600, 86400]
"#,
        )
        .unwrap();

        let cust = Customize::load(Some(&path)).unwrap();
        assert_eq!(cust.accepted_file_types, "text/*,image/png,.gif");
        assert!(cust.disable_file_attachment);
        assert_eq!(cust.max_attachment_size_total, 64);
        assert!(cust.disable_expiry_override);
        assert_eq!(cust.expiry_choices, vec![3600, 86400]);
        assert_eq!(cust.max_secret_size, DEFAULT_MAX_SECRET_SIZE);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("customize.toml");
        std::fs::write(&path, "maxSecretSize = \"lots\"").unwrap();
        assert!(Customize::load(Some(&path)).is_err());
    }

    #[test]
    fn settings_json_uses_camel_case() {
        let cust = Customize {
            accepted_file_types: ".gif".into(),
            max_attachment_size_total: 10,
            ..Default::default()
        };
        let json = serde_json::to_value(&cust).unwrap();
        assert_eq!(json["acceptedFileTypes"], ".gif");
        assert_eq!(json["disableFileAttachment"], false);
        assert_eq!(json["maxAttachmentSizeTotal"], 10);
        assert!(json.get("expiryChoices").is_none());
    }
}
