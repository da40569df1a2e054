//! The secret envelope: text plus optional file attachments.
//!
//! Without attachments the plaintext is the bare secret text, which keeps
//! old clients working. With attachments it is `OTSMeta` followed by a JSON
//! document whose attachment contents are base64 encoded. The marker is
//! checked before any JSON parsing, so a bare secret that happens to be JSON
//! stays a bare secret.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::{self, KeyDerivation};
use crate::error::CodecError;

const META_MARKER: &[u8] = b"OTSMeta";

/// A secret as seen by the people sharing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secret {
    pub secret: String,
    pub attachments: Vec<Attachment>,
}

/// A file bundled with a secret.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachment {
    /// File name shown to the recipient.
    pub name: String,
    /// MIME type, or empty when unknown.
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Encode and, for a non-empty `passphrase`, encrypt this secret.
    /// An empty passphrase returns the plain envelope; only tests want that.
    pub fn serialize(&self, passphrase: &str, kdf: &dyn KeyDerivation) -> Result<String, CodecError> {
        let plain = Payload::from_secret(self).encode()?;
        if passphrase.is_empty() {
            return String::from_utf8(plain).map_err(|e| CodecError::Encode(e.to_string()));
        }
        crypto::encrypt(passphrase, &plain, kdf)
    }

    /// Inverse of [`Secret::serialize`].
    pub fn deserialize(
        data: &[u8],
        passphrase: &str,
        kdf: &dyn KeyDerivation,
    ) -> Result<Self, CodecError> {
        let plain = if passphrase.is_empty() {
            data.to_vec()
        } else {
            crypto::decrypt(passphrase, data, kdf)?
        };
        Payload::decode(plain)?.into_secret()
    }
}

/// Plaintext layout, chosen by the marker prefix.
#[derive(Debug)]
enum Payload {
    Bare(String),
    Tagged(MetaPayload),
}

#[derive(Debug, Serialize, Deserialize)]
struct MetaPayload {
    secret: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<MetaAttachment>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetaAttachment {
    name: String,
    #[serde(rename = "type")]
    mime_type: String,
    data: String,
}

impl Payload {
    fn from_secret(secret: &Secret) -> Self {
        if secret.attachments.is_empty() {
            return Payload::Bare(secret.secret.clone());
        }
        Payload::Tagged(MetaPayload {
            secret: secret.secret.clone(),
            attachments: secret
                .attachments
                .iter()
                .map(|a| MetaAttachment {
                    name: a.name.clone(),
                    mime_type: a.mime_type.clone(),
                    data: STANDARD.encode(&a.content),
                })
                .collect(),
        })
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Payload::Bare(text) => Ok(text.as_bytes().to_vec()),
            Payload::Tagged(meta) => {
                let json = serde_json::to_vec(meta).map_err(|e| CodecError::Encode(e.to_string()))?;
                let mut out = Vec::with_capacity(META_MARKER.len() + json.len());
                out.extend_from_slice(META_MARKER);
                out.extend_from_slice(&json);
                Ok(out)
            }
        }
    }

    fn decode(plain: Vec<u8>) -> Result<Self, CodecError> {
        if plain.starts_with(META_MARKER) {
            serde_json::from_slice(&plain[META_MARKER.len()..])
                .map(Payload::Tagged)
                .map_err(|e| {
                    debug!(error = %e, "malformed OTSMeta document");
                    CodecError::Unreadable
                })
        } else {
            String::from_utf8(plain).map(Payload::Bare).map_err(|_| {
                debug!("bare secret is not valid UTF-8");
                CodecError::Unreadable
            })
        }
    }

    fn into_secret(self) -> Result<Secret, CodecError> {
        match self {
            Payload::Bare(secret) => Ok(Secret::new(secret)),
            Payload::Tagged(meta) => {
                let attachments = meta
                    .attachments
                    .into_iter()
                    .enumerate()
                    .map(|(i, a)| {
                        let content = STANDARD.decode(&a.data).map_err(|e| {
                            debug!(attachment = i, error = %e, "attachment is not base64");
                            CodecError::Unreadable
                        })?;
                        Ok(Attachment {
                            name: a.name,
                            mime_type: a.mime_type,
                            content,
                        })
                    })
                    .collect::<Result<Vec<_>, CodecError>>()?;
                Ok(Secret {
                    secret: meta.secret,
                    attachments,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Pbkdf2Sha512;

    const FAST: Pbkdf2Sha512 = Pbkdf2Sha512 { rounds: 1_000 };

    fn secret_with_file() -> Secret {
        Secret::new("I'm a secret!").with_attachment(Attachment {
            name: "secret.txt".into(),
            mime_type: "text/plain".into(),
            content: b"I'm a very secret file.\n".to_vec(),
        })
    }

    #[test]
    fn bare_secret_serializes_verbatim() {
        let data = Secret::new("I'm a secret!").serialize("", &FAST).unwrap();
        assert_eq!(data, "I'm a secret!");
    }

    #[test]
    fn attachments_serialize_to_meta_document() {
        let data = secret_with_file().serialize("", &FAST).unwrap();
        assert_eq!(
            data,
            r#"OTSMeta{"secret":"I'm a secret!","attachments":[{"name":"secret.txt","type":"text/plain","data":"SSdtIGEgdmVyeSBzZWNyZXQgZmlsZS4K"}]}"#
        );
    }

    #[test]
    fn reads_meta_fixture() {
        // Produced by the reference web client.
        let data = "U2FsdGVkX1+7kNgAK57O/qdbsukK3OchMyMyE1tWzVJVlc9f9bkp8iaFHbwR7Q3b8tWhWmPAcfeOoBJH2zl1iNbIHWsmMKu3+pzE5wTE4wl31dOboV8LgsMChBFL5RQpda0iGku32BcB4tYEyb2VHcM/kkXNJh9lW1vRyiNx0iF8pe05JUkkmJJrnzIKC+/efZEfF2YX7fOaBC1+8AAhlg==";
        let secret =
            Secret::deserialize(data.as_bytes(), "IKeiXsyGuVWdMUG8Fj3R", &Pbkdf2Sha512::default())
                .unwrap();
        assert_eq!(secret, secret_with_file());
    }

    #[test]
    fn reads_bare_fixture() {
        let data = "U2FsdGVkX18cvbYVRsD5cxMKKAHtMRmteu88tPwRtOk=";
        let secret =
            Secret::deserialize(data.as_bytes(), "YQHdft6hDnp575olczeq", &Pbkdf2Sha512::default())
                .unwrap();
        assert_eq!(secret, Secret::new("I'm a secret!"));
    }

    #[test]
    fn round_trip_without_attachments() {
        for text in ["", "plain", "ünïcödé ✓ 秘密", "{\"secret\":\"looks like json\"}"] {
            let data = Secret::new(text).serialize("pass", &FAST).unwrap();
            let back = Secret::deserialize(data.as_bytes(), "pass", &FAST).unwrap();
            assert_eq!(back, Secret::new(text));
        }
    }

    #[test]
    fn round_trip_preserves_binary_attachments() {
        let secret = Secret::new("")
            .with_attachment(Attachment {
                name: "all-bytes.bin".into(),
                mime_type: "application/octet-stream".into(),
                content: (0..=255u8).collect(),
            })
            .with_attachment(Attachment {
                name: "empty".into(),
                mime_type: String::new(),
                content: Vec::new(),
            });
        let data = secret.serialize("pass", &FAST).unwrap();
        let back = Secret::deserialize(data.as_bytes(), "pass", &FAST).unwrap();
        assert_eq!(back, secret);
    }

    #[test]
    fn wrong_passphrase_never_yields_data() {
        let data = secret_with_file().serialize("passA", &FAST).unwrap();
        assert!(matches!(
            Secret::deserialize(data.as_bytes(), "passB", &FAST),
            Err(CodecError::Unreadable)
        ));
    }

    #[test]
    fn json_lookalike_without_marker_stays_bare() {
        let raw = br#"{"secret":"x","attachments":[]}"#;
        let secret = Secret::deserialize(raw, "", &FAST).unwrap();
        assert_eq!(secret.secret, r#"{"secret":"x","attachments":[]}"#);
        assert!(secret.attachments.is_empty());
    }

    #[test]
    fn malformed_meta_is_unreadable() {
        assert!(matches!(
            Secret::deserialize(b"OTSMeta{not json", "", &FAST),
            Err(CodecError::Unreadable)
        ));
    }

    #[test]
    fn invalid_attachment_base64_is_unreadable() {
        let raw = br#"OTSMeta{"secret":"s","attachments":[{"name":"a","type":"","data":"***"}]}"#;
        assert!(matches!(
            Secret::deserialize(raw, "", &FAST),
            Err(CodecError::Unreadable)
        ));
    }

    #[test]
    fn meta_without_attachments_key_decodes() {
        let secret = Secret::deserialize(br#"OTSMeta{"secret":"only text"}"#, "", &FAST).unwrap();
        assert_eq!(secret, Secret::new("only text"));
    }
}
