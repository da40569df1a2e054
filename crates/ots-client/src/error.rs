use reqwest::StatusCode;

/// Envelope encoding and decryption failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encoding secret: {0}")]
    Encode(String),
    /// Wrong passphrase, tampered ciphertext or a malformed envelope.
    /// Deliberately one kind: callers learn nothing about which step failed.
    #[error("secret could not be decrypted or decoded")]
    Unreadable,
}

/// Advisory policy failures raised before anything is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("attachments are disabled on this instance")]
    AttachmentsDisabled,
    #[error("attachment size exceeds allowed size")]
    AttachmentsTooLarge,
    #[error("attachment type is not allowed")]
    AttachmentTypeNotAllowed,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("secret URL does not carry an id|passphrase fragment")]
    MissingFragment,
    #[error("generating passphrase: {0}")]
    Passphrase(String),
    #[error("executing request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected HTTP status {status} ({body})")]
    Status { status: StatusCode, body: String },
    /// The instance answered `/api/settings` with something that is not a
    /// settings document.
    #[error("decoding instance settings: {0}")]
    Settings(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Policy(#[from] PolicyViolation),
}

impl ClientError {
    /// The secret is unknown, already read, or expired.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}
