//! Client side of the one-time secret service.
//!
//! Secrets are encrypted locally into an OpenSSL-compatible container
//! before they leave the process; the instance stores ciphertext only and
//! the passphrase travels in the share URL fragment.
//!
//! ```no_run
//! # async fn demo() -> Result<(), ots_client::ClientError> {
//! use std::time::Duration;
//! use ots_client::{Client, ClientConfig, Secret};
//!
//! let client = Client::new(ClientConfig::default())?;
//! let secret = Secret::new("hunter2");
//! client.sanity_check("https://ots.example.com/", &secret).await?;
//! let created = client
//!     .create("https://ots.example.com/", &secret, Duration::from_secs(3600))
//!     .await?;
//! let back = client.fetch(&created.url).await?;
//! assert_eq!(back.secret, "hunter2");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod sanity;

pub use client::{generate_passphrase, Client, ClientConfig, CreatedSecret};
pub use crypto::{KeyDerivation, Pbkdf2Sha512};
pub use envelope::{Attachment, Secret};
pub use error::{ClientError, CodecError, PolicyViolation};
pub use sanity::Settings;
