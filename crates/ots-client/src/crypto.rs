//! OpenSSL-compatible salted AES-256-CBC container.
//!
//! Output matches `openssl enc -aes-256-cbc -salt -a -pbkdf2 -md sha512`:
//! base64 of `"Salted__" | salt[8] | ciphertext`, key and IV derived from the
//! passphrase and salt by a pluggable [`KeyDerivation`].

use std::fmt;

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha512;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CodecError;

const SALT_HEADER: &[u8] = b"Salted__";
const SALT_LEN: usize = 8;
const BLOCK_LEN: usize = 16;

/// PBKDF2 rounds used by the reference web client.
pub const DEFAULT_PBKDF2_ROUNDS: u32 = 300_000;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES-256 key and CBC IV, wiped on drop.
#[derive(ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; 32],
    iv: [u8; 16],
}

impl DerivedKey {
    pub fn new(key: [u8; 32], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }
}

/// Turns a passphrase and salt into key material. Only swap this out when
/// talking to an instance whose web client was built with other parameters.
pub trait KeyDerivation: Send + Sync + fmt::Debug {
    fn derive(&self, passphrase: &[u8], salt: &[u8]) -> DerivedKey;
}

/// PBKDF2-HMAC-SHA512 producing 48 bytes: 32 key bytes then 16 IV bytes.
#[derive(Debug, Clone, Copy)]
pub struct Pbkdf2Sha512 {
    pub rounds: u32,
}

impl Default for Pbkdf2Sha512 {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_PBKDF2_ROUNDS,
        }
    }
}

impl KeyDerivation for Pbkdf2Sha512 {
    fn derive(&self, passphrase: &[u8], salt: &[u8]) -> DerivedKey {
        let mut out = [0u8; 48];
        pbkdf2::pbkdf2_hmac::<Sha512>(passphrase, salt, self.rounds, &mut out);

        let mut key = [0u8; 32];
        let mut iv = [0u8; 16];
        key.copy_from_slice(&out[..32]);
        iv.copy_from_slice(&out[32..]);
        out.zeroize();

        DerivedKey::new(key, iv)
    }
}

/// Encrypt `plaintext` under `passphrase` with a fresh random salt.
pub fn encrypt(
    passphrase: &str,
    plaintext: &[u8],
    kdf: &dyn KeyDerivation,
) -> Result<String, CodecError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| CodecError::Encode(format!("reading random salt: {e}")))?;

    let creds = kdf.derive(passphrase.as_bytes(), &salt);
    let ciphertext = Aes256CbcEnc::new_from_slices(&creds.key, &creds.iv)
        .map_err(|e| CodecError::Encode(format!("cipher init: {e}")))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(SALT_HEADER.len() + SALT_LEN + ciphertext.len());
    out.extend_from_slice(SALT_HEADER);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(out))
}

/// Decrypt a base64 container produced by [`encrypt`] (or by OpenSSL).
/// Whitespace, such as OpenSSL's line wrapping, is ignored.
pub fn decrypt(
    passphrase: &str,
    data: &[u8],
    kdf: &dyn KeyDerivation,
) -> Result<Vec<u8>, CodecError> {
    let compact: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let raw = STANDARD.decode(compact).map_err(|e| {
        debug!(error = %e, "container is not base64");
        CodecError::Unreadable
    })?;

    let header_len = SALT_HEADER.len() + SALT_LEN;
    if raw.len() < header_len || !raw.starts_with(SALT_HEADER) {
        debug!("container lacks salt header");
        return Err(CodecError::Unreadable);
    }
    let (salt, ciphertext) = raw[SALT_HEADER.len()..].split_at(SALT_LEN);
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        debug!(len = ciphertext.len(), "ciphertext is not block aligned");
        return Err(CodecError::Unreadable);
    }

    let creds = kdf.derive(passphrase.as_bytes(), salt);
    Aes256CbcDec::new_from_slices(&creds.key, &creds.iv)
        .map_err(|_| CodecError::Unreadable)?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CodecError::Unreadable)
}
