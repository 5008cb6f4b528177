//! API key generation and hashing
//!
//! Raw keys are `<prefix><base64url body>` drawn from 32 random bytes. Storage keeps
//! only a SHA-256 hex digest of the raw key; the digest doubles as the unique lookup
//! column, so no per-record salt is used. That trade-off is accepted here: 32 random
//! bytes leave nothing for a rainbow table to bite on, and password storage still
//! goes through salted argon2.

use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Fixed literal prepended to every key so keys are identifiable at ingress
pub const DEFAULT_KEY_PREFIX: &str = "tihomo_";

/// 32 bytes of base64url without padding encode to exactly 43 characters
pub const DEFAULT_MAX_KEY_BODY_LENGTH: usize = 43;

/// Body characters carried into the display prefix
pub const DEFAULT_PREFIX_DISPLAY_CHARS: usize = 6;

/// Material produced for a freshly generated key
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// Full plaintext key, returned to the caller exactly once
    pub raw_key: String,
    /// SHA-256 hex digest of `raw_key`, the stored lookup value
    pub key_hash: String,
    /// Prefix plus the first few body characters, safe to display
    pub key_prefix: String,
}

/// Generates and hashes API keys
#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
    max_body_length: usize,
    prefix_display_chars: usize,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_body_length: DEFAULT_MAX_KEY_BODY_LENGTH,
            prefix_display_chars: DEFAULT_PREFIX_DISPLAY_CHARS,
        }
    }
}

impl KeyCodec {
    pub fn new(prefix: String, max_body_length: usize, prefix_display_chars: usize) -> Self {
        Self {
            prefix,
            max_body_length,
            prefix_display_chars,
        }
    }

    /// The literal key prefix this codec stamps and expects
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Generate a new key from 32 CSPRNG bytes
    pub fn generate(&self) -> GeneratedKey {
        let mut secret_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut secret_bytes);
        let mut body = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(secret_bytes);
        // The encoder output length is fixed for 32 bytes, but never trust that here.
        body.truncate(self.max_body_length);

        let raw_key = format!("{}{}", self.prefix, body);
        let display_len = self.prefix_display_chars.min(body.len());
        let key_prefix = format!("{}{}", self.prefix, &body[..display_len]);
        let key_hash = Self::hash(&raw_key);

        GeneratedKey {
            raw_key,
            key_hash,
            key_prefix,
        }
    }

    /// Deterministic one-way hash of a raw key (lowercase hex)
    pub fn hash(raw_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Cheap shape check performed before any store access
    pub fn has_valid_format(&self, raw_key: &str) -> bool {
        !raw_key.is_empty()
            && raw_key.starts_with(&self.prefix)
            && raw_key.len() > self.prefix.len()
    }

    /// Distinguishes an API key from a JWT in a bearer header
    pub fn looks_like_api_key(token: &str) -> bool {
        token.starts_with(DEFAULT_KEY_PREFIX) && token.len() > DEFAULT_KEY_PREFIX.len()
    }
}
