//! Caller identities.
//!
//! A market account is the hex-encoded ed25519 verifying key. Commands that
//! act on behalf of an account take its secret key and derive the account
//! from it, so naming an account is not enough to act as it.

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use dam_core::AccountId;

pub struct Identity {
    key: SigningKey,
}

impl Identity {
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Parse a 32-byte secret key given as 64 hex characters.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex.trim()).context("secret key is not valid hex")?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("secret key must be 32 bytes (64 hex chars)"))?;
        Ok(Self {
            key: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    pub fn account(&self) -> AccountId {
        hex::encode(self.key.verifying_key().to_bytes())
    }
}
