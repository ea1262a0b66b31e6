//! One-way password hashing and verification

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::ProvisionError;

/// bcrypt only reads the first 72 bytes of its input
const BCRYPT_MAX_INPUT: usize = 72;

pub const DEFAULT_COST: u32 = 10;
pub const MIN_COST: u32 = 4;
pub const MAX_COST: u32 = 31;

/// Credential codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bcrypt cost {0} is outside {MIN_COST}..={MAX_COST}")]
    InvalidCost(u32),

    #[error("Hashing failed: {0}")]
    Hash(String),
}

impl From<CodecError> for ProvisionError {
    fn from(err: CodecError) -> Self {
        ProvisionError::Credential(err.to_string())
    }
}

/// Salted one-way hashing of tenant passwords
///
/// Implementations are CPU-bound; async callers should run them on the
/// blocking pool.
pub trait CredentialCodec: Send + Sync {
    /// Hash a plaintext password into a self-describing digest
    fn hash(&self, password: &SecretString) -> Result<String, CodecError>;

    /// Check a plaintext password against a digest
    ///
    /// Returns `false` on mismatch and when the digest is empty or malformed.
    fn verify(&self, digest: &str, password: &SecretString) -> bool;
}

/// bcrypt codec with a configurable cost
#[derive(Debug, Clone, Copy)]
pub struct BcryptCodec {
    cost: u32,
}

impl BcryptCodec {
    pub fn new(cost: u32) -> Result<Self, CodecError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(CodecError::InvalidCost(cost));
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl Default for BcryptCodec {
    fn default() -> Self {
        Self { cost: DEFAULT_COST }
    }
}

/// Inputs longer than bcrypt's window are reduced to their SHA-256 hex so no
/// byte of the password is silently dropped.
fn bcrypt_input(password: &SecretString) -> Vec<u8> {
    let raw = password.expose_secret().as_bytes();
    if raw.len() <= BCRYPT_MAX_INPUT {
        return raw.to_vec();
    }

    let digest = Sha256::digest(raw);
    digest
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
        .into_bytes()
}

impl CredentialCodec for BcryptCodec {
    fn hash(&self, password: &SecretString) -> Result<String, CodecError> {
        bcrypt::hash(bcrypt_input(password), self.cost).map_err(|e| CodecError::Hash(e.to_string()))
    }

    fn verify(&self, digest: &str, password: &SecretString) -> bool {
        if digest.is_empty() {
            return false;
        }
        bcrypt::verify(bcrypt_input(password), digest).unwrap_or(false)
    }
}
