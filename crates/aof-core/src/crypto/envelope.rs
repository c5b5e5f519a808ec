//! Nonce-prefixed ciphertext.
//!
//! ```text
//! ┌────────────────────┬──────────────────────────────┐
//! │  nonce (12 bytes)  │  AES-256-GCM ciphertext+tag  │
//! └────────────────────┴──────────────────────────────┘
//! ```
//!
//! Every encryption draws a fresh random nonce; AES-GCM must never see the
//! same (key, nonce) pair twice.

use thiserror::Error;

/// Length of an AES-GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The buffer cannot even hold the nonce.
    #[error("envelope of {0} bytes is shorter than the 12-byte nonce")]
    TooShort(usize),

    /// The OS random source failed.
    #[error("random nonce generation failed: {0}")]
    Random(String),
}

/// An encrypted payload together with the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Draws a fresh random nonce from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Random`] if the OS random source is unavailable.
    pub fn seal_nonce() -> Result<[u8; NONCE_LEN], EnvelopeError> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce).map_err(|e| EnvelopeError::Random(e.to_string()))?;
        Ok(nonce)
    }

    /// Splits a transported envelope at the nonce boundary.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::TooShort`] if `bytes` is shorter than the nonce.
    pub fn split(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.len() < NONCE_LEN {
            return Err(EnvelopeError::TooShort(bytes.len()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let mut fixed = [0u8; NONCE_LEN];
        fixed.copy_from_slice(nonce);
        Ok(Self {
            nonce: fixed,
            ciphertext: ciphertext.to_vec(),
        })
    }

    /// Returns the transport form `nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }
}
