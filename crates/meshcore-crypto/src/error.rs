//! Channel-crypto error taxonomy (spec §7 `CryptoError`).

use thiserror::Error;

/// Failure decrypting a channel message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The recomputed truncated HMAC did not match the transmitted tag.
    #[error("hmac tag mismatch")]
    HmacFailed,

    /// AES-ECB decryption could not run: wrong key size or ciphertext not
    /// a multiple of the block size.
    #[error("decrypt failed: {reason}")]
    DecryptFailed {
        /// Human-readable reason.
        reason: String,
    },

    /// Decrypted plaintext was shorter than the minimum `[timestamp][txt_type]` header.
    #[error("payload too short: {got} bytes, need at least {need}")]
    PayloadTooShort {
        /// Bytes actually present.
        got: usize,
        /// Minimum bytes required.
        need: usize,
    },
}

impl CryptoError {
    /// Channel-crypto failures are never transient: the message is
    /// dropped and logged, never retried (spec §7).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        false
    }
}
