//! Channel cryptography for the MeshCore protocol.
//!
//! A channel message is encrypted end-to-end between peers sharing a
//! 16-byte slot secret, independent of the client-device transport link.
//! See [`channel`] for the AES-128-ECB + truncated HMAC-SHA256 scheme.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod error;

pub use channel::{ChannelSecret, DecryptedChannelMessage, decrypt, encrypt};
pub use error::CryptoError;

/// Decode bytes as UTF-8, replacing invalid sequences and logging a
/// warning rather than failing (spec §4.2 applies uniformly to codec and
/// crypto text fields).
pub(crate) fn utf8_lossy_warn(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => {
            tracing::warn!("replaced invalid UTF-8 in decrypted channel text");
            String::from_utf8_lossy(raw).into_owned()
        },
    }
}
