//! Codec error taxonomy.

use bytes::Bytes;
use thiserror::Error;

/// Errors raised while decoding frames or the records carried inside them.
///
/// Framing garbage and unknown response/push codes are never reported
/// through this type to callers driving the receive loop: a malformed
/// framing byte is silently discarded (see [`crate::frame`]) and an
/// unrecognized code becomes a [`crate::event::ParseFailure`] event rather
/// than a fatal error. This type is for record bodies that are reachable
/// (a known code, a well-formed frame) but whose payload does not parse.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A fixed-size record was shorter than its minimum wire length.
    #[error("record too short: got {got} bytes, need at least {need} ({what})")]
    RecordTooShort {
        /// What record was being decoded, e.g. `"contact record"`.
        what: &'static str,
        /// Bytes actually available.
        got: usize,
        /// Minimum bytes required.
        need: usize,
    },

    /// A value outside its valid domain (e.g. `out_path_length` not in
    /// `{-1, 0..64}`).
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// Response/push code not recognized by this codec version.
    #[error("unrecognized code 0x{code:02x}")]
    UnknownCode {
        /// The unrecognized code byte.
        code: u8,
        /// Raw payload that followed the code, for diagnostics.
        raw: Bytes,
    },
}

impl ProtocolError {
    /// Codec errors are always a caller mistake or a malformed device
    /// payload; never transient. Kept for symmetry with the other error
    /// taxonomies so callers can treat all crate errors uniformly.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        false
    }
}
