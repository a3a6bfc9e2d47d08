//! Shared error taxonomy for entity invariants and persistence (spec §7:
//! `StoreError`). Wire-level and crypto-level errors live in
//! `meshcore-proto`/`meshcore-crypto` respectively and are re-exported
//! through [`crate::CoreError`] for callers that want one propagation
//! path.

use thiserror::Error;

/// A domain-entity invariant was violated while constructing or mutating
/// a [`crate::entities`] value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntityError {
    /// `out_path_length` outside `{-1, 0..=64}` (spec §3).
    #[error("out_path_length {0} not in {{-1, 0..=64}}")]
    InvalidPathLength(i8),

    /// `out_path.len()` did not equal `max(out_path_length, 0)`.
    #[error("out_path length {got} does not match out_path_length {expected}")]
    PathLengthMismatch {
        /// Actual `out_path` byte count.
        got: usize,
        /// Expected count, `max(out_path_length, 0)`.
        expected: usize,
    },

    /// A contact was both `is_discovered` and `is_archived` (spec §3:
    /// mutually exclusive).
    #[error("contact cannot be both discovered and archived")]
    DiscoveredAndArchived,

    /// A message had both or neither of `contact_id`/`channel_index` set
    /// (spec §3: "exactly one non-null").
    #[error("message must target exactly one of contact or channel")]
    AmbiguousConversationTarget,

    /// A channel `slot_index` outside `0..=7`.
    #[error("channel slot_index {0} not in 0..=7")]
    InvalidSlotIndex(u8),

    /// An attempted message-status transition was not monotonic (spec §3
    /// lifecycle).
    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidStatusTransition {
        /// Status before the attempted transition.
        from: crate::entities::MessageStatus,
        /// Status the caller attempted to set.
        to: crate::entities::MessageStatus,
    },
}

/// Persistence failure (spec §7 `StoreError`).
///
/// Retried once at the caller per spec §7; surfaced to the UI layer on
/// re-failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure (disk, permissions, corruption).
    #[error("storage io error: {0}")]
    Io(String),

    /// A record failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An entity invariant was violated before the write could be applied.
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store's on-disk `schema_version` is newer than this build
    /// supports (spec §6: "refuses to open downwards").
    #[error("schema version {found} is newer than supported {supported}")]
    SchemaTooNew {
        /// Version recorded on disk.
        found: u32,
        /// Highest version this build knows how to read.
        supported: u32,
    },
}

impl StoreError {
    /// Whether a caller should retry this operation once before
    /// surfacing it to the UI (spec §7).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Umbrella error unifying every crate's taxonomy for callers that want
/// a single propagation path (spec §7 taxonomy, collected).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed frame or unknown code.
    #[error(transparent)]
    Protocol(#[from] meshcore_proto::error::ProtocolError),

    /// Channel HMAC/decrypt failure.
    #[error(transparent)]
    Crypto(#[from] meshcore_crypto::error::CryptoError),

    /// Entity invariant violation.
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoreError {
    /// Whether a caller may retry the operation that produced this error
    /// (spec §7: protocol errors are recoverable by continuing; store
    /// errors retried once; crypto/entity errors are not retryable).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Protocol(e) => e.is_transient(),
            Self::Crypto(e) => e.is_transient(),
            Self::Entity(_) => false,
            Self::Store(e) => e.is_transient(),
        }
    }
}
