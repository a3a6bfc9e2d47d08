//! Session, delivery, and sync error taxonomy (spec §7).

use meshcore_core::error::StoreError;
use thiserror::Error;

/// Failure of a session-level typed operation (spec §4.4 point 3).
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// The transport returned an error while connecting, writing, or
    /// reading (spec §7 `TransportError`: "terminal for current
    /// connection; session transitions to disconnected").
    #[error("transport error: {0}")]
    Transport(String),

    /// No matching response arrived within the operation's deadline.
    #[error("operation timed out")]
    Timeout,

    /// The device responded with an explicit error code.
    #[error("device returned error code {0}")]
    DeviceError(u8),

    /// The response to a request was a different (but recognized)
    /// event than the one the operation awaited.
    #[error("unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse {
        /// Event name the operation awaited.
        expected: &'static str,
        /// Event name actually observed.
        got: &'static str,
    },
}

impl SessionError {
    /// Whether the caller may retry the operation without reconnecting
    /// (spec §7: only `TransportError` changes session state).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Failure of the delivery engine's retry state machine (spec §4.5, §7).
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Every configured direct and flood attempt was exhausted without
    /// an ACK (spec §7: "surface as message `failed` with cause; no
    /// exception thrown" — this variant is the cause carried in that
    /// status update, not raised to a caller awaiting a future).
    #[error("delivery exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Total attempts made across direct and flood phases.
        attempts: u32,
    },

    /// The underlying session operation failed outright (e.g.
    /// disconnected) before retries could run their course.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Failure of a sync coordinator phase (spec §4.6) that is severe enough
/// to abort the phase rather than being recorded as a per-item error.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The session operation driving this phase failed outright.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A store operation failed outright.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The device record the coordinator was asked to sync does not exist.
    #[error("no device record for the requested device id")]
    DeviceNotFound,
}
