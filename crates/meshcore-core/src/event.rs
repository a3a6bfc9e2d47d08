//! Events published on the dispatcher (spec §4.3, §4.4 point 4).

use std::collections::HashMap;
use std::sync::Arc;

use meshcore_proto::codec::MeshEvent;

use crate::entities::{ContactId, MessageId, MessageStatus};

/// Connection lifecycle state (spec §4.4 point 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport attached.
    Disconnected,
    /// Transport connect in progress.
    Connecting,
    /// Transport connected, session handshake/setup not yet complete.
    Connected,
    /// Ready to serve operations.
    Ready,
}

impl ConnectionState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
        }
    }
}

/// Phase of the sync coordinator (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Synchronizing the contact list.
    Contacts,
    /// Synchronizing channel slots.
    Channels,
    /// Draining queued messages.
    Messages,
}

impl SyncPhase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Contacts => "contacts",
            Self::Channels => "channels",
            Self::Messages => "messages",
        }
    }
}

/// A typed event published on the dispatcher.
///
/// Wraps the wire-level [`MeshEvent`] alongside higher-level events
/// produced by the session, delivery engine, and sync coordinator.
#[derive(Debug, Clone)]
pub enum Event {
    /// A decoded mesh-wire event (push or diagnostic).
    Mesh(Arc<MeshEvent>),
    /// The session's connection state changed.
    ConnectionState {
        /// New state.
        state: ConnectionState,
        /// Reason, present on transitions into `Disconnected`.
        reason: Option<String>,
    },
    /// A message's delivery status changed.
    MessageStatus {
        /// Affected message.
        message_id: MessageId,
        /// New status.
        status: MessageStatus,
    },
    /// Sync coordinator progress (spec §4.6: "emit `sync_started(phase)`
    /// and `sync_ended(phase, result)`").
    SyncProgress {
        /// Phase that started, completed, or failed.
        phase: SyncPhase,
        /// `true` for the `sync_started` signal; `false` for `sync_ended`.
        started: bool,
        /// Meaningful only when `started` is `false`: whether the phase
        /// completed with at least one successful item (spec §4.6:
        /// "the phase as a whole succeeds iff any item succeeded").
        succeeded: bool,
    },
    /// A path reset was applied to a contact's retry state (spec §4.5).
    PathReset {
        /// Contact whose path was reset.
        contact_id: ContactId,
    },
}

impl Event {
    /// The event-type string used for subscription filtering
    /// (spec §4.3 `subscribe(event_type?, ...)`).
    #[must_use]
    pub fn event_type(&self) -> String {
        match self {
            Self::Mesh(mesh) => format!("mesh.{}", mesh.name()),
            Self::ConnectionState { .. } => "connection_state".to_string(),
            Self::MessageStatus { .. } => "message_status".to_string(),
            Self::SyncProgress { .. } => "sync_progress".to_string(),
            Self::PathReset { .. } => "path_reset".to_string(),
        }
    }

    /// String/string attribute map used by `attr_filters` matching
    /// (spec §4.3: "all entries must match the event's attributes").
    #[must_use]
    pub fn attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        match self {
            Self::Mesh(_) => {},
            Self::ConnectionState { state, reason } => {
                attrs.insert("state".to_string(), state.as_str().to_string());
                if let Some(reason) = reason {
                    attrs.insert("reason".to_string(), reason.clone());
                }
            },
            Self::MessageStatus { message_id, status } => {
                attrs.insert("message_id".to_string(), message_id.to_string());
                attrs.insert("status".to_string(), format!("{status:?}").to_lowercase());
            },
            Self::SyncProgress { phase, started, succeeded } => {
                attrs.insert("phase".to_string(), phase.as_str().to_string());
                attrs.insert("started".to_string(), started.to_string());
                attrs.insert("succeeded".to_string(), succeeded.to_string());
            },
            Self::PathReset { contact_id } => {
                attrs.insert("contact_id".to_string(), contact_id.to_string());
            },
        }
        attrs
    }

    /// Whether `self` matches a subscription's event-type and attribute
    /// filters (spec §4.3: `event_type == None` matches all).
    #[must_use]
    pub fn matches(&self, event_type: Option<&str>, filters: &HashMap<String, String>) -> bool {
        if let Some(wanted) = event_type {
            if self.event_type() != wanted {
                return false;
            }
        }
        let attrs = self.attributes();
        filters.iter().all(|(key, value)| attrs.get(key) == Some(value))
    }
}

