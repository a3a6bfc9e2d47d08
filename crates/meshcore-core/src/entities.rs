//! Persisted entity schema (spec §3).

use meshcore_proto::types::NodeKind;
use uuid::Uuid;

use crate::error::EntityError;

/// Stable client-assigned identifier for a paired device.
pub type DeviceId = Uuid;
/// Local identifier for a [`Contact`].
pub type ContactId = Uuid;
/// Local identifier for a [`Channel`].
pub type ChannelId = Uuid;
/// Local identifier for a [`Message`].
pub type MessageId = Uuid;

/// Device capability/feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct DeviceFlags {
    /// Contacts must be added manually rather than auto-discovered.
    pub manual_add: bool,
    /// Device supports multiple ACKs per message.
    pub multi_acks: bool,
}

/// A node the client has paired with.
///
/// At most one [`Device`] in a store is `is_active = true` at any time
/// (spec §3; enforced by the store, not this type).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Device {
    /// Stable opaque client-assigned identifier.
    pub device_id: DeviceId,
    /// Primary identity, from the node.
    pub public_key: [u8; 32],
    /// Advertised node name.
    pub node_name: String,
    /// Numeric firmware version code.
    pub firmware_version_code: u8,
    /// Firmware version string.
    pub firmware_version_string: String,
    /// Firmware build date string.
    pub build_date: String,
    /// Manufacturer string.
    pub manufacturer: String,
    /// Maximum contacts the device can hold.
    pub max_contacts: u16,
    /// Maximum channel slots (0..=7 range of indices).
    pub max_channels: u8,
    /// Radio frequency, kHz.
    pub freq_khz: u32,
    /// Radio bandwidth, Hz.
    pub bandwidth_hz: u32,
    /// Spreading factor, 5..=12.
    pub spreading_factor: u8,
    /// Coding rate, 5..=8.
    pub coding_rate: u8,
    /// Transmit power, dBm.
    pub tx_power_dbm: i8,
    /// Latitude, micro-degrees.
    pub lat_e6: i32,
    /// Longitude, micro-degrees.
    pub lon_e6: i32,
    /// BLE pairing PIN.
    pub ble_pin: u32,
    /// Feature flags.
    pub flags: DeviceFlags,
    /// Telemetry-mode bitfield, decomposed.
    pub telemetry_modes: meshcore_proto::types::TelemetryModes,
    /// Unix timestamp of the last successful connection.
    pub last_connected: Option<u32>,
    /// Unix timestamp cursor for incremental contact sync (spec §4.6).
    pub last_contact_sync: u32,
    /// Whether this is the currently active device.
    pub is_active: bool,
}

/// A peer known to a [`Device`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Contact {
    /// Local identifier.
    pub id: ContactId,
    /// Owning device.
    pub device_id: DeviceId,
    /// Unique (per device) public key.
    pub public_key: [u8; 32],
    /// Advertised display name.
    pub name: String,
    /// Broadcast role.
    pub node_kind: NodeKind,
    /// Device-defined bit flags.
    pub flags: u8,
    /// `-1` means flood-only; otherwise `0..=64`.
    pub out_path_length: i8,
    /// Path bytes; length always `max(out_path_length, 0)`.
    pub out_path: Vec<u8>,
    /// Unix timestamp of the last advertisement seen.
    pub last_advert_timestamp: u32,
    /// Latitude, micro-degrees.
    pub lat_e6: i32,
    /// Longitude, micro-degrees.
    pub lon_e6: i32,
    /// Unix timestamp of last local modification.
    pub last_modified: u32,
    /// Local display override.
    pub nickname: Option<String>,
    /// Local-only block flag.
    pub is_blocked: bool,
    /// Local-only favorite flag.
    pub is_favorite: bool,
    /// Seen via push but not yet confirmed on the device.
    pub is_discovered: bool,
    /// The device has evicted this contact.
    pub is_archived: bool,
}

impl Contact {
    /// Validate the cross-field invariants spec §3 requires of a contact:
    /// `out_path_length` domain, `out_path` length agreement, and
    /// discovered/archived mutual exclusivity.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant found.
    pub fn validate(&self) -> Result<(), EntityError> {
        if !(-1..=64).contains(&self.out_path_length) {
            return Err(EntityError::InvalidPathLength(self.out_path_length));
        }
        let expected = self.out_path_length.max(0) as usize;
        if self.out_path.len() != expected {
            return Err(EntityError::PathLengthMismatch { got: self.out_path.len(), expected });
        }
        if self.is_discovered && self.is_archived {
            return Err(EntityError::DiscoveredAndArchived);
        }
        Ok(())
    }
}

/// A group-chat slot. Slot 0 is the public channel.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Channel {
    /// Local identifier.
    pub id: ChannelId,
    /// Owning device.
    pub device_id: DeviceId,
    /// Slot index, 0..=7.
    pub slot_index: u8,
    /// Channel name, <=32 bytes UTF-8 after trimming.
    pub name: String,
    /// 16-byte shared secret.
    pub secret: [u8; 16],
    /// Whether this slot is enabled.
    pub is_enabled: bool,
    /// Unix timestamp of the most recent message.
    pub last_message_date: Option<u32>,
    /// Unread message count.
    pub unread_count: u32,
}

impl Channel {
    /// Validate `slot_index` is within the device's 0..=7 domain.
    ///
    /// # Errors
    ///
    /// [`EntityError::InvalidSlotIndex`] if outside that range.
    pub fn validate(&self) -> Result<(), EntityError> {
        if self.slot_index > 7 {
            return Err(EntityError::InvalidSlotIndex(self.slot_index));
        }
        Ok(())
    }
}

/// Which conversation a [`Message`] belongs to (spec §3: "exactly one
/// non-null").
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Conversation {
    /// A direct conversation with a contact.
    Contact(ContactId),
    /// A channel (group) conversation.
    Channel(u8),
}

/// Whether a message was sent by the local user or received from the
/// device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    /// Received from the mesh.
    Incoming,
    /// Sent by the local user.
    Outgoing,
}

/// Lifecycle status of a message (spec §3/§4.5).
///
/// Advances monotonically except `Retrying`, which returns to `Sending`.
/// `Delivered`, `Failed`, and `Read` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MessageStatus {
    /// Created, not yet handed to the transport.
    Pending,
    /// Command written, awaiting the device's "sent" response.
    Sending,
    /// Device accepted the message; awaiting delivery ACK (direct only).
    Sent,
    /// Delivery confirmed by ACK (direct) or transmitted once (channel).
    Delivered,
    /// Retries exhausted or transport lost.
    Failed,
    /// A retry attempt is about to begin; transitions back to `Sending`.
    Retrying,
    /// User has viewed the message.
    Read,
}

impl MessageStatus {
    /// Whether this status is terminal (spec §3: "terminal states are
    /// `delivered`, `failed`, `read`").
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed | Self::Read)
    }

    fn allows_transition_to(self, to: Self) -> bool {
        use MessageStatus::{Delivered, Failed, Pending, Read, Retrying, Sending, Sent};
        matches!(
            (self, to),
            (Pending, Sending)
                | (Sending, Sent)
                | (Sending, Delivered) // channel messages: single attempt, no ack
                | (Sending, Failed)
                | (Sent, Delivered)
                | (Sent, Retrying)
                | (Sent, Failed)
                | (Retrying, Sending)
                | (Delivered, Read)
        )
    }
}

/// Text-type discriminant carried with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TextType {
    /// Ordinary text.
    Plain,
    /// A device command string.
    Command,
    /// Signed text (carries a 4-byte signature on the wire).
    Signed,
}

/// A unit of text on a conversation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Local identifier.
    pub id: MessageId,
    /// Owning device.
    pub device_id: DeviceId,
    /// Target conversation; exactly one of contact/channel (spec §3).
    pub conversation: Conversation,
    /// Message body.
    pub text: String,
    /// Device-domain unix timestamp.
    pub timestamp: u32,
    /// Local creation unix timestamp.
    pub created_at: u32,
    /// Direction relative to the local user.
    pub direction: Direction,
    /// Lifecycle status.
    pub status: MessageStatus,
    /// Text-type discriminant.
    pub text_type: TextType,
    /// Outgoing-only ACK correlation token.
    pub ack_code: Option<u32>,
    /// Hop count the message traveled, if known.
    pub path_length: Option<u8>,
    /// Signal-to-noise ratio, dB.
    pub snr_db: Option<f32>,
    /// First 6 bytes of the sender's public key (incoming direct only).
    pub sender_key_prefix: Option<[u8; 6]>,
    /// Display name of the sender (incoming channel only).
    pub sender_node_name: Option<String>,
    /// Current retry attempt number.
    pub retry_attempt: u32,
    /// Configured maximum retry attempts for this message.
    pub max_retry_attempts: u32,
    /// Number of times this message's advertisement/path was re-heard.
    pub heard_repeats: u32,
}

impl Message {
    /// Apply a status transition, enforcing the monotonic lifecycle
    /// (spec §3).
    ///
    /// # Errors
    ///
    /// [`EntityError::InvalidStatusTransition`] if `to` is not reachable
    /// from the current status.
    pub fn advance_status(&mut self, to: MessageStatus) -> Result<(), EntityError> {
        if self.status.allows_transition_to(to) {
            self.status = to;
            Ok(())
        } else {
            Err(EntityError::InvalidStatusTransition { from: self.status, to })
        }
    }
}
