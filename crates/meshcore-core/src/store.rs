//! Persistence contract (spec §6). Concrete engines live in
//! `meshcore-store`; this crate only defines the interface and the
//! entity schema it operates on.

use async_trait::async_trait;

use crate::entities::{Channel, ChannelId, Contact, ContactId, Device, DeviceId, Message, MessageId, MessageStatus};
use crate::error::StoreError;

/// A device's view of a remote node it has an active delivery/path state
/// with. Process-memory-only in the delivery engine; persisted here only
/// so a restart can resume outstanding direct-vs-flood path decisions.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RemoteNodeSession {
    /// Owning device.
    pub device_id: DeviceId,
    /// Contact this session tracks.
    pub contact_id: ContactId,
    /// Whether the last successful delivery used the direct path.
    pub last_path_direct: bool,
    /// Unix timestamp of the last successful delivery.
    pub last_success: Option<u32>,
}

/// Highest `schema_version` this build understands (spec §6: "refuses to
/// open downwards").
pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;

/// The persistence contract a session, delivery engine, and sync
/// coordinator drive mutations through (spec §6).
///
/// Implementations MUST make writes durable before the corresponding
/// event is dispatched to subscribers (spec: "Writes MUST be durable
/// before the corresponding event is dispatched").
#[async_trait]
pub trait Store: Send + Sync {
    /// The store's current on-disk schema version.
    async fn schema_version(&self) -> Result<u32, StoreError>;

    /// Fetch a device by id.
    async fn fetch_device(&self, device_id: DeviceId) -> Result<Option<Device>, StoreError>;

    /// Insert or replace a device record.
    async fn save_device(&self, device: Device) -> Result<DeviceId, StoreError>;

    /// Delete a device and all entities owned by it.
    async fn delete_device(&self, device_id: DeviceId) -> Result<(), StoreError>;

    /// Fetch a contact by its device-scoped public key.
    async fn fetch_contact(
        &self,
        device_id: DeviceId,
        public_key: &[u8; 32],
    ) -> Result<Option<Contact>, StoreError>;

    /// Insert or replace a contact record, returning its local id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Entity`] if `contact` fails
    /// [`Contact::validate`](crate::entities::Contact::validate).
    async fn save_contact(&self, contact: Contact) -> Result<ContactId, StoreError>;

    /// Delete a contact.
    async fn delete_contact(&self, contact_id: ContactId) -> Result<(), StoreError>;

    /// List all contacts for a device.
    async fn list_contacts(&self, device_id: DeviceId) -> Result<Vec<Contact>, StoreError>;

    /// Atomically mark every contact of `device_id` whose public key is
    /// not in `keep_keys` as `is_archived`.
    async fn mark_contacts_archived(
        &self,
        device_id: DeviceId,
        keep_keys: &std::collections::HashSet<[u8; 32]>,
    ) -> Result<(), StoreError>;

    /// Fetch a channel by device and slot index.
    async fn fetch_channel(
        &self,
        device_id: DeviceId,
        slot_index: u8,
    ) -> Result<Option<Channel>, StoreError>;

    /// Insert or replace a channel record.
    async fn save_channel(&self, channel: Channel) -> Result<ChannelId, StoreError>;

    /// Delete a channel.
    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), StoreError>;

    /// List all channel slots for a device.
    async fn list_channels(&self, device_id: DeviceId) -> Result<Vec<Channel>, StoreError>;

    /// Fetch a message by id.
    async fn fetch_message(&self, message_id: MessageId) -> Result<Option<Message>, StoreError>;

    /// Insert or replace a message record.
    async fn save_message(&self, message: Message) -> Result<MessageId, StoreError>;

    /// Delete a message.
    async fn delete_message(&self, message_id: MessageId) -> Result<(), StoreError>;

    /// Find the single outgoing message still awaiting this ACK code.
    async fn fetch_next_pending_message_by_ack(
        &self,
        device_id: DeviceId,
        ack_code: u32,
    ) -> Result<Option<Message>, StoreError>;

    /// Update a message's status (and, for ACK-bearing transitions, its
    /// ack code) in place.
    ///
    /// # Errors
    ///
    /// [`StoreError::Entity`] if the transition is not monotonic (spec
    /// §3), [`StoreError::NotFound`] if `message_id` does not exist.
    async fn update_message_status(
        &self,
        message_id: MessageId,
        status: MessageStatus,
        ack_code: Option<u32>,
    ) -> Result<(), StoreError>;

    /// Fetch the remote-node session tracked for a contact, if any.
    async fn fetch_remote_node_session(
        &self,
        device_id: DeviceId,
        contact_id: ContactId,
    ) -> Result<Option<RemoteNodeSession>, StoreError>;

    /// Insert or replace a remote-node session record.
    async fn save_remote_node_session(
        &self,
        session: RemoteNodeSession,
    ) -> Result<(), StoreError>;
}
