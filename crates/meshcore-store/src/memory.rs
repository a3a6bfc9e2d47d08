//! In-memory [`Store`] for tests and simple embedding.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meshcore_core::entities::{Channel, ChannelId, Contact, ContactId, Device, DeviceId, Message, MessageId};
use meshcore_core::error::StoreError;
use meshcore_core::store::{RemoteNodeSession, Store, SUPPORTED_SCHEMA_VERSION};

/// In-memory [`Store`] for tests and simple embedding.
///
/// All state lives behind a single `Mutex`; every method is O(n) in the
/// relevant collection. Not durable: dropping the last handle loses all
/// data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    devices: HashMap<DeviceId, Device>,
    contacts: HashMap<ContactId, Contact>,
    channels: HashMap<ChannelId, Channel>,
    messages: HashMap<MessageId, Message>,
    remote_sessions: HashMap<(DeviceId, ContactId), RemoteNodeSession>,
}

impl MemoryStore {
    /// Create a new, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                devices: HashMap::new(),
                contacts: HashMap::new(),
                channels: HashMap::new(),
                messages: HashMap::new(),
                remote_sessions: HashMap::new(),
            })),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn schema_version(&self) -> Result<u32, StoreError> {
        Ok(SUPPORTED_SCHEMA_VERSION)
    }

    #[allow(clippy::expect_used)]
    async fn fetch_device(&self, device_id: DeviceId) -> Result<Option<Device>, StoreError> {
        let inner = self.inner.lock().expect("mutex poisoned");
        Ok(inner.devices.get(&device_id).cloned())
    }

    #[allow(clippy::expect_used)]
    async fn save_device(&self, device: Device) -> Result<DeviceId, StoreError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        let id = device.device_id;
        inner.devices.insert(id, device);
        Ok(id)
    }

    #[allow(clippy::expect_used)]
    async fn delete_device(&self, device_id: DeviceId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        inner.devices.remove(&device_id);
        inner.contacts.retain(|_, c| c.device_id != device_id);
        inner.channels.retain(|_, c| c.device_id != device_id);
        inner.messages.retain(|_, m| m.device_id != device_id);
        inner.remote_sessions.retain(|(d, _), _| *d != device_id);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn fetch_contact(
        &self,
        device_id: DeviceId,
        public_key: &[u8; 32],
    ) -> Result<Option<Contact>, StoreError> {
        let inner = self.inner.lock().expect("mutex poisoned");
        Ok(inner
            .contacts
            .values()
            .find(|c| c.device_id == device_id && &c.public_key == public_key)
            .cloned())
    }

    #[allow(clippy::expect_used)]
    async fn save_contact(&self, contact: Contact) -> Result<ContactId, StoreError> {
        contact.validate()?;
        let mut inner = self.inner.lock().expect("mutex poisoned");
        let id = contact.id;
        inner.contacts.insert(id, contact);
        Ok(id)
    }

    #[allow(clippy::expect_used)]
    async fn delete_contact(&self, contact_id: ContactId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        inner.contacts.remove(&contact_id);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn list_contacts(&self, device_id: DeviceId) -> Result<Vec<Contact>, StoreError> {
        let inner = self.inner.lock().expect("mutex poisoned");
        Ok(inner.contacts.values().filter(|c| c.device_id == device_id).cloned().collect())
    }

    #[allow(clippy::expect_used)]
    async fn mark_contacts_archived(
        &self,
        device_id: DeviceId,
        keep_keys: &std::collections::HashSet<[u8; 32]>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        for contact in inner.contacts.values_mut() {
            if contact.device_id == device_id && !keep_keys.contains(&contact.public_key) {
                contact.is_archived = true;
            }
        }
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn fetch_channel(
        &self,
        device_id: DeviceId,
        slot_index: u8,
    ) -> Result<Option<Channel>, StoreError> {
        let inner = self.inner.lock().expect("mutex poisoned");
        Ok(inner
            .channels
            .values()
            .find(|c| c.device_id == device_id && c.slot_index == slot_index)
            .cloned())
    }

    #[allow(clippy::expect_used)]
    async fn save_channel(&self, channel: Channel) -> Result<ChannelId, StoreError> {
        channel.validate()?;
        let mut inner = self.inner.lock().expect("mutex poisoned");
        let id = channel.id;
        inner.channels.insert(id, channel);
        Ok(id)
    }

    #[allow(clippy::expect_used)]
    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        inner.channels.remove(&channel_id);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn list_channels(&self, device_id: DeviceId) -> Result<Vec<Channel>, StoreError> {
        let inner = self.inner.lock().expect("mutex poisoned");
        Ok(inner.channels.values().filter(|c| c.device_id == device_id).cloned().collect())
    }

    #[allow(clippy::expect_used)]
    async fn fetch_message(&self, message_id: MessageId) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.lock().expect("mutex poisoned");
        Ok(inner.messages.get(&message_id).cloned())
    }

    #[allow(clippy::expect_used)]
    async fn save_message(&self, message: Message) -> Result<MessageId, StoreError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        let id = message.id;
        inner.messages.insert(id, message);
        Ok(id)
    }

    #[allow(clippy::expect_used)]
    async fn delete_message(&self, message_id: MessageId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        inner.messages.remove(&message_id);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn fetch_next_pending_message_by_ack(
        &self,
        device_id: DeviceId,
        ack_code: u32,
    ) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.lock().expect("mutex poisoned");
        Ok(inner
            .messages
            .values()
            .find(|m| m.device_id == device_id && m.ack_code == Some(ack_code))
            .cloned())
    }

    #[allow(clippy::expect_used)]
    async fn update_message_status(
        &self,
        message_id: MessageId,
        status: meshcore_core::entities::MessageStatus,
        ack_code: Option<u32>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        let message = inner
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| StoreError::NotFound(message_id.to_string()))?;
        message.advance_status(status)?;
        if ack_code.is_some() {
            message.ack_code = ack_code;
        }
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn fetch_remote_node_session(
        &self,
        device_id: DeviceId,
        contact_id: ContactId,
    ) -> Result<Option<RemoteNodeSession>, StoreError> {
        let inner = self.inner.lock().expect("mutex poisoned");
        Ok(inner.remote_sessions.get(&(device_id, contact_id)).cloned())
    }

    #[allow(clippy::expect_used)]
    async fn save_remote_node_session(&self, session: RemoteNodeSession) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        inner.remote_sessions.insert((session.device_id, session.contact_id), session);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use meshcore_core::entities::{Conversation, Direction, MessageStatus, TextType};
    use uuid::Uuid;

    use super::*;

    fn sample_contact(device_id: DeviceId, key: u8) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            device_id,
            public_key: [key; 32],
            name: "alice".into(),
            node_kind: meshcore_proto::types::NodeKind::Chat,
            flags: 0,
            out_path_length: -1,
            out_path: Vec::new(),
            last_advert_timestamp: 0,
            lat_e6: 0,
            lon_e6: 0,
            last_modified: 0,
            nickname: None,
            is_blocked: false,
            is_favorite: false,
            is_discovered: false,
            is_archived: false,
        }
    }

    fn sample_message(device_id: DeviceId) -> Message {
        Message {
            id: Uuid::new_v4(),
            device_id,
            conversation: Conversation::Channel(0),
            text: "hi".into(),
            timestamp: 0,
            created_at: 0,
            direction: Direction::Outgoing,
            status: MessageStatus::Pending,
            text_type: TextType::Plain,
            ack_code: None,
            path_length: None,
            snr_db: None,
            sender_key_prefix: None,
            sender_node_name: None,
            retry_attempt: 0,
            max_retry_attempts: 0,
            heard_repeats: 0,
        }
    }

    #[tokio::test]
    async fn save_and_fetch_contact_round_trips() {
        let store = MemoryStore::new();
        let device_id = Uuid::new_v4();
        let contact = sample_contact(device_id, 7);
        store.save_contact(contact.clone()).await.unwrap();

        let fetched = store.fetch_contact(device_id, &contact.public_key).await.unwrap();
        assert_eq!(fetched, Some(contact));
    }

    #[tokio::test]
    async fn save_contact_rejects_invalid_path() {
        let store = MemoryStore::new();
        let mut contact = sample_contact(Uuid::new_v4(), 1);
        contact.out_path_length = 3;
        contact.out_path = vec![1, 2];

        let err = store.save_contact(contact).await.unwrap_err();
        assert!(matches!(err, StoreError::Entity(_)));
    }

    #[tokio::test]
    async fn mark_contacts_archived_keeps_only_listed_keys() {
        let store = MemoryStore::new();
        let device_id = Uuid::new_v4();
        let keep = sample_contact(device_id, 1);
        let drop = sample_contact(device_id, 2);
        store.save_contact(keep.clone()).await.unwrap();
        store.save_contact(drop).await.unwrap();

        let mut keep_keys = std::collections::HashSet::new();
        keep_keys.insert(keep.public_key);
        store.mark_contacts_archived(device_id, &keep_keys).await.unwrap();

        let contacts = store.list_contacts(device_id).await.unwrap();
        let kept = contacts.iter().find(|c| c.public_key == keep.public_key).unwrap();
        let dropped = contacts.iter().find(|c| c.public_key == [2; 32]).unwrap();
        assert!(!kept.is_archived);
        assert!(dropped.is_archived);
    }

    #[tokio::test]
    async fn update_message_status_enforces_monotonic_lifecycle() {
        let store = MemoryStore::new();
        let device_id = Uuid::new_v4();
        let message = sample_message(device_id);
        let id = store.save_message(message).await.unwrap();

        store.update_message_status(id, MessageStatus::Sending, None).await.unwrap();
        store.update_message_status(id, MessageStatus::Sent, Some(42)).await.unwrap();

        let fetched = store.fetch_message(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, MessageStatus::Sent);
        assert_eq!(fetched.ack_code, Some(42));

        let err = store.update_message_status(id, MessageStatus::Pending, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Entity(_)));
    }

    #[tokio::test]
    async fn fetch_next_pending_message_by_ack_matches_code() {
        let store = MemoryStore::new();
        let device_id = Uuid::new_v4();
        let mut message = sample_message(device_id);
        message.ack_code = Some(99);
        let id = store.save_message(message).await.unwrap();

        let found = store.fetch_next_pending_message_by_ack(device_id, 99).await.unwrap();
        assert_eq!(found.map(|m| m.id), Some(id));
        assert!(store.fetch_next_pending_message_by_ack(device_id, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_device_cascades_owned_entities() {
        let store = MemoryStore::new();
        let device_id = Uuid::new_v4();
        let contact = sample_contact(device_id, 5);
        store.save_contact(contact).await.unwrap();
        store.save_message(sample_message(device_id)).await.unwrap();

        store.delete_device(device_id).await.unwrap();

        assert!(store.list_contacts(device_id).await.unwrap().is_empty());
    }
}
