//! Redb-backed durable [`Store`].
//!
//! Uses Redb's ACID transactions with copy-on-write for crash safety.
//! All state survives process restarts. Rows are CBOR-encoded via
//! `ciborium` over the entity types' `serde` derives.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use meshcore_core::entities::{
    Channel, ChannelId, Contact, ContactId, Device, DeviceId, Message, MessageId,
    MessageStatus,
};
use meshcore_core::error::StoreError;
use meshcore_core::store::{RemoteNodeSession, Store, SUPPORTED_SCHEMA_VERSION};
use redb::{Database, ReadableTable, TableDefinition};

const SCHEMA: TableDefinition<&str, u32> = TableDefinition::new("schema_version");
const DEVICES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("devices");
const CONTACTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("contacts");
const CHANNELS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("channels");
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");
const REMOTE_SESSIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("remote_sessions");

const SCHEMA_VERSION_KEY: &str = "version";

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(out)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn remote_session_key(device_id: DeviceId, contact_id: ContactId) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(device_id.as_bytes());
    key[16..].copy_from_slice(contact_id.as_bytes());
    key
}

/// Durable [`Store`] backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (`Arc`).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a database at `path`, creating tables as needed.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the database cannot be opened or created.
    /// [`StoreError::SchemaTooNew`] if an existing database's recorded
    /// `schema_version` exceeds [`SUPPORTED_SCHEMA_VERSION`] (spec §6:
    /// "refuses to open downwards").
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| StoreError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        let on_disk_version = {
            let mut schema = txn.open_table(SCHEMA).map_err(|e| StoreError::Io(e.to_string()))?;
            txn_open(&txn, DEVICES)?;
            txn_open(&txn, CONTACTS)?;
            txn_open(&txn, CHANNELS)?;
            txn_open(&txn, MESSAGES)?;
            txn_open(&txn, REMOTE_SESSIONS)?;

            let existing = schema
                .get(SCHEMA_VERSION_KEY)
                .map_err(|e| StoreError::Io(e.to_string()))?
                .map(|v| v.value());
            if existing.is_none() {
                schema
                    .insert(SCHEMA_VERSION_KEY, SUPPORTED_SCHEMA_VERSION)
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
            existing.unwrap_or(SUPPORTED_SCHEMA_VERSION)
        };
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        if on_disk_version > SUPPORTED_SCHEMA_VERSION {
            return Err(StoreError::SchemaTooNew {
                found: on_disk_version,
                supported: SUPPORTED_SCHEMA_VERSION,
            });
        }

        Ok(Self { db: Arc::new(db) })
    }
}

fn txn_open(
    txn: &redb::WriteTransaction,
    table: TableDefinition<&[u8], &[u8]>,
) -> Result<(), StoreError> {
    txn.open_table(table).map_err(|e| StoreError::Io(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl Store for RedbStore {
    async fn schema_version(&self) -> Result<u32, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(SCHEMA).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(table
            .get(SCHEMA_VERSION_KEY)
            .map_err(|e| StoreError::Io(e.to_string()))?
            .map(|v| v.value())
            .unwrap_or(SUPPORTED_SCHEMA_VERSION))
    }

    async fn fetch_device(&self, device_id: DeviceId) -> Result<Option<Device>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(DEVICES).map_err(|e| StoreError::Io(e.to_string()))?;
        match table.get(device_id.as_bytes().as_slice()).map_err(|e| StoreError::Io(e.to_string()))? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    async fn save_device(&self, device: Device) -> Result<DeviceId, StoreError> {
        let bytes = encode(&device)?;
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(DEVICES).map_err(|e| StoreError::Io(e.to_string()))?;
            table
                .insert(device.device_id.as_bytes().as_slice(), bytes.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(device.device_id)
    }

    async fn delete_device(&self, device_id: DeviceId) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut devices = txn.open_table(DEVICES).map_err(|e| StoreError::Io(e.to_string()))?;
            devices.remove(device_id.as_bytes().as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;

            remove_where(&txn, CONTACTS, |c: &Contact| c.device_id == device_id)?;
            remove_where(&txn, CHANNELS, |c: &Channel| c.device_id == device_id)?;
            remove_where(&txn, MESSAGES, |m: &Message| m.device_id == device_id)?;

            let mut sessions =
                txn.open_table(REMOTE_SESSIONS).map_err(|e| StoreError::Io(e.to_string()))?;
            let stale: Vec<Vec<u8>> = sessions
                .iter()
                .map_err(|e| StoreError::Io(e.to_string()))?
                .filter_map(|r| r.ok())
                .filter(|(k, _)| k.value()[..16] == *device_id.as_bytes())
                .map(|(k, _)| k.value().to_vec())
                .collect();
            for key in stale {
                sessions.remove(key.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn fetch_contact(
        &self,
        device_id: DeviceId,
        public_key: &[u8; 32],
    ) -> Result<Option<Contact>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(CONTACTS).map_err(|e| StoreError::Io(e.to_string()))?;
        for row in table.iter().map_err(|e| StoreError::Io(e.to_string()))? {
            let (_, value) = row.map_err(|e| StoreError::Io(e.to_string()))?;
            let contact: Contact = decode(value.value())?;
            if contact.device_id == device_id && &contact.public_key == public_key {
                return Ok(Some(contact));
            }
        }
        Ok(None)
    }

    async fn save_contact(&self, contact: Contact) -> Result<ContactId, StoreError> {
        contact.validate()?;
        let bytes = encode(&contact)?;
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(CONTACTS).map_err(|e| StoreError::Io(e.to_string()))?;
            table
                .insert(contact.id.as_bytes().as_slice(), bytes.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(contact.id)
    }

    async fn delete_contact(&self, contact_id: ContactId) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(CONTACTS).map_err(|e| StoreError::Io(e.to_string()))?;
            table.remove(contact_id.as_bytes().as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn list_contacts(&self, device_id: DeviceId) -> Result<Vec<Contact>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(CONTACTS).map_err(|e| StoreError::Io(e.to_string()))?;
        let mut out = Vec::new();
        for row in table.iter().map_err(|e| StoreError::Io(e.to_string()))? {
            let (_, value) = row.map_err(|e| StoreError::Io(e.to_string()))?;
            let contact: Contact = decode(value.value())?;
            if contact.device_id == device_id {
                out.push(contact);
            }
        }
        Ok(out)
    }

    async fn mark_contacts_archived(
        &self,
        device_id: DeviceId,
        keep_keys: &std::collections::HashSet<[u8; 32]>,
    ) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(CONTACTS).map_err(|e| StoreError::Io(e.to_string()))?;
            let keys: Vec<Vec<u8>> = table
                .iter()
                .map_err(|e| StoreError::Io(e.to_string()))?
                .filter_map(|r| r.ok())
                .map(|(k, _)| k.value().to_vec())
                .collect();
            for key in keys {
                let Some(value) = table.get(key.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?
                else {
                    continue;
                };
                let mut contact: Contact = decode(value.value())?;
                drop(value);
                if contact.device_id == device_id && !keep_keys.contains(&contact.public_key) {
                    contact.is_archived = true;
                    let bytes = encode(&contact)?;
                    table.insert(key.as_slice(), bytes.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
                }
            }
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn fetch_channel(
        &self,
        device_id: DeviceId,
        slot_index: u8,
    ) -> Result<Option<Channel>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(CHANNELS).map_err(|e| StoreError::Io(e.to_string()))?;
        for row in table.iter().map_err(|e| StoreError::Io(e.to_string()))? {
            let (_, value) = row.map_err(|e| StoreError::Io(e.to_string()))?;
            let channel: Channel = decode(value.value())?;
            if channel.device_id == device_id && channel.slot_index == slot_index {
                return Ok(Some(channel));
            }
        }
        Ok(None)
    }

    async fn save_channel(&self, channel: Channel) -> Result<ChannelId, StoreError> {
        channel.validate()?;
        let bytes = encode(&channel)?;
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(CHANNELS).map_err(|e| StoreError::Io(e.to_string()))?;
            table
                .insert(channel.id.as_bytes().as_slice(), bytes.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(channel.id)
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(CHANNELS).map_err(|e| StoreError::Io(e.to_string()))?;
            table.remove(channel_id.as_bytes().as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn list_channels(&self, device_id: DeviceId) -> Result<Vec<Channel>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(CHANNELS).map_err(|e| StoreError::Io(e.to_string()))?;
        let mut out = Vec::new();
        for row in table.iter().map_err(|e| StoreError::Io(e.to_string()))? {
            let (_, value) = row.map_err(|e| StoreError::Io(e.to_string()))?;
            let channel: Channel = decode(value.value())?;
            if channel.device_id == device_id {
                out.push(channel);
            }
        }
        Ok(out)
    }

    async fn fetch_message(&self, message_id: MessageId) -> Result<Option<Message>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;
        match table.get(message_id.as_bytes().as_slice()).map_err(|e| StoreError::Io(e.to_string()))? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    async fn save_message(&self, message: Message) -> Result<MessageId, StoreError> {
        let bytes = encode(&message)?;
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;
            table
                .insert(message.id.as_bytes().as_slice(), bytes.as_slice())
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(message.id)
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;
            table.remove(message_id.as_bytes().as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn fetch_next_pending_message_by_ack(
        &self,
        device_id: DeviceId,
        ack_code: u32,
    ) -> Result<Option<Message>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;
        for row in table.iter().map_err(|e| StoreError::Io(e.to_string()))? {
            let (_, value) = row.map_err(|e| StoreError::Io(e.to_string()))?;
            let message: Message = decode(value.value())?;
            if message.device_id == device_id && message.ack_code == Some(ack_code) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    async fn update_message_status(
        &self,
        message_id: MessageId,
        status: MessageStatus,
        ack_code: Option<u32>,
    ) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(MESSAGES).map_err(|e| StoreError::Io(e.to_string()))?;
            let key = message_id.as_bytes().as_slice();
            let mut message: Message = {
                let value = table.get(key).map_err(|e| StoreError::Io(e.to_string()))?;
                match value {
                    Some(v) => decode(v.value())?,
                    None => return Err(StoreError::NotFound(message_id.to_string())),
                }
            };
            message.advance_status(status)?;
            if ack_code.is_some() {
                message.ack_code = ack_code;
            }
            let bytes = encode(&message)?;
            table.insert(key, bytes.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    async fn fetch_remote_node_session(
        &self,
        device_id: DeviceId,
        contact_id: ContactId,
    ) -> Result<Option<RemoteNodeSession>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(REMOTE_SESSIONS).map_err(|e| StoreError::Io(e.to_string()))?;
        let key = remote_session_key(device_id, contact_id);
        match table.get(key.as_slice()).map_err(|e| StoreError::Io(e.to_string()))? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    async fn save_remote_node_session(&self, session: RemoteNodeSession) -> Result<(), StoreError> {
        let key = remote_session_key(session.device_id, session.contact_id);
        let bytes = encode(&session)?;
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(REMOTE_SESSIONS).map_err(|e| StoreError::Io(e.to_string()))?;
            table.insert(key.as_slice(), bytes.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }
}

fn remove_where<T, F>(
    txn: &redb::WriteTransaction,
    table_def: TableDefinition<&[u8], &[u8]>,
    predicate: F,
) -> Result<(), StoreError>
where
    T: serde::de::DeserializeOwned,
    F: Fn(&T) -> bool,
{
    let mut table = txn.open_table(table_def).map_err(|e| StoreError::Io(e.to_string()))?;
    let stale: Vec<Vec<u8>> = {
        let mut keys = Vec::new();
        for row in table.iter().map_err(|e| StoreError::Io(e.to_string()))? {
            let (key, value) = row.map_err(|e| StoreError::Io(e.to_string()))?;
            let entity: T = decode(value.value())?;
            if predicate(&entity) {
                keys.push(key.value().to_vec());
            }
        }
        keys
    };
    for key in stale {
        table.remove(key.as_slice()).map_err(|e| StoreError::Io(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use meshcore_core::entities::{Conversation, Direction, TextType};
    use uuid::Uuid;

    use super::*;

    fn sample_device(device_id: DeviceId) -> Device {
        Device {
            device_id,
            public_key: [1; 32],
            node_name: "node".into(),
            firmware_version_code: 1,
            firmware_version_string: "1.0".into(),
            build_date: "2026-01-01".into(),
            manufacturer: "meshcore".into(),
            max_contacts: 100,
            max_channels: 8,
            freq_khz: 915_000,
            bandwidth_hz: 250_000,
            spreading_factor: 10,
            coding_rate: 5,
            tx_power_dbm: 20,
            lat_e6: 0,
            lon_e6: 0,
            ble_pin: 0,
            flags: DeviceFlags::default(),
            telemetry_modes: meshcore_proto::types::TelemetryModes::default(),
            last_connected: None,
            last_contact_sync: 0,
            is_active: true,
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
    async fn device_round_trips_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshcore.redb");
        let device_id = Uuid::new_v4();

        {
            let store = RedbStore::open(&path).unwrap();
            store.save_device(sample_device(device_id)).await.unwrap();
        }

        let store = RedbStore::open(&path).unwrap();
        let fetched = store.fetch_device(device_id).await.unwrap();
        assert_eq!(fetched.map(|d| d.device_id), Some(device_id));
    }

    #[tokio::test]
    async fn opening_a_newer_schema_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshcore.redb");

        {
            let db = Database::create(&path).unwrap();
            let txn = db.begin_write().unwrap();
            {
                let mut schema = txn.open_table(SCHEMA).unwrap();
                schema.insert(SCHEMA_VERSION_KEY, SUPPORTED_SCHEMA_VERSION + 1).unwrap();
            }
            txn.commit().unwrap();
        }

        let err = RedbStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::SchemaTooNew { .. }));
    }

    #[tokio::test]
    async fn update_message_status_persists_ack_code() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("meshcore.redb")).unwrap();
        let device_id = Uuid::new_v4();
        let id = store.save_message(sample_message(device_id)).await.unwrap();

        store.update_message_status(id, MessageStatus::Sending, None).await.unwrap();
        store.update_message_status(id, MessageStatus::Sent, Some(7)).await.unwrap();

        let found = store.fetch_next_pending_message_by_ack(device_id, 7).await.unwrap();
        assert_eq!(found.map(|m| m.id), Some(id));
    }
}
