//! Sync Coordinator (spec §4.6): contacts → channels → messages
//! synchronization run on every transition to `ready`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use meshcore_core::dispatcher::Dispatcher;
use meshcore_core::entities::{
    Channel, Contact, Conversation, Device, DeviceId, Direction, Message, MessageStatus, TextType,
};
use meshcore_core::env::Environment;
use meshcore_core::event::{Event, SyncPhase};
use meshcore_core::store::Store;
use meshcore_proto::codec::IncomingMessage;
use meshcore_proto::types::{ChannelMessage, ContactMessage};
use uuid::Uuid;

use crate::error::SyncError;
use crate::session::Session;
use crate::transport::Transport;

/// Outcome of one sync phase (spec §4.6: "the phase as a whole succeeds
/// iff any item succeeded" when at least one item was attempted).
#[derive(Debug, Clone, Default)]
pub struct PhaseOutcome {
    /// Items attempted in this phase.
    pub attempted: usize,
    /// Items that completed without error.
    pub succeeded: usize,
    /// Per-item failure descriptions, for a caller-visible "Retry" UI.
    pub errors: Vec<String>,
}

impl PhaseOutcome {
    fn record_ok(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    fn record_err(&mut self, reason: impl Into<String>) {
        self.attempted += 1;
        self.errors.push(reason.into());
    }

    /// Whether the phase as a whole succeeded (spec §4.6).
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.attempted == 0 || self.succeeded > 0
    }
}

/// Result of a full contacts → channels → messages run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Phase 1 outcome.
    pub contacts: PhaseOutcome,
    /// Phase 2 outcome.
    pub channels: PhaseOutcome,
    /// Phase 3 outcome.
    pub messages: PhaseOutcome,
}

fn unix_now() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
}

/// Drives the three-phase sync described in spec §4.6, mutating the
/// shared [`Store`] and emitting `sync_progress` events around each
/// phase.
pub struct SyncCoordinator<S: Store> {
    store: Arc<S>,
    dispatcher: Arc<Dispatcher>,
}

impl<S: Store> SyncCoordinator<S> {
    /// Build a coordinator sharing `store` and `dispatcher` with the
    /// rest of the client.
    pub fn new(store: Arc<S>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    async fn announce(&self, phase: SyncPhase, started: bool, succeeded: bool) {
        self.dispatcher.dispatch(Event::SyncProgress { phase, started, succeeded }).await;
    }

    /// Run all three phases in order on a freshly `ready` session (spec
    /// §4.6).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] only for failures severe enough to abort a
    /// whole phase (session disconnected, device record missing, a
    /// store failure on a step that isn't safely skippable). Individual
    /// item failures are recorded in the returned [`SyncReport`] instead.
    pub async fn run<T: Transport, E: Environment>(
        &self,
        session: &mut Session<T, E>,
        device_id: DeviceId,
    ) -> Result<SyncReport, SyncError> {
        let mut device = self.store.fetch_device(device_id).await?.ok_or(SyncError::DeviceNotFound)?;

        let contacts = self.sync_contacts(session, &mut device).await?;
        let channels = self.sync_channels(session, &device).await?;
        let messages = self.sync_messages(session, device_id).await?;

        self.store.save_device(device).await?;
        Ok(SyncReport { contacts, channels, messages })
    }

    /// Phase 1 (spec §4.6 point 1): upsert contacts returned since the
    /// device's sync cursor, then archive any local contact whose
    /// public key wasn't returned and which isn't merely `discovered`.
    async fn sync_contacts<T: Transport, E: Environment>(
        &self,
        session: &mut Session<T, E>,
        device: &mut Device,
    ) -> Result<PhaseOutcome, SyncError> {
        self.announce(SyncPhase::Contacts, true, false).await;
        let mut outcome = PhaseOutcome::default();

        let records = session.get_contacts(device.last_contact_sync).await?;
        let mut keep_keys: HashSet<[u8; 32]> = HashSet::new();

        for record in &records {
            keep_keys.insert(record.public_key);
            let existing =
                self.store.fetch_contact(device.device_id, &record.public_key).await.ok().flatten();
            let used = record.out_path_length.max(0) as usize;
            let contact = Contact {
                id: existing.as_ref().map_or_else(Uuid::new_v4, |c| c.id),
                device_id: device.device_id,
                public_key: record.public_key,
                name: record.name.clone(),
                node_kind: record.node_kind,
                flags: record.flags,
                out_path_length: record.out_path_length,
                out_path: record.out_path[..used].to_vec(),
                last_advert_timestamp: record.last_advert_timestamp,
                lat_e6: record.lat_e6,
                lon_e6: record.lon_e6,
                last_modified: record.last_modified,
                nickname: existing.as_ref().and_then(|c| c.nickname.clone()),
                is_blocked: existing.as_ref().is_some_and(|c| c.is_blocked),
                is_favorite: existing.as_ref().is_some_and(|c| c.is_favorite),
                is_discovered: existing.as_ref().is_some_and(|c| c.is_discovered),
                is_archived: false,
            };
            match self.store.save_contact(contact).await {
                Ok(_) => outcome.record_ok(),
                Err(e) => outcome.record_err(e.to_string()),
            }
        }

        // Existing discovered-but-unconfirmed contacts are never archived
        // by this pass (spec §4.6 point 1); preserve their keys.
        if let Ok(locals) = self.store.list_contacts(device.device_id).await {
            for contact in locals.into_iter().filter(|c| c.is_discovered) {
                keep_keys.insert(contact.public_key);
            }
        }

        if let Err(e) = self.store.mark_contacts_archived(device.device_id, &keep_keys).await {
            outcome.record_err(e.to_string());
        }

        device.last_contact_sync = unix_now();
        self.announce(SyncPhase::Contacts, false, outcome.succeeded()).await;
        Ok(outcome)
    }

    /// Phase 2 (spec §4.6 point 2): fetch every channel slot; slot 0
    /// always exists, created with device defaults if the device has
    /// nothing stored for it yet.
    async fn sync_channels<T: Transport, E: Environment>(
        &self,
        session: &mut Session<T, E>,
        device: &Device,
    ) -> Result<PhaseOutcome, SyncError> {
        self.announce(SyncPhase::Channels, true, false).await;
        let mut outcome = PhaseOutcome::default();

        for slot in 0..device.max_channels {
            match session.get_channel_info(slot).await {
                Ok(info) => {
                    let existing = self
                        .store
                        .fetch_channel(device.device_id, slot)
                        .await
                        .ok()
                        .flatten();
                    let channel = Channel {
                        id: existing.as_ref().map_or_else(Uuid::new_v4, |c| c.id),
                        device_id: device.device_id,
                        slot_index: info.index,
                        name: info.name,
                        secret: info.secret,
                        is_enabled: true,
                        last_message_date: existing.as_ref().and_then(|c| c.last_message_date),
                        unread_count: existing.map_or(0, |c| c.unread_count),
                    };
                    match self.store.save_channel(channel).await {
                        Ok(_) => outcome.record_ok(),
                        Err(e) => outcome.record_err(e.to_string()),
                    }
                },
                Err(e) => {
                    // An absent slot retains its prior stored state (spec
                    // §4.6 point 2); slot 0 is created if nothing exists.
                    if slot == 0 && self.store.fetch_channel(device.device_id, 0).await.ok().flatten().is_none()
                    {
                        let channel = Channel {
                            id: Uuid::new_v4(),
                            device_id: device.device_id,
                            slot_index: 0,
                            name: "Public".to_string(),
                            secret: [0u8; 16],
                            is_enabled: true,
                            last_message_date: None,
                            unread_count: 0,
                        };
                        match self.store.save_channel(channel).await {
                            Ok(_) => outcome.record_ok(),
                            Err(save_err) => outcome.record_err(save_err.to_string()),
                        }
                    } else {
                        outcome.record_err(e.to_string());
                    }
                },
            }
        }

        self.announce(SyncPhase::Channels, false, outcome.succeeded()).await;
        Ok(outcome)
    }

    /// Phase 3 (spec §4.6 point 3): drain the device's message queue,
    /// persisting each item before emitting its status event (spec §6
    /// durability contract; spec §8 scenario 6).
    async fn sync_messages<T: Transport, E: Environment>(
        &self,
        session: &mut Session<T, E>,
        device_id: DeviceId,
    ) -> Result<PhaseOutcome, SyncError> {
        self.announce(SyncPhase::Messages, true, false).await;
        let mut outcome = PhaseOutcome::default();

        loop {
            match session.get_next_message().await {
                Ok(Some(incoming)) => match self.persist_incoming(device_id, incoming).await {
                    Ok(_) => outcome.record_ok(),
                    Err(e) => outcome.record_err(e.to_string()),
                },
                Ok(None) => break,
                Err(e) => {
                    outcome.record_err(e.to_string());
                    break;
                },
            }
        }

        self.announce(SyncPhase::Messages, false, outcome.succeeded()).await;
        Ok(outcome)
    }

    async fn persist_incoming(
        &self,
        device_id: DeviceId,
        incoming: IncomingMessage,
    ) -> Result<(), SyncError> {
        let message = match incoming {
            IncomingMessage::Direct(msg) => self.direct_to_message(device_id, msg).await,
            IncomingMessage::Channel(msg) => self.channel_to_message(device_id, msg),
        };
        let message_id = self.store.save_message(message).await?;
        self.dispatcher
            .dispatch(Event::MessageStatus { message_id, status: MessageStatus::Delivered })
            .await;
        Ok(())
    }

    /// Resolve an incoming direct message's sender prefix against known
    /// contacts. No match (a peer the contacts phase hasn't seen yet)
    /// falls back to a nil contact id and is logged; the sync layer does
    /// not synthesize new contacts from message traffic alone.
    async fn direct_to_message(&self, device_id: DeviceId, msg: ContactMessage) -> Message {
        let contact_id = match self.store.list_contacts(device_id).await {
            Ok(contacts) => contacts
                .iter()
                .find(|c| c.public_key[..6] == msg.sender_prefix)
                .map_or_else(Uuid::nil, |c| c.id),
            Err(_) => Uuid::nil(),
        };
        if contact_id.is_nil() {
            tracing::warn!(prefix = ?msg.sender_prefix, "incoming message from unknown contact prefix");
        }

        Message {
            id: Uuid::new_v4(),
            device_id,
            conversation: Conversation::Contact(contact_id),
            text: msg.text,
            timestamp: msg.timestamp,
            created_at: unix_now(),
            direction: Direction::Incoming,
            status: MessageStatus::Delivered,
            text_type: text_type_from_wire(msg.text_type),
            ack_code: None,
            path_length: Some(msg.path_len),
            snr_db: Some(msg.snr_db),
            sender_key_prefix: Some(msg.sender_prefix),
            sender_node_name: None,
            retry_attempt: 0,
            max_retry_attempts: 0,
            heard_repeats: 0,
        }
    }

    fn channel_to_message(&self, device_id: DeviceId, msg: ChannelMessage) -> Message {
        let (sender_name, body) = ChannelMessage::split_sender_prefix(&msg.text);
        let sender_node_name = if sender_name.is_empty() { None } else { Some(sender_name.to_string()) };
        Message {
            id: Uuid::new_v4(),
            device_id,
            conversation: Conversation::Channel(msg.channel_index),
            text: body.to_string(),
            timestamp: msg.timestamp,
            created_at: unix_now(),
            direction: Direction::Incoming,
            status: MessageStatus::Delivered,
            text_type: text_type_from_wire(msg.text_type),
            ack_code: None,
            path_length: Some(msg.path_len),
            snr_db: Some(msg.snr_db),
            sender_key_prefix: None,
            sender_node_name,
            retry_attempt: 0,
            max_retry_attempts: 0,
            heard_repeats: 0,
        }
    }
}

fn text_type_from_wire(raw: u8) -> TextType {
    match raw {
        1 => TextType::Command,
        2 => TextType::Signed,
        _ => TextType::Plain,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use meshcore_core::dispatcher::DispatcherConfig;
    use meshcore_core::entities::{ChannelId, ContactId, MessageId};
    use meshcore_core::env::SystemEnvironment;
    use meshcore_core::error::StoreError;
    use meshcore_core::store::RemoteNodeSession;
    use meshcore_proto::types::{ContactRecord, DeviceFlags, NodeKind, TelemetryModes};

    use super::*;
    use crate::error::SessionError;
    use crate::session::SessionConfig;
    use crate::transport::Transport;

    struct StubTransport {
        connected: bool,
        inbound: VecDeque<Bytes>,
    }

    impl StubTransport {
        fn new(inbound: Vec<Bytes>) -> Self {
            Self { connected: false, inbound: inbound.into() }
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn connect(&mut self) -> Result<(), crate::error::SessionError> {
            self.connected = true;
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.connected = false;
        }

        async fn send(&mut self, _frame_payload: Bytes) -> Result<(), crate::error::SessionError> {
            Ok(())
        }

        async fn recv_frame(&mut self) -> Result<Option<Bytes>, crate::error::SessionError> {
            Ok(self.inbound.pop_front())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    fn frame(code: u8, payload: &[u8]) -> Bytes {
        let mut buf = vec![code];
        buf.extend_from_slice(payload);
        Bytes::from(buf)
    }

    fn contact_record(public_key: [u8; 32], name: &str) -> ContactRecord {
        ContactRecord {
            public_key,
            node_kind: NodeKind::Chat,
            flags: 0,
            out_path_length: -1,
            out_path: [0u8; 64],
            name: name.to_string(),
            last_advert_timestamp: 0,
            lat_e6: 0,
            lon_e6: 0,
            last_modified: 0,
        }
    }

    fn encode_contact_message(sender_prefix: [u8; 6], text: &str) -> Vec<u8> {
        let mut buf = vec![0u8; 15];
        buf[3..9].copy_from_slice(&sender_prefix);
        buf[9] = 1; // path_len
        buf[10] = 0; // plain text
        buf[11..15].copy_from_slice(&1_700_000_000u32.to_le_bytes());
        buf.extend_from_slice(text.as_bytes());
        buf
    }

    fn encode_channel_message(channel_index: u8, text: &str) -> Vec<u8> {
        let mut buf = vec![0u8; 11];
        buf[3] = channel_index;
        buf[4] = 1; // path_len
        buf[5] = 0; // plain text
        buf[6..10].copy_from_slice(&1_700_000_000u32.to_le_bytes());
        buf.extend_from_slice(text.as_bytes());
        buf
    }

    fn sample_device() -> Device {
        Device {
            device_id: Uuid::new_v4(),
            public_key: [0; 32],
            node_name: "node".to_string(),
            firmware_version_code: 1,
            firmware_version_string: "1.0".to_string(),
            build_date: String::new(),
            manufacturer: String::new(),
            max_contacts: 100,
            max_channels: 1,
            freq_khz: 0,
            bandwidth_hz: 0,
            spreading_factor: 7,
            coding_rate: 5,
            tx_power_dbm: 0,
            lat_e6: 0,
            lon_e6: 0,
            ble_pin: 0,
            flags: DeviceFlags::default(),
            telemetry_modes: TelemetryModes::default(),
            last_connected: None,
            last_contact_sync: 0,
            is_active: true,
        }
    }

    fn sample_contact(device_id: DeviceId, public_key: [u8; 32], is_discovered: bool) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            device_id,
            public_key,
            name: "old".to_string(),
            node_kind: NodeKind::Chat,
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
            is_discovered,
            is_archived: false,
        }
    }

    #[derive(Default)]
    struct InMemoryStore {
        devices: StdMutex<HashMap<DeviceId, Device>>,
        contacts: StdMutex<HashMap<ContactId, Contact>>,
        channels: StdMutex<HashMap<ChannelId, Channel>>,
        messages: StdMutex<HashMap<MessageId, Message>>,
    }

    #[async_trait]
    impl Store for InMemoryStore {
        async fn schema_version(&self) -> Result<u32, StoreError> {
            Ok(1)
        }

        async fn fetch_device(&self, device_id: DeviceId) -> Result<Option<Device>, StoreError> {
            Ok(self.devices.lock().unwrap().get(&device_id).cloned())
        }

        async fn save_device(&self, device: Device) -> Result<DeviceId, StoreError> {
            let id = device.device_id;
            self.devices.lock().unwrap().insert(id, device);
            Ok(id)
        }

        async fn delete_device(&self, device_id: DeviceId) -> Result<(), StoreError> {
            self.devices.lock().unwrap().remove(&device_id);
            Ok(())
        }

        async fn fetch_contact(
            &self,
            device_id: DeviceId,
            public_key: &[u8; 32],
        ) -> Result<Option<Contact>, StoreError> {
            Ok(self
                .contacts
                .lock()
                .unwrap()
                .values()
                .find(|c| c.device_id == device_id && &c.public_key == public_key)
                .cloned())
        }

        async fn save_contact(&self, contact: Contact) -> Result<ContactId, StoreError> {
            contact.validate()?;
            let id = contact.id;
            self.contacts.lock().unwrap().insert(id, contact);
            Ok(id)
        }

        async fn delete_contact(&self, contact_id: ContactId) -> Result<(), StoreError> {
            self.contacts.lock().unwrap().remove(&contact_id);
            Ok(())
        }

        async fn list_contacts(&self, device_id: DeviceId) -> Result<Vec<Contact>, StoreError> {
            Ok(self.contacts.lock().unwrap().values().filter(|c| c.device_id == device_id).cloned().collect())
        }

        async fn mark_contacts_archived(
            &self,
            device_id: DeviceId,
            keep_keys: &std::collections::HashSet<[u8; 32]>,
        ) -> Result<(), StoreError> {
            for contact in self.contacts.lock().unwrap().values_mut() {
                if contact.device_id == device_id && !keep_keys.contains(&contact.public_key) {
                    contact.is_archived = true;
                }
            }
            Ok(())
        }

        async fn fetch_channel(
            &self,
            device_id: DeviceId,
            slot_index: u8,
        ) -> Result<Option<Channel>, StoreError> {
            Ok(self
                .channels
                .lock()
                .unwrap()
                .values()
                .find(|c| c.device_id == device_id && c.slot_index == slot_index)
                .cloned())
        }

        async fn save_channel(&self, channel: Channel) -> Result<ChannelId, StoreError> {
            channel.validate()?;
            let id = channel.id;
            self.channels.lock().unwrap().insert(id, channel);
            Ok(id)
        }

        async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), StoreError> {
            self.channels.lock().unwrap().remove(&channel_id);
            Ok(())
        }

        async fn list_channels(&self, device_id: DeviceId) -> Result<Vec<Channel>, StoreError> {
            Ok(self.channels.lock().unwrap().values().filter(|c| c.device_id == device_id).cloned().collect())
        }

        async fn fetch_message(&self, message_id: MessageId) -> Result<Option<Message>, StoreError> {
            Ok(self.messages.lock().unwrap().get(&message_id).cloned())
        }

        async fn save_message(&self, message: Message) -> Result<MessageId, StoreError> {
            let id = message.id;
            self.messages.lock().unwrap().insert(id, message);
            Ok(id)
        }

        async fn delete_message(&self, message_id: MessageId) -> Result<(), StoreError> {
            self.messages.lock().unwrap().remove(&message_id);
            Ok(())
        }

        async fn fetch_next_pending_message_by_ack(
            &self,
            _device_id: DeviceId,
            _ack_code: u32,
        ) -> Result<Option<Message>, StoreError> {
            unreachable!("not exercised by the sync coordinator")
        }

        async fn update_message_status(
            &self,
            _message_id: MessageId,
            _status: MessageStatus,
            _ack_code: Option<u32>,
        ) -> Result<(), StoreError> {
            unreachable!("not exercised by the sync coordinator")
        }

        async fn fetch_remote_node_session(
            &self,
            _device_id: DeviceId,
            _contact_id: ContactId,
        ) -> Result<Option<RemoteNodeSession>, StoreError> {
            unreachable!("not exercised by the sync coordinator")
        }

        async fn save_remote_node_session(&self, _session: RemoteNodeSession) -> Result<(), StoreError> {
            unreachable!("not exercised by the sync coordinator")
        }
    }

    async fn new_session(inbound: Vec<Bytes>) -> Session<StubTransport, SystemEnvironment> {
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
        let mut session =
            Session::new(StubTransport::new(inbound), dispatcher, SystemEnvironment, SessionConfig::default());
        session.connect().await.unwrap();
        session
    }

    #[test]
    fn phase_outcome_vacuously_succeeds_when_nothing_attempted() {
        let outcome = PhaseOutcome::default();
        assert!(outcome.succeeded());
    }

    #[test]
    fn phase_outcome_succeeds_if_any_item_succeeded() {
        let mut outcome = PhaseOutcome::default();
        outcome.record_err("boom");
        outcome.record_ok();
        assert!(outcome.succeeded());
    }

    #[test]
    fn phase_outcome_fails_when_every_item_failed() {
        let mut outcome = PhaseOutcome::default();
        outcome.record_err("boom");
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn sync_contacts_archives_missing_but_keeps_discovered() {
        let store = Arc::new(InMemoryStore::default());
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
        let coordinator = SyncCoordinator::new(store.clone(), dispatcher);

        let mut device = sample_device();
        let returned_key = [1u8; 32];
        let missing_key = [2u8; 32];
        let discovered_key = [3u8; 32];

        store.contacts.lock().unwrap().extend([
            (Uuid::new_v4(), {
                let mut c = sample_contact(device.device_id, returned_key, false);
                c.id = Uuid::new_v4();
                c
            }),
        ]);
        let missing = sample_contact(device.device_id, missing_key, false);
        let discovered = sample_contact(device.device_id, discovered_key, true);
        store.contacts.lock().unwrap().insert(missing.id, missing.clone());
        store.contacts.lock().unwrap().insert(discovered.id, discovered.clone());

        let record = contact_record(returned_key, "returned");
        let inbound = vec![frame(0x13, &record.encode()), frame(0x14, &[])];
        let mut session = new_session(inbound).await;

        let outcome = coordinator.sync_contacts(&mut session, &mut device).await.unwrap();
        assert!(outcome.succeeded());

        let contacts = store.contacts.lock().unwrap().clone();
        assert!(contacts.values().any(|c| c.public_key == returned_key && !c.is_archived));
        assert!(contacts.get(&missing.id).unwrap().is_archived);
        assert!(!contacts.get(&discovered.id).unwrap().is_archived);
    }

    #[tokio::test]
    async fn sync_channels_creates_default_public_channel_when_absent() {
        let store = Arc::new(InMemoryStore::default());
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
        let coordinator = SyncCoordinator::new(store.clone(), dispatcher);

        let device = sample_device();
        // get_channel_info(0) fails with a device error, simulating an
        // absent slot.
        let inbound = vec![frame(0x11, &[7])];
        let mut session = new_session(inbound).await;

        let outcome = coordinator.sync_channels(&mut session, &device).await.unwrap();
        assert!(outcome.succeeded());

        let channels = store.channels.lock().unwrap().clone();
        let slot0 = channels.values().find(|c| c.slot_index == 0).unwrap();
        assert_eq!(slot0.name, "Public");
        assert_eq!(slot0.secret, [0u8; 16]);
    }

    #[tokio::test]
    async fn sync_messages_persists_direct_and_channel_messages() {
        let store = Arc::new(InMemoryStore::default());
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
        let coordinator = SyncCoordinator::new(store.clone(), dispatcher);
        let device_id = Uuid::new_v4();

        let sender_prefix = [4u8; 6];
        let known = sample_contact(device_id, {
            let mut key = [0u8; 32];
            key[..6].copy_from_slice(&sender_prefix);
            key
        }, false);
        store.contacts.lock().unwrap().insert(known.id, known.clone());

        let inbound = vec![
            frame(0x19, &encode_contact_message(sender_prefix, "hi there")),
            frame(0x1A, &encode_channel_message(0, "Alice: hello all")),
            frame(0x1B, &[]),
        ];
        let mut session = new_session(inbound).await;

        let outcome = coordinator.sync_messages(&mut session, device_id).await.unwrap();
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.succeeded, 2);

        let messages = store.messages.lock().unwrap().clone();
        let direct = messages.values().find(|m| matches!(m.conversation, Conversation::Contact(_))).unwrap();
        assert_eq!(direct.text, "hi there");
        assert!(matches!(direct.conversation, Conversation::Contact(id) if id == known.id));

        let channel = messages.values().find(|m| matches!(m.conversation, Conversation::Channel(_))).unwrap();
        assert_eq!(channel.text, "hello all");
        assert_eq!(channel.sender_node_name.as_deref(), Some("Alice"));
    }
}
