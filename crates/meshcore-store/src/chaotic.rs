//! Chaotic store wrapper for fault-injection testing.
//!
//! Delegates to an underlying [`Store`] but randomly fails operations to
//! exercise the delivery engine's and sync coordinator's error-recovery
//! paths. Failures are deterministic for a given seed, so chaos runs are
//! reproducible.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meshcore_core::entities::{
    Channel, ChannelId, Contact, ContactId, Device, DeviceId, Message, MessageId, MessageStatus,
};
use meshcore_core::error::StoreError;
use meshcore_core::store::{RemoteNodeSession, Store};

/// Store wrapper that randomly injects [`StoreError::Io`] failures.
///
/// Uses `Arc<Mutex<>>` for the RNG state, making it `Clone` and
/// thread-safe.
#[derive(Clone)]
pub struct ChaoticStore<S: Store> {
    inner: S,
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<Mutex<usize>>,
}

/// Linear congruential generator for fast, deterministic randomness.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in `[0.0, 1.0)`.
    fn next(&mut self) -> f64 {
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: Store> ChaoticStore<S> {
    /// Wrap `inner`, failing operations with probability `failure_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in `[0.0, 1.0]`.
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrap `inner` with an explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in `[0.0, 1.0]`.
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Underlying store, for checking invariants after chaos.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of store operations attempted.
    #[allow(clippy::expect_used)]
    pub fn operation_count(&self) -> usize {
        *self.operation_count.lock().expect("operation_count mutex poisoned")
    }

    fn increment_operation_count(&self) {
        #[allow(clippy::expect_used)]
        let mut count = self.operation_count.lock().expect("operation_count mutex poisoned");
        *count += 1;
    }

    fn should_fail(&self) -> bool {
        #[allow(clippy::expect_used)]
        self.rng.lock().expect("ChaoticRng mutex poisoned").should_fail(self.failure_rate)
    }

    fn failure() -> StoreError {
        StoreError::Io("chaotic failure injection".to_string())
    }
}

macro_rules! chaotic_op {
    ($self:expr, $body:expr) => {{
        $self.increment_operation_count();
        if $self.should_fail() {
            return Err(Self::failure());
        }
        $body
    }};
}

#[async_trait]
impl<S: Store> Store for ChaoticStore<S> {
    async fn schema_version(&self) -> Result<u32, StoreError> {
        chaotic_op!(self, self.inner.schema_version().await)
    }

    async fn fetch_device(&self, device_id: DeviceId) -> Result<Option<Device>, StoreError> {
        chaotic_op!(self, self.inner.fetch_device(device_id).await)
    }

    async fn save_device(&self, device: Device) -> Result<DeviceId, StoreError> {
        chaotic_op!(self, self.inner.save_device(device).await)
    }

    async fn delete_device(&self, device_id: DeviceId) -> Result<(), StoreError> {
        chaotic_op!(self, self.inner.delete_device(device_id).await)
    }

    async fn fetch_contact(
        &self,
        device_id: DeviceId,
        public_key: &[u8; 32],
    ) -> Result<Option<Contact>, StoreError> {
        chaotic_op!(self, self.inner.fetch_contact(device_id, public_key).await)
    }

    async fn save_contact(&self, contact: Contact) -> Result<ContactId, StoreError> {
        chaotic_op!(self, self.inner.save_contact(contact).await)
    }

    async fn delete_contact(&self, contact_id: ContactId) -> Result<(), StoreError> {
        chaotic_op!(self, self.inner.delete_contact(contact_id).await)
    }

    async fn list_contacts(&self, device_id: DeviceId) -> Result<Vec<Contact>, StoreError> {
        chaotic_op!(self, self.inner.list_contacts(device_id).await)
    }

    async fn mark_contacts_archived(
        &self,
        device_id: DeviceId,
        keep_keys: &HashSet<[u8; 32]>,
    ) -> Result<(), StoreError> {
        chaotic_op!(self, self.inner.mark_contacts_archived(device_id, keep_keys).await)
    }

    async fn fetch_channel(
        &self,
        device_id: DeviceId,
        slot_index: u8,
    ) -> Result<Option<Channel>, StoreError> {
        chaotic_op!(self, self.inner.fetch_channel(device_id, slot_index).await)
    }

    async fn save_channel(&self, channel: Channel) -> Result<ChannelId, StoreError> {
        chaotic_op!(self, self.inner.save_channel(channel).await)
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), StoreError> {
        chaotic_op!(self, self.inner.delete_channel(channel_id).await)
    }

    async fn list_channels(&self, device_id: DeviceId) -> Result<Vec<Channel>, StoreError> {
        chaotic_op!(self, self.inner.list_channels(device_id).await)
    }

    async fn fetch_message(&self, message_id: MessageId) -> Result<Option<Message>, StoreError> {
        chaotic_op!(self, self.inner.fetch_message(message_id).await)
    }

    async fn save_message(&self, message: Message) -> Result<MessageId, StoreError> {
        chaotic_op!(self, self.inner.save_message(message).await)
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<(), StoreError> {
        chaotic_op!(self, self.inner.delete_message(message_id).await)
    }

    async fn fetch_next_pending_message_by_ack(
        &self,
        device_id: DeviceId,
        ack_code: u32,
    ) -> Result<Option<Message>, StoreError> {
        chaotic_op!(self, self.inner.fetch_next_pending_message_by_ack(device_id, ack_code).await)
    }

    async fn update_message_status(
        &self,
        message_id: MessageId,
        status: MessageStatus,
        ack_code: Option<u32>,
    ) -> Result<(), StoreError> {
        chaotic_op!(self, self.inner.update_message_status(message_id, status, ack_code).await)
    }

    async fn fetch_remote_node_session(
        &self,
        device_id: DeviceId,
        contact_id: ContactId,
    ) -> Result<Option<RemoteNodeSession>, StoreError> {
        chaotic_op!(self, self.inner.fetch_remote_node_session(device_id, contact_id).await)
    }

    async fn save_remote_node_session(
        &self,
        session: RemoteNodeSession,
    ) -> Result<(), StoreError> {
        chaotic_op!(self, self.inner.save_remote_node_session(session).await)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use meshcore_core::entities::{Conversation, Direction, TextType};
    use uuid::Uuid;

    use super::*;
    use crate::memory::MemoryStore;

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
    async fn zero_failure_rate_always_succeeds() {
        let chaotic = ChaoticStore::new(MemoryStore::new(), 0.0);
        let device_id = Uuid::new_v4();
        for _ in 0..50 {
            chaotic
                .save_message(sample_message(device_id))
                .await
                .expect("should not fail with 0% rate");
        }
    }

    #[tokio::test]
    async fn full_failure_rate_always_fails() {
        let chaotic = ChaoticStore::new(MemoryStore::new(), 1.0);
        let device_id = Uuid::new_v4();
        assert!(chaotic.save_message(sample_message(device_id)).await.is_err());
        assert!(chaotic.list_contacts(device_id).await.is_err());
    }

    #[tokio::test]
    async fn same_seed_produces_same_failure_pattern() {
        let chaotic1 = ChaoticStore::with_seed(MemoryStore::new(), 0.5, 42);
        let chaotic2 = ChaoticStore::with_seed(MemoryStore::new(), 0.5, 42);
        let device_id = Uuid::new_v4();

        for _ in 0..50 {
            let r1 = chaotic1.save_message(sample_message(device_id)).await;
            let r2 = chaotic2.save_message(sample_message(device_id)).await;
            assert_eq!(r1.is_ok(), r2.is_ok());
        }
    }

    #[tokio::test]
    async fn operation_count_tracks_every_call() {
        let chaotic = ChaoticStore::new(MemoryStore::new(), 0.0);
        let device_id = Uuid::new_v4();
        chaotic.save_message(sample_message(device_id)).await.unwrap();
        chaotic.list_contacts(device_id).await.unwrap();
        assert_eq!(chaotic.operation_count(), 2);
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between 0.0 and 1.0")]
    fn rejects_invalid_failure_rate() {
        let _chaotic = ChaoticStore::new(MemoryStore::new(), 1.5);
    }
}
