//! Delivery Engine (spec §4.5): the direct→flood retry state machine for
//! outgoing direct messages, with ACK tracking and path reset.
//!
//! Channel messages never pass through here — spec §4.5: "a single send
//! attempt is made per user action" — callers hand those straight to
//! [`crate::session::Session::send_channel_message`].

use std::collections::HashMap;
use std::time::Duration;

use std::sync::Arc;

use meshcore_core::dispatcher::Dispatcher;
use meshcore_core::entities::{Conversation, Message, MessageId, MessageStatus};
use meshcore_core::env::Environment;
use meshcore_core::event::Event;
use meshcore_core::store::Store;

use crate::error::DeliveryError;
use crate::session::Session;
use crate::transport::Transport;

/// Retry ladder tuning (spec §4.5 defaults: `N1=2, N2=2, min_timeout=8s,
/// margin=2s`).
#[derive(Debug, Clone, Copy)]
pub struct DeliveryConfig {
    /// Direct-routing attempts before escalating to flood.
    pub direct_attempts: u32,
    /// Flood-routing attempts after direct is exhausted.
    pub flood_attempts: u32,
    /// Floor applied to the device-suggested ACK wait.
    pub min_timeout: Duration,
    /// Slack added on top of the (possibly floored) suggested timeout.
    pub ack_margin: Duration,
}

/// Default direct-routing attempt count (spec §4.5).
pub const DEFAULT_DIRECT_ATTEMPTS: u32 = 2;
/// Default flood-routing attempt count (spec §4.5).
pub const DEFAULT_FLOOD_ATTEMPTS: u32 = 2;
/// Default minimum ACK wait (spec §4.5).
pub const DEFAULT_MIN_TIMEOUT: Duration = Duration::from_secs(8);
/// Default margin added to the device-suggested ACK wait (spec §4.5).
pub const DEFAULT_ACK_MARGIN: Duration = Duration::from_secs(2);
/// How long a consumed ACK code is remembered, to absorb duplicate
/// pushes silently rather than logging them as unknown (spec §4.5).
pub const ACK_RETENTION: Duration = Duration::from_secs(300);

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            direct_attempts: DEFAULT_DIRECT_ATTEMPTS,
            flood_attempts: DEFAULT_FLOOD_ATTEMPTS,
            min_timeout: DEFAULT_MIN_TIMEOUT,
            ack_margin: DEFAULT_ACK_MARGIN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteMode {
    Direct,
    Flood,
}

struct AckEntry<I> {
    message_id: MessageId,
    recipient_prefix: [u8; 6],
    text: String,
    sent_at: I,
    wait: Duration,
    attempt: u32,
    mode: RouteMode,
}

struct ConsumedAck<I> {
    consumed_at: I,
}

/// Drives the retry ladder for outgoing direct messages (spec §4.5).
///
/// Holds the in-memory ACK tracker (spec §3 `AckTracking`: "process-
/// memory-only") and persists every status transition through the
/// shared [`Store`] before dispatching the corresponding event (spec §6:
/// "writes MUST be durable before the corresponding event is
/// dispatched").
pub struct DeliveryEngine<E: Environment, S: Store> {
    config: DeliveryConfig,
    env: E,
    store: Arc<S>,
    dispatcher: Arc<Dispatcher>,
    tracked: HashMap<u32, AckEntry<E::Instant>>,
    consumed: HashMap<u32, ConsumedAck<E::Instant>>,
}

impl<E: Environment, S: Store> DeliveryEngine<E, S> {
    /// Build an engine with the given tuning, sharing `store` and
    /// `dispatcher` with the rest of the client.
    pub fn new(config: DeliveryConfig, env: E, store: Arc<S>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { config, env, store, dispatcher, tracked: HashMap::new(), consumed: HashMap::new() }
    }

    /// Number of messages with an in-flight attempt.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.tracked.len()
    }

    async fn set_status(&self, message_id: MessageId, status: MessageStatus, ack_code: Option<u32>) {
        if let Err(e) = self.store.update_message_status(message_id, status, ack_code).await {
            tracing::warn!(%message_id, error = %e, "failed to persist message status");
            return;
        }
        self.dispatcher.dispatch(Event::MessageStatus { message_id, status }).await;
    }

    /// Start reliable delivery of a direct message. `message` must carry
    /// a [`Conversation::Contact`] target and `status == Pending`; the
    /// engine advances it through `sending → sent` and arms the ACK
    /// tracker (spec §4.5 attempt 1, direct mode).
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Session`] if the transport rejects the
    /// command outright (before a `sent` response is even possible);
    /// that is a session-level failure, not a retry-ladder exhaustion.
    pub async fn send<T: Transport>(
        &mut self,
        session: &mut Session<T, E>,
        message: &Message,
        recipient_prefix: [u8; 6],
    ) -> Result<(), DeliveryError> {
        let Conversation::Contact(_contact_id) = message.conversation else {
            return Err(DeliveryError::Session(crate::error::SessionError::UnexpectedResponse {
                expected: "contact conversation",
                got: "channel conversation",
            }));
        };

        self.set_status(message.id, MessageStatus::Sending, None).await;
        self.attempt(session, message.id, recipient_prefix, message.text.clone(), 1, RouteMode::Direct)
            .await
    }

    async fn attempt<T: Transport>(
        &mut self,
        session: &mut Session<T, E>,
        message_id: MessageId,
        recipient_prefix: [u8; 6],
        text: String,
        attempt: u32,
        mode: RouteMode,
    ) -> Result<(), DeliveryError> {
        let ack_code = self.env.random_u32();
        let flood = mode == RouteMode::Flood;
        let sent = session.send_direct_message(ack_code, recipient_prefix, text.clone(), flood).await?;

        let wait = self.config.min_timeout.max(Duration::from_millis(u64::from(sent.suggested_timeout_ms)))
            + self.config.ack_margin;
        self.tracked.insert(
            sent.ack_code,
            AckEntry {
                message_id,
                recipient_prefix,
                text,
                sent_at: self.env.now(),
                wait,
                attempt,
                mode,
            },
        );
        self.set_status(message_id, MessageStatus::Sent, Some(sent.ack_code)).await;
        Ok(())
    }

    /// Apply a delivery ACK push (spec §4.5: `on ack push → delivered`).
    /// ACKs for codes this engine is not tracking are accepted and
    /// silently ignored, whether because they are a duplicate of an
    /// already-consumed code or genuinely unrecognized (spec §4.5).
    pub async fn handle_ack(&mut self, ack_code: u32) {
        let Some(entry) = self.tracked.remove(&ack_code) else {
            if self.consumed.contains_key(&ack_code) {
                tracing::debug!(ack_code, "duplicate ack for already-consumed code, ignoring");
            } else {
                tracing::debug!(ack_code, "ack for unknown code, ignoring");
            }
            return;
        };
        self.consumed.insert(ack_code, ConsumedAck { consumed_at: self.env.now() });
        self.set_status(entry.message_id, MessageStatus::Delivered, Some(ack_code)).await;
    }

    /// Advance the retry ladder for every tracked message whose ACK
    /// deadline has passed (spec §4.5 `on deadline`). Call this
    /// periodically (e.g. on a short interval timer) from the driving
    /// loop.
    pub async fn check_timeouts<T: Transport>(
        &mut self,
        session: &mut Session<T, E>,
    ) -> Result<(), DeliveryError> {
        self.purge_expired_consumed();

        let now = self.env.now();
        let expired: Vec<u32> = self
            .tracked
            .iter()
            .filter(|(_, entry)| now - entry.sent_at >= entry.wait)
            .map(|(code, _)| *code)
            .collect();

        for ack_code in expired {
            let Some(entry) = self.tracked.remove(&ack_code) else { continue };
            self.retry_or_fail(session, entry).await?;
        }
        Ok(())
    }

    async fn retry_or_fail<T: Transport>(
        &mut self,
        session: &mut Session<T, E>,
        entry: AckEntry<E::Instant>,
    ) -> Result<(), DeliveryError> {
        let next_attempt = entry.attempt + 1;
        let direct_limit = self.config.direct_attempts;
        let flood_limit = direct_limit + self.config.flood_attempts;

        if next_attempt <= direct_limit {
            self.set_status(entry.message_id, MessageStatus::Retrying, None).await;
            self.set_status(entry.message_id, MessageStatus::Sending, None).await;
            return self
                .attempt(
                    session,
                    entry.message_id,
                    entry.recipient_prefix,
                    entry.text,
                    next_attempt,
                    RouteMode::Direct,
                )
                .await;
        }

        if next_attempt <= flood_limit {
            self.set_status(entry.message_id, MessageStatus::Retrying, None).await;
            if entry.mode == RouteMode::Direct {
                if let Err(e) = session.reset_path(entry.recipient_prefix).await {
                    tracing::warn!(error = %e, "reset_path failed ahead of flood escalation");
                }
            }
            self.set_status(entry.message_id, MessageStatus::Sending, None).await;
            return self
                .attempt(
                    session,
                    entry.message_id,
                    entry.recipient_prefix,
                    entry.text,
                    next_attempt,
                    RouteMode::Flood,
                )
                .await;
        }

        self.set_status(entry.message_id, MessageStatus::Failed, None).await;
        Err(DeliveryError::RetriesExhausted { attempts: entry.attempt })
    }

    fn purge_expired_consumed(&mut self) {
        let now = self.env.now();
        self.consumed.retain(|_, entry| now - entry.consumed_at < ACK_RETENTION);
    }

    /// Called on transport disconnect (spec §4.5: "all in-flight
    /// messages advance to `failed` with cause `transport_lost`, and the
    /// ACK tracker is cleared").
    pub async fn handle_disconnect(&mut self) {
        let entries: Vec<_> = self.tracked.drain().map(|(_, entry)| entry).collect();
        for entry in entries {
            self.set_status(entry.message_id, MessageStatus::Failed, None).await;
        }
        self.consumed.clear();
    }
}
