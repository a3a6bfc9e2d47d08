//! Session actor (spec §4.4, §5): owns the transport, serializes
//! command/response correlation, fans pushes out on the dispatcher, and
//! exposes typed operations.
//!
//! The spec describes the session as a single cooperative actor reached
//! through a command queue plus an independent receive task. Here that
//! serialization is expressed at the type level instead: every operation
//! takes `&mut self`, so the borrow checker is the queue — a caller that
//! wants concurrent access wraps a `Session` in `Arc<tokio::sync::Mutex<_>>`
//! the way the teacher's `Bridge` is owned by one `Runtime`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use meshcore_core::dispatcher::Dispatcher;
use meshcore_core::env::Environment;
use meshcore_core::event::{ConnectionState, Event};
use meshcore_proto::codec::{Command, IncomingMessage, MeshEvent};
use meshcore_proto::types::{ChannelInfo, ContactRecord, DeviceInfo, SelfInfo, StatusResponse, TraceData};

use crate::error::SessionError;
use crate::transport::Transport;

/// Session tuning (spec §4.4 point 3: "default 5s timeout").
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Deadline for a single command's response.
    pub response_timeout: Duration,
}

/// Default per-operation response deadline (spec §4.4).
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

impl Default for SessionConfig {
    fn default() -> Self {
        Self { response_timeout: DEFAULT_RESPONSE_TIMEOUT }
    }
}

/// Parameters echoed back when a direct message leaves the device (spec
/// §4.2 `RESP_SENT`), consumed by the delivery engine to arm its ACK
/// tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentAck {
    /// Correlation token echoed back.
    pub ack_code: u32,
    /// Device-predicted ACK token, if different from `ack_code`.
    pub expected_ack: u32,
    /// Measured device-side round trip, ms.
    pub round_trip_ms: u32,
    /// Device-suggested ACK wait timeout, ms.
    pub suggested_timeout_ms: u32,
}

/// Owns one [`Transport`] connection and the typed operations built on
/// top of it (spec §4.4).
pub struct Session<T: Transport, E: Environment> {
    transport: T,
    dispatcher: Arc<Dispatcher>,
    env: E,
    config: SessionConfig,
    state: ConnectionState,
}

impl<T: Transport, E: Environment> Session<T, E> {
    /// Build a session around an unconnected transport.
    pub fn new(transport: T, dispatcher: Arc<Dispatcher>, env: E, config: SessionConfig) -> Self {
        Self { transport, dispatcher, env, config, state: ConnectionState::Disconnected }
    }

    /// Current connection lifecycle state (spec §4.4 point 4).
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Connect the transport and transition through `connecting →
    /// connected → ready` (spec §4.4 point 4). This protocol has no
    /// handshake, so `connected` and `ready` are reached back to back.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.set_state(ConnectionState::Connecting, None).await;
        if let Err(e) = self.transport.connect().await {
            self.set_state(ConnectionState::Disconnected, Some(e.to_string())).await;
            return Err(e);
        }
        self.set_state(ConnectionState::Connected, None).await;
        self.set_state(ConnectionState::Ready, None).await;
        Ok(())
    }

    /// Tear down the transport and transition to `disconnected`.
    pub async fn disconnect(&mut self) {
        self.transport.disconnect().await;
        self.set_state(ConnectionState::Disconnected, None).await;
    }

    async fn set_state(&mut self, state: ConnectionState, reason: Option<String>) {
        self.state = state;
        self.dispatcher.dispatch(Event::ConnectionState { state, reason }).await;
    }

    async fn write_command(&mut self, command: &Command) -> Result<(), SessionError> {
        if self.state == ConnectionState::Disconnected {
            return Err(SessionError::NotConnected);
        }
        match self.transport.send(command.encode()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.set_state(ConnectionState::Disconnected, Some(e.to_string())).await;
                Err(e)
            },
        }
    }

    /// Read exactly one decoded frame, applying the operation deadline.
    /// Does not route pushes or parse failures; [`Self::await_response`]
    /// layers that on top.
    async fn read_frame_event(&mut self) -> Result<MeshEvent, SessionError> {
        let outcome = tokio::select! {
            frame = self.transport.recv_frame() => frame,
            () = self.env.sleep(self.config.response_timeout) => return Err(SessionError::Timeout),
        };
        match outcome {
            Ok(Some(bytes)) => Ok(decode_frame(&bytes)),
            Ok(None) => {
                self.set_state(ConnectionState::Disconnected, Some("connection closed".to_string()))
                    .await;
                Err(SessionError::Transport("connection closed".to_string()))
            },
            Err(e) => {
                self.set_state(ConnectionState::Disconnected, Some(e.to_string())).await;
                Err(e)
            },
        }
    }

    /// Read frames until a non-push, non-diagnostic event arrives — the
    /// actual response to whatever command was just written (spec §4.4
    /// point 2: "pushes observed between a command write and its
    /// response belong to the pre-command timeline").
    async fn await_response(&mut self) -> Result<MeshEvent, SessionError> {
        loop {
            let event = self.read_frame_event().await?;
            if event.is_push() {
                self.handle_push(event).await?;
                continue;
            }
            if matches!(event, MeshEvent::ParseFailure { .. }) {
                self.dispatcher.dispatch(Event::Mesh(Arc::new(event))).await;
                continue;
            }
            return Ok(event);
        }
    }

    async fn handle_push(&mut self, event: MeshEvent) -> Result<(), SessionError> {
        let is_messages_waiting = matches!(event, MeshEvent::MessagesWaiting);
        self.dispatcher.dispatch(Event::Mesh(Arc::new(event))).await;
        if is_messages_waiting {
            self.auto_fetch_messages().await?;
        }
        Ok(())
    }

    /// Drain the device's message queue on a `messages_waiting` push
    /// (spec §4.4 point 2, §8 scenario 6): issue `get_next_message`
    /// until `no_more_messages`, publishing each message as it arrives.
    async fn auto_fetch_messages(&mut self) -> Result<(), SessionError> {
        loop {
            self.write_command(&Command::GetNextMessage).await?;
            match self.read_frame_event().await? {
                MeshEvent::Message(msg) => {
                    self.dispatcher.dispatch(Event::Mesh(Arc::new(MeshEvent::Message(msg)))).await;
                },
                MeshEvent::NoMoreMessages => return Ok(()),
                MeshEvent::Error(code) => {
                    tracing::warn!(code, "auto-fetch get_next_message returned an error");
                    return Ok(());
                },
                other => {
                    tracing::warn!(event = other.name(), "unexpected response during auto-fetch");
                    return Ok(());
                },
            }
        }
    }

    async fn request(&mut self, command: Command) -> Result<MeshEvent, SessionError> {
        self.write_command(&command).await?;
        self.await_response().await
    }

    /// Send a direct text message (spec §4.2, §4.5).
    pub async fn send_direct_message(
        &mut self,
        ack_code: u32,
        recipient_prefix: [u8; 6],
        text: String,
        flood: bool,
    ) -> Result<SentAck, SessionError> {
        let command = Command::SendDirectMessage { ack_code, recipient_prefix, text, flood };
        match self.request(command).await? {
            MeshEvent::Sent { ack_code, expected_ack, round_trip_ms, suggested_timeout_ms } => {
                Ok(SentAck { ack_code, expected_ack, round_trip_ms, suggested_timeout_ms })
            },
            MeshEvent::Error(code) => Err(SessionError::DeviceError(code)),
            other => Err(unexpected("sent", &other)),
        }
    }

    /// Send a channel (group) message. No ACK is produced (spec §4.5).
    pub async fn send_channel_message(
        &mut self,
        channel_index: u8,
        text: String,
    ) -> Result<(), SessionError> {
        match self.request(Command::SendChannelMessage { channel_index, text }).await? {
            MeshEvent::Ok(_) => Ok(()),
            MeshEvent::Error(code) => Err(SessionError::DeviceError(code)),
            other => Err(unexpected("ok", &other)),
        }
    }

    /// Drain contacts advertised/modified since `since` (spec §4.6 phase
    /// 1). Issues one `get_contacts` command and reads responses until
    /// `no_more_contacts`.
    pub async fn get_contacts(&mut self, since: u32) -> Result<Vec<ContactRecord>, SessionError> {
        self.write_command(&Command::GetContacts { since }).await?;
        let mut contacts = Vec::new();
        loop {
            match self.await_response().await? {
                MeshEvent::Contact(record) => contacts.push(record),
                MeshEvent::NoMoreContacts => return Ok(contacts),
                MeshEvent::Error(code) => return Err(SessionError::DeviceError(code)),
                other => return Err(unexpected("contact", &other)),
            }
        }
    }

    /// Fetch one channel slot's descriptor (spec §4.6 phase 2).
    pub async fn get_channel_info(&mut self, slot: u8) -> Result<ChannelInfo, SessionError> {
        match self.request(Command::GetChannelInfo { slot }).await? {
            MeshEvent::ChannelInfo(info) => Ok(info),
            MeshEvent::Error(code) => Err(SessionError::DeviceError(code)),
            other => Err(unexpected("channel_info", &other)),
        }
    }

    /// Drain the next queued message, or `None` on `no_more_messages`
    /// (spec §4.6 phase 3, reused by auto-fetch).
    pub async fn get_next_message(&mut self) -> Result<Option<IncomingMessage>, SessionError> {
        match self.request(Command::GetNextMessage).await? {
            MeshEvent::Message(msg) => Ok(Some(msg)),
            MeshEvent::NoMoreMessages => Ok(None),
            MeshEvent::Error(code) => Err(SessionError::DeviceError(code)),
            other => Err(unexpected("message", &other)),
        }
    }

    /// Clear the device's remembered path to a contact (spec §4.5:
    /// "issued exactly once, on the transition from direct-mode to
    /// flood-mode").
    pub async fn reset_path(&mut self, contact_prefix: [u8; 6]) -> Result<(), SessionError> {
        match self.request(Command::ResetPath { contact_prefix }).await? {
            MeshEvent::Ok(_) => Ok(()),
            MeshEvent::Error(code) => Err(SessionError::DeviceError(code)),
            other => Err(unexpected("ok", &other)),
        }
    }

    /// Request the device's own identity/radio descriptor.
    pub async fn get_self_info(&mut self) -> Result<SelfInfo, SessionError> {
        match self.request(Command::GetSelfInfo).await? {
            MeshEvent::SelfInfo(info) => Ok(info),
            MeshEvent::Error(code) => Err(SessionError::DeviceError(code)),
            other => Err(unexpected("self_info", &other)),
        }
    }

    /// Request the hardware/firmware descriptor.
    pub async fn get_device_info(&mut self) -> Result<DeviceInfo, SessionError> {
        match self.request(Command::GetDeviceInfo).await? {
            MeshEvent::DeviceInfo(info) => Ok(info),
            MeshEvent::Error(code) => Err(SessionError::DeviceError(code)),
            other => Err(unexpected("device_info", &other)),
        }
    }

    /// Request operational counters.
    pub async fn get_status(&mut self) -> Result<StatusResponse, SessionError> {
        match self.request(Command::GetStatus).await? {
            MeshEvent::Status(status) => Ok(status),
            MeshEvent::Error(code) => Err(SessionError::DeviceError(code)),
            other => Err(unexpected("status", &other)),
        }
    }

    /// Update radio parameters.
    pub async fn set_radio_params(
        &mut self,
        freq_khz: u32,
        bandwidth_hz: u32,
        spreading_factor: u8,
        coding_rate: u8,
    ) -> Result<(), SessionError> {
        let command = Command::SetRadioParams { freq_khz, bandwidth_hz, spreading_factor, coding_rate };
        match self.request(command).await? {
            MeshEvent::Ok(_) => Ok(()),
            MeshEvent::Error(code) => Err(SessionError::DeviceError(code)),
            other => Err(unexpected("ok", &other)),
        }
    }

    /// Request a path trace to a contact.
    pub async fn get_trace(&mut self, target_prefix: [u8; 6]) -> Result<TraceData, SessionError> {
        match self.request(Command::GetTrace { target_prefix }).await? {
            MeshEvent::Trace(trace) => Ok(trace),
            MeshEvent::Error(code) => Err(SessionError::DeviceError(code)),
            other => Err(unexpected("trace", &other)),
        }
    }
}

fn decode_frame(bytes: &Bytes) -> MeshEvent {
    if bytes.is_empty() {
        return MeshEvent::ParseFailure {
            code: 0,
            reason: "empty frame".to_string(),
            raw: Bytes::new(),
        };
    }
    MeshEvent::decode(bytes[0], &bytes[1..])
}

fn unexpected(expected: &'static str, got: &MeshEvent) -> SessionError {
    SessionError::UnexpectedResponse { expected, got: got.name() }
}
