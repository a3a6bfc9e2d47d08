//! Command encoding and response/push decoding.
//!
//! [`Command`] is the closed set of outbound operations; [`MeshEvent`] is
//! the closed tagged variant covering every response and push code (spec
//! §9 Design Notes: no dynamic payload casting, exhaustiveness is
//! compile-checked). Decoding a frame never fails: an unrecognized code or
//! a malformed body becomes [`MeshEvent::ParseFailure`] rather than an
//! error returned to the caller (spec §4.2, §7).

use bytes::{Bytes, BytesMut};

use crate::types::{
    ChannelInfo, ChannelMessage, ContactMessage, ContactRecord, DeviceInfo, SelfInfo,
    StatusResponse, TraceData,
};

mod opcode {
    pub const SEND_DIRECT_MESSAGE: u8 = 0x01;
    pub const SEND_CHANNEL_MESSAGE: u8 = 0x02;
    pub const GET_CONTACTS: u8 = 0x03;
    pub const GET_CHANNEL_INFO: u8 = 0x04;
    pub const GET_NEXT_MESSAGE: u8 = 0x05;
    pub const RESET_PATH: u8 = 0x06;
    pub const GET_SELF_INFO: u8 = 0x07;
    pub const GET_DEVICE_INFO: u8 = 0x08;
    pub const GET_STATUS: u8 = 0x09;
    pub const SET_RADIO_PARAMS: u8 = 0x0A;
    pub const GET_TRACE: u8 = 0x0B;

    pub const RESP_OK: u8 = 0x10;
    pub const RESP_ERROR: u8 = 0x11;
    pub const RESP_SENT: u8 = 0x12;
    pub const RESP_CONTACT: u8 = 0x13;
    pub const RESP_NO_MORE_CONTACTS: u8 = 0x14;
    pub const RESP_CHANNEL_INFO: u8 = 0x15;
    pub const RESP_SELF_INFO: u8 = 0x16;
    pub const RESP_DEVICE_INFO: u8 = 0x17;
    pub const RESP_STATUS: u8 = 0x18;
    pub const RESP_MESSAGE_CONTACT: u8 = 0x19;
    pub const RESP_MESSAGE_CHANNEL: u8 = 0x1A;
    pub const RESP_NO_MORE_MESSAGES: u8 = 0x1B;
    pub const RESP_TRACE: u8 = 0x1C;

    pub const PUSH_MESSAGES_WAITING: u8 = 0x83;
    pub const PUSH_ACK: u8 = 0x84;
    pub const PUSH_ADVERTISEMENT: u8 = 0x85;
}

/// Whether a frame code is a push (asynchronous, unsolicited) notification
/// rather than a command response. Push codes have the high bit set
/// (spec §4.2).
#[must_use]
pub fn is_push_code(code: u8) -> bool {
    code & 0x80 != 0
}

/// An outbound command. Each variant knows how to encode itself as
/// `[code][payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a direct text message. Carries the caller-assigned `ack_code`
    /// used to correlate the eventual device-level ACK.
    SendDirectMessage {
        /// Caller-assigned correlation token for the delivery ACK.
        ack_code: u32,
        /// First 6 bytes of the recipient's public key.
        recipient_prefix: [u8; 6],
        /// Message text.
        text: String,
        /// Force flood routing for this attempt (delivery-engine retry escalation).
        flood: bool,
    },
    /// Send a channel (group) message. No ACK is produced (spec §4.5).
    SendChannelMessage {
        /// Target channel slot.
        channel_index: u8,
        /// Message text.
        text: String,
    },
    /// Request contacts advertised/modified since `since` (unix seconds).
    GetContacts {
        /// Incremental sync cursor.
        since: u32,
    },
    /// Request a channel slot's descriptor.
    GetChannelInfo {
        /// Slot index, 0..=7.
        slot: u8,
    },
    /// Drain the next queued message (used for both message sync and
    /// auto-fetch on `messages_waiting`).
    GetNextMessage,
    /// Clear the device's remembered path to a contact, forcing
    /// rediscovery (issued once on escalation to flood routing).
    ResetPath {
        /// First 6 bytes of the contact's public key.
        contact_prefix: [u8; 6],
    },
    /// Request the device's own identity/radio descriptor.
    GetSelfInfo,
    /// Request hardware/firmware descriptor.
    GetDeviceInfo,
    /// Request operational counters.
    GetStatus,
    /// Update radio parameters.
    SetRadioParams {
        /// Frequency, kHz.
        freq_khz: u32,
        /// Bandwidth, Hz.
        bandwidth_hz: u32,
        /// Spreading factor, 5..=12.
        spreading_factor: u8,
        /// Coding rate, 5..=8.
        coding_rate: u8,
    },
    /// Request a path trace to a contact.
    GetTrace {
        /// First 6 bytes of the target's public key.
        target_prefix: [u8; 6],
    },
}

impl Command {
    /// Encode this command as a frame payload (`[code][body]`), ready to
    /// be handed to a [`crate::frame`] encoder.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Self::SendDirectMessage { ack_code, recipient_prefix, text, flood } => {
                buf.extend_from_slice(&[opcode::SEND_DIRECT_MESSAGE]);
                buf.extend_from_slice(&ack_code.to_le_bytes());
                buf.extend_from_slice(recipient_prefix);
                buf.extend_from_slice(&[u8::from(*flood)]);
                buf.extend_from_slice(text.as_bytes());
            },
            Self::SendChannelMessage { channel_index, text } => {
                buf.extend_from_slice(&[opcode::SEND_CHANNEL_MESSAGE, *channel_index]);
                buf.extend_from_slice(text.as_bytes());
            },
            Self::GetContacts { since } => {
                buf.extend_from_slice(&[opcode::GET_CONTACTS]);
                buf.extend_from_slice(&since.to_le_bytes());
            },
            Self::GetChannelInfo { slot } => {
                buf.extend_from_slice(&[opcode::GET_CHANNEL_INFO, *slot]);
            },
            Self::GetNextMessage => buf.extend_from_slice(&[opcode::GET_NEXT_MESSAGE]),
            Self::ResetPath { contact_prefix } => {
                buf.extend_from_slice(&[opcode::RESET_PATH]);
                buf.extend_from_slice(contact_prefix);
            },
            Self::GetSelfInfo => buf.extend_from_slice(&[opcode::GET_SELF_INFO]),
            Self::GetDeviceInfo => buf.extend_from_slice(&[opcode::GET_DEVICE_INFO]),
            Self::GetStatus => buf.extend_from_slice(&[opcode::GET_STATUS]),
            Self::SetRadioParams { freq_khz, bandwidth_hz, spreading_factor, coding_rate } => {
                buf.extend_from_slice(&[opcode::SET_RADIO_PARAMS]);
                buf.extend_from_slice(&freq_khz.to_le_bytes());
                buf.extend_from_slice(&bandwidth_hz.to_le_bytes());
                buf.extend_from_slice(&[*spreading_factor, *coding_rate]);
            },
            Self::GetTrace { target_prefix } => {
                buf.extend_from_slice(&[opcode::GET_TRACE]);
                buf.extend_from_slice(target_prefix);
            },
        }
        buf.freeze()
    }
}

/// An incoming message, routed to either a direct conversation or a
/// channel (spec §3: "exactly one non-null").
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Direct (contact) message.
    Direct(ContactMessage),
    /// Channel (group) message.
    Channel(ChannelMessage),
}

/// The closed set of decoded responses and pushes (spec §9 Design Notes).
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// Generic success, optionally carrying a 4-byte LE value.
    Ok(Option<u32>),
    /// Generic failure with a device-defined error code.
    Error(u8),
    /// A message left the device; carries ACK-tracking parameters.
    Sent {
        /// Correlation token echoed back.
        ack_code: u32,
        /// Device-predicted ACK token, if different from `ack_code`.
        expected_ack: u32,
        /// Measured device-side round trip, ms.
        round_trip_ms: u32,
        /// Device-suggested ACK wait timeout, ms.
        suggested_timeout_ms: u32,
    },
    /// One contact record from a `get_contacts` drain.
    Contact(ContactRecord),
    /// Sentinel ending a `get_contacts` drain.
    NoMoreContacts,
    /// A channel slot's descriptor.
    ChannelInfo(ChannelInfo),
    /// The device's own identity/radio descriptor.
    SelfInfo(SelfInfo),
    /// Hardware/firmware descriptor.
    DeviceInfo(DeviceInfo),
    /// Operational counters.
    Status(StatusResponse),
    /// One message from a `get_next_message` drain.
    Message(IncomingMessage),
    /// Sentinel ending a `get_next_message` drain.
    NoMoreMessages,
    /// A path-trace result.
    Trace(TraceData),
    /// Push: the device has queued messages for retrieval (code `0x83`).
    MessagesWaiting,
    /// Push: a delivery acknowledgement for an outstanding `ack_code`.
    Ack {
        /// The acknowledged correlation token.
        ack_code: u32,
    },
    /// Push: an unsolicited advertisement from a (possibly new) peer.
    Advertisement(ContactRecord),
    /// An unrecognized code or a body that failed to parse. Always both
    /// emitted as a diagnostic and, when a best-effort reconstruction is
    /// possible, accompanied by that event too (spec §7) — the caller
    /// decides whether to also synthesize the latter.
    ParseFailure {
        /// The offending code byte.
        code: u8,
        /// Human-readable failure reason.
        reason: String,
        /// Raw bytes that followed the code, for diagnostics.
        raw: Bytes,
    },
}

impl MeshEvent {
    /// Whether this event originated from a push code (`>= 0x80`) as
    /// opposed to a command response.
    #[must_use]
    pub fn is_push(&self) -> bool {
        matches!(
            self,
            Self::MessagesWaiting | Self::Ack { .. } | Self::Advertisement(_)
        )
    }

    /// Stable lowercase name used for event-type filtering.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ok(_) => "ok",
            Self::Error(_) => "error",
            Self::Sent { .. } => "sent",
            Self::Contact(_) => "contact",
            Self::NoMoreContacts => "no_more_contacts",
            Self::ChannelInfo(_) => "channel_info",
            Self::SelfInfo(_) => "self_info",
            Self::DeviceInfo(_) => "device_info",
            Self::Status(_) => "status",
            Self::Message(_) => "message",
            Self::NoMoreMessages => "no_more_messages",
            Self::Trace(_) => "trace",
            Self::MessagesWaiting => "messages_waiting",
            Self::Ack { .. } => "ack",
            Self::Advertisement(_) => "advertisement",
            Self::ParseFailure { .. } => "parse_failure",
        }
    }

    /// Decode a frame's `[code][payload]` into an event. Never fails:
    /// unknown codes or malformed bodies become [`MeshEvent::ParseFailure`]
    /// (spec §4.2, §7).
    #[must_use]
    pub fn decode(code: u8, payload: &[u8]) -> Self {
        let raw = Bytes::copy_from_slice(payload);
        let failure = |reason: String| -> Self {
            tracing::warn!(code, reason = %reason, "frame parse failure");
            Self::ParseFailure { code, reason, raw: raw.clone() }
        };
        let u32_le = |slice: &[u8]| -> u32 {
            let Ok(bytes) = slice.try_into() else {
                unreachable!("caller passes exactly 4 bytes");
            };
            u32::from_le_bytes(bytes)
        };

        match code {
            opcode::RESP_OK => match payload.len() {
                0 => Self::Ok(None),
                4 => Self::Ok(Some(u32_le(&payload[0..4]))),
                n => failure(format!("ok response has unexpected length {n}")),
            },
            opcode::RESP_ERROR => {
                if payload.is_empty() {
                    failure("error response missing error code".to_string())
                } else {
                    Self::Error(payload[0])
                }
            },
            opcode::RESP_SENT => {
                if payload.len() < 16 {
                    return failure(format!("sent response too short: {} bytes", payload.len()));
                }
                Self::Sent {
                    ack_code: u32_le(&payload[0..4]),
                    expected_ack: u32_le(&payload[4..8]),
                    round_trip_ms: u32_le(&payload[8..12]),
                    suggested_timeout_ms: u32_le(&payload[12..16]),
                }
            },
            opcode::RESP_CONTACT => match ContactRecord::decode(payload) {
                Ok(record) => Self::Contact(record),
                Err(e) => failure(e.to_string()),
            },
            opcode::RESP_NO_MORE_CONTACTS => Self::NoMoreContacts,
            opcode::RESP_CHANNEL_INFO => match ChannelInfo::decode(payload) {
                Ok(info) => Self::ChannelInfo(info),
                Err(e) => failure(e.to_string()),
            },
            opcode::RESP_SELF_INFO => match SelfInfo::decode(payload) {
                Ok(info) => Self::SelfInfo(info),
                Err(e) => failure(e.to_string()),
            },
            opcode::RESP_DEVICE_INFO => match DeviceInfo::decode(payload) {
                Ok(info) => Self::DeviceInfo(info),
                Err(e) => failure(e.to_string()),
            },
            opcode::RESP_STATUS => match StatusResponse::decode(payload) {
                Ok(status) => Self::Status(status),
                Err(e) => failure(e.to_string()),
            },
            opcode::RESP_MESSAGE_CONTACT => match ContactMessage::decode(payload) {
                Ok(msg) => Self::Message(IncomingMessage::Direct(msg)),
                Err(e) => failure(e.to_string()),
            },
            opcode::RESP_MESSAGE_CHANNEL => match ChannelMessage::decode(payload) {
                Ok(msg) => Self::Message(IncomingMessage::Channel(msg)),
                Err(e) => failure(e.to_string()),
            },
            opcode::RESP_NO_MORE_MESSAGES => Self::NoMoreMessages,
            opcode::RESP_TRACE => match TraceData::decode(payload) {
                Ok(trace) => Self::Trace(trace),
                Err(e) => failure(e.to_string()),
            },
            opcode::PUSH_MESSAGES_WAITING => Self::MessagesWaiting,
            opcode::PUSH_ACK => {
                if payload.len() < 4 {
                    failure(format!("ack push too short: {} bytes", payload.len()))
                } else {
                    Self::Ack { ack_code: u32_le(&payload[0..4]) }
                }
            },
            opcode::PUSH_ADVERTISEMENT => match ContactRecord::decode(payload) {
                Ok(record) => Self::Advertisement(record),
                Err(e) => failure(e.to_string()),
            },
            other => failure(format!("unrecognized code 0x{other:02x}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_direct_message_layout() {
        let cmd = Command::SendDirectMessage {
            ack_code: 0x1122_3344,
            recipient_prefix: [1, 2, 3, 4, 5, 6],
            text: "hi".to_string(),
            flood: false,
        };
        let encoded = cmd.encode();
        assert_eq!(encoded[0], opcode::SEND_DIRECT_MESSAGE);
        assert_eq!(&encoded[1..5], &0x1122_3344u32.to_le_bytes());
        assert_eq!(&encoded[5..11], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(encoded[11], 0);
        assert_eq!(&encoded[12..], b"hi");
    }

    #[test]
    fn unknown_code_becomes_parse_failure() {
        let event = MeshEvent::decode(0x7F, &[1, 2, 3]);
        match event {
            MeshEvent::ParseFailure { code, .. } => assert_eq!(code, 0x7F),
            other => panic!("expected ParseFailure, got {other:?}"),
        }
    }

    #[test]
    fn push_codes_have_high_bit_set() {
        assert!(is_push_code(opcode::PUSH_MESSAGES_WAITING));
        assert!(is_push_code(opcode::PUSH_ACK));
        assert!(!is_push_code(opcode::RESP_OK));
    }

    #[test]
    fn messages_waiting_is_a_push_event() {
        let event = MeshEvent::decode(opcode::PUSH_MESSAGES_WAITING, &[]);
        assert_eq!(event, MeshEvent::MessagesWaiting);
        assert!(event.is_push());
    }

    #[test]
    fn ok_response_accepts_zero_or_four_bytes() {
        assert_eq!(MeshEvent::decode(opcode::RESP_OK, &[]), MeshEvent::Ok(None));
        assert_eq!(
            MeshEvent::decode(opcode::RESP_OK, &42u32.to_le_bytes()),
            MeshEvent::Ok(Some(42))
        );
    }
}
