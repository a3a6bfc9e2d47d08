//! Bit-exact binary record layouts carried inside command/response/push
//! payloads.
//!
//! All scalars are little-endian. Coordinates are fixed-point degrees
//! scaled by 1e6. SNR bytes are quarters of a dB (`raw as f32 / 4.0`).

use crate::error::ProtocolError;

/// A peer's broadcast role, as reported by the device.
///
/// Replaces the source's open/inheritance-based contact typing (see
/// Design Notes) with a closed enum; unknown wire values round-trip
/// through [`NodeKind::Unknown`] rather than failing decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NodeKind {
    /// Ordinary chat-capable node.
    Chat,
    /// Store-and-forward repeater.
    Repeater,
    /// Group-chat room server.
    Room,
    /// Telemetry sensor.
    Sensor,
    /// Reserved or newer device firmware value.
    Unknown(u8),
}

impl NodeKind {
    /// Decode from the wire `type` byte.
    #[must_use]
    pub fn from_wire(v: u8) -> Self {
        match v {
            0 => Self::Chat,
            1 => Self::Repeater,
            2 => Self::Room,
            3 => Self::Sensor,
            other => Self::Unknown(other),
        }
    }

    /// Encode back to the wire `type` byte.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Chat => 0,
            Self::Repeater => 1,
            Self::Room => 2,
            Self::Sensor => 3,
            Self::Unknown(v) => v,
        }
    }
}

/// Trim a fixed-width name field at the first NUL/control byte and decode
/// the remainder as UTF-8, replacing invalid sequences rather than
/// failing (spec §4.2: "UTF-8 decoding MUST NOT fail the whole frame").
#[must_use]
pub fn decode_trimmed_name(raw: &[u8]) -> String {
    let cut = raw.iter().position(|&b| b == 0 || b < 0x20).unwrap_or(raw.len());
    let (name, lossy) = match std::str::from_utf8(&raw[..cut]) {
        Ok(s) => (s.to_string(), false),
        Err(_) => (String::from_utf8_lossy(&raw[..cut]).into_owned(), true),
    };
    if lossy {
        tracing::warn!("replaced invalid UTF-8 in name field with replacement characters");
    }
    name
}

/// Decode the remainder of a payload as UTF-8 text, replacing invalid
/// sequences (spec §4.2).
#[must_use]
pub fn decode_lossy_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => {
            tracing::warn!("replaced invalid UTF-8 in text field with replacement characters");
            String::from_utf8_lossy(raw).into_owned()
        },
    }
}

fn read_u32_le(buf: &[u8], at: usize) -> u32 {
    let Ok(bytes) = buf[at..at + 4].try_into() else {
        unreachable!("caller bounds-checks the record length before calling");
    };
    u32::from_le_bytes(bytes)
}

fn read_i32_le(buf: &[u8], at: usize) -> i32 {
    let Ok(bytes) = buf[at..at + 4].try_into() else {
        unreachable!("caller bounds-checks the record length before calling");
    };
    i32::from_le_bytes(bytes)
}

fn read_u16_le(buf: &[u8], at: usize) -> u16 {
    let Ok(bytes) = buf[at..at + 2].try_into() else {
        unreachable!("caller bounds-checks the record length before calling");
    };
    u16::from_le_bytes(bytes)
}

fn read_i16_le(buf: &[u8], at: usize) -> i16 {
    let Ok(bytes) = buf[at..at + 2].try_into() else {
        unreachable!("caller bounds-checks the record length before calling");
    };
    i16::from_le_bytes(bytes)
}

/// Wire length of a contact record, exactly (spec §6).
pub const CONTACT_RECORD_LEN: usize = 147;

/// A peer record as reported by `get_contacts`, in wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    /// Node identity.
    pub public_key: [u8; 32],
    /// Broadcast role.
    pub node_kind: NodeKind,
    /// Device-defined bit flags.
    pub flags: u8,
    /// `-1` means flood-only; otherwise `0..=64` hop count.
    pub out_path_length: i8,
    /// Path bytes; only the first `max(out_path_length, 0)` are meaningful.
    pub out_path: [u8; 64],
    /// Advertised display name, NUL/control-trimmed.
    pub name: String,
    /// Unix timestamp of the last advertisement seen.
    pub last_advert_timestamp: u32,
    /// Latitude in micro-degrees.
    pub lat_e6: i32,
    /// Longitude in micro-degrees.
    pub lon_e6: i32,
    /// Unix timestamp of last local modification.
    pub last_modified: u32,
}

impl ContactRecord {
    /// Decode a 147-byte contact record.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RecordTooShort`] if `buf.len() < 147`.
    /// [`ProtocolError::InvalidField`] if `out_path_length` is outside
    /// `{-1, 0..=64}`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < CONTACT_RECORD_LEN {
            return Err(ProtocolError::RecordTooShort {
                what: "contact record",
                got: buf.len(),
                need: CONTACT_RECORD_LEN,
            });
        }

        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&buf[0..32]);
        let node_kind = NodeKind::from_wire(buf[32]);
        let flags = buf[33];
        let out_path_length = buf[34] as i8;
        if !(-1..=64).contains(&out_path_length) {
            return Err(ProtocolError::InvalidField {
                field: "out_path_length",
                reason: format!("{out_path_length} not in {{-1, 0..=64}}"),
            });
        }
        let mut out_path = [0u8; 64];
        out_path.copy_from_slice(&buf[35..99]);
        let name = decode_trimmed_name(&buf[99..131]);
        let last_advert_timestamp = read_u32_le(buf, 131);
        let lat_e6 = read_i32_le(buf, 135);
        let lon_e6 = read_i32_le(buf, 139);
        let last_modified = read_u32_le(buf, 143);

        Ok(Self {
            public_key,
            node_kind,
            flags,
            out_path_length,
            out_path,
            name,
            last_advert_timestamp,
            lat_e6,
            lon_e6,
            last_modified,
        })
    }

    /// Encode back to the fixed 147-byte wire form.
    ///
    /// Path bytes beyond `max(out_path_length, 0)` are zeroed, matching
    /// the "ignored" contract rather than preserving stale tail bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; CONTACT_RECORD_LEN] {
        let mut out = [0u8; CONTACT_RECORD_LEN];
        out[0..32].copy_from_slice(&self.public_key);
        out[32] = self.node_kind.to_wire();
        out[33] = self.flags;
        out[34] = self.out_path_length as u8;
        let used = self.out_path_length.max(0) as usize;
        out[35..35 + used].copy_from_slice(&self.out_path[..used]);

        let name_bytes = self.name.as_bytes();
        let n = name_bytes.len().min(32);
        out[99..99 + n].copy_from_slice(&name_bytes[..n]);

        out[131..135].copy_from_slice(&self.last_advert_timestamp.to_le_bytes());
        out[135..139].copy_from_slice(&self.lat_e6.to_le_bytes());
        out[139..143].copy_from_slice(&self.lon_e6.to_le_bytes());
        out[143..147].copy_from_slice(&self.last_modified.to_le_bytes());
        out
    }
}

/// Telemetry bitfield decomposed from the self-info `telemetry_modes` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct TelemetryModes {
    /// `(b >> 4) & 3`
    pub env: u8,
    /// `(b >> 2) & 3`
    pub loc: u8,
    /// `b & 3`
    pub base: u8,
}

impl TelemetryModes {
    /// Decompose a raw telemetry-modes byte.
    #[must_use]
    pub fn from_wire(b: u8) -> Self {
        Self { env: (b >> 4) & 3, loc: (b >> 2) & 3, base: b & 3 }
    }

    /// Recompose into a raw byte.
    #[must_use]
    pub fn to_wire(self) -> u8 {
        ((self.env & 3) << 4) | ((self.loc & 3) << 2) | (self.base & 3)
    }
}

/// Fixed portion of `self info`, before the trailing name (spec §6).
pub const SELF_INFO_MIN_LEN: usize = 57;

/// The device's own identity and radio configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfInfo {
    /// Advertisement type.
    pub adv_type: u8,
    /// Current TX power, dBm.
    pub tx_power_dbm: i8,
    /// Maximum TX power, dBm.
    pub max_tx_power_dbm: i8,
    /// Device public key.
    pub public_key: [u8; 32],
    /// Latitude in micro-degrees.
    pub lat_e6: i32,
    /// Longitude in micro-degrees.
    pub lon_e6: i32,
    /// Whether multi-ack is enabled.
    pub multi_acks: bool,
    /// Raw advertised-location policy byte.
    pub adv_loc_policy: u8,
    /// Telemetry mode bits.
    pub telemetry_modes: TelemetryModes,
    /// Whether manual-add is enabled.
    pub manual_add: bool,
    /// Radio frequency, kHz.
    pub freq_khz: u32,
    /// Radio bandwidth, Hz.
    pub bandwidth_hz: u32,
    /// Spreading factor, 5..=12.
    pub spreading_factor: u8,
    /// Coding rate, 5..=8.
    pub coding_rate: u8,
    /// Device node name, NUL-trimmed.
    pub name: String,
}

impl SelfInfo {
    /// Decode a `self info` response payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RecordTooShort`] if shorter than the fixed portion.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < SELF_INFO_MIN_LEN {
            return Err(ProtocolError::RecordTooShort {
                what: "self info",
                got: buf.len(),
                need: SELF_INFO_MIN_LEN,
            });
        }

        let adv_type = buf[0];
        let tx_power_dbm = buf[1] as i8;
        let max_tx_power_dbm = buf[2] as i8;
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&buf[3..35]);
        let lat_e6 = read_i32_le(buf, 35);
        let lon_e6 = read_i32_le(buf, 39);
        let multi_acks = buf[43] != 0;
        let adv_loc_policy = buf[44];
        let telemetry_modes = TelemetryModes::from_wire(buf[45]);
        let manual_add = buf[46] != 0;
        let freq_khz = read_u32_le(buf, 47);
        let bandwidth_hz = read_u32_le(buf, 51);
        let spreading_factor = buf[55];
        let coding_rate = buf[56];
        let name = decode_trimmed_name(&buf[57..]);

        Ok(Self {
            adv_type,
            tx_power_dbm,
            max_tx_power_dbm,
            public_key,
            lat_e6,
            lon_e6,
            multi_acks,
            adv_loc_policy,
            telemetry_modes,
            manual_add,
            freq_khz,
            bandwidth_hz,
            spreading_factor,
            coding_rate,
            name,
        })
    }
}

/// Wire length of `device info` (v3+), exactly (spec §6).
pub const DEVICE_INFO_LEN: usize = 79;

/// Device hardware/firmware descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Numeric firmware version code.
    pub firmware_version: u8,
    /// Decoded contact capacity (wire value doubled, spec §9).
    pub max_contacts: u16,
    /// Channel slot capacity.
    pub max_channels: u8,
    /// BLE pairing PIN.
    pub ble_pin: u32,
    /// Build date string, NUL-trimmed.
    pub build_date: String,
    /// Manufacturer string, NUL-trimmed.
    pub manufacturer: String,
    /// Firmware version string, NUL-trimmed.
    pub version: String,
}

impl DeviceInfo {
    /// Decode a 79-byte `device info` (v3+) response payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RecordTooShort`] if `buf.len() < 79`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < DEVICE_INFO_LEN {
            return Err(ProtocolError::RecordTooShort {
                what: "device info",
                got: buf.len(),
                need: DEVICE_INFO_LEN,
            });
        }

        let firmware_version = buf[0];
        let max_contacts_half = buf[1];
        let max_channels = buf[2];
        let ble_pin = read_u32_le(buf, 3);
        let build_date = decode_trimmed_name(&buf[7..19]);
        let manufacturer = decode_trimmed_name(&buf[19..59]);
        let version = decode_trimmed_name(&buf[59..79]);

        Ok(Self {
            firmware_version,
            // Spec §9 open question: this implementation treats the wire
            // value as always halved.
            max_contacts: u16::from(max_contacts_half) * 2,
            max_channels,
            ble_pin,
            build_date,
            manufacturer,
            version,
        })
    }
}

/// Minimum payload length of a v3 contact (direct) message (spec §6).
pub const CONTACT_MESSAGE_MIN_LEN: usize = 15;

/// Plaintext framing of an incoming direct message.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactMessage {
    /// Signal-to-noise ratio in dB (`raw / 4.0`).
    pub snr_db: f32,
    /// First 6 bytes of the sender's public key.
    pub sender_prefix: [u8; 6],
    /// Number of hops the message traveled.
    pub path_len: u8,
    /// Text-type discriminant (0=plain, 1=command, 2=signed — device-defined).
    pub text_type: u8,
    /// Device-domain send timestamp.
    pub timestamp: u32,
    /// 4-byte signature, present only when `text_type` marks the message signed.
    pub signature: Option<[u8; 4]>,
    /// Message body.
    pub text: String,
}

impl ContactMessage {
    const SIGNED_TEXT_TYPE: u8 = 2;

    /// Decode a v3 contact-message payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RecordTooShort`] if shorter than the fixed portion.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < CONTACT_MESSAGE_MIN_LEN {
            return Err(ProtocolError::RecordTooShort {
                what: "contact message",
                got: buf.len(),
                need: CONTACT_MESSAGE_MIN_LEN,
            });
        }

        let snr_db = (buf[0] as i8) as f32 / 4.0;
        let mut sender_prefix = [0u8; 6];
        sender_prefix.copy_from_slice(&buf[3..9]);
        let path_len = buf[9];
        let text_type = buf[10];
        let timestamp = read_u32_le(buf, 11);

        let (signature, text_start) = if text_type == Self::SIGNED_TEXT_TYPE {
            if buf.len() < CONTACT_MESSAGE_MIN_LEN + 4 {
                return Err(ProtocolError::RecordTooShort {
                    what: "signed contact message",
                    got: buf.len(),
                    need: CONTACT_MESSAGE_MIN_LEN + 4,
                });
            }
            let mut sig = [0u8; 4];
            sig.copy_from_slice(&buf[15..19]);
            (Some(sig), 19)
        } else {
            (None, 15)
        };

        let text = decode_lossy_text(&buf[text_start..]);

        Ok(Self { snr_db, sender_prefix, path_len, text_type, timestamp, signature, text })
    }
}

/// Minimum payload length of a v3 channel message (spec §6).
pub const CHANNEL_MESSAGE_MIN_LEN: usize = 11;

/// Plaintext framing of an incoming channel message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    /// Signal-to-noise ratio in dB.
    pub snr_db: f32,
    /// Target channel slot.
    pub channel_index: u8,
    /// Number of hops the message traveled.
    pub path_len: u8,
    /// Text-type discriminant.
    pub text_type: u8,
    /// Device-domain send timestamp.
    pub timestamp: u32,
    /// Raw decoded body, possibly `"NodeName: body"` prefixed.
    ///
    /// Splitting on the first `": "` is a display concern (spec §4.2); the
    /// codec performs no normalization.
    pub text: String,
}

impl ChannelMessage {
    /// Decode a v3 channel-message payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RecordTooShort`] if shorter than the minimum.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < CHANNEL_MESSAGE_MIN_LEN {
            return Err(ProtocolError::RecordTooShort {
                what: "channel message",
                got: buf.len(),
                need: CHANNEL_MESSAGE_MIN_LEN,
            });
        }

        let snr_db = (buf[0] as i8) as f32 / 4.0;
        let channel_index = buf[3];
        let path_len = buf[4];
        let text_type = buf[5];
        let timestamp = read_u32_le(buf, 6);
        let text = decode_lossy_text(&buf[10..]);

        Ok(Self { snr_db, channel_index, path_len, text_type, timestamp, text })
    }

    /// Split a possibly `"NodeName: body"`-prefixed text into
    /// `(sender_name, body)`. Absence of the prefix yields an empty sender
    /// name (spec §4.2).
    #[must_use]
    pub fn split_sender_prefix(text: &str) -> (&str, &str) {
        match text.split_once(": ") {
            Some((name, body)) => (name, body),
            None => ("", text),
        }
    }
}

/// Wire length of `status response` (spec §6).
pub const STATUS_RESPONSE_LEN: usize = 64;

/// Device operational counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusResponse {
    /// First 6 bytes of this device's public key.
    pub pubkey_prefix: [u8; 6],
    /// Battery voltage, millivolts.
    pub battery_mv: u16,
    /// Outbound queue depth.
    pub tx_queue_len: u16,
    /// Radio noise floor, dBm.
    pub noise_floor_dbm: i16,
    /// Last received RSSI, dBm.
    pub last_rssi_dbm: i16,
    /// Total packets received.
    pub received: u32,
    /// Total packets sent.
    pub sent: u32,
    /// Cumulative airtime, ms.
    pub airtime_ms: u32,
    /// Device uptime, seconds.
    pub uptime_secs: u32,
    /// Flood-routed transmissions.
    pub flood_tx: u32,
    /// Direct transmissions.
    pub direct_tx: u32,
    /// Flood-routed receptions.
    pub flood_rx: u32,
    /// Direct receptions.
    pub direct_rx: u32,
    /// Count of queue-full events.
    pub full_events: u16,
    /// Last four SNR samples, dB.
    pub last_snr_db: [f32; 4],
    /// Duplicate direct packets dropped.
    pub direct_dups: u16,
    /// Duplicate flood packets dropped.
    pub flood_dups: u16,
    /// Cumulative RX airtime, ms.
    pub rx_airtime_ms: u32,
}

impl StatusResponse {
    /// Decode a fixed 64-byte status-response payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RecordTooShort`] if `buf.len() < 64`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < STATUS_RESPONSE_LEN {
            return Err(ProtocolError::RecordTooShort {
                what: "status response",
                got: buf.len(),
                need: STATUS_RESPONSE_LEN,
            });
        }

        let mut pubkey_prefix = [0u8; 6];
        pubkey_prefix.copy_from_slice(&buf[0..6]);

        let last_snr_db = [
            read_i16_le(buf, 48) as f32 / 4.0,
            read_i16_le(buf, 50) as f32 / 4.0,
            read_i16_le(buf, 52) as f32 / 4.0,
            read_i16_le(buf, 54) as f32 / 4.0,
        ];

        Ok(Self {
            pubkey_prefix,
            battery_mv: read_u16_le(buf, 6),
            tx_queue_len: read_u16_le(buf, 8),
            noise_floor_dbm: read_i16_le(buf, 10),
            last_rssi_dbm: read_i16_le(buf, 12),
            received: read_u32_le(buf, 14),
            sent: read_u32_le(buf, 18),
            airtime_ms: read_u32_le(buf, 22),
            uptime_secs: read_u32_le(buf, 26),
            flood_tx: read_u32_le(buf, 30),
            direct_tx: read_u32_le(buf, 34),
            flood_rx: read_u32_le(buf, 38),
            direct_rx: read_u32_le(buf, 42),
            full_events: read_u16_le(buf, 46),
            last_snr_db,
            direct_dups: read_u16_le(buf, 56),
            flood_dups: read_u16_le(buf, 58),
            rx_airtime_ms: read_u32_le(buf, 60),
        })
    }
}

/// Wire length of `channel info` (spec §6).
pub const CHANNEL_INFO_LEN: usize = 49;

/// A channel slot descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Slot index, 0..=7.
    pub index: u8,
    /// Channel name, NUL/control-trimmed UTF-8.
    pub name: String,
    /// 16-byte shared secret.
    pub secret: [u8; 16],
}

impl ChannelInfo {
    /// Decode a fixed `index:1 | name:32 | secret:16` payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RecordTooShort`] if `buf.len() < 49`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < CHANNEL_INFO_LEN {
            return Err(ProtocolError::RecordTooShort {
                what: "channel info",
                got: buf.len(),
                need: CHANNEL_INFO_LEN,
            });
        }

        let index = buf[0];
        let name = decode_trimmed_name(&buf[1..33]);
        let mut secret = [0u8; 16];
        secret.copy_from_slice(&buf[33..49]);

        Ok(Self { index, name, secret })
    }

    /// Encode back to the fixed 49-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; CHANNEL_INFO_LEN] {
        let mut out = [0u8; CHANNEL_INFO_LEN];
        out[0] = self.index;
        let name_bytes = self.name.as_bytes();
        let n = name_bytes.len().min(32);
        out[1..1 + n].copy_from_slice(&name_bytes[..n]);
        out[33..49].copy_from_slice(&self.secret);
        out
    }
}

/// One hop of a `trace` path: a node-identifying hash and the SNR observed
/// from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceHop {
    /// Truncated node-identifying hash.
    pub node_hash: u32,
    /// SNR, quarters of a dB, as transmitted.
    pub snr_raw: i8,
}

/// A decoded path-trace response: interleaved hop hashes and per-hop SNR,
/// terminated by a final SNR paired with a null hash (spec §4.2).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TraceData {
    /// Hops in transmission order, excluding the terminator.
    pub hops: Vec<TraceHop>,
    /// SNR observed at the final (terminating) hop, if present.
    pub final_snr_db: Option<f32>,
}

impl TraceData {
    /// Decode a `[hash:u32][snr:i8]` sequence terminated by a null hash.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::RecordTooShort`] if a trailing partial record is found.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut hops = Vec::new();
        let mut final_snr_db = None;
        let mut offset = 0;

        while offset < buf.len() {
            if buf.len() - offset < 5 {
                return Err(ProtocolError::RecordTooShort {
                    what: "trace hop",
                    got: buf.len() - offset,
                    need: 5,
                });
            }
            let node_hash = read_u32_le(buf, offset);
            let snr_raw = buf[offset + 4] as i8;
            offset += 5;

            if node_hash == 0 {
                final_snr_db = Some(snr_raw as f32 / 4.0);
                break;
            }
            hops.push(TraceHop { node_hash, snr_raw });
        }

        Ok(Self { hops, final_snr_db })
    }
}

/// Parse ASCII `k:v,k:v,...` custom-variable text into pairs, in order.
///
/// Malformed entries (missing `:`) are skipped with a logged warning
/// rather than failing the whole payload.
#[must_use]
pub fn parse_custom_vars(text: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for entry in text.split(',') {
        if entry.is_empty() {
            continue;
        }
        match entry.split_once(':') {
            Some((k, v)) => pairs.push((k.to_string(), v.to_string())),
            None => tracing::warn!(entry, "skipping malformed custom-var entry"),
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn contact_record_short_input_names_147() {
        let buf = vec![0u8; 100];
        let err = ContactRecord::decode(&buf).unwrap_err();
        assert!(format!("{err}").contains("147"));
    }

    #[test]
    fn contact_record_round_trip_basic() {
        let record = ContactRecord {
            public_key: [7u8; 32],
            node_kind: NodeKind::Repeater,
            flags: 0x02,
            out_path_length: 3,
            out_path: {
                let mut p = [0u8; 64];
                p[0] = 1;
                p[1] = 2;
                p[2] = 3;
                p
            },
            name: "relay-1".to_string(),
            last_advert_timestamp: 1_700_000_000,
            lat_e6: 40_000_000,
            lon_e6: -74_000_000,
            last_modified: 1_700_000_500,
        };

        let encoded = record.encode();
        assert_eq!(encoded.len(), CONTACT_RECORD_LEN);
        let decoded = ContactRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn contact_record_flood_only_path() {
        let mut record = ContactRecord {
            public_key: [0u8; 32],
            node_kind: NodeKind::Chat,
            flags: 0,
            out_path_length: -1,
            out_path: [0xFF; 64],
            name: String::new(),
            last_advert_timestamp: 0,
            lat_e6: 0,
            lon_e6: 0,
            last_modified: 0,
        };
        let encoded = record.encode();
        let decoded = ContactRecord::decode(&encoded).unwrap();
        assert_eq!(decoded.out_path_length, -1);
        // Encoding zeroes path bytes beyond max(len,0)=0.
        record.out_path = [0u8; 64];
        assert_eq!(decoded.out_path, record.out_path);
    }

    #[test]
    fn device_info_halves_max_contacts() {
        let mut buf = [0u8; DEVICE_INFO_LEN];
        buf[1] = 40; // max_contacts_half
        let info = DeviceInfo::decode(&buf).unwrap();
        assert_eq!(info.max_contacts, 80);
    }

    #[test]
    fn channel_message_split_sender_prefix() {
        assert_eq!(ChannelMessage::split_sender_prefix("Alice: hi"), ("Alice", "hi"));
        assert_eq!(ChannelMessage::split_sender_prefix("no prefix here"), ("", "no prefix here"));
    }

    #[test]
    fn trace_data_terminates_on_null_hash() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.push(8); // snr 2.0 dB
        buf.extend_from_slice(&2u32.to_le_bytes());
        buf.push(4); // snr 1.0 dB
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push(12); // final snr 3.0 dB

        let trace = TraceData::decode(&buf).unwrap();
        assert_eq!(trace.hops.len(), 2);
        assert_eq!(trace.final_snr_db, Some(3.0));
    }

    #[test]
    fn custom_vars_skip_malformed_entries() {
        let pairs = parse_custom_vars("a:1,bad,b:2");
        assert_eq!(pairs, vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
    }

    proptest! {
        #[test]
        fn contact_record_round_trip_prop(
            public_key in proptest::array::uniform32(any::<u8>()),
            node_kind_raw in 0u8..4,
            flags in any::<u8>(),
            out_path_length in -1i8..=64,
            name in "[a-zA-Z0-9 ]{0,32}",
            last_advert_timestamp in any::<u32>(),
            lat_e6 in any::<i32>(),
            lon_e6 in any::<i32>(),
            last_modified in any::<u32>(),
        ) {
            let record = ContactRecord {
                public_key,
                node_kind: NodeKind::from_wire(node_kind_raw),
                flags,
                out_path_length,
                out_path: [0xAB; 64],
                name,
                last_advert_timestamp,
                lat_e6,
                lon_e6,
                last_modified,
            };

            let encoded = record.encode();
            let decoded = ContactRecord::decode(&encoded).unwrap();

            let used = out_path_length.max(0) as usize;
            prop_assert_eq!(&decoded.out_path[..used], &record.out_path[..used]);
            prop_assert_eq!(decoded.public_key, record.public_key);
            prop_assert_eq!(decoded.out_path_length, record.out_path_length);
            prop_assert_eq!(decoded.name, record.name);
            prop_assert_eq!(decoded.last_advert_timestamp, record.last_advert_timestamp);
            prop_assert_eq!(decoded.lat_e6, record.lat_e6);
            prop_assert_eq!(decoded.lon_e6, record.lon_e6);
            prop_assert_eq!(decoded.last_modified, record.last_modified);
        }
    }
}
