//! Frame transport: turns a raw byte stream into a sequence of discrete
//! frames and back.
//!
//! Two framings coexist; which one is used is a property of the
//! transport, not the codec above it:
//!
//! - BLE serial delivers whole frames already; [`BlePassthrough`] is the
//!   identity decoder.
//! - TCP is a byte stream; [`TcpFrameDecoder`] is a stateful buffer that
//!   recovers frame boundaries from `'<'`/`'>'` delimiters and a 2-byte
//!   little-endian length prefix.
//!
//! # Invariants
//!
//! - [`TcpFrameDecoder::feed`] called with any chunking of a byte sequence
//!   `S` yields the same ordered frame sequence as a single call with all
//!   of `S` concatenated.
//! - Bytes before a recognized delimiter are silently discarded, never
//!   reported as an error.
//! - [`TcpFrameDecoder::reset`] drops all buffered state.

use bytes::{Bytes, BytesMut};

/// Delimiter byte prefixing a frame written *to* the device.
pub const OUTBOUND_DELIMITER: u8 = b'<';
/// Delimiter byte prefixing a frame received *from* the device.
pub const INBOUND_DELIMITER: u8 = b'>';

/// Decodes a byte stream into whole frame payloads.
pub trait FrameDecoder {
    /// Feed the next chunk of bytes from the transport. Returns zero or
    /// more complete frame payloads recovered by this call.
    fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes>;

    /// Clear all buffered state (e.g. after a reconnect).
    fn reset(&mut self);
}

/// Identity decoder for transports (BLE serial) that already deliver one
/// frame per chunk.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlePassthrough;

impl FrameDecoder for BlePassthrough {
    fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        if chunk.is_empty() { Vec::new() } else { vec![Bytes::copy_from_slice(chunk)] }
    }

    fn reset(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Scanning for the inbound delimiter; any other byte is garbage.
    Seeking,
    /// Delimiter seen; accumulating the 2-byte length prefix.
    ReadingLength,
    /// Length known; accumulating `remaining` more payload bytes.
    ReadingPayload { remaining: usize },
}

/// Stateful TCP frame decoder.
///
/// Byte format (inbound): `'>'(0x3E)`, 2-byte length `L` (little-endian),
/// `L` bytes of payload.
#[derive(Debug, Clone)]
pub struct TcpFrameDecoder {
    state: State,
    buf: BytesMut,
    payload: BytesMut,
}

impl Default for TcpFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpFrameDecoder {
    /// Create a decoder with no buffered state.
    #[must_use]
    pub fn new() -> Self {
        Self { state: State::Seeking, buf: BytesMut::new(), payload: BytesMut::new() }
    }
}

impl FrameDecoder for TcpFrameDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();
        self.buf.extend_from_slice(chunk);

        loop {
            match self.state {
                State::Seeking => {
                    let Some(pos) = self.buf.iter().position(|&b| b == INBOUND_DELIMITER) else {
                        if !self.buf.is_empty() {
                            tracing::debug!(
                                discarded = self.buf.len(),
                                "discarding pre-delimiter garbage"
                            );
                        }
                        self.buf.clear();
                        break;
                    };
                    if pos > 0 {
                        tracing::debug!(discarded = pos, "discarding pre-delimiter garbage");
                    }
                    let _ = self.buf.split_to(pos + 1);
                    self.state = State::ReadingLength;
                },
                State::ReadingLength => {
                    if self.buf.len() < 2 {
                        break;
                    }
                    let len_bytes = self.buf.split_to(2);
                    let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
                    self.payload.clear();
                    self.state = State::ReadingPayload { remaining: len };
                },
                State::ReadingPayload { remaining } => {
                    if remaining == 0 {
                        frames.push(self.payload.split().freeze());
                        self.state = State::Seeking;
                        continue;
                    }
                    if self.buf.is_empty() {
                        break;
                    }
                    let take = remaining.min(self.buf.len());
                    self.payload.extend_from_slice(&self.buf.split_to(take));
                    self.state = State::ReadingPayload { remaining: remaining - take };
                },
            }
        }

        frames
    }

    fn reset(&mut self) {
        self.state = State::Seeking;
        self.buf.clear();
        self.payload.clear();
    }
}

/// Encode a payload as an outbound TCP frame: `'<'`, 2-byte LE length, payload.
///
/// # Panics
///
/// Never: payload lengths beyond `u16::MAX` are truncated by the caller's
/// responsibility, matching the wire format's 2-byte length field. Callers
/// in this crate never construct payloads that large.
#[must_use]
pub fn encode_tcp_frame(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(3 + payload.len());
    out.extend_from_slice(&[OUTBOUND_DELIMITER]);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn tcp_framing_partial_delivery() {
        let mut decoder = TcpFrameDecoder::new();
        let mut frames = Vec::new();
        frames.extend(decoder.feed(&[0x3E, 0x02]));
        frames.extend(decoder.feed(&[0x00, 0xAA]));
        frames.extend(decoder.feed(&[0xBB]));

        assert_eq!(frames, vec![Bytes::from_static(&[0xAA, 0xBB])]);
    }

    #[test]
    fn discards_pre_delimiter_garbage() {
        let mut decoder = TcpFrameDecoder::new();
        let frames = decoder.feed(&[0x01, 0x02, 0x03, 0x3E, 0x01, 0x00, 0x7F]);
        assert_eq!(frames, vec![Bytes::from_static(&[0x7F])]);
    }

    #[test]
    fn empty_payload_frame() {
        let mut decoder = TcpFrameDecoder::new();
        let frames = decoder.feed(&[0x3E, 0x00, 0x00]);
        assert_eq!(frames, vec![Bytes::new()]);
    }

    #[test]
    fn reset_clears_buffered_state() {
        let mut decoder = TcpFrameDecoder::new();
        assert!(decoder.feed(&[0x3E, 0x05, 0x00, 0xAA]).is_empty());
        decoder.reset();
        let frames = decoder.feed(&[0x3E, 0x01, 0x00, 0x42]);
        assert_eq!(frames, vec![Bytes::from_static(&[0x42])]);
    }

    fn concatenated_decode(chunks: &[Vec<u8>]) -> Vec<Bytes> {
        let whole: Vec<u8> = chunks.iter().flatten().copied().collect();
        let mut decoder = TcpFrameDecoder::new();
        decoder.feed(&whole)
    }

    fn chunked_decode(chunks: &[Vec<u8>]) -> Vec<Bytes> {
        let mut decoder = TcpFrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(decoder.feed(chunk));
        }
        frames
    }

    proptest! {
        #[test]
        fn chunk_split_invariant(payloads in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..64), 0..8
        )) {
            let whole: Vec<u8> = payloads.iter().flat_map(|p| encode_tcp_frame(p)).collect();

            // Split the concatenated stream at arbitrary byte boundaries and
            // verify the decoder yields the same frames regardless of split.
            for split_count in [1usize, 2, 3, 7] {
                let mut chunks = Vec::new();
                if whole.is_empty() {
                    chunks.push(Vec::new());
                } else {
                    let step = (whole.len() / split_count).max(1);
                    let mut idx = 0;
                    while idx < whole.len() {
                        let end = (idx + step).min(whole.len());
                        chunks.push(whole[idx..end].to_vec());
                        idx = end;
                    }
                }
                prop_assert_eq!(concatenated_decode(&chunks), chunked_decode(&chunks));
            }
        }

        #[test]
        fn encode_decode_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let encoded = encode_tcp_frame(&payload);
            let mut decoder = TcpFrameDecoder::new();
            let frames = decoder.feed(&encoded);
            prop_assert_eq!(frames, vec![Bytes::from(payload)]);
        }
    }
}
