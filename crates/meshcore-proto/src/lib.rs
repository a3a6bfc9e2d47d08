//! Wire codec for the MeshCore device protocol.
//!
//! Five pieces, leaves first: frame transport ([`frame`]), the low-level
//! binary record layouts ([`types`]), the LoRa RX-log packet parser
//! ([`rxlog`]), and the command/response/push codec ([`codec`]) built on
//! top of them. [`error`] holds the shared error taxonomy for malformed
//! record bodies.
//!
//! Channel message cryptography (AES-128-ECB + truncated HMAC-SHA256)
//! lives in the sibling `meshcore-crypto` crate, since it has its own key
//! material and error taxonomy distinct from parsing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod rxlog;
pub mod types;

pub use codec::{Command, IncomingMessage, MeshEvent, is_push_code};
pub use error::ProtocolError;
pub use frame::{BlePassthrough, FrameDecoder, TcpFrameDecoder, encode_tcp_frame};
