//! Session actor, transport, delivery engine, and sync coordinator for
//! the MeshCore client.
//!
//! # Components
//!
//! - [`transport::Transport`]: byte-stream abstraction plus a concrete
//!   TCP implementation (spec §6).
//! - [`session::Session`]: owns the transport, correlates
//!   command/response traffic, fans pushes out on the dispatcher, and
//!   auto-drains the message queue on `messages_waiting` (spec §4.4).
//! - [`delivery::DeliveryEngine`]: the direct→flood retry state machine
//!   for outgoing direct messages (spec §4.5).
//! - [`sync::SyncCoordinator`]: the contacts → channels → messages sync
//!   run on every transition to `ready` (spec §4.6).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod delivery;
pub mod error;
pub mod session;
pub mod sync;
pub mod transport;

pub use delivery::{DeliveryConfig, DeliveryEngine};
pub use error::{DeliveryError, SessionError, SyncError};
pub use session::{Session, SessionConfig, SentAck};
pub use sync::{PhaseOutcome, SyncCoordinator, SyncReport};
pub use transport::{TcpTransport, Transport};
