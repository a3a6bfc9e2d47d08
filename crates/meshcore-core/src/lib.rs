//! Entity schema, persistence contract, environment abstraction, error
//! taxonomy, and event dispatcher shared by the MeshCore session and
//! delivery/sync layers.
//!
//! Wire-level parsing lives in `meshcore-proto`; channel cryptography in
//! `meshcore-crypto`. This crate sits above both and defines the
//! vocabulary ([`entities`], [`event`]) and infrastructure ([`store`],
//! [`dispatcher`], [`env`]) that `meshcore-client` drives.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatcher;
pub mod entities;
pub mod env;
pub mod error;
pub mod event;
pub mod store;

pub use dispatcher::{Dispatcher, DispatcherConfig, SubscriptionId};
pub use entities::{
    Channel, ChannelId, Contact, ContactId, Conversation, Device, DeviceId, Direction, Message,
    MessageId, MessageStatus, TextType,
};
pub use env::{Environment, SystemEnvironment};
pub use error::{CoreError, EntityError, StoreError};
pub use event::{ConnectionState, Event, SyncPhase};
pub use store::{RemoteNodeSession, Store, SUPPORTED_SCHEMA_VERSION};
