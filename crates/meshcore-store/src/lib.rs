//! Reference [`meshcore_core::store::Store`] implementations (spec §6).
//!
//! - [`memory::MemoryStore`]: `Arc<Mutex<...>>`-backed, for tests and
//!   simple embedding.
//! - [`redb_backend::RedbStore`]: durable, ACID, survives a process
//!   restart.
//! - [`chaotic::ChaoticStore`]: wraps any `Store` and randomly fails
//!   operations, for exercising the delivery engine's and sync
//!   coordinator's error-recovery paths.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chaotic;
mod memory;
mod redb_backend;

pub use chaotic::ChaoticStore;
pub use memory::MemoryStore;
pub use redb_backend::RedbStore;
