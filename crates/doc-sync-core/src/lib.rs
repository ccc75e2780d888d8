//! doc-sync-core: Keeps one document consistent across a local editing
//! session, a remote authoritative store, and peers on a live channel.
//!
//! This crate provides:
//! - The `Document` model and session-scoped `LocalCache`
//! - `PersistenceClient` and `RealtimeChannel` trait abstractions
//! - Conflict classification for failed writes
//! - `SyncController`, which orchestrates all of the above
//! - In-memory implementations of both adapters (`InMemoryStore`, `LoopbackHub`)

pub mod cache;
pub mod channel;
pub mod conflict;
pub mod controller;
pub mod document;
pub mod events;
pub mod loopback;
pub mod persistence;
pub mod store;

pub use cache::LocalCache;
pub use channel::{ChannelError, ChannelMessage, DocumentHandler, RealtimeChannel};
pub use conflict::{classify, Resolution};
pub use controller::{SyncCallbacks, SyncController, SyncError, SyncStatus};
pub use document::{Document, DocumentPatch};
pub use events::{EventBus, Subscription};
pub use loopback::{LoopbackChannel, LoopbackHub};
pub use persistence::{PersistError, PersistenceClient};
pub use store::InMemoryStore;
