//! Realtime chat synchronization for the recipes community chat.
//!
//! [`ChatSyncEngine`] keeps one conversation feed in sync: it seeds a
//! [`MessageStore`] from the most recent history, merges live insert
//! notifications without duplicates, and tracks who is typing through a
//! [`PresenceTracker`]. Collaborators are reached through the traits in
//! [`backend`]; [`local::LocalBackend`] wires them to SQLite and the
//! in-process realtime hub.

pub mod backend;
pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod local;
pub mod presence;
pub mod store;

pub use backend::{IdentityProvider, MessageRepository, RealtimeTransport, SessionIdentity};
pub use channels::{ChannelLifecycle, Disposer, PendingInserts, TypingChannel};
pub use config::ChatConfig;
pub use engine::{ChatSyncEngine, SessionHandle};
pub use error::{BackendError, ConfigError, DeleteError, SendError, ValidationError};
pub use local::LocalBackend;
pub use presence::{PresenceEntry, PresenceTracker};
pub use store::MessageStore;
