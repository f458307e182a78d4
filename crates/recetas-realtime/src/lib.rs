//! In-process realtime transport: row-insert notifications per table and
//! named broadcast channels, fanned out over tokio broadcast channels.

pub mod hub;

pub use hub::{BroadcastStream, ChannelHandle, Hub, InsertStream, RealtimeError};
