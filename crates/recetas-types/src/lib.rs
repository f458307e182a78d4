pub mod events;
pub mod models;

pub use events::{RealtimeEvent, TYPING_EVENT};
pub use models::{AuthorDisplay, Identity, InsertedRow, JoinedRow, Message, TypingEvent};
