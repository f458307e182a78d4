use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display metadata joined from the users table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorDisplay {
    pub email: String,
    pub role: String,
}

impl AuthorDisplay {
    /// Placeholder used when the author join is unavailable.
    pub fn unknown() -> Self {
        Self {
            email: "unknown".to_string(),
            role: "user".to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }
}

/// A chat message as shown in the conversation feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author: AuthorDisplay,
}

impl Message {
    /// Longest content accepted by the send path, counted in characters.
    pub const MAX_CONTENT_CHARS: usize = 500;

    pub fn is_authored_by(&self, user_id: &str) -> bool {
        self.author_id == user_id
    }
}

impl From<JoinedRow> for Message {
    fn from(row: JoinedRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            content: row.content,
            created_at: row.created_at,
            author: row.author.unwrap_or_else(AuthorDisplay::unknown),
        }
    }
}

impl From<InsertedRow> for Message {
    fn from(row: InsertedRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            content: row.content,
            created_at: row.created_at,
            author: AuthorDisplay::unknown(),
        }
    }
}

/// Raw row carried by an insert notification. Not yet joined with the author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertedRow {
    pub id: String,
    pub content: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
}

/// Message row joined with its author. `author` is `None` when the join missed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedRow {
    pub id: String,
    pub content: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
    pub author: Option<AuthorDisplay>,
}

/// Broadcast payload announcing that a peer is composing a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingEvent {
    pub peer_id: String,
    pub peer_display_name: String,
    pub emitted_at: DateTime<Utc>,
}

/// The signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
}
