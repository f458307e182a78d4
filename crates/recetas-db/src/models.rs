//! Database row types, mapped directly from SQLite rows.
//! Distinct from recetas-types models to keep the DB layer independent.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use recetas_types::{AuthorDisplay, InsertedRow, JoinedRow};

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub role: String,
    pub created_at: String,
}

/// A message row with the author columns from the users LEFT JOIN.
pub struct MessageRow {
    pub id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: String,
    pub author_email: Option<String>,
    pub author_role: Option<String>,
}

impl MessageRow {
    pub fn into_joined(self) -> JoinedRow {
        let created_at = parse_timestamp(&self.id, &self.created_at);
        let author = match (self.author_email, self.author_role) {
            (Some(email), Some(role)) => Some(AuthorDisplay { email, role }),
            _ => None,
        };
        JoinedRow {
            id: self.id,
            content: self.content,
            author_id: self.author_id,
            created_at,
            author,
        }
    }

    pub fn into_inserted(self) -> InsertedRow {
        let created_at = parse_timestamp(&self.id, &self.created_at);
        InsertedRow {
            id: self.id,
            content: self.content,
            author_id: self.author_id,
            created_at,
        }
    }
}

fn parse_timestamp(message_id: &str, raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone. Parse as naive UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on message '{}': {}", raw, message_id, e);
            DateTime::default()
        })
}
