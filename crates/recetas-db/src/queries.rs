use crate::Database;
use crate::models::{MessageRow, UserRow};
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use uuid::Uuid;

const JOINED_SELECT: &str = "SELECT m.id, m.author_id, m.content, m.created_at, u.email, u.role
     FROM messages m
     LEFT JOIN users u ON m.author_id = u.id";

impl Database {
    // -- Users --

    /// Insert a user or refresh its email/role.
    pub fn upsert_user(&self, id: &str, email: &str, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, role) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET email = excluded.email, role = excluded.role",
                (id, email, role),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_email(conn, email))
    }

    // -- Messages --

    /// Insert a message. The id and timestamp are assigned here, like a server would.
    pub fn insert_message(&self, author_id: &str, content: &str) -> Result<MessageRow> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, author_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, author_id, content, created_at],
            )?;
            Ok(())
        })?;

        Ok(MessageRow {
            id,
            author_id: author_id.to_string(),
            content: content.to_string(),
            created_at,
            author_email: None,
            author_role: None,
        })
    }

    /// Most recent messages first, joined with their authors.
    pub fn get_recent_messages(&self, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_recent_messages(conn, limit))
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Returns whether a row was deleted.
    pub fn delete_message(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }
}

fn query_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, email, role, created_at FROM users WHERE email = ?1")?;

    let row = stmt
        .query_row([email], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                role: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        content: row.get(2)?,
        created_at: row.get(3)?,
        author_email: row.get(4)?,
        author_role: row.get(5)?,
    })
}

fn query_recent_messages(conn: &Connection, limit: u32) -> Result<Vec<MessageRow>> {
    // rowid breaks ties between inserts within the same millisecond
    let sql = format!("{} ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?1", JOINED_SELECT);
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([limit], map_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!("{} WHERE m.id = ?1", JOINED_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([id], map_message).optional()?;
    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
