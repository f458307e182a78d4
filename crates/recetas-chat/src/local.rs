//! SQLite-backed repository that announces its inserts on the realtime hub,
//! standing in for a managed backend with change notifications.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use recetas_db::Database;
use recetas_realtime::Hub;
use recetas_types::{InsertedRow, JoinedRow};

use crate::backend::MessageRepository;
use crate::error::BackendError;

#[derive(Clone)]
pub struct LocalBackend {
    db: Arc<Database>,
    hub: Hub,
    table: String,
}

impl LocalBackend {
    /// Inserts are announced on `hub` as rows of `table`.
    pub fn new(db: Arc<Database>, hub: Hub, table: impl Into<String>) -> Self {
        Self {
            db,
            hub,
            table: table.into(),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Run a blocking DB call off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T, BackendError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                BackendError::Internal(e.to_string())
            })?
            .map_err(|e| BackendError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl MessageRepository for LocalBackend {
    async fn list_recent(&self, limit: u32) -> Result<Vec<JoinedRow>, BackendError> {
        let rows = self.blocking(move |db| db.get_recent_messages(limit)).await?;
        Ok(rows.into_iter().map(|row| row.into_joined()).collect())
    }

    async fn insert(&self, content: &str, author_id: &str) -> Result<InsertedRow, BackendError> {
        let content = content.to_string();
        let author_id = author_id.to_string();
        let row = self
            .blocking(move |db| db.insert_message(&author_id, &content))
            .await?
            .into_inserted();

        self.hub.publish_insert(&self.table, row.clone()).await;
        Ok(row)
    }

    async fn fetch_by_id(&self, id: &str) -> Result<JoinedRow, BackendError> {
        let key = id.to_string();
        self.blocking(move |db| db.get_message(&key))
            .await?
            .map(|row| row.into_joined())
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), BackendError> {
        let key = id.to_string();
        let deleted = self.blocking(move |db| db.delete_message(&key)).await?;
        if !deleted {
            // Deleting an absent row is not an error, same as the hosted backend
            debug!(id, "delete matched no rows");
        }
        Ok(())
    }
}
