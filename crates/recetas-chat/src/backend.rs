//! Collaborator seams: persistence, realtime transport and identity.

use std::sync::RwLock;

use async_trait::async_trait;

use recetas_realtime::{BroadcastStream, ChannelHandle, Hub, InsertStream};
use recetas_types::{Identity, InsertedRow, JoinedRow};

use crate::error::BackendError;

/// Persistence/query service holding the conversation's messages.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Newest first.
    async fn list_recent(&self, limit: u32) -> Result<Vec<JoinedRow>, BackendError>;

    async fn insert(&self, content: &str, author_id: &str) -> Result<InsertedRow, BackendError>;

    /// The message joined with its author's display info.
    async fn fetch_by_id(&self, id: &str) -> Result<JoinedRow, BackendError>;

    async fn delete_by_id(&self, id: &str) -> Result<(), BackendError>;
}

/// Publish/subscribe transport. Delivery is at-least-once.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Dropping the stream unsubscribes.
    async fn subscribe_insert(&self, table: &str) -> Result<InsertStream, BackendError>;

    async fn open_broadcast_channel(&self, name: &str) -> Result<ChannelHandle, BackendError>;

    async fn broadcast(
        &self,
        handle: &ChannelHandle,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), BackendError>;

    async fn on_broadcast(
        &self,
        handle: &ChannelHandle,
        event: &str,
    ) -> Result<BroadcastStream, BackendError>;

    async fn close(&self, handle: &ChannelHandle);
}

#[async_trait]
impl RealtimeTransport for Hub {
    async fn subscribe_insert(&self, table: &str) -> Result<InsertStream, BackendError> {
        Ok(Hub::subscribe_insert(self, table).await)
    }

    async fn open_broadcast_channel(&self, name: &str) -> Result<ChannelHandle, BackendError> {
        Ok(self.open_channel(name).await)
    }

    async fn broadcast(
        &self,
        handle: &ChannelHandle,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), BackendError> {
        Ok(Hub::broadcast(self, handle, event, payload).await?)
    }

    async fn on_broadcast(
        &self,
        handle: &ChannelHandle,
        event: &str,
    ) -> Result<BroadcastStream, BackendError> {
        Ok(Hub::on_broadcast(self, handle, event).await?)
    }

    async fn close(&self, handle: &ChannelHandle) {
        Hub::close(self, handle).await
    }
}

/// Source of the currently signed-in user.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<Identity>;
}

/// Identity held in memory, switched by sign in / sign out.
#[derive(Default)]
pub struct SessionIdentity {
    current: RwLock<Option<Identity>>,
}

impl SessionIdentity {
    pub fn signed_in(identity: Identity) -> Self {
        Self {
            current: RwLock::new(Some(identity)),
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        *self.current.write().expect("identity lock poisoned") = Some(identity);
    }

    pub fn sign_out(&self) {
        *self.current.write().expect("identity lock poisoned") = None;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_user(&self) -> Option<Identity> {
        self.current.read().expect("identity lock poisoned").clone()
    }
}
