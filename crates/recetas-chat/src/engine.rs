use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use recetas_types::{InsertedRow, Message, TypingEvent};

use crate::backend::{IdentityProvider, MessageRepository, RealtimeTransport};
use crate::channels::{ChannelLifecycle, Disposer, PendingInserts, TypingChannel};
use crate::config::ChatConfig;
use crate::error::{BackendError, DeleteError, SendError, ValidationError};
use crate::presence::{PresenceEntry, PresenceTracker};
use crate::store::MessageStore;

/// Keeps one conversation feed in sync with the backend.
///
/// `start` seeds the store from history and then opens the live channels;
/// `stop` tears them down. Clones share the same engine.
#[derive(Clone)]
pub struct ChatSyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: ChatConfig,
    repository: Arc<dyn MessageRepository>,
    identity: Arc<dyn IdentityProvider>,
    channels: ChannelLifecycle,
    store: Mutex<MessageStore>,
    presence: PresenceTracker,
    sending_tx: watch::Sender<bool>,
    sends_in_flight: AtomicUsize,
    /// Bumped by every `start`; work tagged with an older epoch is discarded
    epoch: AtomicU64,
    session: Mutex<Option<Session>>,
}

struct Session {
    epoch: u64,
    local_user_id: String,
    message_channel: Option<Disposer>,
    typing: Option<(Disposer, TypingChannel)>,
}

/// Lifecycle handle returned by [`ChatSyncEngine::start`].
#[must_use = "dropping the handle stops the session"]
pub struct SessionHandle {
    inner: Weak<EngineInner>,
    epoch: u64,
}

impl SessionHandle {
    /// Stop the session this handle belongs to. A newer session started on
    /// the same engine is left running. Idempotent.
    pub fn stop(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.stop_session(Some(self.epoch)),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.is_current(self.epoch))
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Check content locally, before anything reaches the network.
pub fn validate_content(content: &str, max_chars: usize) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let len = content.chars().count();
    if len > max_chars {
        return Err(ValidationError::TooLong { len, max: max_chars });
    }
    Ok(())
}

impl ChatSyncEngine {
    pub fn new(
        config: ChatConfig,
        repository: Arc<dyn MessageRepository>,
        transport: Arc<dyn RealtimeTransport>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let channels = ChannelLifecycle::new(
            transport,
            config.message_table.clone(),
            config.typing_channel.clone(),
        );
        let presence = PresenceTracker::new(config.typing_ttl, config.announce_interval);
        let (sending_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(EngineInner {
                config,
                repository,
                identity,
                channels,
                store: Mutex::new(MessageStore::new()),
                presence,
                sending_tx,
                sends_in_flight: AtomicUsize::new(0),
                epoch: AtomicU64::new(0),
                session: Mutex::new(None),
            }),
        }
    }

    /// Load the most recent history, seed the store, then open the message
    /// and typing channels. Never fails: a history error opens the chat empty
    /// and a channel error leaves the chat without that live feed. A running
    /// session is stopped first.
    pub async fn start(&self, local_user_id: &str) -> SessionHandle {
        self.stop();

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *self.inner.session() = Some(Session {
            epoch,
            local_user_id: local_user_id.to_string(),
            message_channel: None,
            typing: None,
        });
        self.inner.presence.set_local_user(local_user_id);
        let handle = SessionHandle {
            inner: Arc::downgrade(&self.inner),
            epoch,
        };
        info!(user = local_user_id, "Starting chat session");

        // Subscribe before loading so rows inserted during the load are held
        // and delivered after the seed; the store drops the overlap.
        let pending = match self.inner.channels.subscribe_messages().await {
            Ok(pending) => Some(pending),
            Err(e) => {
                error!("Failed to subscribe to new messages: {}", e);
                None
            }
        };

        self.inner.store().set_loading(true);
        let messages = self.fetch_history().await.unwrap_or_else(|e| {
            error!("Failed to load message history, opening empty: {}", e);
            Vec::new()
        });
        if !self.inner.is_current(epoch) {
            debug!("Session stopped during history load");
            if self.inner.current_epoch().is_none() {
                self.inner.store().set_loading(false);
            }
            return handle;
        }
        info!(count = messages.len(), "Loaded message history");
        self.inner.store().seed(messages);

        let message_channel = pending.map(|pending| self.listen_for_inserts(pending, epoch));
        let typing = self.open_typing_channel(epoch).await;

        let mut session = self.inner.session();
        match session.as_mut() {
            Some(current) if current.epoch == epoch => {
                current.message_channel = message_channel;
                current.typing = typing;
            }
            // Stopped while the channels were opening; dropping the disposers closes them
            _ => debug!("Session stopped while opening channels"),
        }

        handle
    }

    /// Dispose both channels and clear typing presence. Idempotent.
    pub fn stop(&self) -> bool {
        self.inner.stop_session(None)
    }

    /// Reload the history and reseed the store. Messages delivered live while
    /// the reload was in flight are kept after the reloaded history. On
    /// failure the current messages stay in place.
    pub async fn reload(&self) -> Result<(), BackendError> {
        let Some(epoch) = self.inner.current_epoch() else {
            debug!("Reload requested without an active session");
            return Ok(());
        };

        let known: HashSet<String> = {
            let store = self.inner.store();
            store.set_loading(true);
            store.all().into_iter().map(|m| m.id).collect()
        };
        match self.fetch_history().await {
            Ok(mut messages) => {
                if self.inner.is_current(epoch) {
                    let mut store = self.inner.store();
                    let arrived = store.all().into_iter().filter(|m| !known.contains(&m.id));
                    messages.extend(arrived);
                    store.seed(messages);
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to reload message history: {}", e);
                if self.inner.is_current(epoch) {
                    self.inner.store().set_loading(false);
                }
                Err(e)
            }
        }
    }

    /// Persist a new message as the signed-in user. The message shows up in
    /// the store once its insert notification arrives.
    pub async fn send(&self, content: &str) -> Result<(), SendError> {
        validate_content(content, self.inner.config.max_content_chars)?;

        let Some(identity) = self.inner.identity.current_user() else {
            warn!("Refusing to send without a signed-in user");
            return Err(SendError::Unauthenticated);
        };

        let _sending = SendingGuard::new(&self.inner);
        match self.inner.repository.insert(content, &identity.user_id).await {
            Ok(row) => {
                debug!(id = %row.id, "Message persisted");
                Ok(())
            }
            Err(e) => {
                error!("Failed to send message: {}", e);
                Err(SendError::Transport(e.to_string()))
            }
        }
    }

    /// Delete a message remotely, then drop it from the store.
    pub async fn delete(&self, message_id: &str) -> Result<(), DeleteError> {
        let epoch = self.inner.current_epoch();

        if let Err(e) = self.inner.repository.delete_by_id(message_id).await {
            error!(id = message_id, "Failed to delete message: {}", e);
            return Err(DeleteError::Transport(e.to_string()));
        }

        match epoch {
            Some(epoch) if self.inner.is_current(epoch) => {
                self.inner.store().remove(message_id);
            }
            _ => debug!(id = message_id, "Delete finished after stop, store untouched"),
        }
        Ok(())
    }

    /// Merge a raw insert notification into the store, enriched with the
    /// author's display info when the lookup succeeds.
    pub async fn on_insert_notification(&self, raw: InsertedRow) {
        match self.inner.current_epoch() {
            Some(epoch) => self.apply_insert(epoch, raw).await,
            None => debug!(id = %raw.id, "Insert notification without an active session"),
        }
    }

    /// Announce that the local user is typing, at most once per announce
    /// interval. Returns whether an announcement was sent.
    pub fn notify_typing(&self) -> bool {
        let Some(channel) = self.inner.typing_channel() else {
            return false;
        };
        let Some(identity) = self.inner.identity.current_user() else {
            return false;
        };
        if !self.inner.presence.should_announce(Instant::now()) {
            return false;
        }

        self.inner.channels.send_typing(
            &channel,
            TypingEvent {
                peer_id: identity.user_id,
                peer_display_name: identity.email,
                emitted_at: Utc::now(),
            },
        );
        true
    }

    // -- Observable state --

    pub fn messages(&self) -> watch::Receiver<Vec<Message>> {
        self.inner.store().subscribe()
    }

    pub fn loading(&self) -> watch::Receiver<bool> {
        self.inner.store().subscribe_loading()
    }

    pub fn sending(&self) -> watch::Receiver<bool> {
        self.inner.sending_tx.subscribe()
    }

    pub fn typing(&self) -> watch::Receiver<Vec<PresenceEntry>> {
        self.inner.presence.subscribe()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.store().all()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.store().is_loading()
    }

    pub fn is_sending(&self) -> bool {
        *self.inner.sending_tx.borrow()
    }

    pub fn currently_typing(&self) -> Vec<PresenceEntry> {
        self.inner.presence.currently_typing()
    }

    pub fn typing_label(&self) -> Option<String> {
        self.inner.presence.typing_label()
    }

    pub fn is_running(&self) -> bool {
        self.inner.current_epoch().is_some()
    }

    pub fn local_user_id(&self) -> Option<String> {
        self.inner.session().as_ref().map(|s| s.local_user_id.clone())
    }

    // -- Internals --

    async fn fetch_history(&self) -> Result<Vec<Message>, BackendError> {
        let rows = self
            .inner
            .repository
            .list_recent(self.inner.config.history_limit)
            .await?;
        // Newest first from the backend, oldest first in the feed
        Ok(rows.into_iter().rev().map(Message::from).collect())
    }

    async fn apply_insert(&self, epoch: u64, raw: InsertedRow) {
        let message = match self.inner.repository.fetch_by_id(&raw.id).await {
            Ok(joined) => Message::from(joined),
            Err(e) => {
                warn!(id = %raw.id, "Could not fetch full message, using notification fields: {}", e);
                Message::from(raw)
            }
        };

        if !self.inner.is_current(epoch) {
            debug!(id = %message.id, "Discarding insert for a stopped session");
            return;
        }

        let id = message.id.clone();
        if self.inner.store().append(message) {
            debug!(id = %id, "Message appended");
        } else {
            debug!(id = %id, "Duplicate insert notification ignored");
        }
    }

    fn listen_for_inserts(&self, pending: PendingInserts, epoch: u64) -> Disposer {
        let engine = Arc::downgrade(&self.inner);
        pending.listen(move |row| {
            let engine = engine.clone();
            async move {
                if let Some(inner) = engine.upgrade() {
                    ChatSyncEngine { inner }.apply_insert(epoch, row).await;
                }
            }
        })
    }

    async fn open_typing_channel(&self, epoch: u64) -> Option<(Disposer, TypingChannel)> {
        let engine = Arc::downgrade(&self.inner);
        let opened = self
            .inner
            .channels
            .open_typing_channel(move |event| {
                if let Some(inner) = engine.upgrade() {
                    if inner.is_current(epoch) {
                        inner.presence.record_event(event, Instant::now());
                    }
                }
            })
            .await;

        opened
            .map_err(|e| warn!("Typing presence unavailable: {}", e))
            .ok()
    }
}

impl EngineInner {
    fn store(&self) -> MutexGuard<'_, MessageStore> {
        self.store.lock().expect("message store lock poisoned")
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().expect("session lock poisoned")
    }

    fn current_epoch(&self) -> Option<u64> {
        self.session().as_ref().map(|s| s.epoch)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.current_epoch() == Some(epoch)
    }

    fn typing_channel(&self) -> Option<TypingChannel> {
        self.session()
            .as_ref()
            .and_then(|s| s.typing.as_ref())
            .map(|(_, channel)| channel.clone())
    }

    /// Tear down the active session, or only the one tagged `epoch`.
    fn stop_session(&self, epoch: Option<u64>) -> bool {
        let session = {
            let mut guard = self.session();
            let owned = match (guard.as_ref(), epoch) {
                (None, _) => false,
                (Some(current), Some(epoch)) => current.epoch == epoch,
                (Some(_), None) => true,
            };
            if !owned {
                return false;
            }
            guard.take()
        };
        let Some(session) = session else {
            return false;
        };

        if let Some(disposer) = &session.message_channel {
            disposer.dispose();
        }
        if let Some((disposer, _)) = &session.typing {
            disposer.dispose();
        }
        self.presence.clear();
        info!(user = %session.local_user_id, "Chat session stopped");
        true
    }
}

/// Keeps the `sending` flag raised while at least one send is in flight.
struct SendingGuard<'a> {
    inner: &'a EngineInner,
}

impl<'a> SendingGuard<'a> {
    fn new(inner: &'a EngineInner) -> Self {
        if inner.sends_in_flight.fetch_add(1, Ordering::SeqCst) == 0 {
            inner.sending_tx.send_replace(true);
        }
        Self { inner }
    }
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        if self.inner.sends_in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.sending_tx.send_replace(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_blank_content() {
        assert_eq!(validate_content("", 500), Err(ValidationError::Empty));
        assert_eq!(validate_content(" \n\t ", 500), Err(ValidationError::Empty));
        assert_eq!(validate_content(" hola ", 500), Ok(()));
    }

    #[test]
    fn test_validate_counts_characters_not_bytes() {
        let accented = "ñ".repeat(500);
        assert!(accented.len() > 500);
        assert_eq!(validate_content(&accented, 500), Ok(()));
        assert_eq!(
            validate_content(&"a".repeat(501), 500),
            Err(ValidationError::TooLong { len: 501, max: 500 })
        );
    }
}
