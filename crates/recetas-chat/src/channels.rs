//! Ownership of the two realtime subscriptions a conversation needs.

use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use recetas_realtime::{ChannelHandle, InsertStream};
use recetas_types::{InsertedRow, TYPING_EVENT, TypingEvent};

use crate::backend::RealtimeTransport;
use crate::error::BackendError;

/// Tears a subscription down. Idempotent; also runs on drop.
pub struct Disposer {
    label: &'static str,
    token: CancellationToken,
}

impl Disposer {
    fn new(label: &'static str, token: CancellationToken) -> Self {
        Self { label, token }
    }

    /// Stop delivering callbacks. Returns false if already disposed.
    pub fn dispose(&self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        debug!(channel = self.label, "subscription disposed");
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Sending side of the typing channel. Inert once its disposer has run.
#[derive(Clone)]
pub struct TypingChannel {
    handle: ChannelHandle,
    disposed: CancellationToken,
}

impl TypingChannel {
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn is_open(&self) -> bool {
        !self.disposed.is_cancelled()
    }
}

/// An insert subscription whose rows are buffered until a callback is attached.
pub struct PendingInserts {
    inserts: InsertStream,
    table: String,
}

impl PendingInserts {
    /// Start delivering rows, buffered ones first, to `on_insert`.
    pub fn listen<F, Fut>(self, on_insert: F) -> Disposer
    where
        F: Fn(InsertedRow) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Self { mut inserts, table } = self;
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            loop {
                let row = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    next = inserts.next() => match next {
                        Some(row) => row,
                        None => break,
                    },
                };
                on_insert(row).await;
            }
            debug!("Stopped listening for inserts on '{}'", table);
        });

        Disposer::new("messages", token)
    }
}

/// Opens the message-insert and typing-broadcast subscriptions.
#[derive(Clone)]
pub struct ChannelLifecycle {
    transport: Arc<dyn RealtimeTransport>,
    message_table: String,
    typing_channel: String,
}

impl ChannelLifecycle {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        message_table: impl Into<String>,
        typing_channel: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            message_table: message_table.into(),
            typing_channel: typing_channel.into(),
        }
    }

    /// Subscribe to inserts on the message table. `on_insert` receives every
    /// raw row, one at a time and in arrival order.
    pub async fn open_message_channel<F, Fut>(&self, on_insert: F) -> Result<Disposer, BackendError>
    where
        F: Fn(InsertedRow) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Ok(self.subscribe_messages().await?.listen(on_insert))
    }

    /// Subscribe to inserts on the message table without delivering them yet.
    /// Rows inserted from now on are held until [`PendingInserts::listen`].
    pub async fn subscribe_messages(&self) -> Result<PendingInserts, BackendError> {
        let inserts = self.transport.subscribe_insert(&self.message_table).await?;
        info!("Subscribed to inserts on '{}'", self.message_table);
        Ok(PendingInserts {
            inserts,
            table: self.message_table.clone(),
        })
    }

    /// Open the typing broadcast channel. `on_broadcast` receives every
    /// well-formed [`TypingEvent`]; malformed payloads are logged and skipped.
    pub async fn open_typing_channel<F>(
        &self,
        on_broadcast: F,
    ) -> Result<(Disposer, TypingChannel), BackendError>
    where
        F: Fn(TypingEvent) + Send + Sync + 'static,
    {
        let handle = self.transport.open_broadcast_channel(&self.typing_channel).await?;
        let mut payloads = match self.transport.on_broadcast(&handle, TYPING_EVENT).await {
            Ok(payloads) => payloads,
            Err(e) => {
                self.transport.close(&handle).await;
                return Err(e);
            }
        };

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let transport = self.transport.clone();
        let task_handle = handle.clone();

        tokio::spawn(async move {
            loop {
                let payload = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    next = payloads.next() => match next {
                        Some(payload) => payload,
                        None => break,
                    },
                };
                match serde_json::from_value::<TypingEvent>(payload) {
                    Ok(event) => on_broadcast(event),
                    Err(e) => warn!("Ignoring malformed typing payload: {}", e),
                }
            }
            transport.close(&task_handle).await;
            debug!("Typing channel '{}' closed", task_handle.name());
        });

        info!("Joined typing channel '{}'", self.typing_channel);
        let channel = TypingChannel {
            handle,
            disposed: token.clone(),
        };
        Ok((Disposer::new("typing", token), channel))
    }

    /// Broadcast `event` on the typing channel without waiting. Failures are
    /// logged; after disposal this does nothing.
    pub fn send_typing(&self, channel: &TypingChannel, event: TypingEvent) {
        if !channel.is_open() {
            debug!("Typing channel disposed, not announcing");
            return;
        }
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode typing event: {}", e);
                return;
            }
        };

        let transport = self.transport.clone();
        let handle = channel.handle.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.broadcast(&handle, TYPING_EVENT, payload).await {
                warn!("Typing announcement failed: {}", e);
            }
        });
    }
}
