#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use recetas_chat::{BackendError, ChatConfig, ChatSyncEngine, MessageRepository, SessionIdentity};
use recetas_realtime::Hub;
use recetas_types::{AuthorDisplay, Identity, InsertedRow, JoinedRow, TYPING_EVENT, TypingEvent};

pub const TABLE: &str = "mensajes";
pub const TYPING_CHANNEL: &str = "typing-channel";

/// In-memory repository that announces inserts on a hub, with switchable
/// failures and call counters.
pub struct FakeRepository {
    hub: Hub,
    rows: Mutex<Vec<JoinedRow>>,
    users: Mutex<HashMap<String, AuthorDisplay>>,
    next_id: AtomicUsize,
    list_delay: Mutex<Duration>,
    list_response_delay: Mutex<Duration>,
    fetch_delay: Mutex<Duration>,

    pub fail_list: AtomicBool,
    pub fail_fetch: AtomicBool,
    pub fail_insert: AtomicBool,
    pub fail_delete: AtomicBool,

    pub list_calls: AtomicUsize,
    pub insert_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl FakeRepository {
    pub fn new(hub: Hub) -> Self {
        Self {
            hub,
            rows: Mutex::new(Vec::new()),
            users: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(100),
            list_delay: Mutex::new(Duration::ZERO),
            list_response_delay: Mutex::new(Duration::ZERO),
            fetch_delay: Mutex::new(Duration::ZERO),
            fail_list: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            fail_insert: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            insert_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn add_user(&self, id: &str, email: &str, role: &str) {
        self.users.lock().unwrap().insert(
            id.to_string(),
            AuthorDisplay {
                email: email.to_string(),
                role: role.to_string(),
            },
        );
    }

    /// Store a row created `secs` seconds after the epoch, bypassing notifications.
    pub fn put(&self, id: &str, author_id: &str, secs: i64) {
        let author = self.users.lock().unwrap().get(author_id).cloned();
        self.rows.lock().unwrap().push(JoinedRow {
            id: id.to_string(),
            content: format!("content of {}", id),
            author_id: author_id.to_string(),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            author,
        });
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    /// Delay the history response after its snapshot has been taken.
    pub fn set_list_response_delay(&self, delay: Duration) {
        *self.list_response_delay.lock().unwrap() = delay;
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn total_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
            + self.insert_calls.load(Ordering::SeqCst)
            + self.fetch_calls.load(Ordering::SeqCst)
            + self.delete_calls.load(Ordering::SeqCst)
    }

    fn unavailable(&self, flag: &AtomicBool, what: &str) -> Result<(), BackendError> {
        if flag.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable(format!("{} failed: connection reset", what)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MessageRepository for FakeRepository {
    async fn list_recent(&self, limit: u32) -> Result<Vec<JoinedRow>, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.unavailable(&self.fail_list, "list")?;

        let mut rows = self.rows.lock().unwrap().clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit as usize);

        let delay = *self.list_response_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(rows)
    }

    async fn insert(&self, content: &str, author_id: &str) -> Result<InsertedRow, BackendError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.unavailable(&self.fail_insert, "insert")?;

        let id = format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let row = InsertedRow {
            id: id.clone(),
            content: content.to_string(),
            author_id: author_id.to_string(),
            created_at: Utc::now(),
        };
        let author = self.users.lock().unwrap().get(author_id).cloned();
        self.rows.lock().unwrap().push(JoinedRow {
            id,
            content: row.content.clone(),
            author_id: row.author_id.clone(),
            created_at: row.created_at,
            author,
        });

        self.hub.publish_insert(TABLE, row.clone()).await;
        Ok(row)
    }

    async fn fetch_by_id(&self, id: &str) -> Result<JoinedRow, BackendError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.unavailable(&self.fail_fetch, "fetch")?;

        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), BackendError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.unavailable(&self.fail_delete, "delete")?;
        self.rows.lock().unwrap().retain(|r| r.id != id);
        Ok(())
    }
}

/// An engine wired to a fake repository and an in-process hub.
pub struct Harness {
    pub hub: Hub,
    pub repo: Arc<FakeRepository>,
    pub identity: Arc<SessionIdentity>,
    pub engine: ChatSyncEngine,
}

impl Harness {
    pub fn new(user_id: &str) -> Self {
        let hub = Hub::new();
        let repo = Arc::new(FakeRepository::new(hub.clone()));
        repo.add_user(user_id, &format!("{}@example.com", user_id), "user");
        let identity = Arc::new(SessionIdentity::signed_in(Identity {
            user_id: user_id.to_string(),
            email: format!("{}@example.com", user_id),
        }));
        let engine = ChatSyncEngine::new(
            ChatConfig::default(),
            repo.clone(),
            Arc::new(hub.clone()),
            identity.clone(),
        );
        Self {
            hub,
            repo,
            identity,
            engine,
        }
    }

    /// A second engine for another user on the same hub and repository.
    pub fn peer(&self, user_id: &str) -> ChatSyncEngine {
        self.repo
            .add_user(user_id, &format!("{}@example.com", user_id), "user");
        ChatSyncEngine::new(
            ChatConfig::default(),
            self.repo.clone(),
            Arc::new(self.hub.clone()),
            Arc::new(SessionIdentity::signed_in(Identity {
                user_id: user_id.to_string(),
                email: format!("{}@example.com", user_id),
            })),
        )
    }

    pub fn ids(&self) -> Vec<String> {
        self.engine.snapshot().into_iter().map(|m| m.id).collect()
    }
}

pub fn raw(id: &str, author_id: &str) -> InsertedRow {
    InsertedRow {
        id: id.to_string(),
        content: format!("content of {}", id),
        author_id: author_id.to_string(),
        created_at: Utc::now(),
    }
}

/// Broadcast a typing event for `peer` the way a remote client would.
pub async fn peer_typing(hub: &Hub, peer: &str) {
    let handle = hub.open_channel(TYPING_CHANNEL).await;
    let event = TypingEvent {
        peer_id: peer.to_string(),
        peer_display_name: format!("{}@example.com", peer),
        emitted_at: Utc::now(),
    };
    hub.broadcast(&handle, TYPING_EVENT, serde_json::to_value(event).unwrap())
        .await
        .unwrap();
    hub.close(&handle).await;
}

/// Let spawned tasks run. With a paused clock every ready task runs before
/// time moves.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Poll `check` until it holds or about two seconds pass.
pub async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
