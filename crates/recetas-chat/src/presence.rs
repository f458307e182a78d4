//! "Who is typing" tracking with per-peer expiry, plus the throttle that
//! gates the local user's own typing announcements.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use recetas_types::TypingEvent;

/// A peer currently composing a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub peer_id: String,
    pub peer_display_name: String,
    pub expires_at: Instant,
}

impl PresenceEntry {
    /// Short name for the typing indicator: the local part of an email address.
    pub fn short_name(&self) -> &str {
        self.peer_display_name
            .split('@')
            .next()
            .unwrap_or(&self.peer_display_name)
    }
}

/// Tracks typing peers. Each peer owns at most one expiry timer, aborted and
/// re-armed on every event from that peer. Clones share state.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    state: Mutex<PresenceState>,
    typing_tx: watch::Sender<Vec<PresenceEntry>>,
    ttl: Duration,
    announce_interval: Duration,
}

#[derive(Default)]
struct PresenceState {
    local_user_id: Option<String>,
    /// Insertion order; an overwrite keeps the peer's position
    entries: Vec<PresenceEntry>,
    timers: HashMap<String, AbortHandle>,
    last_announce: Option<Instant>,
}

impl PresenceTracker {
    pub fn new(ttl: Duration, announce_interval: Duration) -> Self {
        let (typing_tx, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(TrackerInner {
                state: Mutex::new(PresenceState::default()),
                typing_tx,
                ttl,
                announce_interval,
            }),
        }
    }

    /// Events from this user are ignored.
    pub fn set_local_user(&self, user_id: &str) {
        self.state().local_user_id = Some(user_id.to_string());
    }

    /// Record a typing event received at `now`. Returns false for the local
    /// user's own echo.
    ///
    /// Must be called inside a tokio runtime: the peer's expiry timer is
    /// spawned as a task.
    pub fn record_event(&self, event: TypingEvent, now: Instant) -> bool {
        let expires_at = now + self.inner.ttl;
        let mut state = self.state();

        if state.local_user_id.as_deref() == Some(event.peer_id.as_str()) {
            trace!(peer = %event.peer_id, "ignoring own typing echo");
            return false;
        }

        match state.entries.iter_mut().find(|e| e.peer_id == event.peer_id) {
            Some(entry) => {
                entry.peer_display_name = event.peer_display_name;
                entry.expires_at = expires_at;
            }
            None => {
                debug!(peer = %event.peer_id, "peer started typing");
                state.entries.push(PresenceEntry {
                    peer_id: event.peer_id.clone(),
                    peer_display_name: event.peer_display_name,
                    expires_at,
                });
            }
        }

        if let Some(previous) = state.timers.remove(&event.peer_id) {
            previous.abort();
        }
        let timer = spawn_expiry(Arc::downgrade(&self.inner), event.peer_id.clone(), expires_at);
        state.timers.insert(event.peer_id, timer);

        self.publish(&state);
        true
    }

    /// Remove `peer_id` if its entry has expired at `now`. A stale timer that
    /// fires after a newer event re-armed the peer finds a later deadline and
    /// leaves the entry alone.
    pub fn expire(&self, peer_id: &str, now: Instant) -> bool {
        self.inner.expire(peer_id, now)
    }

    /// Currently typing peers in insertion order.
    pub fn currently_typing(&self) -> Vec<PresenceEntry> {
        self.state().entries.clone()
    }

    pub fn is_typing(&self, peer_id: &str) -> bool {
        self.state().entries.iter().any(|e| e.peer_id == peer_id)
    }

    /// Gate for the local user's own announcements: true at most once per
    /// announce interval. The caller sends when this returns true.
    pub fn should_announce(&self, now: Instant) -> bool {
        let interval = self.inner.announce_interval;
        let mut state = self.state();
        let allowed = match state.last_announce {
            Some(last) => now.saturating_duration_since(last) >= interval,
            None => true,
        };
        if allowed {
            state.last_announce = Some(now);
        }
        allowed
    }

    /// Indicator text such as "ana is typing" or "ana, luis are typing".
    pub fn typing_label(&self) -> Option<String> {
        let state = self.state();
        let names: Vec<&str> = state.entries.iter().map(|e| e.short_name()).collect();
        match names.len() {
            0 => None,
            1 => Some(format!("{} is typing", names[0])),
            _ => Some(format!("{} are typing", names.join(", "))),
        }
    }

    /// Abort every timer and forget every peer.
    pub fn clear(&self) {
        let mut state = self.state();
        for (_, timer) in state.timers.drain() {
            timer.abort();
        }
        state.last_announce = None;
        if !state.entries.is_empty() {
            state.entries.clear();
            self.publish(&state);
        }
    }

    /// Number of armed expiry timers.
    pub fn pending_timers(&self) -> usize {
        self.state().timers.len()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<PresenceEntry>> {
        self.inner.typing_tx.subscribe()
    }

    fn state(&self) -> MutexGuard<'_, PresenceState> {
        self.inner.state()
    }

    fn publish(&self, state: &PresenceState) {
        self.inner.typing_tx.send_replace(state.entries.clone());
    }
}

impl TrackerInner {
    fn state(&self) -> MutexGuard<'_, PresenceState> {
        self.state.lock().expect("presence lock poisoned")
    }

    fn expire(&self, peer_id: &str, now: Instant) -> bool {
        let mut state = self.state();
        let Some(pos) = state.entries.iter().position(|e| e.peer_id == peer_id) else {
            return false;
        };
        if now < state.entries[pos].expires_at {
            return false;
        }

        state.entries.remove(pos);
        if let Some(timer) = state.timers.remove(peer_id) {
            timer.abort();
        }
        debug!(peer = peer_id, "peer stopped typing");
        self.typing_tx.send_replace(state.entries.clone());
        true
    }
}

fn spawn_expiry(tracker: Weak<TrackerInner>, peer_id: String, deadline: Instant) -> AbortHandle {
    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        if let Some(tracker) = tracker.upgrade() {
            tracker.expire(&peer_id, Instant::now());
        }
    })
    .abort_handle()
}
