//! Ordered, deduplicated in-memory log of one conversation.

use std::collections::HashSet;

use tokio::sync::watch;
use tracing::debug;

use recetas_types::Message;

/// Canonical message list for one conversation.
///
/// Order is append order: the seeded history (oldest first) followed by live
/// arrivals as they were merged. Ids are unique. Observers subscribed through
/// [`MessageStore::subscribe`] see a new snapshot only when the content
/// actually changed.
pub struct MessageStore {
    messages: Vec<Message>,
    ids: HashSet<String>,
    snapshot_tx: watch::Sender<Vec<Message>>,
    loading_tx: watch::Sender<bool>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    /// An empty store in the loading state.
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(Vec::new());
        let (loading_tx, _) = watch::channel(true);
        Self {
            messages: Vec::new(),
            ids: HashSet::new(),
            snapshot_tx,
            loading_tx,
        }
    }

    /// Replace the content wholesale with `messages`, oldest first, and clear
    /// the loading flag. A repeated id keeps its first occurrence.
    pub fn seed(&mut self, messages: Vec<Message>) {
        self.messages.clear();
        self.ids.clear();
        for message in messages {
            if self.ids.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }
        debug!(count = self.messages.len(), "message store seeded");
        self.publish();
        self.set_loading(false);
    }

    /// Append `message` unless its id is already present.
    /// Returns whether it was added.
    pub fn append(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        self.publish();
        true
    }

    /// Returns whether a message with `id` was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.ids.remove(id) {
            return false;
        }
        self.messages.retain(|m| m.id != id);
        self.publish();
        true
    }

    pub fn all(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        *self.loading_tx.borrow()
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading_tx.send_if_modified(|current| {
            let changed = *current != loading;
            *current = loading;
            changed
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.snapshot_tx.subscribe()
    }

    pub fn subscribe_loading(&self) -> watch::Receiver<bool> {
        self.loading_tx.subscribe()
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.messages.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use recetas_types::AuthorDisplay;

    fn msg(id: &str, secs: i64) -> Message {
        Message {
            id: id.into(),
            author_id: "u1".into(),
            content: format!("content of {}", id),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
            author: AuthorDisplay::unknown(),
        }
    }

    fn ids(store: &MessageStore) -> Vec<String> {
        store.all().into_iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_seed_clears_loading_and_keeps_order() {
        let mut store = MessageStore::new();
        assert!(store.is_loading());

        store.seed(vec![msg("m1", 1), msg("m2", 2)]);
        assert!(!store.is_loading());
        assert_eq!(ids(&store), vec!["m1", "m2"]);
    }

    #[test]
    fn test_seed_replaces_content() {
        let mut store = MessageStore::new();
        store.seed(vec![msg("m1", 1)]);
        store.append(msg("m9", 9));
        store.seed(vec![msg("m2", 2), msg("m2", 2)]);
        assert_eq!(ids(&store), vec!["m2"]);
        assert!(!store.contains("m9"));
    }

    #[test]
    fn test_append_of_seeded_message_is_noop() {
        let mut store = MessageStore::new();
        store.seed(vec![msg("m1", 1), msg("m2", 2)]);
        let mut rx = store.subscribe();
        rx.mark_unchanged();

        assert!(!store.append(msg("m2", 2)));
        assert_eq!(store.len(), 2);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_successful_append_notifies() {
        let mut store = MessageStore::new();
        store.seed(vec![msg("m1", 1)]);
        let mut rx = store.subscribe();
        rx.mark_unchanged();

        assert!(store.append(msg("m2", 2)));
        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].id, "m2");
    }

    #[test]
    fn test_arrival_order_is_not_resorted() {
        let mut store = MessageStore::new();
        store.seed(vec![]);
        store.append(msg("late", 10));
        store.append(msg("early", 5));
        assert_eq!(ids(&store), vec!["late", "early"]);
    }

    #[test]
    fn test_no_duplicates_under_any_append_sequence() {
        let mut store = MessageStore::new();
        store.seed(vec![msg("a", 1)]);
        let sequence = ["a", "b", "a", "c", "b", "b", "d", "a"];
        let mut added = 0;
        for (i, id) in sequence.iter().enumerate() {
            if store.append(msg(id, i as i64)) {
                added += 1;
            }
        }
        assert_eq!(added, 3);
        let mut seen = HashSet::new();
        assert!(store.all().iter().all(|m| seen.insert(m.id.clone())));
        assert_eq!(ids(&store), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_remove() {
        let mut store = MessageStore::new();
        store.seed(vec![msg("m1", 1), msg("m2", 2)]);
        let mut rx = store.subscribe();
        rx.mark_unchanged();

        assert!(!store.remove("missing"));
        assert!(!rx.has_changed().unwrap());

        assert!(store.remove("m1"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(ids(&store), vec!["m2"]);

        // A removed id may arrive again and is accepted
        assert!(store.append(msg("m1", 1)));
        assert_eq!(ids(&store), vec!["m2", "m1"]);
    }
}
