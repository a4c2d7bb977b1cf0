//! In-memory message store.
//!
//! Allocates message ids and keeps message text with its fingerprint.
//! Ids start at 1, increase monotonically, and are never reused.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::model::{Message, MessageId};

/// Thread-safe message table. Nothing here is persisted.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: RwLock<BTreeMap<MessageId, Message>>,
    next_id: AtomicU64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `text` under a fresh id.
    pub fn create(&self, text: impl Into<String>) -> Message {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let message = Message::new(id, text);
        self.messages.write().insert(id, message.clone());
        message
    }

    pub fn read(&self, id: MessageId) -> Option<Message> {
        self.messages.read().get(&id).cloned()
    }

    /// Replace the text of an existing message. Returns the previous and the
    /// new version, or `None` if there is no such message.
    pub fn update(&self, id: MessageId, text: impl Into<String>) -> Option<(Message, Message)> {
        let mut messages = self.messages.write();
        let slot = messages.get_mut(&id)?;
        let updated = Message::new(id, text);
        let previous = std::mem::replace(slot, updated.clone());
        Some((previous, updated))
    }

    /// Remove a message, returning it if it existed.
    pub fn delete(&self, id: MessageId) -> Option<Message> {
        self.messages.write().remove(&id)
    }

    /// All messages in ascending id order.
    pub fn list(&self) -> Vec<Message> {
        self.messages.read().values().cloned().collect()
    }

    /// Remove every message. The id counter keeps counting.
    pub fn delete_all(&self) {
        self.messages.write().clear();
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
