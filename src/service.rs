//! Message workflow: keeps every stored message subscribed to the palindrome
//! work for its current text.
//!
//! Request handlers call into [`Messages`] only. It resolves a message in the
//! store first and then talks to the orchestrator with the message id as the
//! requester.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{Message, MessageId, Outcome};
use crate::orchestrator::Orchestrator;
use crate::store::MessageStore;

/// A message together with the current state of its palindrome work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub id: MessageId,
    pub text: String,
    pub outcome: Outcome,
}

/// Store plus orchestrator, shared by all request handlers.
#[derive(Clone)]
pub struct Messages {
    store: Arc<MessageStore>,
    orchestrator: Arc<dyn Orchestrator>,
}

impl std::fmt::Debug for Messages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messages")
            .field("messages", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl Messages {
    pub fn new(store: Arc<MessageStore>, orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }

    /// Store a new message and start (or join) its palindrome work.
    pub fn create(&self, text: impl Into<String>) -> Message {
        let message = self.store.create(text);
        self.subscribe(&message);
        info!(id = %message.id, fingerprint = %message.fingerprint, "message created");
        message
    }

    pub fn get(&self, id: MessageId) -> Option<MessageView> {
        let message = self.store.read(id)?;
        Some(self.view(message))
    }

    /// Replace a message's text, moving its subscription to the new work.
    ///
    /// The new work is attached before the old subscription is dropped so
    /// that work shared with the old text by other messages is unaffected.
    pub fn update(&self, id: MessageId, text: impl Into<String>) -> Result<Message> {
        let (previous, updated) = self
            .store
            .update(id, text)
            .ok_or_else(|| Error::NotFound(format!("message {id}")))?;

        if previous.fingerprint == updated.fingerprint {
            debug!(%id, "text unchanged, keeping subscription");
            return Ok(updated);
        }

        self.subscribe(&updated);
        self.release(&previous);

        info!(
            %id,
            from = %previous.fingerprint,
            to = %updated.fingerprint,
            "message updated"
        );
        Ok(updated)
    }

    pub fn delete(&self, id: MessageId) -> Result<()> {
        let message = self
            .store
            .delete(id)
            .ok_or_else(|| Error::NotFound(format!("message {id}")))?;
        self.release(&message);
        info!(%id, "message deleted");
        Ok(())
    }

    /// All messages in ascending id order.
    pub fn list(&self) -> Vec<MessageView> {
        self.store
            .list()
            .into_iter()
            .map(|message| self.view(message))
            .collect()
    }

    /// Remove every message and cancel all outstanding work.
    pub fn delete_all(&self) -> Result<()> {
        self.store.delete_all();
        self.orchestrator.clear_all()?;
        info!("all messages deleted");
        Ok(())
    }

    fn view(&self, message: Message) -> MessageView {
        let outcome = match self.orchestrator.poll(message.id, &message.fingerprint) {
            Some(snapshot) => snapshot.outcome,
            None => {
                // A message can briefly exist before its work is attached.
                // Attaching again is harmless: it either joins or re-creates.
                debug!(id = %message.id, "no work tracked for message, re-attaching");
                self.subscribe(&message)
            }
        };

        MessageView {
            id: message.id,
            text: message.text,
            outcome,
        }
    }

    /// Attach `message` to the work for its text.
    ///
    /// A delete (or update) can land between the store write and the attach,
    /// and its detach then finds nothing to release. Re-reading the store
    /// afterwards catches that case so the subscription does not outlive the
    /// message text it was made for.
    fn subscribe(&self, message: &Message) -> Outcome {
        let outcome = self
            .orchestrator
            .attach(message.id, &message.fingerprint, &message.text)
            .outcome;

        let current = self.store.read(message.id);
        if current.is_none_or(|stored| stored.fingerprint != message.fingerprint) {
            debug!(id = %message.id, "message changed while attaching, releasing");
            // The racing call may already have released it.
            let _ = self.orchestrator.detach(message.id, &message.fingerprint);
        }
        outcome
    }

    fn release(&self, message: &Message) {
        let key = message.subscriber_key();
        if let Err(e) = self.orchestrator.detach(key.requester, &key.fingerprint) {
            warn!(id = %key.requester, error = %e, "detach failed");
        }
    }
}
