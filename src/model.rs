//! Core data model.
//!
//! A message is a piece of text with an identity. Its fingerprint is the
//! dedup key for palindrome work: equal text means one shared computation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Hex-encoded SHA-256 digest of a payload. Equal payloads share work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint the UTF-8 bytes of `text`.
    pub fn of(text: &str) -> Self {
        let digest = Sha256::digest(text.as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 hex chars, or all of a shorter/non-hex value
        write!(f, "{}", self.0.get(..8).unwrap_or(self.0.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The answer a work function gives for one payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Not computed yet, or the input was empty.
    Unknown,
    True,
    False,
    /// The work function could not produce an answer. Terminal.
    Failed(String),
}

/// Current state of a computation: a verdict plus whether it is final.
///
/// `done == false` always carries [`Verdict::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub verdict: Verdict,
    pub done: bool,
}

impl Outcome {
    /// No result yet.
    pub fn pending() -> Self {
        Self {
            verdict: Verdict::Unknown,
            done: false,
        }
    }

    pub fn finished(verdict: Verdict) -> Self {
        Self {
            verdict,
            done: true,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::finished(Verdict::Failed(reason.into()))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.verdict, Verdict::Failed(_))
    }

    /// External tri-state: `None` unless a definite answer is available.
    pub fn as_option(&self) -> Option<bool> {
        match (&self.verdict, self.done) {
            (Verdict::True, true) => Some(true),
            (Verdict::False, true) => Some(false),
            _ => None,
        }
    }
}

impl Default for Outcome {
    fn default() -> Self {
        Self::pending()
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Newtype for message IDs. Also used as the requester id when a message
/// subscribes to work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub fingerprint: Fingerprint,
}

impl Message {
    pub fn new(id: MessageId, text: impl Into<String>) -> Self {
        let text = text.into();
        let fingerprint = Fingerprint::of(&text);
        Self {
            id,
            text,
            fingerprint,
        }
    }

    /// The subscription this message holds on its palindrome work.
    pub fn subscriber_key(&self) -> SubscriberKey {
        SubscriberKey {
            fingerprint: self.fingerprint.clone(),
            requester: self.id,
        }
    }
}

/// Identifies one subscription: at most one per pair exists at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberKey {
    pub fingerprint: Fingerprint,
    pub requester: MessageId,
}
