//! Work functions: the pure computations the orchestrator runs.
//!
//! A work function is called at most once per fingerprint and must not keep
//! state between calls. It runs on the blocking pool, never under a lock.

use crate::model::{Outcome, Verdict};

/// A pure computation from payload to outcome.
pub trait WorkFunction: Send + Sync + 'static {
    fn compute(&self, payload: &str) -> Outcome;
}

impl<F> WorkFunction for F
where
    F: Fn(&str) -> Outcome + Send + Sync + 'static,
{
    fn compute(&self, payload: &str) -> Outcome {
        self(payload)
    }
}

/// The palindrome predicate as a work function.
#[derive(Debug, Clone, Copy, Default)]
pub struct Palindrome;

impl WorkFunction for Palindrome {
    fn compute(&self, payload: &str) -> Outcome {
        Outcome::finished(is_palindrome(payload))
    }
}

/// Case and punctuation insensitive palindrome check.
///
/// Empty input is [`Verdict::Unknown`]. Otherwise the text is lower-cased,
/// everything except ASCII alphanumerics and `_` is dropped, and the rest is
/// compared with its reverse. Non-ASCII letters count as punctuation.
pub fn is_palindrome(text: &str) -> Verdict {
    if text.is_empty() {
        return Verdict::Unknown;
    }

    let normalized: Vec<char> = text
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if normalized.iter().eq(normalized.iter().rev()) {
        Verdict::True
    } else {
        Verdict::False
    }
}
