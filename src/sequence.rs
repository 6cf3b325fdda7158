use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tag attached to one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceToken(u64);

impl SequenceToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Issues tokens for submission attempts of one form and decides which
/// results still matter.
///
/// The newest attempt wins, regardless of the order in which results come
/// back. There is no cancellation: a superseded result is simply dropped.
#[derive(Debug, Default)]
pub struct SubmissionSequence {
    latest: u64,
}

impl SubmissionSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new attempt, superseding every earlier one.
    pub fn issue(&mut self) -> SequenceToken {
        self.latest += 1;
        SequenceToken(self.latest)
    }

    pub fn is_current(&self, token: SequenceToken) -> bool {
        token.0 == self.latest
    }

    /// Pass `result` through if `token` is still the newest attempt.
    pub fn accept<T>(&self, token: SequenceToken, result: T) -> Option<T> {
        if self.is_current(token) {
            Some(result)
        } else {
            debug!(
                target: "formstate::sequence",
                stale = token.0,
                latest = self.latest,
                "discarding superseded result"
            );
            None
        }
    }
}
