//! Collaborator ports used by the router.
//!
//! The router never understands free text itself. Slot extraction and intent
//! classification are delegated through the traits below, so the
//! deterministic keyword implementations and model-backed adapters are
//! interchangeable.

pub mod completion;
pub mod keyword;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Message, Slots};

pub use completion::{
    CommandCompletionClient, CompletionClient, CompletionIntentClassifier, extract_json_block,
};
pub use keyword::{KeywordIntentClassifier, KeywordSlotExtractor};

/// Failure of an extractor or classifier call.
///
/// Every variant is recoverable: the router degrades and the session stays
/// active.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("collaborator timed out after {0}s")]
    Timeout(u64),
    #[error("collaborator returned malformed output: {0}")]
    Malformed(String),
}

/// Output of an intent classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Raw intent tag. Mapped with `Intent::from_tag`; unknown tags fall
    /// back to general info.
    pub intent: String,
    /// Free text for diagnostics only
    #[serde(default)]
    pub rationale: String,
}

impl Classification {
    pub fn new(intent: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            rationale: rationale.into(),
        }
    }
}

/// Produces slot updates from conversation history.
///
/// Returned slots are a delta: `None` fields mean "nothing new", never
/// "clear this field".
#[async_trait]
pub trait SlotExtractor: Send + Sync {
    async fn extract(&self, messages: &[Message], current: &Slots)
    -> Result<Slots, CollaboratorError>;
}

/// Chooses an intent for the latest turn.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(
        &self,
        messages: &[Message],
        slots: &Slots,
    ) -> Result<Classification, CollaboratorError>;
}

#[async_trait]
impl<T: SlotExtractor + ?Sized> SlotExtractor for Box<T> {
    async fn extract(
        &self,
        messages: &[Message],
        current: &Slots,
    ) -> Result<Slots, CollaboratorError> {
        (**self).extract(messages, current).await
    }
}

#[async_trait]
impl<T: IntentClassifier + ?Sized> IntentClassifier for Box<T> {
    async fn classify(
        &self,
        messages: &[Message],
        slots: &Slots,
    ) -> Result<Classification, CollaboratorError> {
        (**self).classify(messages, slots).await
    }
}
