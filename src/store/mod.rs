//! Session persistence.
//!
//! A session is keyed by `(patient_id, session_key)`. Stores are opaque
//! key-value collaborators with one extra rule: `save` is a compare-and-set
//! on [`ConversationState::revision`], so a writer that loaded stale state
//! gets [`StoreError::Conflict`] instead of silently overwriting.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DEFAULT_SESSION_KEY, Intent, PatientId};
use crate::orchestrator::{ConversationState, FinishReason, SessionStatus};

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

/// Maximum length of a normalized session key.
const MAX_SESSION_KEY_LENGTH: usize = 64;

/// Normalize a caller-supplied session key into a filesystem-safe slug.
///
/// Lowercases, maps anything outside `[a-z0-9_]` to `-`, collapses dashes,
/// and falls back to `default` when nothing is left.
pub fn normalize_session_key(raw: &str) -> String {
    let mut key = String::new();
    let mut prev_dash = true;
    for c in raw.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            key.push(c);
            prev_dash = false;
        } else if !prev_dash {
            key.push('-');
            prev_dash = true;
        }
    }
    key.truncate(MAX_SESSION_KEY_LENGTH);
    while key.ends_with('-') {
        key.pop();
    }

    if key.is_empty() {
        DEFAULT_SESSION_KEY.to_string()
    } else {
        key
    }
}

/// Store key of one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub patient_id: PatientId,
    pub session_key: String,
}

impl SessionKey {
    pub fn new(patient_id: PatientId, session_key: &str) -> Self {
        Self {
            patient_id,
            session_key: normalize_session_key(session_key),
        }
    }

    pub fn of(state: &ConversationState) -> Self {
        Self::new(state.patient_id, &state.session_key)
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.patient_id, self.session_key)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer saved the session after it was loaded
    #[error("session {key} was modified concurrently (expected revision {expected}, found {found})")]
    Conflict {
        key: SessionKey,
        expected: u64,
        found: u64,
    },
    #[error("session {key} could not be decoded: {message}")]
    Corrupt { key: SessionKey, message: String },
    #[error("session storage failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Listing entry for a patient's sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_key: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    pub intent: Option<Intent>,
    pub step_count: u32,
    pub message_count: usize,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&ConversationState> for SessionSummary {
    fn from(state: &ConversationState) -> Self {
        Self {
            session_key: state.session_key.clone(),
            status: state.status,
            finish_reason: state.finish_reason,
            intent: state.intent,
            step_count: state.step_count,
            message_count: state.messages.len(),
            created_at: state.created_at.clone(),
            updated_at: state.updated_at.clone(),
        }
    }
}

/// Whether a session was last updated before `cutoff`. Sessions with an
/// unreadable timestamp are never considered idle.
pub(crate) fn idle_since(state: &ConversationState, cutoff: DateTime<Utc>) -> bool {
    DateTime::parse_from_rfc3339(&state.updated_at)
        .map(|updated| updated.with_timezone(&Utc) < cutoff)
        .unwrap_or(false)
}

/// Most recently updated first.
pub(crate) fn sort_summaries(summaries: &mut [SessionSummary]) {
    summaries.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.session_key.cmp(&b.session_key))
    });
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session. `None` when it has never been saved.
    async fn load(&self, key: &SessionKey) -> Result<Option<ConversationState>, StoreError>;

    /// Save `state` if the stored revision still equals `expected_revision`
    /// (0 for a session that was never saved). Returns the new revision.
    async fn save(
        &self,
        state: &ConversationState,
        expected_revision: u64,
    ) -> Result<u64, StoreError>;

    /// Summaries of every session of a patient.
    async fn list(&self, patient_id: PatientId) -> Result<Vec<SessionSummary>, StoreError>;

    /// Remove a session. Returns whether it existed.
    async fn delete(&self, key: &SessionKey) -> Result<bool, StoreError>;

    /// Remove every session last updated before `cutoff`, across all
    /// patients. Returns how many were removed.
    async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Box<T> {
    async fn load(&self, key: &SessionKey) -> Result<Option<ConversationState>, StoreError> {
        (**self).load(key).await
    }

    async fn save(
        &self,
        state: &ConversationState,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        (**self).save(state, expected_revision).await
    }

    async fn list(&self, patient_id: PatientId) -> Result<Vec<SessionSummary>, StoreError> {
        (**self).list(patient_id).await
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, StoreError> {
        (**self).delete(key).await
    }

    async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        (**self).cleanup(cutoff).await
    }
}
