use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{SessionKey, SessionStore, SessionSummary, StoreError, idle_since, sort_summaries};
use crate::models::PatientId;
use crate::orchestrator::ConversationState;

/// Process-local store, used for tests and the `--ephemeral` CLI mode.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, ConversationState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<ConversationState>, StoreError> {
        Ok(self.sessions.read().await.get(key).cloned())
    }

    async fn save(
        &self,
        state: &ConversationState,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        let key = SessionKey::of(state);
        let mut sessions = self.sessions.write().await;

        let found = sessions.get(&key).map(|s| s.revision).unwrap_or(0);
        if found != expected_revision {
            return Err(StoreError::Conflict {
                key,
                expected: expected_revision,
                found,
            });
        }

        let mut stored = state.clone();
        stored.revision = expected_revision + 1;
        sessions.insert(key, stored);
        Ok(expected_revision + 1)
    }

    async fn list(&self, patient_id: PatientId) -> Result<Vec<SessionSummary>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .filter(|(key, _)| key.patient_id == patient_id)
            .map(|(_, state)| SessionSummary::from(state))
            .collect();
        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, StoreError> {
        Ok(self.sessions.write().await.remove(key).is_some())
    }

    async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, state| !idle_since(state, cutoff));
        Ok(before - sessions.len())
    }
}
