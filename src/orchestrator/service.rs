//! TurnService - the endpoint-level operation behind every surface.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;

use super::conversation_state::ConversationState;
use super::registry::SessionRegistry;
use super::router::Router;
use crate::backend::SchedulingBackend;
use crate::collaborators::{IntentClassifier, SlotExtractor};
use crate::models::{PatientId, TurnRequest, TurnResponse};
use crate::store::{SessionKey, SessionStore, SessionSummary, StoreError};

/// Reply when the session store cannot be read or written.
pub const STORE_FAILURE_REPLY: &str = "I'm sorry, I couldn't access your conversation just now. \
Nothing was changed; please try again in a moment.";

/// Runs turns against persisted sessions.
///
/// For each request the session lock is held across load, process and
/// save, so two turns on one session never interleave.
pub struct TurnService<E, C, B, S> {
    router: Router<E, C, B>,
    store: S,
    registry: SessionRegistry,
}

impl<E, C, B, S> TurnService<E, C, B, S>
where
    E: SlotExtractor,
    C: IntentClassifier,
    B: SchedulingBackend,
    S: SessionStore,
{
    pub fn new(router: Router<E, C, B>, store: S) -> Self {
        Self {
            router,
            store,
            registry: SessionRegistry::new(),
        }
    }

    pub fn router(&self) -> &Router<E, C, B> {
        &self.router
    }

    /// Process one turn end to end.
    ///
    /// Never fails. Store failures become an apologetic reply with the
    /// session left as it was; an undecodable session starts over.
    pub async fn handle(&self, request: TurnRequest) -> TurnResponse {
        let key = SessionKey::new(request.patient_id, request.session_key());
        let lock = self.registry.get_or_create(&key).await;
        let guard = lock.lock().await;

        let response = self.handle_locked(&key, request).await;

        drop(guard);
        drop(lock);
        self.registry.release(&key).await;
        response
    }

    async fn handle_locked(&self, key: &SessionKey, request: TurnRequest) -> TurnResponse {
        let fresh = || ConversationState::new(key.patient_id, key.session_key.clone());

        let state = match self.store.load(key).await {
            Ok(loaded) => loaded.unwrap_or_else(fresh),
            Err(e @ StoreError::Corrupt { .. }) => {
                warn!("Starting session {} over: {}", key, e);
                fresh()
            }
            Err(e) => {
                warn!("Failed to load session {}: {}", key, e);
                return TurnResponse::from_state(&fresh(), STORE_FAILURE_REPLY);
            }
        };
        let expected_revision = state.revision;
        let before = state.clone();

        let (mut state, reply) = self.router.process_turn(state, request.input()).await;

        // Rejected turns on finished sessions leave nothing to persist.
        if state != before {
            match self.store.save(&state, expected_revision).await {
                Ok(revision) => state.revision = revision,
                Err(e) => {
                    warn!("Failed to save session {}: {}", key, e);
                    return TurnResponse::from_state(&before, STORE_FAILURE_REPLY);
                }
            }
        }

        TurnResponse::from_state(&state, reply)
    }

    /// Current state of a session, without processing anything.
    pub async fn session(
        &self,
        patient_id: PatientId,
        session_key: &str,
    ) -> Result<Option<ConversationState>> {
        let key = SessionKey::new(patient_id, session_key);
        self.store
            .load(&key)
            .await
            .with_context(|| format!("Failed to load session {}", key))
    }

    /// All sessions of a patient, most recent first.
    pub async fn sessions(&self, patient_id: PatientId) -> Result<Vec<SessionSummary>> {
        self.store
            .list(patient_id)
            .await
            .with_context(|| format!("Failed to list sessions of patient {}", patient_id))
    }

    /// Delete a session. Waits for an in-flight turn on it to finish.
    pub async fn delete_session(&self, patient_id: PatientId, session_key: &str) -> Result<bool> {
        let key = SessionKey::new(patient_id, session_key);
        let lock = self.registry.get_or_create(&key).await;
        let guard = lock.lock().await;

        let deleted = self
            .store
            .delete(&key)
            .await
            .with_context(|| format!("Failed to delete session {}", key));

        drop(guard);
        drop(lock);
        self.registry.release(&key).await;
        deleted
    }

    /// Remove every session last updated before `cutoff`.
    pub async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self
            .store
            .cleanup(cutoff)
            .await
            .context("Failed to clean up sessions")?;
        if removed > 0 {
            tracing::info!("Removed {} sessions idle since {}", removed, cutoff.to_rfc3339());
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemorySchedule;
    use crate::collaborators::{KeywordIntentClassifier, KeywordSlotExtractor};
    use crate::models::{DEFAULT_SESSION_KEY, Intent};
    use crate::orchestrator::SessionStatus;
    use crate::store::{FileSessionStore, MemorySessionStore};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    async fn router() -> Router<KeywordSlotExtractor, KeywordIntentClassifier, InMemorySchedule> {
        let backend = InMemorySchedule::demo(NaiveDate::from_ymd_opt(2025, 10, 13).unwrap(), 5);
        let extractor = KeywordSlotExtractor::new(&backend.directory().await.unwrap())
            .with_today(NaiveDate::from_ymd_opt(2025, 10, 13).unwrap());
        Router::new(extractor, KeywordIntentClassifier::new(), backend)
    }

    async fn service() -> TurnService<
        KeywordSlotExtractor,
        KeywordIntentClassifier,
        InMemorySchedule,
        MemorySessionStore,
    > {
        TurnService::new(router().await, MemorySessionStore::new())
    }

    /// Every operation fails as if the disk were gone.
    struct DownStore;

    fn offline() -> StoreError {
        StoreError::Io(std::io::Error::other("disk offline"))
    }

    #[async_trait]
    impl SessionStore for DownStore {
        async fn load(&self, _: &SessionKey) -> Result<Option<ConversationState>, StoreError> {
            Err(offline())
        }

        async fn save(&self, _: &ConversationState, _: u64) -> Result<u64, StoreError> {
            Err(offline())
        }

        async fn list(&self, _: PatientId) -> Result<Vec<SessionSummary>, StoreError> {
            Err(offline())
        }

        async fn delete(&self, _: &SessionKey) -> Result<bool, StoreError> {
            Err(offline())
        }

        async fn cleanup(&self, _: DateTime<Utc>) -> Result<usize, StoreError> {
            Err(offline())
        }
    }

    /// Loads fine but refuses every write.
    #[derive(Default)]
    struct ReadOnlyStore(MemorySessionStore);

    #[async_trait]
    impl SessionStore for ReadOnlyStore {
        async fn load(&self, key: &SessionKey) -> Result<Option<ConversationState>, StoreError> {
            self.0.load(key).await
        }

        async fn save(&self, state: &ConversationState, expected: u64) -> Result<u64, StoreError> {
            Err(StoreError::Conflict {
                key: SessionKey::of(state),
                expected,
                found: expected + 1,
            })
        }

        async fn list(&self, patient_id: PatientId) -> Result<Vec<SessionSummary>, StoreError> {
            self.0.list(patient_id).await
        }

        async fn delete(&self, key: &SessionKey) -> Result<bool, StoreError> {
            self.0.delete(key).await
        }

        async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
            self.0.cleanup(cutoff).await
        }
    }

    #[tokio::test]
    async fn test_turns_accumulate_in_store() {
        let service = service().await;
        let patient = PatientId(1234567);

        service
            .handle(TurnRequest::new(patient, "I want to book an appointment"))
            .await;
        let response = service
            .handle(TurnRequest::new(patient, "with Dr. Jane Smith on 14-10-2025 at 10:00"))
            .await;

        assert_eq!(response.session_key, DEFAULT_SESSION_KEY);
        assert_eq!(response.intent, Some(Intent::Book));
        assert!(response.slots.appointment_reference.is_some());
        assert_eq!(response.step_count, 2);

        let stored = service.session(patient, "default").await.unwrap().unwrap();
        assert_eq!(stored.revision, 2);
        assert_eq!(stored.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_finished_session_is_not_rewritten() {
        let service = service().await;
        let patient = PatientId(1234567);
        let request = TurnRequest::new(patient, "is anyone free?");

        service.handle(request.clone()).await;
        let ended = service.handle(request.clone()).await;
        assert_eq!(ended.status, SessionStatus::Finished);

        let revision = service.session(patient, "default").await.unwrap().unwrap().revision;
        service.handle(request).await;
        let after = service.session(patient, "default").await.unwrap().unwrap();
        assert_eq!(after.revision, revision);
    }

    #[tokio::test]
    async fn test_sessions_listing() {
        let service = service().await;
        let patient = PatientId(1234567);
        let mut request = TurnRequest::new(patient, "hello");
        service.handle(request.clone()).await;
        request.session_key = Some("Second Visit".to_string());
        service.handle(request).await;

        let sessions = service.sessions(patient).await.unwrap();
        let mut keys: Vec<String> = sessions.into_iter().map(|s| s.session_key).collect();
        keys.sort();
        assert_eq!(keys, vec!["default", "second-visit"]);
    }

    #[tokio::test]
    async fn test_unreadable_store_gives_apology() {
        let service = TurnService::new(router().await, DownStore);
        let response = service
            .handle(TurnRequest::new(PatientId(1234567), "hello"))
            .await;

        assert_eq!(response.reply, STORE_FAILURE_REPLY);
        assert_eq!(response.status, SessionStatus::Active);
        assert!(response.finish_reason.is_none());
        assert_eq!(service.registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_rejected_save_gives_apology_and_last_saved_state() {
        let store = ReadOnlyStore::default();
        let mut existing = ConversationState::new(PatientId(1234567), "default");
        existing.begin_turn("hello");
        existing.push_reply("Hello!");
        store.0.save(&existing, 0).await.unwrap();

        let service = TurnService::new(router().await, store);
        let response = service
            .handle(TurnRequest::new(PatientId(1234567), "I want to book"))
            .await;

        assert_eq!(response.reply, STORE_FAILURE_REPLY);
        assert_eq!(response.status, SessionStatus::Active);
        assert_eq!(response.step_count, 1);
        assert_eq!(response.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_session_starts_over() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("1234567")).unwrap();
        std::fs::write(temp.path().join("1234567/default.json"), "{not json").unwrap();

        let service = TurnService::new(router().await, FileSessionStore::new(temp.path()));
        let response = service
            .handle(TurnRequest::new(PatientId(1234567), "I want to book"))
            .await;

        assert_ne!(response.reply, STORE_FAILURE_REPLY);
        assert_eq!(response.intent, Some(Intent::Book));
        assert_eq!(response.step_count, 1);
        let stored = service.session(PatientId(1234567), "default").await.unwrap().unwrap();
        assert_eq!(stored.revision, 1);
    }

    #[tokio::test]
    async fn test_session_locks_are_released() {
        let service = service().await;
        let mut request = TurnRequest::new(PatientId(1234567), "hello");
        service.handle(request.clone()).await;
        request.session_key = Some("other".to_string());
        service.handle(request).await;

        assert_eq!(service.registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_delete_session() {
        let service = service().await;
        let patient = PatientId(1234567);
        service.handle(TurnRequest::new(patient, "hello")).await;

        assert!(service.delete_session(patient, "default").await.unwrap());
        assert!(service.session(patient, "default").await.unwrap().is_none());
        assert!(!service.delete_session(patient, "default").await.unwrap());
        assert_eq!(service.registry.len().await, 0);

        let down = TurnService::new(router().await, DownStore);
        assert!(down.delete_session(patient, "default").await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_sessions() {
        let service = service().await;
        let patient = PatientId(1234567);
        service.handle(TurnRequest::new(patient, "hello")).await;

        let month_ago = Utc::now() - chrono::Duration::days(30);
        assert_eq!(service.cleanup(month_ago).await.unwrap(), 0);
        let tomorrow = Utc::now() + chrono::Duration::days(1);
        assert_eq!(service.cleanup(tomorrow).await.unwrap(), 1);
        assert!(service.sessions(patient).await.unwrap().is_empty());
    }
}
