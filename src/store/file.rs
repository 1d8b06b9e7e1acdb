use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::Mutex;

use super::{SessionKey, SessionStore, SessionSummary, StoreError, idle_since, sort_summaries};
use crate::models::PatientId;
use crate::orchestrator::{ConversationState, SCHEMA_VERSION};

/// One JSON file per session: `<root>/<patient_id>/<session_key>.json`.
///
/// Writes go to a hidden temp file that is renamed over the target, so a
/// crash never leaves a half-written session behind.
pub struct FileSessionStore {
    root: PathBuf,
    /// Serializes the revision check with the write inside this process
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn patient_dir(&self, patient_id: PatientId) -> PathBuf {
        self.root.join(patient_id.to_string())
    }

    fn session_file(&self, key: &SessionKey) -> PathBuf {
        self.patient_dir(key.patient_id)
            .join(format!("{}.json", key.session_key))
    }

    fn temp_file(&self, key: &SessionKey) -> PathBuf {
        self.patient_dir(key.patient_id)
            .join(format!(".{}.json.tmp", key.session_key))
    }

    /// `(session_key, path)` of every session file in a patient directory.
    async fn session_files(&self, dir: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(session_key) = name.strip_suffix(".json") else {
                continue;
            };
            if session_key.starts_with('.') {
                continue;
            }
            files.push((session_key.to_string(), path));
        }
        Ok(files)
    }

    async fn read_state(
        &self,
        key: &SessionKey,
        path: &Path,
    ) -> Result<Option<ConversationState>, StoreError> {
        let json = match fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state: ConversationState =
            serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
                key: key.clone(),
                message: e.to_string(),
            })?;

        if state.schema_version != SCHEMA_VERSION {
            tracing::warn!(
                "Session {} has schema version {} (expected {}). Starting fresh.",
                key,
                state.schema_version,
                SCHEMA_VERSION
            );
            return Ok(None);
        }

        Ok(Some(state))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<ConversationState>, StoreError> {
        self.read_state(key, &self.session_file(key)).await
    }

    async fn save(
        &self,
        state: &ConversationState,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        let key = SessionKey::of(state);
        let _guard = self.write_lock.lock().await;

        let path = self.session_file(&key);
        // An unreadable or migrated-away file counts as absent (revision 0).
        let found = match self.read_state(&key, &path).await {
            Ok(existing) => existing.map(|s| s.revision).unwrap_or(0),
            Err(StoreError::Corrupt { .. }) => 0,
            Err(e) => return Err(e),
        };
        if found != expected_revision {
            return Err(StoreError::Conflict {
                key,
                expected: expected_revision,
                found,
            });
        }

        let mut stored = state.clone();
        stored.revision = expected_revision + 1;
        let json = serde_json::to_string_pretty(&stored).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            message: e.to_string(),
        })?;

        fs::create_dir_all(self.patient_dir(key.patient_id)).await?;
        let temp = self.temp_file(&key);
        fs::write(&temp, json).await?;
        fs::rename(&temp, &path).await?;

        tracing::debug!("Saved session {} at revision {}", key, stored.revision);
        Ok(stored.revision)
    }

    async fn list(&self, patient_id: PatientId) -> Result<Vec<SessionSummary>, StoreError> {
        let mut summaries = Vec::new();
        for (session_key, path) in self.session_files(&self.patient_dir(patient_id)).await? {
            let key = SessionKey::new(patient_id, &session_key);
            match self.read_state(&key, &path).await {
                Ok(Some(state)) => summaries.push(SessionSummary::from(&state)),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping session file {}: {}", path.display(), e),
            }
        }

        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(self.session_file(key)).await {
            Ok(()) => {
                tracing::debug!("Deleted session {}", key);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut patients = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = patients.next_entry().await? {
            let Some(patient_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse().ok())
                .map(PatientId)
            else {
                continue;
            };
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            for (session_key, path) in self.session_files(&entry.path()).await? {
                let key = SessionKey::new(patient_id, &session_key);
                match self.read_state(&key, &path).await {
                    Ok(Some(state)) if idle_since(&state, cutoff) => {
                        fs::remove_file(&path).await?;
                        removed += 1;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Skipping session file {}: {}", path.display(), e),
                }
            }
        }
        Ok(removed)
    }
}
