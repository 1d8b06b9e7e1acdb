//! Per-session mutual exclusion.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::store::SessionKey;

/// Registry handing out one lock per session.
///
/// Holding a session's lock across load, process and save guarantees at
/// most one in-flight turn per session; distinct sessions never contend.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the lock for a session.
    pub async fn get_or_create(&self, key: &SessionKey) -> Arc<Mutex<()>> {
        // First, try to get existing session with read lock
        {
            let sessions = self.sessions.read().await;
            if let Some(lock) = sessions.get(key) {
                return Arc::clone(lock);
            }
        }

        // Not found, acquire write lock and create
        let mut sessions = self.sessions.write().await;
        // Double-check in case another task created it
        if let Some(lock) = sessions.get(key) {
            return Arc::clone(lock);
        }

        let lock = Arc::new(Mutex::new(()));
        sessions.insert(key.clone(), Arc::clone(&lock));
        lock
    }

    /// Drop a session's lock once nobody else holds or waits on it.
    ///
    /// Callers drop their own handle first. Returns whether the entry was
    /// removed.
    pub async fn release(&self, key: &SessionKey) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(key) {
            Some(lock) if Arc::strong_count(lock) == 1 => {
                sessions.remove(key);
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
