use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::session::Session;

/// Session key → Session.
///
/// The map lock only covers lookups and insertion; playback on a Session
/// is serialized by that Session's own lock.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing Session for `key`, or a new one with a fresh Player
    pub async fn get_or_create(&self, key: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(key) {
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(key.to_string()).or_insert_with(|| {
            info!("Creating voice session: {}", key);
            Arc::new(Session::new(key))
        });
        Arc::clone(session)
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Stop and replace the Session's Player and clear its playback flags.
    ///
    /// Returns false when no Session exists for `key`.
    pub async fn reset(&self, key: &str) -> bool {
        let sessions = self.sessions.write().await;
        match sessions.get(key) {
            Some(session) => {
                session.reset();
                true
            }
            None => false,
        }
    }

    pub async fn keys(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
