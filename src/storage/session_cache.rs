use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::KeyValueStorage;
use crate::types::{Session, User};

/// Snapshot of the last adopted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub session: Session,
    pub user: User,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Singleton session record under a fixed key.
///
/// A cache, never a source of truth: whatever the identity service says
/// supersedes it.
#[derive(Clone)]
pub struct SessionCache {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
}

impl SessionCache {
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    /// Persist the pair, or delete the record when either half is missing.
    pub fn save(&self, session: Option<&Session>, user: Option<&User>) {
        let (Some(session), Some(user)) = (session, user) else {
            self.clear();
            return;
        };

        let record = PersistedSession {
            session: session.clone(),
            user: user.clone(),
            timestamp: OffsetDateTime::now_utc(),
        };
        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode session record");
                return;
            }
        };
        if let Err(e) = self.storage.set(&self.key, &raw) {
            tracing::debug!(error = %e, "Session record not persisted");
        }
    }

    /// Read the record. Anything unreadable is deleted and reported as a miss.
    #[must_use]
    pub fn load(&self) -> Option<PersistedSession> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(error = %e, "Session record unavailable");
                return None;
            }
        };

        match serde_json::from_str::<PersistedSession>(&raw) {
            Ok(record) if record.session.user.id == record.user.id => Some(record),
            Ok(_) => {
                tracing::warn!("Session record has mismatched user; discarding");
                self.clear();
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed session record; discarding");
                self.clear();
                None
            }
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove(&self.key) {
            tracing::debug!(error = %e, "Session record not removed");
        }
    }
}
