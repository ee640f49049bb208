use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::KeyValueStorage;
use crate::types::UserId;

/// Onboarding progress of one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessStatus {
    pub has_core_profile: bool,
    pub has_required_music_preferences: bool,
}

impl CompletenessStatus {
    #[must_use]
    pub fn new(has_core_profile: bool, has_required_music_preferences: bool) -> Self {
        Self {
            has_core_profile,
            has_required_music_preferences,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.has_core_profile && self.has_required_music_preferences
    }
}

/// Per-user [`CompletenessStatus`] entries under a shared key prefix.
#[derive(Clone)]
pub struct CompletenessCache {
    storage: Arc<dyn KeyValueStorage>,
    prefix: String,
}

impl CompletenessCache {
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    fn key(&self, user_id: &UserId) -> String {
        format!("{}{}", self.prefix, user_id)
    }

    #[must_use]
    pub fn get(&self, user_id: &UserId) -> Option<CompletenessStatus> {
        let key = self.key(user_id);
        let raw = self.storage.get(&key).ok().flatten()?;
        match serde_json::from_str(&raw) {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Malformed completeness entry; discarding");
                self.remove(&key);
                None
            }
        }
    }

    pub fn set(&self, user_id: &UserId, status: CompletenessStatus) {
        let Ok(raw) = serde_json::to_string(&status) else {
            return;
        };
        if let Err(e) = self.storage.set(&self.key(user_id), &raw) {
            tracing::debug!(user_id = %user_id, error = %e, "Completeness entry not persisted");
        }
    }

    /// Drop one user's entry, or every entry under the prefix when `None`.
    pub fn clear(&self, user_id: Option<&UserId>) {
        if let Some(user_id) = user_id {
            self.remove(&self.key(user_id));
            return;
        }

        let keys = match self.storage.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::debug!(error = %e, "Completeness entries not enumerable");
                return;
            }
        };
        for key in keys.iter().filter(|k| k.starts_with(&self.prefix)) {
            self.remove(key);
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.storage.remove(key) {
            tracing::debug!(key, error = %e, "Completeness entry not removed");
        }
    }
}
