//! Onboarding completeness of a user.
//!
//! A user is set up once their `profiles` row has a name, birth date and bio,
//! and their `music_preferences` row lists genres, artists and moods.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::deadline;
use crate::error::Error;
use crate::storage::{CompletenessCache, CompletenessStatus};
use crate::traits::{Collection, DataStore, Row};
use crate::types::UserId;

const CORE_PROFILE_FIELDS: [&str; 3] = ["full_name", "birth_date", "bio"];
const MUSIC_PREFERENCE_FIELDS: [&str; 3] = ["genres", "artists", "listening_moods"];

/// Core fields must be present; strings non-blank, arrays non-empty.
#[must_use]
pub fn is_core_profile_complete(profile: &Row) -> bool {
    CORE_PROFILE_FIELDS.iter().all(|field| match profile.get(*field) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    })
}

/// Preference fields must be present; arrays non-empty.
#[must_use]
pub fn is_music_preferences_complete(preferences: &Row) -> bool {
    MUSIC_PREFERENCE_FIELDS
        .iter()
        .all(|field| match preferences.get(*field) {
            None | Some(Value::Null) => false,
            Some(Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
        })
}

/// Computes [`CompletenessStatus`] from the data store, memoised per user.
pub struct CompletenessEvaluator<D> {
    store: Arc<D>,
    cache: CompletenessCache,
    timeout: Duration,
}

impl<D: DataStore> CompletenessEvaluator<D> {
    #[must_use]
    pub fn new(store: Arc<D>, cache: CompletenessCache, timeout: Duration) -> Self {
        Self {
            store,
            cache,
            timeout,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &CompletenessCache {
        &self.cache
    }

    /// Cached status, or a fresh evaluation that is cached before returning.
    ///
    /// Never fails: a failed or missing row counts as incomplete, and a failure
    /// in one collection does not affect the other.
    pub async fn evaluate(&self, user_id: &UserId) -> CompletenessStatus {
        if let Some(status) = self.cached(user_id) {
            return status;
        }
        let status = self.compute(user_id).await;
        self.cache.set(user_id, status);
        status
    }

    /// Cached status only.
    #[must_use]
    pub fn cached(&self, user_id: &UserId) -> Option<CompletenessStatus> {
        let status = self.cache.get(user_id)?;
        tracing::trace!(user_id = %user_id, "Completeness cache hit");
        Some(status)
    }

    /// Fresh evaluation against the data store. Nothing is cached; callers
    /// that may be superseded decide whether the result is worth keeping.
    pub async fn compute(&self, user_id: &UserId) -> CompletenessStatus {
        let (profile, preferences) = tokio::join!(
            self.fetch(Collection::Profiles, user_id),
            self.fetch(Collection::MusicPreferences, user_id),
        );

        let status = CompletenessStatus::new(
            profile.as_ref().is_some_and(is_core_profile_complete),
            preferences.as_ref().is_some_and(is_music_preferences_complete),
        );

        tracing::debug!(
            user_id = %user_id,
            has_core_profile = status.has_core_profile,
            has_required_music_preferences = status.has_required_music_preferences,
            "Completeness evaluated"
        );
        status
    }

    async fn fetch(&self, collection: Collection, user_id: &UserId) -> Option<Row> {
        let result: Result<Option<Row>, Error> = deadline::within(
            self.timeout,
            "fetch row",
            self.store.fetch_row(collection, user_id),
        )
        .await;

        match result {
            Ok(Some(row)) => Some(row),
            Ok(None) => {
                tracing::debug!(user_id = %user_id, table = collection.table(), "No row yet");
                None
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    table = collection.table(),
                    error = %e,
                    "Row fetch failed; treating as incomplete"
                );
                None
            }
        }
    }
}
