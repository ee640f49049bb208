//! Persistent client-side caches.
//!
//! Both caches sit on a [`KeyValueStorage`] and are strictly best-effort:
//! a failing backend turns every read into a miss and every write into a
//! no-op, so the rest of the crate keeps working against the remote service.

mod completeness_cache;
mod file;
mod session_cache;

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::error::Error;

pub use completeness_cache::{CompletenessCache, CompletenessStatus};
pub use file::FileStorage;
pub use session_cache::{PersistedSession, SessionCache};

/// Synchronous string key/value store scoped to one client.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, Error>;

    fn set(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), Error>;

    fn keys(&self) -> Result<Vec<String>, Error>;
}

/// In-process storage. Contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.entries().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.entries().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.entries().keys().cloned().collect())
    }
}

/// Storage that refuses every operation, as a browser does in some
/// private-browsing modes.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStorage;

impl KeyValueStorage for UnavailableStorage {
    fn get(&self, _key: &str) -> Result<Option<String>, Error> {
        Err(Error::Storage("storage unavailable".into()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), Error> {
        Err(Error::Storage("storage unavailable".into()))
    }

    fn remove(&self, _key: &str) -> Result<(), Error> {
        Err(Error::Storage("storage unavailable".into()))
    }

    fn keys(&self) -> Result<Vec<String>, Error> {
        Err(Error::Storage("storage unavailable".into()))
    }
}
