use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use snafu::OptionExt;

use super::error::{StorageResult, StoreLockPoisonedSnafu};

/// Persistent string store the session repository is written against.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn delete(&self, key: &str) -> StorageResult<()>;
}

impl<T> KeyValueStore for Arc<T>
where
    T: KeyValueStore + ?Sized,
{
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.as_ref().get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.as_ref().set(key, value)
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.as_ref().delete(key)
    }
}

/// Process-local store, used in tests and for throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> StorageResult<usize> {
        let entries = self.entries.read().ok().context(StoreLockPoisonedSnafu {
            stage: "memory-store-len",
        })?;
        Ok(entries.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.read().ok().context(StoreLockPoisonedSnafu {
            stage: "memory-store-get",
        })?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.write().ok().context(StoreLockPoisonedSnafu {
            stage: "memory-store-set",
        })?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.write().ok().context(StoreLockPoisonedSnafu {
            stage: "memory-store-delete",
        })?;
        entries.remove(key);
        Ok(())
    }
}
