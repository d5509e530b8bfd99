//! In-memory identity store.
//!
//! Not persistent. Intended for tests and local experimentation; it honours the
//! same uniqueness contract as [`FileSystemWallet`](super::FileSystemWallet).

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::error::{StorageError, StorageResult};
use super::{check_id, IdentityStore};
use crate::identity::Identity;

/// In-memory identity store backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryWallet {
    identities: Mutex<BTreeMap<String, Identity>>,
    reads: AtomicUsize,
}

impl MemoryWallet {
    /// Creates an empty wallet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map_or(0, |guard| guard.len())
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns how many lookups (`get`/`exists`) have been served.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn lock(
        &self,
    ) -> StorageResult<std::sync::MutexGuard<'_, BTreeMap<String, Identity>>> {
        self.identities
            .lock()
            .map_err(|_| StorageError::Lock("mutex poisoned".to_string()))
    }
}

impl IdentityStore for MemoryWallet {
    fn get(&self, id: &str) -> StorageResult<Option<Identity>> {
        check_id(id)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock()?.get(id).cloned())
    }

    fn put(&self, identity: &Identity) -> StorageResult<()> {
        check_id(identity.id())?;
        match self.lock()?.entry(identity.id().to_string()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists {
                id: identity.id().to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(identity.clone());
                Ok(())
            }
        }
    }

    fn exists(&self, id: &str) -> StorageResult<bool> {
        check_id(id)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock()?.contains_key(id))
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
