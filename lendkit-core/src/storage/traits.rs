//! The keyed identity store interface.

use crate::identity::Identity;

use super::error::StorageResult;

/// Persistent keyed store mapping an identity id to its issued credential.
///
/// Implementations must make [`put`](IdentityStore::put) an atomic insert:
/// among concurrent callers storing the same id exactly one succeeds and the
/// rest observe [`StorageError::AlreadyExists`](super::StorageError::AlreadyExists).
/// A stored identity is never overwritten.
pub trait IdentityStore: Send + Sync {
    /// Looks up the identity stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid or the backing store fails.
    fn get(&self, id: &str) -> StorageResult<Option<Identity>>;

    /// Stores `identity` under its id, refusing to overwrite.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`](super::StorageError::AlreadyExists)
    /// if the id is taken, or an error if the backing store fails.
    fn put(&self, identity: &Identity) -> StorageResult<()>;

    /// Returns `true` if an identity is stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid or the backing store fails.
    fn exists(&self, id: &str) -> StorageResult<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Lists stored identity ids in ascending order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    fn list(&self) -> StorageResult<Vec<String>>;
}
