//! Identity storage: the keyed store interface and its backends.

pub mod error;
pub mod memory;
pub mod traits;
pub mod wallet;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryWallet;
pub use traits::IdentityStore;
pub use wallet::FileSystemWallet;

use crate::identity::validate_id;

pub(crate) fn check_id(id: &str) -> StorageResult<()> {
    validate_id(id).map_err(|reason| StorageError::InvalidId {
        id: id.to_string(),
        reason,
    })
}
