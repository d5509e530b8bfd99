//! Filesystem-backed identity store.
//!
//! Each identity lives in `<directory>/<id>.id` as a JSON wallet record.
//!
//! # Atomic insert
//!
//! 1. Write the record to a uniquely named temporary file in the same directory
//! 2. `fsync` the temporary file
//! 3. Hard-link it to the final name; the link fails if the name already exists
//! 4. Remove the temporary file and `fsync` the directory
//!
//! Readers therefore see either no record or a complete one, and of several
//! concurrent writers for the same id exactly one wins.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use zeroize::Zeroizing;

use super::error::{io_error, StorageError, StorageResult};
use super::{check_id, IdentityStore};
use crate::identity::Identity;

const RECORD_EXTENSION: &str = "id";

/// Identity store keeping one file per identity in a directory.
#[derive(Debug, Clone)]
pub struct FileSystemWallet {
    directory: PathBuf,
}

impl FileSystemWallet {
    /// Opens the wallet at `directory`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(directory: P) -> StorageResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|e| {
            io_error(
                format!("failed to create wallet directory '{}'", directory.display()),
                e,
            )
        })?;
        Ok(Self { directory })
    }

    /// Returns the wallet directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    fn temp_path(&self, id: &str) -> PathBuf {
        self.directory
            .join(format!(".{id}.{}.tmp", uuid::Uuid::new_v4().simple()))
    }

    fn write_temp(path: &Path, bytes: &[u8]) -> StorageResult<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .map_err(|e| io_error("failed to create temporary record", e))?;
        file.write_all(bytes)
            .map_err(|e| io_error("failed to write temporary record", e))?;
        file.sync_all()
            .map_err(|e| io_error("failed to sync temporary record", e))
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        File::open(&self.directory)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| io_error("failed to sync wallet directory", e))
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl IdentityStore for FileSystemWallet {
    fn get(&self, id: &str) -> StorageResult<Option<Identity>> {
        check_id(id)?;
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(io_error(
                    format!("failed to read '{}'", path.display()),
                    e,
                ))
            }
        };
        Identity::from_record(id, &bytes)
            .map(Some)
            .map_err(|e| StorageError::Serialization(format!("record for {id}: {e}")))
    }

    fn put(&self, identity: &Identity) -> StorageResult<()> {
        let id = identity.id();
        check_id(id)?;
        let bytes = identity
            .to_record()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let temp = self.temp_path(id);
        let target = self.record_path(id);
        let linked = Self::write_temp(&temp, &bytes).and_then(|()| {
            fs::hard_link(&temp, &target).map_err(|e| {
                if e.kind() == ErrorKind::AlreadyExists {
                    StorageError::AlreadyExists { id: id.to_string() }
                } else {
                    io_error(format!("failed to publish '{}'", target.display()), e)
                }
            })
        });
        let _ = fs::remove_file(&temp);
        linked?;

        self.sync_directory()?;
        debug!(identity = id, "stored identity record");
        Ok(())
    }

    fn exists(&self, id: &str) -> StorageResult<bool> {
        check_id(id)?;
        self.record_path(id)
            .try_exists()
            .map_err(|e| io_error("failed to stat identity record", e))
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let entries = fs::read_dir(&self.directory)
            .map_err(|e| io_error("failed to list wallet directory", e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error("failed to list wallet directory", e))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) {
                if check_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use secrecy::SecretString;

    use super::*;

    fn identity(id: &str, cert: &str) -> Identity {
        Identity::new(
            id,
            cert,
            SecretString::from(format!("key-for-{id}")),
            "Org1MSP",
        )
    }

    #[test]
    fn test_put_then_get_returns_identity() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = FileSystemWallet::open(dir.path()).unwrap();
        let alice = identity("alice", "cert-a");

        wallet.put(&alice).unwrap();

        assert_eq!(wallet.get("alice").unwrap(), Some(alice));
        assert!(wallet.exists("alice").unwrap());
        assert!(!wallet.exists("bob").unwrap());
        assert_eq!(wallet.get("bob").unwrap(), None);
    }

    #[test]
    fn test_second_put_is_rejected_and_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = FileSystemWallet::open(dir.path()).unwrap();
        let first = identity("alice", "cert-1");
        let second = identity("alice", "cert-2");

        wallet.put(&first).unwrap();
        let err = wallet.put(&second).unwrap_err();

        assert!(matches!(err, StorageError::AlreadyExists { ref id } if id == "alice"));
        assert_eq!(wallet.get("alice").unwrap().unwrap().certificate(), "cert-1");
    }

    #[test]
    fn test_concurrent_puts_yield_exactly_one_success() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = Arc::new(FileSystemWallet::open(dir.path()).unwrap());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let wallet = Arc::clone(&wallet);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    wallet.put(&identity("carol", &format!("cert-{i}")))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let duplicates = results
            .iter()
            .filter(|r| matches!(r, Err(StorageError::AlreadyExists { .. })))
            .count();

        assert_eq!(successes, 1);
        assert_eq!(duplicates, 15);
    }

    #[test]
    fn test_no_temporary_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = FileSystemWallet::open(dir.path()).unwrap();
        wallet.put(&identity("alice", "cert")).unwrap();
        let _ = wallet.put(&identity("alice", "cert"));

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["alice.id".to_string()]);
    }

    #[test]
    fn test_list_returns_sorted_ids() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = FileSystemWallet::open(dir.path()).unwrap();
        for id in ["bob", "admin", "alice"] {
            wallet.put(&identity(id, "cert")).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(wallet.list().unwrap(), vec!["admin", "alice", "bob"]);
    }

    #[test]
    fn test_path_like_ids_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = FileSystemWallet::open(dir.path().join("wallet")).unwrap();

        assert!(matches!(
            wallet.put(&identity("../escape", "cert")),
            Err(StorageError::InvalidId { .. })
        ));
        assert!(matches!(
            wallet.get("../escape"),
            Err(StorageError::InvalidId { .. })
        ));
        assert!(!dir.path().join("escape.id").exists());
    }

    #[test]
    fn test_corrupted_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = FileSystemWallet::open(dir.path()).unwrap();
        fs::write(dir.path().join("mallory.id"), b"{not json").unwrap();

        assert!(matches!(
            wallet.get("mallory"),
            Err(StorageError::Serialization(_))
        ));
    }
}
