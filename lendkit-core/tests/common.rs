//! Common test utilities shared across integration tests.

use std::path::Path;
use std::sync::Arc;

use lendkit_core::config::Settings;
use lendkit_core::issuers::MemoryAuthority;
use lendkit_core::ledger::MemoryLedger;
use lendkit_core::storage::{FileSystemWallet, IdentityStore};
use lendkit_core::{IdentityEnroller, LifecycleCoordinator, UserRole};
use secrecy::SecretString;

pub const ADMIN_SECRET: &str = "adminpw";

/// A wallet, an authority and a ledger wired together the way a process wires them.
pub struct Network {
    pub wallet: Arc<FileSystemWallet>,
    pub authority: Arc<MemoryAuthority>,
    pub ledger: MemoryLedger,
    pub enroller: IdentityEnroller,
    pub books: LifecycleCoordinator,
}

impl Network {
    pub fn new(wallet_dir: &Path) -> Self {
        let settings = Settings {
            wallet_dir: wallet_dir.to_path_buf(),
            ..Settings::default()
        };
        let wallet = Arc::new(FileSystemWallet::open(&settings.wallet_dir).unwrap());
        let authority = Arc::new(MemoryAuthority::new(&settings.admin_id, ADMIN_SECRET).unwrap());
        let ledger = MemoryLedger::new();

        let store: Arc<dyn IdentityStore> = wallet.clone();
        let enroller = IdentityEnroller::new(store.clone(), authority.clone(), "Org1MSP", &settings);
        let books = LifecycleCoordinator::new(store, Arc::new(ledger.clone()), &settings);

        Self {
            wallet,
            authority,
            ledger,
            enroller,
            books,
        }
    }

    /// Enrolls the administrator and then each of `users`.
    pub async fn with_users(wallet_dir: &Path, users: &[&str]) -> Self {
        let network = Self::new(wallet_dir);
        network
            .enroller
            .enroll_admin("admin", &SecretString::from(ADMIN_SECRET.to_string()))
            .await
            .unwrap();
        for user in users {
            network
                .enroller
                .register_user(user, UserRole::Client)
                .await
                .unwrap();
        }
        network
    }
}
