use std::sync::Arc;

use lendkit_core::config::{ConnectionProfile, Settings};
use lendkit_core::issuers::{CredentialIssuer, FabricCaClient};
use lendkit_core::ledger::{LedgerGateway, RestGateway};
use lendkit_core::storage::{FileSystemWallet, IdentityStore};
use lendkit_core::{IdentityEnroller, LendKitResult, LifecycleCoordinator};

/// Everything a request needs, built once per process.
#[derive(Clone)]
pub struct Services {
    /// The identity wallet.
    pub store: Arc<dyn IdentityStore>,
    /// Administrator bootstrap and user registration.
    pub enroller: Arc<IdentityEnroller>,
    /// Book operations.
    pub books: LifecycleCoordinator,
}

impl Services {
    /// Wires the services from their parts.
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        issuer: Arc<dyn CredentialIssuer>,
        gateway: Arc<dyn LedgerGateway>,
        msp_id: &str,
        settings: &Settings,
    ) -> Self {
        let enroller = IdentityEnroller::new(Arc::clone(&store), issuer, msp_id, settings);
        let books = LifecycleCoordinator::new(Arc::clone(&store), gateway, settings);
        Self {
            store,
            enroller: Arc::new(enroller),
            books,
        }
    }

    /// Connects to the authority and gateway named in `profile` and opens the wallet.
    ///
    /// # Errors
    ///
    /// Fails if the profile lacks an entry `settings` refers to, or the wallet
    /// directory cannot be created.
    pub fn from_profile(profile: &ConnectionProfile, settings: &Settings) -> LendKitResult<Self> {
        let wallet = FileSystemWallet::open(&settings.wallet_dir)?;
        let issuer = FabricCaClient::new(profile, settings)?;
        let gateway = RestGateway::new(profile, settings)?;
        Ok(Self::new(
            Arc::new(wallet),
            Arc::new(issuer),
            Arc::new(gateway),
            profile.msp_id()?,
            settings,
        ))
    }
}
