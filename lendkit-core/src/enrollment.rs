//! The identity-issuance hierarchy.
//!
//! The administrator is enrolled first from a bootstrap secret. Every other
//! identity is registered by the stored administrator, enrolled with the
//! one-time secret that registration returns, and then persisted.

use std::sync::Arc;

use secrecy::SecretString;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::{LendKitError, LendKitResult};
use crate::identity::{require_valid_id, Identity, UserRole};
use crate::issuers::{CredentialIssuer, RegistrationRequest};
use crate::storage::IdentityStore;

/// Enrolls identities with a [`CredentialIssuer`] and persists them in an [`IdentityStore`].
pub struct IdentityEnroller {
    store: Arc<dyn IdentityStore>,
    issuer: Arc<dyn CredentialIssuer>,
    msp_id: String,
    admin_id: String,
    affiliation: String,
}

impl IdentityEnroller {
    /// Creates an enroller stamping issued identities with `msp_id`.
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        issuer: Arc<dyn CredentialIssuer>,
        msp_id: &str,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            issuer,
            msp_id: msp_id.to_string(),
            admin_id: settings.admin_id.clone(),
            affiliation: settings.affiliation.clone(),
        }
    }

    /// Enrolls `id` with its bootstrap `secret` and stores the credential.
    ///
    /// # Errors
    ///
    /// - [`LendKitError::AlreadyExists`] if the wallet already holds `id`; the authority is not contacted
    /// - [`LendKitError::InvalidSecret`] / [`LendKitError::AuthorityUnreachable`] from the authority
    pub async fn enroll_admin(&self, id: &str, secret: &SecretString) -> LendKitResult<Identity> {
        require_valid_id("id", id)?;
        self.ensure_absent(id)?;

        let identity = self
            .issuer
            .enroll(id, secret)
            .await?
            .into_identity(id, &self.msp_id);
        self.store.put(&identity)?;

        info!(identity = id, "enrolled administrator");
        Ok(identity)
    }

    /// Registers and enrolls `id` on behalf of the stored administrator.
    ///
    /// # Errors
    ///
    /// - [`LendKitError::AlreadyExists`] if the wallet already holds `id`
    /// - [`LendKitError::UnauthorizedRegistrar`] if no administrator is stored
    /// - [`LendKitError::DuplicateRegistration`] if the authority already knows `id`
    /// - [`LendKitError::AuthorityUnreachable`] on transport failure
    pub async fn register_user(&self, id: &str, role: UserRole) -> LendKitResult<Identity> {
        require_valid_id("id", id)?;
        self.ensure_absent(id)?;

        let Some(admin) = self.store.get(&self.admin_id)? else {
            warn!(identity = id, admin = %self.admin_id, "registration refused: no administrator in wallet");
            return Err(LendKitError::UnauthorizedRegistrar {
                id: self.admin_id.clone(),
            });
        };
        self.register_and_enroll(&admin, id, role).await
    }

    /// Registers and enrolls `id` vouched for by `registrar`.
    ///
    /// The registrar must be the stored administrator, certificate for certificate.
    ///
    /// # Errors
    ///
    /// As [`register_user`](Self::register_user); a registrar that does not match the
    /// stored administrator is refused with [`LendKitError::UnauthorizedRegistrar`]
    /// before the authority is contacted.
    pub async fn register_with(
        &self,
        registrar: &Identity,
        id: &str,
        role: UserRole,
    ) -> LendKitResult<Identity> {
        require_valid_id("id", id)?;
        let stored = if registrar.id() == self.admin_id {
            self.store.get(registrar.id())?
        } else {
            None
        };
        let trusted = stored.is_some_and(|admin| admin.certificate() == registrar.certificate());
        if !trusted {
            warn!(registrar = registrar.id(), identity = id, "registration refused: registrar is not the stored administrator");
            return Err(LendKitError::UnauthorizedRegistrar {
                id: registrar.id().to_string(),
            });
        }
        self.ensure_absent(id)?;
        self.register_and_enroll(registrar, id, role).await
    }

    fn ensure_absent(&self, id: &str) -> LendKitResult<()> {
        if self.store.exists(id)? {
            return Err(LendKitError::AlreadyExists { id: id.to_string() });
        }
        Ok(())
    }

    async fn register_and_enroll(
        &self,
        registrar: &Identity,
        id: &str,
        role: UserRole,
    ) -> LendKitResult<Identity> {
        let request = RegistrationRequest {
            id,
            role,
            affiliation: &self.affiliation,
        };
        let secret = self.issuer.register(registrar, &request).await?;
        let identity = self
            .issuer
            .enroll(id, &secret)
            .await?
            .into_identity(id, &self.msp_id);
        self.store.put(&identity)?;

        info!(identity = id, %role, registrar = registrar.id(), "enrolled user");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuers::MemoryAuthority;
    use crate::storage::MemoryWallet;

    struct Fixture {
        wallet: Arc<MemoryWallet>,
        authority: Arc<MemoryAuthority>,
        enroller: IdentityEnroller,
    }

    fn fixture() -> Fixture {
        let wallet = Arc::new(MemoryWallet::new());
        let authority = Arc::new(MemoryAuthority::new("admin", "adminpw").unwrap());
        let enroller = IdentityEnroller::new(
            wallet.clone(),
            authority.clone(),
            "Org1MSP",
            &Settings::default(),
        );
        Fixture {
            wallet,
            authority,
            enroller,
        }
    }

    fn admin_secret() -> SecretString {
        SecretString::from("adminpw".to_string())
    }

    #[tokio::test]
    async fn test_admin_then_user() {
        let f = fixture();
        let admin = f.enroller.enroll_admin("admin", &admin_secret()).await.unwrap();
        assert_eq!(admin.msp_id(), "Org1MSP");

        let alice = f.enroller.register_user("alice", UserRole::Client).await.unwrap();

        assert_eq!(f.wallet.get("alice").unwrap(), Some(alice));
        assert_eq!(f.authority.role_of("alice"), Some(UserRole::Client));
        assert_eq!(f.wallet.list().unwrap(), vec!["admin", "alice"]);
    }

    #[tokio::test]
    async fn test_admin_enrollment_refused_when_already_stored() {
        let f = fixture();
        f.enroller.enroll_admin("admin", &admin_secret()).await.unwrap();
        let calls = f.authority.calls();

        let err = f
            .enroller
            .enroll_admin("admin", &admin_secret())
            .await
            .unwrap_err();

        assert!(matches!(err, LendKitError::AlreadyExists { ref id } if id == "admin"));
        assert_eq!(f.authority.calls(), calls);
    }

    #[tokio::test]
    async fn test_user_registration_requires_stored_admin() {
        let f = fixture();

        let err = f
            .enroller
            .register_user("alice", UserRole::Client)
            .await
            .unwrap_err();

        assert!(matches!(err, LendKitError::UnauthorizedRegistrar { .. }));
        assert_eq!(f.authority.calls(), 0);
        assert!(f.wallet.is_empty());
    }

    #[tokio::test]
    async fn test_existing_user_is_not_reenrolled() {
        let f = fixture();
        f.enroller.enroll_admin("admin", &admin_secret()).await.unwrap();
        f.enroller.register_user("alice", UserRole::Client).await.unwrap();
        let calls = f.authority.calls();

        let err = f
            .enroller
            .register_user("alice", UserRole::Client)
            .await
            .unwrap_err();

        assert!(matches!(err, LendKitError::AlreadyExists { .. }));
        assert_eq!(f.authority.calls(), calls);
    }

    #[tokio::test]
    async fn test_register_with_non_admin_registrar_is_refused_locally() {
        let f = fixture();
        f.enroller.enroll_admin("admin", &admin_secret()).await.unwrap();
        let bob = f.enroller.register_user("bob", UserRole::Client).await.unwrap();
        let calls = f.authority.calls();

        let err = f
            .enroller
            .register_with(&bob, "carol", UserRole::Client)
            .await
            .unwrap_err();

        assert!(matches!(err, LendKitError::UnauthorizedRegistrar { ref id } if id == "bob"));
        assert_eq!(f.authority.calls(), calls);
        assert!(!f.wallet.exists("carol").unwrap());
    }

    #[tokio::test]
    async fn test_register_with_forged_admin_certificate_is_refused() {
        let f = fixture();
        f.enroller.enroll_admin("admin", &admin_secret()).await.unwrap();

        let other = MemoryAuthority::new("admin", "adminpw").unwrap();
        let impostor = other
            .enroll("admin", &admin_secret())
            .await
            .unwrap()
            .into_identity("admin", "Org1MSP");

        let err = f
            .enroller
            .register_with(&impostor, "carol", UserRole::Client)
            .await
            .unwrap_err();
        assert!(matches!(err, LendKitError::UnauthorizedRegistrar { .. }));
    }

    #[tokio::test]
    async fn test_register_with_stored_admin() {
        let f = fixture();
        let admin = f.enroller.enroll_admin("admin", &admin_secret()).await.unwrap();

        let peer = f
            .enroller
            .register_with(&admin, "peer1", UserRole::Peer)
            .await
            .unwrap();

        assert_eq!(peer.id(), "peer1");
        assert_eq!(f.authority.role_of("peer1"), Some(UserRole::Peer));
    }

    #[tokio::test]
    async fn test_invalid_secret_stores_nothing() {
        let f = fixture();
        let err = f
            .enroller
            .enroll_admin("admin", &SecretString::from("wrong".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, LendKitError::InvalidSecret { .. }));
        assert!(f.wallet.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_id_is_refused() {
        let f = fixture();
        let err = f
            .enroller
            .enroll_admin("../admin", &admin_secret())
            .await
            .unwrap_err();
        assert!(matches!(err, LendKitError::InvalidInput { .. }));
        assert_eq!(f.authority.calls(), 0);
    }
}
