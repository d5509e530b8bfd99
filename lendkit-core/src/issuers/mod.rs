//! Certificate authority clients.
//!
//! A [`CredentialIssuer`] exchanges an identity claim and secret for a signed
//! certificate (`enroll`) and lets an administrator pre-authorise new ids
//! (`register`). Issuers never persist anything; see
//! [`IdentityStore`](crate::storage::IdentityStore) for that.

mod fabric_ca;
pub mod memory;

use async_trait::async_trait;
use secrecy::SecretString;

pub use fabric_ca::FabricCaClient;
pub use memory::MemoryAuthority;

use crate::error::LendKitResult;
use crate::identity::{Identity, UserRole};

/// Certificate and private key returned by a successful enrollment.
#[derive(Debug)]
pub struct Enrollment {
    /// PEM encoded certificate signed by the authority.
    pub certificate: String,
    /// PEM encoded private key generated for the request.
    pub private_key: SecretString,
}

impl Enrollment {
    /// Binds the enrollment to `id` under the issuer tag `msp_id`.
    #[must_use]
    pub fn into_identity(self, id: &str, msp_id: &str) -> Identity {
        Identity::new(id, self.certificate, self.private_key, msp_id)
    }
}

/// Parameters for pre-authorising a new identity.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationRequest<'a> {
    /// Id to register.
    pub id: &'a str,
    /// Role attached to the id.
    pub role: UserRole,
    /// Affiliation attached to the id.
    pub affiliation: &'a str,
}

/// Client of an external certificate authority.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Exchanges `id` and `secret` for a signed certificate and a fresh key pair.
    ///
    /// # Errors
    ///
    /// - [`LendKitError::InvalidSecret`](crate::LendKitError::InvalidSecret) if the authority rejects the secret
    /// - [`LendKitError::AuthorityUnreachable`](crate::LendKitError::AuthorityUnreachable) on transport failure or timeout
    async fn enroll(&self, id: &str, secret: &SecretString) -> LendKitResult<Enrollment>;

    /// Asks the authority to pre-authorise `request.id`, vouched for by `registrar`.
    ///
    /// Returns the one-time enrollment secret.
    ///
    /// # Errors
    ///
    /// - [`LendKitError::UnauthorizedRegistrar`](crate::LendKitError::UnauthorizedRegistrar) if `registrar` is not an administrator
    /// - [`LendKitError::DuplicateRegistration`](crate::LendKitError::DuplicateRegistration) if the id is already known
    /// - [`LendKitError::AuthorityUnreachable`](crate::LendKitError::AuthorityUnreachable) on transport failure or timeout
    async fn register(
        &self,
        registrar: &Identity,
        request: &RegistrationRequest<'_>,
    ) -> LendKitResult<SecretString>;
}
