//! In-process certificate authority.
//!
//! Issues real X.509 certificates from a self-signed P-256 CA key so that
//! identities produced here sign requests exactly like enrolled ones. Useful
//! for tests and for running the whole stack without an external authority.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Name, X509NameBuilder, X509Req, X509};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use super::{CredentialIssuer, Enrollment, RegistrationRequest};
use crate::error::{LendKitError, LendKitResult};
use crate::identity::{Identity, UserRole};
use crate::signing::KeyPair;

const AUTHORITY_URL: &str = "memory://authority";
const CA_COMMON_NAME: &str = "ca.lendkit.local";
const VALIDITY_DAYS: u32 = 365;

#[derive(Debug)]
struct Registration {
    secret: String,
    role: UserRole,
    // `None` for the bootstrap administrator, who may enroll any number of times.
    enrollments_left: Option<u32>,
}

/// Certificate authority living entirely in memory.
pub struct MemoryAuthority {
    ca_key: PKey<Private>,
    ca_cert: X509,
    admin_id: String,
    registrations: Mutex<HashMap<String, Registration>>,
    calls: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryAuthority {
    /// Creates an authority whose bootstrap administrator is `admin_id`/`admin_secret`.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::Crypto`] if the CA key or certificate cannot be built.
    pub fn new(admin_id: &str, admin_secret: &str) -> LendKitResult<Self> {
        let ca = KeyPair::generate()?;
        let ca_key = ca.pkey().clone();
        let name = common_name(CA_COMMON_NAME)?;

        let serial = random_serial()?.to_asn1_integer()?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
        builder.set_not_after(&*Asn1Time::days_from_now(VALIDITY_DAYS)?)?;
        builder.set_pubkey(&ca_key)?;
        builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()?,
        )?;
        builder.sign(&ca_key, MessageDigest::sha256())?;

        let mut registrations = HashMap::new();
        registrations.insert(
            admin_id.to_string(),
            Registration {
                secret: admin_secret.to_string(),
                role: UserRole::Admin,
                enrollments_left: None,
            },
        );

        Ok(Self {
            ca_key,
            ca_cert: builder.build(),
            admin_id: admin_id.to_string(),
            registrations: Mutex::new(registrations),
            calls: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
        })
    }

    /// Returns the PEM encoded CA certificate.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::Crypto`] if encoding fails.
    pub fn ca_certificate_pem(&self) -> LendKitResult<String> {
        String::from_utf8(self.ca_cert.to_pem()?).map_err(|e| LendKitError::Crypto {
            error: e.to_string(),
        })
    }

    /// Number of `enroll` and `register` calls received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Simulates an outage: every subsequent call fails with
    /// [`LendKitError::AuthorityUnreachable`] until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns the role `id` was registered with, if any.
    #[must_use]
    pub fn role_of(&self, id: &str) -> Option<UserRole> {
        self.lock().ok()?.get(id).map(|r| r.role)
    }

    fn begin_call(&self) -> LendKitResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(LendKitError::AuthorityUnreachable {
                url: AUTHORITY_URL.to_string(),
                error: "authority is offline".to_string(),
            });
        }
        Ok(())
    }

    fn lock(&self) -> LendKitResult<MutexGuard<'_, HashMap<String, Registration>>> {
        self.registrations
            .lock()
            .map_err(|_| LendKitError::AuthorityUnreachable {
                url: AUTHORITY_URL.to_string(),
                error: "registration table poisoned".to_string(),
            })
    }

    fn issue(&self, id: &str, public_key: &PKeyRef<Public>) -> LendKitResult<String> {
        let serial = random_serial()?.to_asn1_integer()?;
        let subject = common_name(id)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&subject)?;
        builder.set_issuer_name(self.ca_cert.subject_name())?;
        builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
        builder.set_not_after(&*Asn1Time::days_from_now(VALIDITY_DAYS)?)?;
        builder.set_pubkey(public_key)?;
        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        builder.append_extension(KeyUsage::new().critical().digital_signature().build()?)?;
        builder.sign(&self.ca_key, MessageDigest::sha256())?;

        String::from_utf8(builder.build().to_pem()?).map_err(|e| LendKitError::Crypto {
            error: e.to_string(),
        })
    }

    /// A registrar is trusted when it is the administrator, its certificate
    /// was issued here for that id, and it holds the matching private key.
    fn verify_registrar(&self, registrar: &Identity) -> bool {
        if registrar.id() != self.admin_id {
            return false;
        }
        let Ok(cert) = X509::from_pem(registrar.certificate().as_bytes()) else {
            return false;
        };
        let Ok(ca_public) = self.ca_cert.public_key() else {
            return false;
        };
        if !cert.verify(&ca_public).unwrap_or(false) {
            return false;
        }
        let cn_matches = cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .map(|entry| entry.data().to_string())
            .is_some_and(|cn| cn.is_ok_and(|cn| cn == registrar.id()));
        let key_matches = match (registrar.key_pair(), cert.public_key()) {
            (Ok(key), Ok(public)) => key.pkey().public_eq(&public),
            _ => false,
        };
        cn_matches && key_matches
    }
}

fn common_name(cn: &str) -> LendKitResult<X509Name> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_nid(Nid::COMMONNAME, cn)?;
    Ok(name.build())
}

fn random_serial() -> LendKitResult<BigNum> {
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial)
}

#[async_trait]
impl CredentialIssuer for MemoryAuthority {
    async fn enroll(&self, id: &str, secret: &SecretString) -> LendKitResult<Enrollment> {
        self.begin_call()?;
        {
            let mut registrations = self.lock()?;
            let Some(registration) = registrations.get_mut(id) else {
                return Err(LendKitError::InvalidSecret { id: id.to_string() });
            };
            if registration.secret != secret.expose_secret()
                || registration.enrollments_left == Some(0)
            {
                return Err(LendKitError::InvalidSecret { id: id.to_string() });
            }
            if let Some(left) = registration.enrollments_left.as_mut() {
                *left -= 1;
            }
        }

        let key = KeyPair::generate()?;
        let csr = X509Req::from_pem(key.certificate_request(id)?.as_bytes())?;
        let public_key = csr.public_key()?;
        let certificate = self.issue(id, &public_key)?;
        debug!(identity = id, "memory authority issued certificate");
        Ok(Enrollment {
            certificate,
            private_key: key.private_key_pem()?,
        })
    }

    async fn register(
        &self,
        registrar: &Identity,
        request: &RegistrationRequest<'_>,
    ) -> LendKitResult<SecretString> {
        self.begin_call()?;
        if !self.verify_registrar(registrar) {
            return Err(LendKitError::UnauthorizedRegistrar {
                id: registrar.id().to_string(),
            });
        }

        let mut registrations = self.lock()?;
        if registrations.contains_key(request.id) {
            return Err(LendKitError::DuplicateRegistration {
                id: request.id.to_string(),
            });
        }
        let secret = uuid::Uuid::new_v4().simple().to_string();
        registrations.insert(
            request.id.to_string(),
            Registration {
                secret: secret.clone(),
                role: request.role,
                enrollments_left: Some(1),
            },
        );
        drop(registrations);

        info!(identity = request.id, role = %request.role, "memory authority registered identity");
        Ok(SecretString::from(secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> RegistrationRequest<'_> {
        RegistrationRequest {
            id,
            role: UserRole::Client,
            affiliation: "org1.department1",
        }
    }

    async fn enrolled_admin(authority: &MemoryAuthority) -> Identity {
        authority
            .enroll("admin", &SecretString::from("adminpw".to_string()))
            .await
            .unwrap()
            .into_identity("admin", "Org1MSP")
    }

    #[tokio::test]
    async fn test_enrollment_issues_certificate_signed_by_ca() {
        let authority = MemoryAuthority::new("admin", "adminpw").unwrap();
        let admin = enrolled_admin(&authority).await;

        let cert = X509::from_pem(admin.certificate().as_bytes()).unwrap();
        let ca = X509::from_pem(authority.ca_certificate_pem().unwrap().as_bytes()).unwrap();
        assert!(cert.verify(&ca.public_key().unwrap()).unwrap());
        assert!(admin
            .key_pair()
            .unwrap()
            .pkey()
            .public_eq(&cert.public_key().unwrap()));
        assert_eq!(authority.calls(), 1);
    }

    #[tokio::test]
    async fn test_issued_certificate_names_the_identity() {
        let authority = MemoryAuthority::new("admin", "adminpw").unwrap();
        let admin = enrolled_admin(&authority).await;
        let secret = authority.register(&admin, &request("alice")).await.unwrap();
        let alice = authority.enroll("alice", &secret).await.unwrap();

        let cert = X509::from_pem(alice.certificate.as_bytes()).unwrap();
        let cn = cert
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .to_string()
            .unwrap();
        assert_eq!(cn, "alice");

        let admin_cert = X509::from_pem(admin.certificate().as_bytes()).unwrap();
        assert_ne!(
            cert.serial_number().to_bn().unwrap(),
            admin_cert.serial_number().to_bn().unwrap()
        );
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected() {
        let authority = MemoryAuthority::new("admin", "adminpw").unwrap();
        let err = authority
            .enroll("admin", &SecretString::from("nope".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, LendKitError::InvalidSecret { .. }));
    }

    #[tokio::test]
    async fn test_register_then_enroll_once() {
        let authority = MemoryAuthority::new("admin", "adminpw").unwrap();
        let admin = enrolled_admin(&authority).await;

        let secret = authority.register(&admin, &request("alice")).await.unwrap();
        assert_eq!(authority.role_of("alice"), Some(UserRole::Client));

        authority.enroll("alice", &secret).await.unwrap();
        let err = authority.enroll("alice", &secret).await.unwrap_err();
        assert!(matches!(err, LendKitError::InvalidSecret { .. }));

        let err = authority.register(&admin, &request("alice")).await.unwrap_err();
        assert!(matches!(err, LendKitError::DuplicateRegistration { .. }));
    }

    #[tokio::test]
    async fn test_forged_administrator_is_refused() {
        let authority = MemoryAuthority::new("admin", "adminpw").unwrap();
        let admin = enrolled_admin(&authority).await;

        // Right certificate, wrong key.
        let stranger = KeyPair::generate().unwrap();
        let forged = Identity::new(
            "admin",
            admin.certificate(),
            stranger.private_key_pem().unwrap(),
            "Org1MSP",
        );
        let err = authority.register(&forged, &request("eve")).await.unwrap_err();
        assert!(matches!(err, LendKitError::UnauthorizedRegistrar { .. }));

        // Certificate from another authority.
        let other = MemoryAuthority::new("admin", "adminpw").unwrap();
        let foreign = enrolled_admin(&other).await;
        let err = authority.register(&foreign, &request("eve")).await.unwrap_err();
        assert!(matches!(err, LendKitError::UnauthorizedRegistrar { .. }));
    }

    #[tokio::test]
    async fn test_enrolled_user_cannot_register_others() {
        let authority = MemoryAuthority::new("admin", "adminpw").unwrap();
        let admin = enrolled_admin(&authority).await;
        let secret = authority.register(&admin, &request("bob")).await.unwrap();
        let bob = authority
            .enroll("bob", &secret)
            .await
            .unwrap()
            .into_identity("bob", "Org1MSP");

        let err = authority.register(&bob, &request("carol")).await.unwrap_err();
        assert!(matches!(err, LendKitError::UnauthorizedRegistrar { id } if id == "bob"));
    }

    #[tokio::test]
    async fn test_offline_authority_is_unreachable() {
        let authority = MemoryAuthority::new("admin", "adminpw").unwrap();
        authority.set_offline(true);
        let err = authority
            .enroll("admin", &SecretString::from("adminpw".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, LendKitError::AuthorityUnreachable { .. }));
    }
}
