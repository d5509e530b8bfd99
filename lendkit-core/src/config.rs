//! Process-wide configuration: the ledger connection profile and runtime settings.
//!
//! Both are built once at start-up and passed explicitly to the components that
//! need them; nothing here is global or mutable after construction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{LendKitError, LendKitResult};

/// Common connection profile describing the authority, organisations, peers
/// and the ledger gateway endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    /// Profile name.
    pub name: String,
    /// Profile schema version.
    #[serde(default)]
    pub version: Option<String>,
    /// Client section naming the organisation this process acts for.
    #[serde(default)]
    pub client: Option<ClientSection>,
    /// Organisations keyed by name.
    #[serde(default)]
    pub organizations: BTreeMap<String, Organization>,
    /// Peers keyed by host name.
    #[serde(default)]
    pub peers: BTreeMap<String, PeerEntry>,
    /// Certificate authorities keyed by host name.
    #[serde(default)]
    pub certificate_authorities: BTreeMap<String, AuthorityEntry>,
    /// Ledger gateway endpoint.
    #[serde(default)]
    pub gateway: Option<GatewayEntry>,
}

/// The `client` section of a connection profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    /// Organisation name, a key of [`ConnectionProfile::organizations`].
    pub organization: String,
}

/// An organisation entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    /// Membership service provider id, stamped on every issued identity.
    pub mspid: String,
    /// Peers operated by the organisation.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Certificate authorities operated by the organisation.
    #[serde(default)]
    pub certificate_authorities: Vec<String>,
}

/// A peer entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Peer endpoint.
    pub url: String,
    /// Trusted TLS roots for the peer.
    #[serde(default, rename = "tlsCACerts")]
    pub tls_ca_certs: Option<TlsCaCerts>,
}

/// A certificate authority entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityEntry {
    /// Authority base URL.
    pub url: String,
    /// Name of the CA instance served at `url`.
    #[serde(default, rename = "caName")]
    pub ca_name: Option<String>,
    /// Trusted TLS roots for the authority.
    #[serde(default, rename = "tlsCACerts")]
    pub tls_ca_certs: Option<TlsCaCerts>,
}

/// The ledger gateway entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEntry {
    /// Gateway base URL.
    pub url: String,
    /// Trusted TLS roots for the gateway.
    #[serde(default, rename = "tlsCACerts")]
    pub tls_ca_certs: Option<TlsCaCerts>,
}

/// Trusted root certificates, inline PEM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsCaCerts {
    /// One PEM string or a list of them.
    #[serde(default)]
    pub pem: Option<PemList>,
}

/// Profiles write `pem` either as a single string or as a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PemList {
    /// A single PEM document (may itself contain several certificates).
    One(String),
    /// Several PEM documents.
    Many(Vec<String>),
}

impl TlsCaCerts {
    /// Returns every PEM document listed.
    #[must_use]
    pub fn pems(&self) -> Vec<&str> {
        match &self.pem {
            None => Vec::new(),
            Some(PemList::One(pem)) => vec![pem.as_str()],
            Some(PemList::Many(pems)) => pems.iter().map(String::as_str).collect(),
        }
    }
}

impl ConnectionProfile {
    /// Parses a profile from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::InvalidInput`] if the JSON does not describe a profile.
    pub fn from_json(json: &str) -> LendKitResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| LendKitError::invalid_input("connection_profile", e.to_string()))
    }

    /// Reads and parses the profile at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::InvalidInput`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> LendKitResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            LendKitError::invalid_input(
                "connection_profile",
                format!("cannot read '{}': {e}", path.display()),
            )
        })?;
        Self::from_json(&json)
    }

    /// Looks up the certificate authority registered under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::InvalidInput`] if the profile has no such authority.
    pub fn certificate_authority(&self, key: &str) -> LendKitResult<&AuthorityEntry> {
        self.certificate_authorities.get(key).ok_or_else(|| {
            LendKitError::invalid_input(
                "certificate_authority",
                format!("{key} is not listed in the connection profile"),
            )
        })
    }

    /// Returns the gateway entry.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::InvalidInput`] if the profile has no gateway.
    pub fn gateway(&self) -> LendKitResult<&GatewayEntry> {
        self.gateway.as_ref().ok_or_else(|| {
            LendKitError::invalid_input("gateway", "the connection profile has no gateway entry")
        })
    }

    /// Returns the MSP id of the client organisation.
    ///
    /// Falls back to the only organisation when the profile has no client section.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::InvalidInput`] if the organisation cannot be determined.
    pub fn msp_id(&self) -> LendKitResult<&str> {
        let organization = match &self.client {
            Some(client) => self.organizations.get(&client.organization),
            None if self.organizations.len() == 1 => self.organizations.values().next(),
            None => None,
        };
        organization
            .map(|org| org.mspid.as_str())
            .ok_or_else(|| {
                LendKitError::invalid_input(
                    "organization",
                    "cannot determine the client organisation",
                )
            })
    }
}

/// Runtime settings for a lendkit process.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding the identity wallet.
    pub wallet_dir: PathBuf,
    /// Channel the book contract is deployed on.
    pub channel: String,
    /// Name of the book contract.
    pub contract: String,
    /// Connection-profile key of the certificate authority.
    pub certificate_authority: String,
    /// Reserved id of the administrator identity.
    pub admin_id: String,
    /// Affiliation new users are registered under.
    pub affiliation: String,
    /// Per-request timeout for the certificate authority.
    pub authority_timeout: Duration,
    /// Per-request timeout for the ledger gateway.
    pub ledger_timeout: Duration,
    /// Retry budget for idempotent ledger reads.
    pub read_retries: u32,
    /// Refuse plain-HTTP endpoints.
    pub require_https: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wallet_dir: PathBuf::from(defaults::WALLET_DIR),
            channel: defaults::CHANNEL.to_string(),
            contract: defaults::CONTRACT.to_string(),
            certificate_authority: defaults::CERTIFICATE_AUTHORITY.to_string(),
            admin_id: defaults::ADMIN_ID.to_string(),
            affiliation: defaults::AFFILIATION.to_string(),
            authority_timeout: defaults::AUTHORITY_TIMEOUT,
            ledger_timeout: defaults::LEDGER_TIMEOUT,
            read_retries: defaults::READ_RETRIES,
            require_https: true,
        }
    }
}
