//! Default settings matching the reference network layout.

use std::time::Duration;

/// Reserved id of the root administrator identity.
pub const ADMIN_ID: &str = "admin";
/// Logical channel the book contract is deployed on.
pub const CHANNEL: &str = "mychannel";
/// Name of the deployed book contract.
pub const CONTRACT: &str = "solib";
/// Connection-profile key of the certificate authority.
pub const CERTIFICATE_AUTHORITY: &str = "ca.org1.example.com";
/// Affiliation new users are registered under.
pub const AFFILIATION: &str = "org1.department1";
/// Wallet directory name, relative to the working directory.
pub const WALLET_DIR: &str = "wallet";

/// Per-request timeout for certificate authority calls.
pub const AUTHORITY_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-request timeout for ledger gateway calls.
///
/// Submissions block until the ordering service commits.
pub const LEDGER_TIMEOUT: Duration = Duration::from_secs(30);
/// Retry budget for idempotent ledger reads.
pub const READ_RETRIES: u32 = 2; // total attempts = 3
