//! Authenticated sessions against the ledger and contract invocation.
//!
//! A [`LedgerGateway`] opens one [`LedgerSession`] per caller identity. The
//! session resolves channels, and a [`ContractInvoker`] bound to a channel and
//! contract runs named operations in one of two modes:
//!
//! - `submit`: ordered, consensus-committed write; sent at most once
//! - `evaluate`: read-only query against a peer's committed state
//!
//! Sessions are never pooled. Whoever opens one must [`close`](LedgerSession::close) it.

mod gateway;
pub mod memory;

use async_trait::async_trait;

pub use gateway::RestGateway;
pub use memory::MemoryLedger;

use crate::error::{LendKitError, LendKitResult};
use crate::identity::Identity;

/// Opens ledger sessions.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Opens a session acting as `identity` and discovers the network topology.
    ///
    /// # Errors
    ///
    /// - [`LendKitError::NetworkUnreachable`] on connectivity failure or timeout
    /// - [`LendKitError::DiscoveryFailed`] if the topology cannot be resolved
    async fn open(&self, identity: &Identity) -> LendKitResult<Box<dyn LedgerSession>>;
}

/// One authenticated connection to the ledger, scoped to a single identity.
#[async_trait]
pub trait LedgerSession: Send + Sync {
    /// Resolves a channel from the discovered topology.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::DiscoveryFailed`] if the channel is unknown or has no peers.
    fn network(&self, channel: &str) -> LendKitResult<Channel>;

    /// Submits `function(args)` for ordering and commit, returning the contract's result.
    ///
    /// # Errors
    ///
    /// - [`LendKitError::TransactionRejected`] if the ledger refuses the transaction
    /// - [`LendKitError::NetworkUnreachable`] if nothing was dispatched
    /// - [`LendKitError::OutcomeUnknown`] if the request left but no verdict came back
    async fn submit(
        &self,
        channel: &Channel,
        contract: &str,
        function: &str,
        args: &[String],
    ) -> LendKitResult<Vec<u8>>;

    /// Evaluates `function(args)` against committed state without ordering.
    ///
    /// # Errors
    ///
    /// - [`LendKitError::TransactionRejected`] if the contract returns an error
    /// - [`LendKitError::NetworkUnreachable`] on connectivity failure or timeout
    async fn evaluate(
        &self,
        channel: &Channel,
        contract: &str,
        function: &str,
        args: &[String],
    ) -> LendKitResult<Vec<u8>>;

    /// Releases the session. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the release itself fails; the session is unusable either way.
    async fn close(&self) -> LendKitResult<()>;
}

/// A channel resolved on an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    name: String,
    peers: Vec<String>,
    contracts: Vec<String>,
}

impl Channel {
    /// Creates a channel description.
    #[must_use]
    pub const fn new(name: String, peers: Vec<String>, contracts: Vec<String>) -> Self {
        Self {
            name,
            peers,
            contracts,
        }
    }

    /// Channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Peers serving the channel.
    #[must_use]
    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Contracts deployed on the channel.
    #[must_use]
    pub fn contracts(&self) -> &[String] {
        &self.contracts
    }

    /// Binds `contract` on this channel to `session`.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::DiscoveryFailed`] if discovery listed contracts and
    /// `contract` is not among them.
    pub fn contract<'s>(
        &self,
        session: &'s dyn LedgerSession,
        contract: &str,
    ) -> LendKitResult<ContractInvoker<'s>> {
        if !self.contracts.is_empty() && !self.contracts.iter().any(|c| c == contract) {
            return Err(LendKitError::DiscoveryFailed {
                channel: self.name.clone(),
                reason: format!("contract {contract} is not deployed"),
            });
        }
        Ok(ContractInvoker {
            session,
            channel: self.clone(),
            contract: contract.to_string(),
        })
    }
}

/// Runs named operations of one contract on one channel.
pub struct ContractInvoker<'s> {
    session: &'s dyn LedgerSession,
    channel: Channel,
    contract: String,
}

impl ContractInvoker<'_> {
    /// Contract name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.contract
    }

    /// See [`LedgerSession::submit`].
    ///
    /// # Errors
    ///
    /// Propagates the session's submit errors.
    pub async fn submit(&self, function: &str, args: &[String]) -> LendKitResult<Vec<u8>> {
        self.session
            .submit(&self.channel, &self.contract, function, args)
            .await
    }

    /// See [`LedgerSession::evaluate`].
    ///
    /// # Errors
    ///
    /// Propagates the session's evaluate errors.
    pub async fn evaluate(&self, function: &str, args: &[String]) -> LendKitResult<Vec<u8>> {
        self.session
            .evaluate(&self.channel, &self.contract, function, args)
            .await
    }
}

/// Channel and contract names travel in URL paths; keep them to a safe alphabet.
pub(crate) fn check_name(attribute: &str, name: &str) -> LendKitResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 249
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(LendKitError::invalid_input(
            attribute,
            format!("{name:?} must be 1-249 characters of [A-Za-z0-9._-]"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_contract_must_be_listed_when_discovery_lists_any() {
        let ledger = MemoryLedger::new();
        let alice = Identity::new(
            "alice",
            "cert",
            secrecy::SecretString::from("key".to_string()),
            "Org1MSP",
        );
        let session = ledger.open(&alice).await.unwrap();
        let channel = Channel::new(
            "mychannel".to_string(),
            vec!["peer0".to_string()],
            vec!["solib".to_string()],
        );

        assert_eq!(channel.contract(session.as_ref(), "solib").unwrap().name(), "solib");
        assert!(matches!(
            channel.contract(session.as_ref(), "fabcar"),
            Err(LendKitError::DiscoveryFailed { .. })
        ));
        session.close().await.unwrap();
    }

    #[test]
    fn test_check_name() {
        assert!(check_name("channel", "mychannel").is_ok());
        assert!(check_name("channel", "my/channel").is_err());
        assert!(check_name("channel", "").is_err());
    }
}
