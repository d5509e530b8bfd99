use thiserror::Error;

use crate::storage::StorageError;

/// Result type for lendkit operations.
pub type LendKitResult<T> = Result<T, LendKitError>;

/// Error outputs from `lendkit`.
///
/// Every variant is recoverable at the boundary: callers turn it into a
/// structured [`Outcome`](crate::Outcome) rather than terminating.
#[derive(Debug, Error)]
pub enum LendKitError {
    /// The presented input is not valid for the requested operation
    #[error("invalid_input_{attribute}: {reason}")]
    InvalidInput {
        /// Name of the offending attribute.
        attribute: String,
        /// Explanation of why the value was rejected.
        reason: String,
    },
    /// An identity with this id is already stored in the wallet
    #[error("already_exists: {id}")]
    AlreadyExists {
        /// The identity id.
        id: String,
    },
    /// The acting identity has no stored credential
    #[error("identity_not_found: {id}")]
    IdentityNotFound {
        /// The identity id.
        id: String,
    },
    /// A registration was attempted without a valid administrator credential
    #[error("unauthorized_registrar: {id}")]
    UnauthorizedRegistrar {
        /// The identity that attempted to act as registrar.
        id: String,
    },
    /// The certificate authority already knows the requested id
    #[error("duplicate_registration: {id}")]
    DuplicateRegistration {
        /// The identity id.
        id: String,
    },
    /// The certificate authority could not be reached
    #[error("authority_unreachable: {url}: {error}")]
    AuthorityUnreachable {
        /// Authority endpoint.
        url: String,
        /// Transport detail, logged but never returned to callers.
        error: String,
    },
    /// The certificate authority rejected the enrollment secret
    #[error("invalid_secret: {id}")]
    InvalidSecret {
        /// The identity id.
        id: String,
    },
    /// The ledger gateway could not be reached
    #[error("network_unreachable: {url}: {error}")]
    NetworkUnreachable {
        /// Gateway endpoint.
        url: String,
        /// Transport detail, logged but never returned to callers.
        error: String,
    },
    /// Channel or peer topology could not be resolved
    #[error("discovery_failed: {channel}: {reason}")]
    DiscoveryFailed {
        /// Channel being resolved, or `*` during session discovery.
        channel: String,
        /// Why resolution failed.
        reason: String,
    },
    /// The ledger accepted the connection but refused the transaction
    #[error("transaction_rejected: {}", reason.as_deref().unwrap_or("no reason supplied"))]
    TransactionRejected {
        /// Reason forwarded verbatim from the ledger, when it supplies one.
        reason: Option<String>,
    },
    /// A submission was dispatched but its ledger-side effect is unknown
    #[error("outcome_unknown: {operation}")]
    OutcomeUnknown {
        /// Contract function that was submitted.
        operation: String,
    },
    /// Unexpected error serializing information
    #[error("serialization_error: {error}")]
    SerializationError {
        /// Serializer detail.
        error: String,
    },
    /// Key generation, CSR or signature failure
    #[error("crypto_error: {error}")]
    Crypto {
        /// Underlying library detail.
        error: String,
    },
    /// Identity store failure other than a duplicate insert
    #[error(transparent)]
    Storage(StorageError),
    /// A background task failed before producing a result
    #[error("internal_error: {error}")]
    Internal {
        /// Failure detail.
        error: String,
    },
}

impl LendKitError {
    /// Caller-safe message for this error.
    ///
    /// Transport internals never appear here; ledger rejection reasons are
    /// forwarded verbatim because they are the contract's own words.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidInput { attribute, reason } => {
                format!("Invalid {attribute}: {reason}")
            }
            Self::AlreadyExists { id } => {
                format!("An identity for {id} already exists in the wallet")
            }
            Self::IdentityNotFound { id } => {
                format!("An identity for {id} does not exist in the wallet")
            }
            Self::UnauthorizedRegistrar { .. } => {
                "A valid administrator identity is required to register users"
                    .to_string()
            }
            Self::DuplicateRegistration { id } => {
                format!("{id} is already registered with the certificate authority")
            }
            Self::AuthorityUnreachable { .. } => {
                "The certificate authority is unreachable".to_string()
            }
            Self::InvalidSecret { id } => {
                format!("The certificate authority rejected the secret for {id}")
            }
            Self::NetworkUnreachable { .. } => "The ledger is unreachable".to_string(),
            Self::DiscoveryFailed { channel, .. } => {
                format!("Failed to resolve ledger topology for channel {channel}")
            }
            Self::TransactionRejected { reason } => match reason {
                Some(reason) => format!("Transaction rejected: {reason}"),
                None => "Transaction rejected".to_string(),
            },
            Self::OutcomeUnknown { operation } => {
                format!("The outcome of {operation} is unknown; check the ledger before resubmitting")
            }
            Self::SerializationError { .. }
            | Self::Crypto { .. }
            | Self::Storage(_)
            | Self::Internal { .. } => {
                "Internal error".to_string()
            }
        }
    }

    pub(crate) fn invalid_input(attribute: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<StorageError> for LendKitError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::AlreadyExists { id } => Self::AlreadyExists { id },
            StorageError::InvalidId { id, reason } => Self::InvalidInput {
                attribute: "id".to_string(),
                reason: format!("{id:?} {reason}"),
            },
            other => Self::Storage(other),
        }
    }
}

impl From<openssl::error::ErrorStack> for LendKitError {
    fn from(error: openssl::error::ErrorStack) -> Self {
        Self::Crypto {
            error: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for LendKitError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerializationError {
            error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_hides_transport_detail() {
        let err = LendKitError::NetworkUnreachable {
            url: "https://gateway.internal:8443".to_string(),
            error: "tcp connect error: Connection refused (os error 111)".to_string(),
        };
        let msg = err.public_message();
        assert!(!msg.contains("gateway.internal"));
        assert!(!msg.contains("os error"));
    }

    #[test]
    fn test_public_message_forwards_rejection_reason() {
        let err = LendKitError::TransactionRejected {
            reason: Some("BookA_Alice STATE is not appropriate: inRequest".to_string()),
        };
        assert_eq!(
            err.public_message(),
            "Transaction rejected: BookA_Alice STATE is not appropriate: inRequest"
        );
    }

    #[test]
    fn test_storage_duplicate_lifts_to_already_exists() {
        let err: LendKitError = StorageError::AlreadyExists {
            id: "alice".to_string(),
        }
        .into();
        assert!(matches!(err, LendKitError::AlreadyExists { id } if id == "alice"));
    }
}
