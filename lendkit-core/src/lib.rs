//! `lendkit-core` enrolls X.509 identities with a certificate authority, keeps
//! them in a wallet, and drives a book-lending contract on a permissioned
//! ledger on their behalf.
//!
//! The pieces compose leaf-first:
//!
//! - [`issuers::CredentialIssuer`]: enroll and register against the authority
//! - [`storage::IdentityStore`]: one credential per id, never overwritten
//! - [`ledger::LedgerGateway`] / [`ledger::LedgerSession`]: authenticated ledger sessions
//! - [`ledger::ContractInvoker`]: submit and evaluate contract functions
//! - [`LifecycleCoordinator`]: one session per book operation, closed on every path
//! - [`IdentityEnroller`]: administrator bootstrap and user registration
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

mod error;
pub use error::*;

mod outcome;
pub use outcome::*;

mod identity;
pub use identity::*;

pub mod book;
pub use book::{Book, BookKey, BookListing, BookState, HistoryEntry, LedgerReply};

mod coordinator;
pub use coordinator::LifecycleCoordinator;

mod enrollment;
pub use enrollment::IdentityEnroller;

pub mod config;
pub mod defaults;
pub mod issuers;
pub mod ledger;
pub mod logger;
pub mod signing;
pub mod storage;

// private modules
mod http_request;
