//! Drives the book-lending contract on behalf of stored identities.
//!
//! Every operation follows the same path:
//!
//! 1. validate the input and resolve the acting identity from the wallet;
//!    [`LendKitError::IdentityNotFound`] is returned before the ledger is touched
//! 2. open a session as that identity
//! 3. submit or evaluate one contract function
//! 4. close the session, on success and on failure alike
//!
//! Steps 2 to 4 run in their own task, so a caller that stops waiting never
//! prevents the session from being closed. Submissions are never retried: an
//! in-flight submit whose verdict is lost surfaces as
//! [`LendKitError::OutcomeUnknown`].

use std::sync::Arc;

use tracing::{info, warn};

use crate::book::{
    parse_history, parse_listing, Book, BookKey, BookListing, HistoryEntry, LedgerReply,
};
use crate::config::Settings;
use crate::error::{LendKitError, LendKitResult};
use crate::identity::{require_valid_id, Identity};
use crate::ledger::{LedgerGateway, LedgerSession};
use crate::storage::IdentityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Submit,
    Evaluate,
}

#[derive(Debug)]
struct Call {
    mode: Mode,
    function: &'static str,
    args: Vec<String>,
}

impl Call {
    const fn submit(function: &'static str, args: Vec<String>) -> Self {
        Self {
            mode: Mode::Submit,
            function,
            args,
        }
    }

    const fn evaluate(function: &'static str, args: Vec<String>) -> Self {
        Self {
            mode: Mode::Evaluate,
            function,
            args,
        }
    }
}

struct Inner {
    store: Arc<dyn IdentityStore>,
    gateway: Arc<dyn LedgerGateway>,
    channel: String,
    contract: String,
}

/// The asset-lifecycle coordinator.
#[derive(Clone)]
pub struct LifecycleCoordinator {
    inner: Arc<Inner>,
}

impl LifecycleCoordinator {
    /// Creates a coordinator targeting `settings.channel` / `settings.contract`.
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        gateway: Arc<dyn LedgerGateway>,
        settings: &Settings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                gateway,
                channel: settings.channel.clone(),
                contract: settings.contract.clone(),
            }),
        }
    }

    /// Registers a new book owned by `owner`, acting as `owner`.
    ///
    /// # Errors
    ///
    /// See the module documentation; a duplicate book is a [`LendKitError::TransactionRejected`].
    pub async fn register_book(&self, name: &str, owner: &str) -> LendKitResult<()> {
        let key = BookKey::new(name, owner)?;
        let args = vec![key.name().to_string(), key.owner().to_string()];
        self.run(owner, Call::submit("RegisterBook", args)).await?;
        Ok(())
    }

    /// Asks to rent `name` from `owner`, acting as `renter`.
    ///
    /// # Errors
    ///
    /// See the module documentation.
    pub async fn request_rent(&self, name: &str, owner: &str, renter: &str) -> LendKitResult<()> {
        let key = BookKey::new(name, owner)?;
        require_valid_id("renter", renter)?;
        let args = vec![key.composite(), renter.to_string()];
        self.run(renter, Call::submit("ReqRent", args)).await?;
        Ok(())
    }

    /// Hands a requested book over to its renter, acting as `owner`.
    ///
    /// # Errors
    ///
    /// See the module documentation.
    pub async fn rent_book(&self, name: &str, owner: &str) -> LendKitResult<()> {
        let key = BookKey::new(name, owner)?;
        self.run(owner, Call::submit("RentBook", vec![key.composite()]))
            .await?;
        Ok(())
    }

    /// Takes a rented book back, acting as `owner`.
    ///
    /// # Errors
    ///
    /// See the module documentation.
    pub async fn return_book(&self, name: &str, owner: &str) -> LendKitResult<()> {
        let key = BookKey::new(name, owner)?;
        self.run(owner, Call::submit("ReturnBook", vec![key.composite()]))
            .await?;
        Ok(())
    }

    /// Reads the current state of a book, acting as `owner`.
    ///
    /// Returns `None` when the ledger holds no such book.
    ///
    /// # Errors
    ///
    /// See the module documentation.
    pub async fn query_book(&self, name: &str, owner: &str) -> LendKitResult<Option<Book>> {
        let key = BookKey::new(name, owner)?;
        let payload = self
            .run(owner, Call::evaluate("QueryBook", vec![key.composite()]))
            .await?;
        Book::from_query_payload(&payload)
    }

    /// Lists every book on the ledger, acting as `caller`.
    ///
    /// # Errors
    ///
    /// See the module documentation.
    pub async fn query_all_books(&self, caller: &str) -> LendKitResult<Vec<BookListing>> {
        Ok(self.query_all_books_reply(caller).await?.parsed)
    }

    /// As [`query_all_books`](Self::query_all_books), keeping the contract's JSON.
    ///
    /// # Errors
    ///
    /// See the module documentation.
    pub async fn query_all_books_reply(
        &self,
        caller: &str,
    ) -> LendKitResult<LedgerReply<Vec<BookListing>>> {
        let payload = self
            .run(caller, Call::evaluate("QueryAllBook", Vec::new()))
            .await?;
        LedgerReply::from_payload(&payload, parse_listing)
    }

    /// Returns every committed version of a book in commit order, acting as `owner`.
    ///
    /// # Errors
    ///
    /// See the module documentation.
    pub async fn history(&self, name: &str, owner: &str) -> LendKitResult<Vec<HistoryEntry>> {
        Ok(self.history_reply(name, owner).await?.parsed)
    }

    /// As [`history`](Self::history), keeping the contract's JSON.
    ///
    /// # Errors
    ///
    /// See the module documentation.
    pub async fn history_reply(
        &self,
        name: &str,
        owner: &str,
    ) -> LendKitResult<LedgerReply<Vec<HistoryEntry>>> {
        let key = BookKey::new(name, owner)?;
        let payload = self
            .run(owner, Call::evaluate("History", vec![key.composite()]))
            .await?;
        LedgerReply::from_payload(&payload, parse_history)
    }

    async fn run(&self, actor: &str, call: Call) -> LendKitResult<Vec<u8>> {
        require_valid_id("id", actor)?;
        let identity = self
            .inner
            .store
            .get(actor)?
            .ok_or_else(|| LendKitError::IdentityNotFound {
                id: actor.to_string(),
            })?;

        let inner = Arc::clone(&self.inner);
        let function = call.function;
        let mode = call.mode;
        let task = tokio::spawn(async move { inner.execute(identity, call).await });

        task.await.unwrap_or_else(|join_error| {
            warn!(function, error = %join_error, "ledger task did not complete");
            match mode {
                Mode::Submit => Err(LendKitError::OutcomeUnknown {
                    operation: function.to_string(),
                }),
                Mode::Evaluate => Err(LendKitError::Internal {
                    error: join_error.to_string(),
                }),
            }
        })
    }
}

impl Inner {
    async fn execute(&self, identity: Identity, call: Call) -> LendKitResult<Vec<u8>> {
        let session = self.gateway.open(&identity).await?;
        let result = self.invoke(session.as_ref(), &call).await;

        if let Err(e) = session.close().await {
            warn!(identity = identity.id(), error = %e, "failed to close ledger session");
        }

        match &result {
            Ok(_) => info!(
                identity = identity.id(),
                function = call.function,
                args = ?call.args,
                "ledger call succeeded"
            ),
            Err(e) => warn!(
                identity = identity.id(),
                function = call.function,
                args = ?call.args,
                error = %e,
                "ledger call failed"
            ),
        }
        result
    }

    async fn invoke(&self, session: &dyn LedgerSession, call: &Call) -> LendKitResult<Vec<u8>> {
        let channel = session.network(&self.channel)?;
        let contract = channel.contract(session, &self.contract)?;
        match call.mode {
            Mode::Submit => contract.submit(call.function, &call.args).await,
            Mode::Evaluate => contract.evaluate(call.function, &call.args).await,
        }
    }
}
