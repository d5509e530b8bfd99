//! One function per caller-facing operation.
//!
//! Each returns the success [`Outcome`] or the error that caused the failure;
//! the caller renders the error with [`Outcome::failure`].

use std::str::FromStr;

use lendkit_core::{LendKitError, LendKitResult, Outcome, UserRole};
use secrecy::SecretString;

use crate::Services;

/// Enrolls the administrator with its bootstrap secret.
///
/// # Errors
///
/// Propagates enrollment failures.
pub async fn enroll_admin(services: &Services, id: &str, secret: String) -> LendKitResult<Outcome> {
    let secret = SecretString::from(secret);
    services.enroller.enroll_admin(id, &secret).await?;
    Ok(Outcome::success(format!("Successfully enrolled {id} in the wallet")))
}

/// Registers and enrolls a user. An empty `role` means the default role.
///
/// # Errors
///
/// [`LendKitError::InvalidInput`] for an unknown role, otherwise enrollment failures.
pub async fn register_user(services: &Services, id: &str, role: &str) -> LendKitResult<Outcome> {
    let role = parse_role(role)?;
    services.enroller.register_user(id, role).await?;
    Ok(Outcome::success(format!("Successfully enrolled {id} in the wallet")))
}

/// Lists stored identity ids.
///
/// # Errors
///
/// Propagates wallet failures.
pub fn identities(services: &Services) -> LendKitResult<Outcome> {
    let ids = services.store.list()?;
    Ok(Outcome::success(ids))
}

/// # Errors
///
/// Propagates coordinator failures.
pub async fn register_book(services: &Services, name: &str, owner: &str) -> LendKitResult<Outcome> {
    services.books.register_book(name, owner).await?;
    Ok(Outcome::success("Successfully created"))
}

/// # Errors
///
/// Propagates coordinator failures.
pub async fn request_rent(
    services: &Services,
    name: &str,
    owner: &str,
    renter: &str,
) -> LendKitResult<Outcome> {
    services.books.request_rent(name, owner, renter).await?;
    Ok(Outcome::success("Successfully request"))
}

/// # Errors
///
/// Propagates coordinator failures.
pub async fn rent_book(services: &Services, name: &str, owner: &str) -> LendKitResult<Outcome> {
    services.books.rent_book(name, owner).await?;
    Ok(Outcome::success("Successfully rent"))
}

/// # Errors
///
/// Propagates coordinator failures.
pub async fn return_book(services: &Services, name: &str, owner: &str) -> LendKitResult<Outcome> {
    services.books.return_book(name, owner).await?;
    Ok(Outcome::success("Successfully return"))
}

/// Reads a book; `content` is present only when the book exists.
///
/// # Errors
///
/// Propagates coordinator failures.
pub async fn query_book(services: &Services, name: &str, owner: &str) -> LendKitResult<Outcome> {
    let book = services.books.query_book(name, owner).await?;
    let outcome = Outcome::success("Successfully retrieved");
    match book {
        Some(book) => Ok(outcome.with_content(serde_json::to_value(book)?)),
        None => Ok(outcome),
    }
}

/// Lists all books; `msg` carries the ledger's listing as returned.
///
/// # Errors
///
/// Propagates coordinator failures.
pub async fn list_books(services: &Services, caller: &str) -> LendKitResult<Outcome> {
    let reply = services.books.query_all_books_reply(caller).await?;
    Ok(Outcome::success(reply.raw))
}

/// Returns a book's history; `msg` carries the ledger's entries in commit order, as returned.
///
/// # Errors
///
/// Propagates coordinator failures.
pub async fn book_history(services: &Services, name: &str, owner: &str) -> LendKitResult<Outcome> {
    let reply = services.books.history_reply(name, owner).await?;
    Ok(Outcome::success(reply.raw))
}

/// Renders a result as the outcome the caller sees.
#[must_use]
pub fn render(result: &LendKitResult<Outcome>) -> Outcome {
    Outcome::from_result(result, Clone::clone)
}

fn parse_role(role: &str) -> LendKitResult<UserRole> {
    if role.is_empty() {
        return Ok(UserRole::default());
    }
    UserRole::from_str(role).map_err(|_| LendKitError::InvalidInput {
        attribute: "role".to_string(),
        reason: format!("unknown role {role:?}"),
    })
}
