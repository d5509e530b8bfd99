//! The lending-book asset as observed through the ledger.
//!
//! Books are owned and mutated by the deployed contract; this module only
//! models what the contract returns and derives the keys it expects.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::{LendKitError, LendKitResult};
use crate::identity::require_valid_id;

/// Separator between book name and owner in a composite key.
pub const KEY_SEPARATOR: char = '_';

/// Lifecycle state of a book.
///
/// The contract stores `registered`, `inRequest`, `rented` and `returned`;
/// `registered` and `returned` both mean the book can be requested again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BookState {
    /// Registered or returned; open for a rent request.
    #[strum(to_string = "Available", serialize = "registered", serialize = "returned")]
    Available,
    /// A renter asked for the book; waiting for the owner to hand it over.
    #[strum(to_string = "Requested", serialize = "inRequest")]
    Requested,
    /// Lent out.
    #[strum(to_string = "Rented", serialize = "rented")]
    Rented,
}

impl TryFrom<String> for BookState {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BookState> for String {
    fn from(state: BookState) -> Self {
        state.to_string()
    }
}

/// A book record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBook")]
pub struct Book {
    /// Book name, unique per owner.
    pub name: String,
    /// Identity id of the owner.
    pub owner: String,
    /// Current lifecycle state.
    pub state: BookState,
    /// Identity id of the current renter, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renter: Option<String>,
}

/// Contract wire form. Missing keys come back with every field empty.
#[derive(Debug, Default, Deserialize)]
struct RawBook {
    #[serde(default)]
    name: String,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    renter: String,
}

impl RawBook {
    fn into_book(self) -> Result<Option<Book>, strum::ParseError> {
        if self.state.is_empty() {
            return Ok(None);
        }
        Ok(Some(Book {
            name: self.name,
            owner: self.owner,
            state: self.state.parse()?,
            renter: Some(self.renter).filter(|r| !r.is_empty()),
        }))
    }
}

impl TryFrom<RawBook> for Book {
    type Error = String;

    fn try_from(raw: RawBook) -> Result<Self, Self::Error> {
        match raw.into_book() {
            Ok(Some(book)) => Ok(book),
            Ok(None) => Err("book record has no state".to_string()),
            Err(e) => Err(format!("unknown book state: {e}")),
        }
    }
}

impl Book {
    /// Parses a `QueryBook` result. An empty record means the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::SerializationError`] if the payload is not a book record.
    pub fn from_query_payload(payload: &[u8]) -> LendKitResult<Option<Self>> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let raw: Option<RawBook> = serde_json::from_slice(payload)?;
        raw.unwrap_or_default()
            .into_book()
            .map_err(|e| LendKitError::SerializationError {
                error: format!("unknown book state: {e}"),
            })
    }

    /// Composite key of this book.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.name, self.owner)
    }
}

/// One committed version of a book, as returned by `History`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Book value written by the transaction; `None` for deletions.
    #[serde(default, deserialize_with = "optional_record")]
    pub record: Option<Book>,
    /// Id of the committing transaction.
    pub tx_id: String,
    /// Commit timestamp.
    pub timestamp: DateTime<Utc>,
    /// Whether the transaction deleted the key.
    #[serde(default)]
    pub is_delete: bool,
}

fn optional_record<'de, D>(deserializer: D) -> Result<Option<Book>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<RawBook>::deserialize(deserializer)?
        .unwrap_or_default()
        .into_book()
        .map_err(serde::de::Error::custom)
}

/// Parses a `History` result. The contract returns `null` for unknown keys.
///
/// # Errors
///
/// Returns [`LendKitError::SerializationError`] if the payload is malformed.
pub fn parse_history(payload: &[u8]) -> LendKitResult<Vec<HistoryEntry>> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let entries: Option<Vec<HistoryEntry>> = serde_json::from_slice(payload)?;
    Ok(entries.unwrap_or_default())
}

/// A parsed contract result together with the JSON the contract returned.
///
/// `raw` is what callers forward untouched; `parsed` is the same payload
/// checked against the book model.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerReply<T> {
    /// Typed view of the payload.
    pub parsed: T,
    /// The payload as the contract wrote it. An empty payload reads as an empty array.
    pub raw: Value,
}

impl<T> LedgerReply<T> {
    /// Parses `payload` with `parse` and keeps the raw JSON alongside.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::SerializationError`] if either view fails to parse.
    pub fn from_payload(
        payload: &[u8],
        parse: impl FnOnce(&[u8]) -> LendKitResult<T>,
    ) -> LendKitResult<Self> {
        let parsed = parse(payload)?;
        let raw = if payload.iter().all(u8::is_ascii_whitespace) {
            Value::Array(Vec::new())
        } else {
            serde_json::from_slice(payload)?
        };
        Ok(Self { parsed, raw })
    }
}

/// One element of a `QueryAllBook` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookListing {
    /// Composite key.
    #[serde(rename = "Key")]
    pub key: String,
    /// Current value.
    #[serde(rename = "Record")]
    pub record: Book,
}

/// Parses a `QueryAllBook` result.
///
/// # Errors
///
/// Returns [`LendKitError::SerializationError`] if the payload is malformed.
pub fn parse_listing(payload: &[u8]) -> LendKitResult<Vec<BookListing>> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let listings: Option<Vec<BookListing>> = serde_json::from_slice(payload)?;
    Ok(listings.unwrap_or_default())
}

/// Validated (name, owner) pair addressing one book.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookKey {
    name: String,
    owner: String,
}

impl BookKey {
    /// Validates `name` and `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::InvalidInput`] if the name is empty or contains
    /// the key separator, or the owner is not a valid identity id.
    pub fn new(name: &str, owner: &str) -> LendKitResult<Self> {
        if name.trim().is_empty() {
            return Err(LendKitError::invalid_input("bookName", "must not be empty"));
        }
        if name.contains(KEY_SEPARATOR) {
            return Err(LendKitError::invalid_input(
                "bookName",
                format!("must not contain '{KEY_SEPARATOR}'"),
            ));
        }
        if name.chars().any(char::is_control) {
            return Err(LendKitError::invalid_input(
                "bookName",
                "must not contain control characters",
            ));
        }
        require_valid_id("owner", owner)?;
        Ok(Self {
            name: name.to_string(),
            owner: owner.to_string(),
        })
    }

    /// Book name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owner identity id.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The contract key, `name_owner`.
    #[must_use]
    pub fn composite(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.name, self.owner)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("registered", BookState::Available)]
    #[test_case("returned", BookState::Available)]
    #[test_case("inRequest", BookState::Requested)]
    #[test_case("rented", BookState::Rented)]
    #[test_case("Available", BookState::Available)]
    #[test_case("Requested", BookState::Requested)]
    fn test_state_accepts_contract_and_model_names(raw: &str, expected: BookState) {
        assert_eq!(raw.parse::<BookState>().unwrap(), expected);
    }

    #[test]
    fn test_query_payload_with_state() {
        let payload = br#"{"name":"BookA","owner":"Alice","state":"inRequest","renter":"Bob"}"#;
        let book = Book::from_query_payload(payload).unwrap().unwrap();

        assert_eq!(book.state, BookState::Requested);
        assert_eq!(book.renter.as_deref(), Some("Bob"));
        assert_eq!(book.key(), "BookA_Alice");
    }

    #[test]
    fn test_empty_query_payload_means_absent() {
        let empty = br#"{"name":"","owner":"","state":"","renter":""}"#;
        assert_eq!(Book::from_query_payload(empty).unwrap(), None);
        assert_eq!(Book::from_query_payload(b"").unwrap(), None);
        assert_eq!(Book::from_query_payload(b"null").unwrap(), None);
    }

    #[test]
    fn test_book_serializes_model_state_and_skips_empty_renter() {
        let book = Book {
            name: "BookA".to_string(),
            owner: "Alice".to_string(),
            state: BookState::Available,
            renter: None,
        };
        assert_eq!(
            serde_json::to_value(&book).unwrap(),
            serde_json::json!({ "name": "BookA", "owner": "Alice", "state": "Available" })
        );
    }

    #[test]
    fn test_history_payload() {
        let payload = br#"[
            {"record":{"name":"BookA","owner":"Alice","state":"registered","renter":""},
             "txId":"a1","timestamp":"2024-03-01T10:00:00Z","isDelete":false},
            {"record":{"name":"BookA","owner":"Alice","state":"inRequest","renter":"Bob"},
             "txId":"b2","timestamp":"2024-03-01T10:05:00.5Z","isDelete":false}
        ]"#;
        let history = parse_history(payload).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[1].tx_id, "b2");
        assert_eq!(
            history[1].record.as_ref().unwrap().state,
            BookState::Requested
        );
        assert!(history[0].timestamp < history[1].timestamp);
        assert!(parse_history(b"null").unwrap().is_empty());
    }

    #[test]
    fn test_listing_payload() {
        let payload = br#"[{"Key":"BookA_Alice","Record":{"name":"BookA","owner":"Alice","state":"rented","renter":"Bob"}}]"#;
        let listing = parse_listing(payload).unwrap();
        assert_eq!(listing[0].key, "BookA_Alice");
        assert_eq!(listing[0].record.state, BookState::Rented);
    }

    #[test]
    fn test_reply_keeps_contract_wording() {
        let payload = br#"[{"Key":"BookA_Alice","Record":{"name":"BookA","owner":"Alice","state":"returned","renter":""}}]"#;
        let reply = LedgerReply::from_payload(payload, parse_listing).unwrap();

        assert_eq!(reply.parsed[0].record.state, BookState::Available);
        assert_eq!(reply.raw[0]["Record"]["state"], "returned");
        assert_eq!(reply.raw[0]["Record"]["renter"], "");

        let empty = LedgerReply::from_payload(b"", parse_history).unwrap();
        assert_eq!(empty.raw, serde_json::json!([]));
        let null = LedgerReply::from_payload(b"null", parse_history).unwrap();
        assert!(null.parsed.is_empty());
        assert!(null.raw.is_null());
    }

    #[test_case("", "Alice" ; "empty name")]
    #[test_case("Book_A", "Alice" ; "separator in name")]
    #[test_case("BookA", "" ; "empty owner")]
    #[test_case("BookA", "../alice" ; "path owner")]
    fn test_book_key_rejects(name: &str, owner: &str) {
        assert!(matches!(
            BookKey::new(name, owner),
            Err(LendKitError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_book_key_composite() {
        let key = BookKey::new("BookA", "Alice").unwrap();
        assert_eq!(key.composite(), "BookA_Alice");
        assert_eq!(key.name(), "BookA");
        assert_eq!(key.owner(), "Alice");
    }
}
