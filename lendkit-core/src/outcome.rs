//! The uniform caller-visible result of every operation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

use crate::error::{LendKitError, LendKitResult};

/// Whether an operation succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutcomeStatus {
    /// The operation completed.
    Success,
    /// The operation failed; see `error`.
    Failed,
}

/// `{result, msg?, error?, content?}`.
///
/// Built programmatically and serialized with `serde`, so values containing
/// quotes or control characters are always escaped correctly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Success or failure.
    pub result: OutcomeStatus,
    /// Human-readable message, or the raw ledger payload for listings and history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<Value>,
    /// Caller-safe error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Asset state, present only when the ledger returned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl Outcome {
    /// A success carrying `msg`.
    #[must_use]
    pub fn success(msg: impl Into<Value>) -> Self {
        Self {
            result: OutcomeStatus::Success,
            msg: Some(msg.into()),
            error: None,
            content: None,
        }
    }

    /// A failure describing `error` without internal detail.
    #[must_use]
    pub fn failure(error: &LendKitError) -> Self {
        Self {
            result: OutcomeStatus::Failed,
            msg: None,
            error: Some(error.public_message()),
            content: None,
        }
    }

    /// Attaches `content`.
    #[must_use]
    pub fn with_content(mut self, content: Value) -> Self {
        self.content = Some(content);
        self
    }

    /// Maps a result with `on_success`, or a failure outcome.
    #[must_use]
    pub fn from_result<T>(result: &LendKitResult<T>, on_success: impl FnOnce(&T) -> Self) -> Self {
        match result {
            Ok(value) => on_success(value),
            Err(error) => Self::failure(error),
        }
    }

    /// Returns `true` for successful outcomes.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.result, OutcomeStatus::Success)
    }
}
