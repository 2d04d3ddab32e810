//! The coalesced per-task state kept in the state cache.

use serde::{Deserialize, Serialize};

use crate::ids::{AssetId, UserId};

/// Reference to a materialized binary artifact. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
    pub id: AssetId,
    /// Storage key, relative to the asset store root.
    pub key: String,
    /// Retrievable location.
    pub url: String,
    pub mime_type: String,
    pub size: u64,
    pub owner: UserId,
}

/// Minimal error surfaced to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "unknown error".to_string()
        } else {
            message
        };
        Self { message }
    }
}

/// Canonical state of a task.
///
/// Once `is_done` is set the snapshot is terminal: either a success
/// (`error` is `None`) or a failure (`error` is `Some`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub is_done: bool,
    pub text: Option<String>,
    pub asset: Option<AssetRef>,
    pub error: Option<ErrorInfo>,
}

impl TaskSnapshot {
    /// The snapshot seeded at submission.
    pub fn initial() -> Self {
        Self::default()
    }

    /// Non-terminal progress.
    pub fn in_progress(text: Option<String>, asset: Option<AssetRef>) -> Self {
        Self {
            is_done: false,
            text,
            asset,
            error: None,
        }
    }

    pub fn succeeded(text: Option<String>, asset: Option<AssetRef>) -> Self {
        Self {
            is_done: true,
            text,
            asset,
            error: None,
        }
    }

    /// Terminal failure. Partial text/asset are kept for inspection only;
    /// the error marks the outcome.
    pub fn failed(text: Option<String>, asset: Option<AssetRef>, error: ErrorInfo) -> Self {
        Self {
            is_done: true,
            text,
            asset,
            error: Some(error),
        }
    }

    /// Progress with an error recorded by an attempt that will be retried.
    pub fn retrying(text: Option<String>, asset: Option<AssetRef>, error: ErrorInfo) -> Self {
        Self {
            is_done: false,
            text,
            asset,
            error: Some(error),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.is_done
    }

    pub fn is_success(&self) -> bool {
        self.is_done && self.error.is_none()
    }

    pub fn is_failure(&self) -> bool {
        self.is_done && self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_value(TaskSnapshot::initial()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "isDone": false, "text": null, "asset": null, "error": null })
        );
    }

    #[test]
    fn terminal_kinds_are_exclusive() {
        let ok = TaskSnapshot::succeeded(Some("hi".into()), None);
        let failed = TaskSnapshot::failed(None, None, ErrorInfo::new("boom"));
        assert!(ok.is_success() && !ok.is_failure());
        assert!(failed.is_failure() && !failed.is_success());
        assert!(!TaskSnapshot::retrying(None, None, ErrorInfo::new("x")).is_terminal());
    }

    #[test]
    fn blank_error_message_is_replaced() {
        assert_eq!(ErrorInfo::new("  ").message, "unknown error");
    }
}
