//! Response types for the task HTTP surface.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use genstream_domain::{AssetRef, ErrorInfo, TaskSnapshot};

/// Returned by `POST /api/tasks/gemini`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResponse {
    /// Identifier to stream the task progress
    pub task_id: Uuid,
}

/// Returned by `GET /api/tasks/gemini/{task_id}`: the current snapshot.
pub type TaskStateResponse = TaskSnapshot;

/// Error body for non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_response_uses_camel_case() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(CreateTaskResponse { task_id: id }).unwrap();
        assert_eq!(json, serde_json::json!({ "taskId": id.to_string() }));
    }
}
