//! Request DTOs for the task HTTP surface.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use genstream_domain::{AspectRatio, AssetId, DomainError, ImageSize, TaskRequest, UserId};

/// Rejected request payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("{0}")]
    Invalid(String),
}

impl From<validator::ValidationErrors> for RequestError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("{field} is invalid"),
                })
            })
            .collect();
        messages.sort();
        RequestError::Invalid(messages.join("; "))
    }
}

impl From<DomainError> for RequestError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => RequestError::Invalid(msg),
        }
    }
}

/// Body of `POST /api/tasks/gemini`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateGeminiTaskRequest {
    /// Prompt that drives generation of text and/or imagery
    #[validate(length(min = 1, message = "prompt must not be empty"))]
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,

    /// Output resolution preset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,

    /// Previously stored assets used as style/content references
    #[serde(default)]
    #[validate(length(
        max = 16,
        message = "at most 16 reference uploads are allowed"
    ))]
    pub reference_upload_ids: Vec<String>,
}

impl CreateGeminiTaskRequest {
    /// Validates the payload and converts it into a domain request owned by `owner`.
    pub fn into_task_request(self, owner: Uuid) -> Result<TaskRequest, RequestError> {
        self.validate()?;

        let aspect_ratio = self
            .aspect_ratio
            .as_deref()
            .map(str::parse::<AspectRatio>)
            .transpose()?;
        let image_size = self
            .image_size
            .as_deref()
            .map(str::parse::<ImageSize>)
            .transpose()?;

        let references = self
            .reference_upload_ids
            .iter()
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| {
                raw.parse::<AssetId>().map_err(|_| {
                    RequestError::Invalid(format!("reference upload id is not a UUID: {raw}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TaskRequest::new(
            self.prompt,
            aspect_ratio,
            image_size,
            references,
            UserId::from_uuid(owner),
        )?)
    }
}
