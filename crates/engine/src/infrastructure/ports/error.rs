//! Error types for port operations.

/// State cache failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("State cache unavailable: {0}")]
    Unavailable(String),
}

/// Event bus failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("Event bus unavailable: {0}")]
    Unavailable(String),
    #[error("Malformed bus payload on {channel}: {message}")]
    Decode { channel: String, message: String },
}

impl BusError {
    pub fn decode(channel: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            channel: channel.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue item not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Invalid status transition for {id}: {status}")]
    InvalidStatus { id: String, status: String },
}

impl QueueError {
    pub fn database(message: impl ToString) -> Self {
        Self::Database(message.to_string())
    }
}

/// Generative backend failures, before or during the stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    RequestFailed(String),
    #[error("Generative backend returned {status}: {message}")]
    Backend { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Asset store failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AssetError {
    #[error("Asset storage failed: {0}")]
    Storage(String),
    #[error("Unsupported mime type: {0}")]
    UnsupportedMimeType(String),
}

impl AssetError {
    pub fn storage(message: impl ToString) -> Self {
        Self::Storage(message.to_string())
    }
}
