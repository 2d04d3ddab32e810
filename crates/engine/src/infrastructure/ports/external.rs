//! External service ports: the generative backend and the asset store.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use genstream_domain::{AspectRatio, AssetId, AssetRef, ImageSize, UserId};

use super::error::{AssetError, GenerationError};

/// Binary content of a resolved reference asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceContent {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Everything the backend needs for one streaming call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub references: Vec<ReferenceContent>,
    pub aspect_ratio: Option<AspectRatio>,
    pub image_size: Option<ImageSize>,
}

/// One part of the backend's response. Never both text and binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationPart {
    Text(String),
    InlineAsset { mime_type: String, data: Vec<u8> },
}

pub type PartStream = BoxStream<'static, Result<GenerationPart, GenerationError>>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerativePort: Send + Sync {
    /// Opens a streaming call. Errors may surface here or as stream items.
    async fn stream(&self, request: GenerationRequest) -> Result<PartStream, GenerationError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetStorePort: Send + Sync {
    /// `None` when the id is unknown.
    async fn resolve_reference(&self, id: AssetId)
        -> Result<Option<ReferenceContent>, AssetError>;

    async fn store(
        &self,
        data: Vec<u8>,
        mime_type: &str,
        owner: UserId,
    ) -> Result<AssetRef, AssetError>;
}
