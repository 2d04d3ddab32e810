//! Generation request value objects.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{AssetId, TaskId, UserId};

/// Output aspect ratio hint for generated imagery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "2:3")]
    Portrait2x3,
    #[serde(rename = "3:2")]
    Landscape3x2,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "4:5")]
    Portrait4x5,
    #[serde(rename = "5:4")]
    Landscape5x4,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
    #[serde(rename = "21:9")]
    Ultrawide21x9,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 10] = [
        AspectRatio::Square,
        AspectRatio::Portrait2x3,
        AspectRatio::Landscape3x2,
        AspectRatio::Portrait3x4,
        AspectRatio::Landscape4x3,
        AspectRatio::Portrait4x5,
        AspectRatio::Landscape5x4,
        AspectRatio::Portrait9x16,
        AspectRatio::Landscape16x9,
        AspectRatio::Ultrawide21x9,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait2x3 => "2:3",
            AspectRatio::Landscape3x2 => "3:2",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Portrait4x5 => "4:5",
            AspectRatio::Landscape5x4 => "5:4",
            AspectRatio::Portrait9x16 => "9:16",
            AspectRatio::Landscape16x9 => "16:9",
            AspectRatio::Ultrawide21x9 => "21:9",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unsupported aspect ratio: {s}")))
    }
}

/// Output resolution preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSize {
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl ImageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::OneK => "1K",
            ImageSize::TwoK => "2K",
            ImageSize::FourK => "4K",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1K" => Ok(ImageSize::OneK),
            "2K" => Ok(ImageSize::TwoK),
            "4K" => Ok(ImageSize::FourK),
            other => Err(DomainError::validation(format!(
                "unsupported image size: {other}"
            ))),
        }
    }
}

/// A validated generation request. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    prompt: String,
    aspect_ratio: Option<AspectRatio>,
    image_size: Option<ImageSize>,
    reference_asset_ids: Vec<AssetId>,
    owner: UserId,
}

impl TaskRequest {
    pub fn new(
        prompt: impl Into<String>,
        aspect_ratio: Option<AspectRatio>,
        image_size: Option<ImageSize>,
        reference_asset_ids: Vec<AssetId>,
        owner: UserId,
    ) -> Result<Self, DomainError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(DomainError::validation("prompt must not be empty"));
        }

        let mut references: Vec<AssetId> = Vec::with_capacity(reference_asset_ids.len());
        for id in reference_asset_ids {
            if !references.contains(&id) {
                references.push(id);
            }
        }

        Ok(Self {
            prompt,
            aspect_ratio,
            image_size,
            reference_asset_ids: references,
            owner,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn aspect_ratio(&self) -> Option<AspectRatio> {
        self.aspect_ratio
    }

    pub fn image_size(&self) -> Option<ImageSize> {
        self.image_size
    }

    pub fn reference_asset_ids(&self) -> &[AssetId] {
        &self.reference_asset_ids
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }
}

/// Queue payload: one job per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub task_id: TaskId,
    pub request: TaskRequest,
}

impl GenerationJob {
    pub fn new(task_id: TaskId, request: TaskRequest) -> Self {
        Self { task_id, request }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_prompt() {
        let err = TaskRequest::new("   ", None, None, vec![], UserId::new()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn collapses_repeated_references() {
        let reference = AssetId::new();
        let request = TaskRequest::new(
            "a lighthouse at dusk",
            Some(AspectRatio::Landscape16x9),
            Some(ImageSize::TwoK),
            vec![reference, reference],
            UserId::new(),
        )
        .unwrap();
        assert_eq!(request.reference_asset_ids(), &[reference]);
    }

    #[test]
    fn aspect_ratio_accepts_only_known_values() {
        assert_eq!("21:9".parse::<AspectRatio>(), Ok(AspectRatio::Ultrawide21x9));
        assert!("7:5".parse::<AspectRatio>().is_err());
        assert_eq!(
            serde_json::to_string(&AspectRatio::Portrait9x16).unwrap(),
            "\"9:16\""
        );
    }

    #[test]
    fn image_size_accepts_only_known_values() {
        assert_eq!("4K".parse::<ImageSize>(), Ok(ImageSize::FourK));
        assert!("8K".parse::<ImageSize>().is_err());
    }
}
