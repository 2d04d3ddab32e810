//! genstream domain - pure types for the task orchestration pipeline.
//!
//! No I/O lives here. Ports and adapters are in `genstream-engine`.

pub mod error;
pub mod events;
pub mod ids;
pub mod snapshot;
pub mod task;

pub use error::DomainError;
pub use events::{BusMessage, ObserverEvent, TaskChannel};
pub use ids::{AssetId, TaskId, UserId};
pub use snapshot::{AssetRef, ErrorInfo, TaskSnapshot};
pub use task::{AspectRatio, GenerationJob, ImageSize, TaskRequest};
