//! genstream shared - wire contract for the task HTTP and SSE surface.
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - serde, validator, uuid and thiserror
//! 2. **No business logic** - payload validation and serialization only
//! 3. **Raw ids on the wire** - DTOs carry `uuid::Uuid` / strings, converted at the edge

pub mod events;
pub mod requests;
pub mod responses;

pub use events::SseFrame;
pub use requests::{CreateGeminiTaskRequest, RequestError};
pub use responses::{CreateTaskResponse, ErrorResponse, TaskStateResponse};
