//! API layer - HTTP and SSE entry points.

pub mod auth;
pub mod error;
pub mod http;
pub mod sse;
