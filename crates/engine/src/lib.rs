//! genstream engine library.
//!
//! ## Structure
//!
//! - `infrastructure/` - port traits and their adapters (queue, cache, bus, backend, assets)
//! - `use_cases/` - task submission, state polling, the generation worker and the SSE bridge
//! - `api/` - HTTP and SSE entry points
//! - `app` - application composition

pub mod api;
pub mod app;
pub mod infrastructure;
pub mod use_cases;

pub use app::App;
