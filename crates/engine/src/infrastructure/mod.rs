//! Infrastructure implementations.
//!
//! Contains port trait implementations for external dependencies.

pub mod asset_store;
pub mod clock;
pub mod config;
pub mod event_bus;
pub mod gemini;
pub mod ports;
pub mod queues;
pub mod state_cache;
