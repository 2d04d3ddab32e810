//! Use cases - orchestration over the infrastructure ports.

pub mod tasks;

pub use tasks::TaskUseCases;
