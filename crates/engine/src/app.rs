//! Application state and composition.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use genstream_domain::GenerationJob;

use crate::infrastructure::ports::{EventBusPort, QueuePort, StateCachePort};
use crate::use_cases::tasks::{BridgeConfig, GetTaskState, StreamTask, SubmitTask, TaskUseCases};

/// Main application state.
///
/// Passed to HTTP handlers via Axum state. The worker is wired separately
/// in `main` since it owns the backend and asset store.
pub struct App {
    pub use_cases: TaskUseCases,
    /// Cancelled on shutdown; open SSE bridges run on child tokens.
    pub shutdown: CancellationToken,
}

impl App {
    pub fn new(
        queue: Arc<dyn QueuePort<GenerationJob>>,
        cache: Arc<dyn StateCachePort>,
        bus: Arc<dyn EventBusPort>,
        bridge: BridgeConfig,
    ) -> Self {
        let submit = Arc::new(SubmitTask::new(queue, cache.clone()));
        let state = Arc::new(GetTaskState::new(cache.clone()));
        let stream = Arc::new(StreamTask::new(cache, bus, bridge));

        Self {
            use_cases: TaskUseCases::new(submit, state, stream),
            shutdown: CancellationToken::new(),
        }
    }
}
