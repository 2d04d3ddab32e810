//! Task use cases: submission, state polling, the generation worker and
//! the subscription bridge.
//!
//! Data flow for one task:
//!
//! 1. `SubmitTask` seeds the state cache and enqueues a `GenerationJob`
//! 2. `GenerationWorker` streams the backend, writing coalesced snapshots
//!    to the cache and publishing deltas on the bus
//! 3. `StreamTask` merges the cache snapshot and live bus deltas into one
//!    terminating sequence of `ObserverEvent`s per observer

use std::sync::Arc;

mod state;
mod stream;
mod submit;
mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use state::GetTaskState;
pub use stream::{BridgeConfig, StreamTask, TaskEventStream};
pub use submit::{SubmitError, SubmitTask};
pub use worker::{AttemptOutcome, GenerationWorker, RetrySeed, WorkerConfig, WorkerError};

/// Container for task use cases.
pub struct TaskUseCases {
    pub submit: Arc<SubmitTask>,
    pub state: Arc<GetTaskState>,
    pub stream: Arc<StreamTask>,
}

impl TaskUseCases {
    pub fn new(submit: Arc<SubmitTask>, state: Arc<GetTaskState>, stream: Arc<StreamTask>) -> Self {
        Self {
            submit,
            state,
            stream,
        }
    }
}
