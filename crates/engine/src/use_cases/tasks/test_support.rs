//! Test doubles shared by the task use-case tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_util::stream::{self, StreamExt};

use genstream_domain::{AssetId, AssetRef, GenerationJob, TaskRequest, UserId};

use crate::infrastructure::clock::{FixedClock, FixedRandom};
use crate::infrastructure::ports::{
    AssetError, AssetStorePort, ClockPort, GenerationError, GenerationPart, GenerationRequest,
    GenerativePort, PartStream, ReferenceContent,
};
use crate::infrastructure::queues::{InMemoryQueue, InProcessNotifier, RetryPolicy, RetryScheduler};

pub fn request(prompt: &str) -> TaskRequest {
    TaskRequest::new(prompt, None, None, Vec::new(), UserId::new()).unwrap()
}

pub fn fixed_clock() -> Arc<dyn ClockPort> {
    Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()))
}

/// In-memory queue whose retries are immediately ready again.
pub fn memory_queue(max_attempts: u32) -> InMemoryQueue<GenerationJob, InProcessNotifier> {
    let policy = RetryPolicy {
        max_attempts,
        base_delay_ms: 0,
        max_delay_ms: 0,
        jitter_factor: 0.0,
    };
    InMemoryQueue::new(
        InProcessNotifier::new("test-generation"),
        RetryScheduler::new(policy, fixed_clock(), Arc::new(FixedRandom(0.5))),
    )
}

/// One scripted backend call.
#[derive(Clone)]
pub enum Script {
    /// The call itself fails before any part arrives.
    OpenFails(GenerationError),
    /// The call yields these items in order.
    Parts(Vec<Result<GenerationPart, GenerationError>>),
}

/// Generative backend that replays one script per call.
#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerativePort for ScriptedGenerator {
    async fn stream(&self, request: GenerationRequest) -> Result<PartStream, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Parts(Vec::new()));
        match script {
            Script::OpenFails(e) => Err(e),
            Script::Parts(parts) => Ok(stream::iter(parts).boxed()),
        }
    }
}

pub fn text(fragment: &str) -> Result<GenerationPart, GenerationError> {
    Ok(GenerationPart::Text(fragment.to_string()))
}

pub fn image(bytes: &[u8]) -> Result<GenerationPart, GenerationError> {
    Ok(GenerationPart::InlineAsset {
        mime_type: "image/png".to_string(),
        data: bytes.to_vec(),
    })
}

/// Asset store that records every write.
#[derive(Default)]
pub struct RecordingAssetStore {
    stored: Mutex<Vec<AssetRef>>,
    references: Mutex<HashMap<AssetId, ReferenceContent>>,
}

impl RecordingAssetStore {
    pub fn stored(&self) -> Vec<AssetRef> {
        self.stored.lock().unwrap().clone()
    }

    pub fn add_reference(&self, mime_type: &str, data: Vec<u8>) -> AssetId {
        let id = AssetId::new();
        self.references.lock().unwrap().insert(
            id,
            ReferenceContent {
                mime_type: mime_type.to_string(),
                data,
            },
        );
        id
    }
}

#[async_trait]
impl AssetStorePort for RecordingAssetStore {
    async fn resolve_reference(
        &self,
        id: AssetId,
    ) -> Result<Option<ReferenceContent>, AssetError> {
        Ok(self.references.lock().unwrap().get(&id).cloned())
    }

    async fn store(
        &self,
        data: Vec<u8>,
        mime_type: &str,
        owner: UserId,
    ) -> Result<AssetRef, AssetError> {
        let id = AssetId::new();
        let key = format!("generated/{owner}/{id}.png");
        let asset = AssetRef {
            id,
            url: format!("memory://{key}"),
            key,
            mime_type: mime_type.to_string(),
            size: data.len() as u64,
            owner,
        };
        self.stored.lock().unwrap().push(asset.clone());
        Ok(asset)
    }
}
