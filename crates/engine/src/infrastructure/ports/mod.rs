//! Port traits for infrastructure boundaries.
//!
//! These are the ONLY abstractions in the engine. Everything else is concrete types.
//! Ports exist for:
//! - Task state (could swap the in-memory TTL cache -> Redis)
//! - Event fan-out (could swap the in-process bus -> Redis pub/sub)
//! - Job delivery (could swap SQLite -> Redis)
//! - Generation (could swap Gemini -> another multimodal backend)
//! - Asset storage (could swap local disk -> object storage)
//! - Clock/Random (for testing)

mod error;
mod external;
mod queue;
mod state;
mod testing;

pub use error::{AssetError, BusError, CacheError, GenerationError, QueueError};

// =============================================================================
// State + Bus Ports
// =============================================================================
pub use state::{
    BusEnvelope, EventBusPort, StateCachePort, Subscription, SubscriptionId,
};

// =============================================================================
// Queue Ports
// =============================================================================
pub use queue::{
    EnqueueOutcome, FailOutcome, QueueItem, QueueItemId, QueueItemStatus,
    QueueNotificationPort, QueuePort, WaitResult,
};

// =============================================================================
// External Service Ports
// =============================================================================
pub use external::{
    AssetStorePort, GenerationPart, GenerationRequest, GenerativePort, PartStream,
    ReferenceContent,
};

// =============================================================================
// Test-Only Mocks (only available during test builds)
// =============================================================================
#[cfg(test)]
pub use external::{MockAssetStorePort, MockGenerativePort};

#[cfg(test)]
pub use state::{MockEventBusPort, MockStateCachePort};

#[cfg(test)]
pub use testing::{MockClockPort, MockRandomPort};

// =============================================================================
// Testing Ports
// =============================================================================
pub use testing::{ClockPort, RandomPort};
