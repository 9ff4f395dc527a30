//! Upload transfer engine for ShutterSync galleries.
//!
//! Turns batches of selected files into ordered upload queues and drives
//! them to storage:
//!
//! 1. Stat and classify each file (single-part vs multipart)
//! 2. Sort the batch small-files-first
//! 3. Negotiate destinations with the gallery backend
//! 4. Transfer under the concurrency budgets, retrying failed parts
//! 5. Assemble multipart completions and aggregate progress
//!
//! The engine is fully observable through snapshots and an event stream,
//! and every external touchpoint (transport, coordinator) is injected so
//! hosts and tests can swap them.

pub mod completion;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod progress;
pub mod queue;
pub mod transport;
pub mod types;
pub mod worker;

// Re-export primary types for convenience.
pub use config::{CoordinatorLimits, EngineConfig, RetryPolicy};
pub use coordinator::{ChunkSlot, MultipartLock, SmallSlot, UploadCoordinator};
pub use engine::{QueueProducer, UploadEngine};
pub use error::UploadError;
pub use progress::ProgressAggregator;
pub use transport::GalleryTransport;
pub use types::{
    ChunkDescriptor, ItemState, MultipartSession, QueuePhase, QueueSnapshot, UploadEvent,
    UploadItem,
};
