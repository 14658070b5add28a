//! Indexing orchestration: full-site runs on a worker pool plus synchronous single-page updates.

pub mod batch;
pub mod locks;
pub mod pool;
pub mod service;

pub use pool::{PoolState, WorkerPool};
pub use service::{IndexingResponse, IndexingService};
