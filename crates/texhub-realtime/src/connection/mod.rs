//! Per-connection write path and bootstrap admission.

pub mod bootstrap;
pub mod write_queue;
pub mod writer_pool;

pub use bootstrap::BootstrapPool;
pub use write_queue::{WriteQueue, WriteQueueEntry, WsSink};
pub use writer_pool::WriterPool;
