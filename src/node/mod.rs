//! Worker-node handles: gRPC clients, the per-node handle, the pool, and the
//! reconciliation loop.

pub mod client;
pub mod handle;
pub mod pool;
pub mod sync;

#[cfg(test)]
pub mod fake;

pub use client::{Connectivity, GrpcWorker, WorkerApi};
pub use handle::NodeHandle;
pub use pool::NodePool;
