//! Bounded-concurrency admission for job pipelines.

mod worker_pool;

pub use worker_pool::{PoolError, PoolSlot, PoolStatus, WorkerPool};
