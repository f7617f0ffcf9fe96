//! Scheduler layer for the worker
//!
//! This layer drives job processing: one polling scheduler per worker slot,
//! the stale-lease reaper, and the pool that starts and stops them together.

pub mod poller;
pub mod pool;
pub mod reaper;

pub use pool::WorkerPool;
