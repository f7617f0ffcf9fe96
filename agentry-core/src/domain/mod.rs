//! Core domain types
//!
//! The queue's two entities: jobs submitted for execution and the results
//! workers record against them. Shared between the worker (which claims and
//! completes jobs) and any tooling that reads the queue.

pub mod job;
pub mod metadata;
pub mod result;
