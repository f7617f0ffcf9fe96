//! Data Transfer Objects
//!
//! Lightweight types passed to and returned from the queue gateway.

pub mod result;
pub mod stats;
