//! Agentry Core
//!
//! Core types for the Agentry coding-agent worker pool.
//!
//! This crate contains:
//! - Domain types: jobs, results and their statuses
//! - DTOs: parameters and aggregates exchanged with the queue store

pub mod domain;
pub mod dto;
