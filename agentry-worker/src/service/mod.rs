//! Service layer
//!
//! Services contain the worker's business logic: preparing job workspaces,
//! driving the coding agent, and running a claimed job through its stages.
//!
//! The agent sits behind a trait so the pipeline can be tested without a
//! real agent binary.

pub mod agent;
pub mod pipeline;
pub mod workspace;

// Re-export traits
pub use agent::AgentRunner;

// Re-export implementations
pub use agent::CliAgentRunner;
pub use pipeline::{JobPipeline, PipelineSettings};
pub use workspace::WorkspaceManager;
