//! Shared domain types for Assayer.
//!
//! Jobs, executions, execution plans, domain results, the consolidated
//! result, orchestrator events and configuration, plus their error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod job;
pub mod plan;
pub mod result;
