//! Orchestration engine and port definitions for Assayer.
//!
//! This crate holds the scheduling, coordination, supervision and
//! aggregation logic, plus the traits ("ports") the infrastructure layer
//! implements: domain executors, notifiers and the orchestrator repository.
//! It depends only on `assayer-types`, never on `assayer-infra` or any
//! database/IO crate.

pub mod aggregate;
pub mod coordinator;
pub mod event;
pub mod executor;
pub mod notify;
pub mod orchestrator;
pub mod repository;
pub mod schedule;
pub mod supervisor;

pub use orchestrator::{Orchestrator, OrchestratorError};
