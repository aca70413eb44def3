//! Scheduling: dependency batches, cron handling and the recurring trigger
//! loop.

pub mod batch;
pub mod cron;
pub mod trigger;

pub use batch::{Batch, BatchNode, BatchPlan, DependencyGraphError, build_batches, nodes_from_plan};
pub use trigger::{TriggerCandidate, TriggerScheduler, TriggerTarget};
