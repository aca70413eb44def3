//! Event bus for orchestration progress.
//!
//! Provides an `EventBus` that distributes `OrchestratorEvent` messages to
//! all subscribers via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::EventBus;
