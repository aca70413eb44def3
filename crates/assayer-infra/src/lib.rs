//! Infrastructure layer for Assayer.
//!
//! Implements the ports defined in `assayer-core`: SQLite persistence for
//! jobs and executions, a process-spawning domain executor and a logging
//! notifier. Also loads configuration and plan/job files.

pub mod config;
pub mod executor;
pub mod files;
pub mod notify;
pub mod sqlite;
