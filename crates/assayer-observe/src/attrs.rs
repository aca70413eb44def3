//! Span names shared by the binaries.
//!
//! Span names must be constant, so these are plain `&str` consts usable
//! directly as the first argument of `tracing::info_span!`.

/// Root span of the `serve` command.
pub const SPAN_SERVE: &str = "assay.serve";

/// One CLI command invocation.
pub const SPAN_COMMAND: &str = "assay.command";

/// One-shot plan run from the CLI.
pub const SPAN_PLAN_RUN: &str = "assay.plan.run";

/// Batched trigger of several jobs.
pub const SPAN_BATCHED_TRIGGER: &str = "assay.jobs.batched";
