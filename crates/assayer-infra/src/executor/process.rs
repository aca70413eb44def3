//! Runs workloads as child processes.
//!
//! Each workload's `command` is spawned with its `args`; exit status 0 is a
//! pass and anything else a failure. A workload can also report structured
//! findings by printing lines of the form `::finding {json}` on stdout, where
//! the JSON is a `Finding`. Children are killed when the execution is
//! cancelled or times out.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use assayer_core::executor::{DomainExecutor, ExecutionContext};
use assayer_types::plan::{Domain, DomainPlan, Priority, Workload};
use assayer_types::result::{DomainResult, Finding, Severity};
use tokio::process::Command;

const FINDING_PREFIX: &str = "::finding ";
/// Bytes of stderr kept in a failure finding.
const STDERR_TAIL: usize = 2048;

/// Executes every workload of a domain sequentially as a child process.
#[derive(Debug, Clone)]
pub struct ProcessDomainExecutor {
    domain: Domain,
    working_dir: Option<PathBuf>,
}

impl ProcessDomainExecutor {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn command(&self, plan: &DomainPlan, workload: &Workload, program: &str, ctx: &ExecutionContext) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(&workload.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("ASSAYER_RUN_ID", ctx.run_id.to_string())
            .env("ASSAYER_DOMAIN", self.domain.as_str())
            .env("ASSAYER_WORKLOAD", &workload.name)
            .env("ASSAYER_ATTEMPT", ctx.attempt.to_string())
            .env("ASSAYER_PHASE", &ctx.phase);
        if !plan.settings.is_empty() {
            cmd.env("ASSAYER_DOMAIN_SETTINGS", serde_json::Value::Object(plan.settings.clone()).to_string());
        }
        if !workload.settings.is_empty() {
            cmd.env("ASSAYER_SETTINGS", serde_json::Value::Object(workload.settings.clone()).to_string());
        }
        if !ctx.values.is_empty() {
            cmd.env("ASSAYER_CONTEXT", serde_json::Value::Object(ctx.values.clone()).to_string());
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

fn severity_for(priority: Priority) -> Severity {
    match priority {
        Priority::Critical => Severity::Critical,
        Priority::High => Severity::High,
        Priority::Medium => Severity::Medium,
        Priority::Low => Severity::Low,
    }
}

/// Findings printed by the workload itself.
fn reported_findings(stdout: &str, workload: &str) -> Vec<Finding> {
    stdout
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix(FINDING_PREFIX))
        .filter_map(|json| match serde_json::from_str::<Finding>(json) {
            Ok(mut finding) => {
                finding.workload.get_or_insert_with(|| workload.to_string());
                Some(finding)
            }
            Err(e) => {
                tracing::warn!(workload, error = %e, "ignoring malformed finding line");
                None
            }
        })
        .collect()
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

impl DomainExecutor for ProcessDomainExecutor {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn execute(&self, plan: &DomainPlan, ctx: &ExecutionContext) -> DomainResult {
        let started = Instant::now();
        let (mut passed, mut failed) = (0u32, 0u32);
        let mut findings = Vec::new();

        for workload in &plan.workloads {
            let Some(program) = workload.command.as_deref() else {
                failed += 1;
                findings.push(
                    Finding::new(
                        format!("{}:no-command", workload.name),
                        format!("{} has no command to run", workload.name),
                        Severity::Medium,
                    )
                    .with_category("configuration")
                    .with_workload(&workload.name),
                );
                continue;
            };

            let mut cmd = self.command(plan, workload, program, ctx);
            tracing::debug!(domain = %self.domain, workload = %workload.name, program, "spawning workload");
            let output = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    tracing::info!(domain = %self.domain, workload = %workload.name, "workload cancelled");
                    return DomainResult::cancelled(self.domain)
                        .with_duration_ms(started.elapsed().as_millis() as u64);
                }
                output = cmd.output() => output,
            };

            match output {
                Ok(output) => {
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    findings.extend(reported_findings(&stdout, &workload.name));
                    if output.status.success() {
                        passed += 1;
                        continue;
                    }
                    failed += 1;
                    let code = output
                        .status
                        .code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "a signal".to_string());
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let mut finding = Finding::new(
                        format!("{}:exit", workload.name),
                        format!("{} exited with {code}", workload.name),
                        severity_for(workload.priority),
                    )
                    .with_category("workload_failure")
                    .with_workload(&workload.name);
                    let stderr = tail(stderr.trim(), STDERR_TAIL);
                    if !stderr.is_empty() {
                        finding = finding.with_description(stderr);
                    }
                    tracing::info!(domain = %self.domain, workload = %workload.name, %code, "workload failed");
                    findings.push(finding);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(domain = %self.domain, workload = %workload.name, error = %e, "failed to spawn workload");
                    findings.push(
                        Finding::new(
                            format!("{}:spawn", workload.name),
                            format!("{} could not be started", workload.name),
                            Severity::High,
                        )
                        .with_category("execution_error")
                        .with_workload(&workload.name)
                        .with_description(e.to_string()),
                    );
                }
            }
        }

        DomainResult::from_counts(self.domain, passed, failed)
            .with_findings(findings)
            .with_duration_ms(started.elapsed().as_millis() as u64)
    }
}
