//! Phase execution and run reports.
//!
//! [`Executor`] runs single phases and parallel groups against a shared
//! registry and records each outcome in a [`RunReport`]. Server, keep-alive
//! and watch steps belong to the runtime; the executor only sees phases.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;

use kiln_core::{ConfigContext, PhaseName, RunState};

use crate::error::{BuildError, PhaseFailure};
use crate::registry::PhaseRegistry;

// ---------------------------------------------------------------------------
// 1. Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    /// Aborted because a sibling in its parallel group failed.
    Cancelled,
}

/// One phase's result within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseOutcome {
    pub name: PhaseName,
    pub status: OutcomeStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workflow: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub phases: Vec<PhaseOutcome>,
    /// First failure, rendered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(skip)]
    clock: Option<Instant>,
}

impl RunReport {
    pub fn new(workflow: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            state: RunState::Pending,
            started_at: Utc::now(),
            duration_ms: 0,
            phases: Vec::new(),
            failure: None,
            clock: None,
        }
    }

    /// `Pending → Running`; stamps the start time.
    pub fn start(&mut self) {
        if self.state.advance(RunState::Running) {
            self.started_at = Utc::now();
            self.clock = Some(Instant::now());
        }
    }

    /// Move to a terminal state. A report that already finished is left
    /// untouched.
    pub fn finish<E: std::fmt::Display>(&mut self, result: Result<(), &E>) {
        let next = if result.is_ok() {
            RunState::Succeeded
        } else {
            RunState::Failed
        };
        if self.state.advance(next) {
            if let Err(err) = result {
                self.failure.get_or_insert_with(|| err.to_string());
            }
            self.duration_ms = self.clock.map(|c| millis(c.elapsed())).unwrap_or(0);
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == RunState::Succeeded
    }

    pub fn record(&mut self, name: PhaseName, elapsed: Duration, result: Result<(), &BuildError>) {
        let (status, error) = match result {
            Ok(()) => (OutcomeStatus::Succeeded, None),
            Err(err) => (OutcomeStatus::Failed, Some(cause_of(err))),
        };
        self.phases.push(PhaseOutcome {
            name,
            status,
            duration_ms: millis(elapsed),
            error,
        });
    }

    fn record_cancelled(&mut self, name: PhaseName) {
        self.phases.push(PhaseOutcome {
            name,
            status: OutcomeStatus::Cancelled,
            duration_ms: 0,
            error: None,
        });
    }

    /// Phase outcomes with the given status.
    pub fn with_status(&self, status: OutcomeStatus) -> impl Iterator<Item = &PhaseOutcome> {
        self.phases.iter().filter(move |p| p.status == status)
    }
}

/// The failure without the `phase '<name>' failed:` prefix, which the
/// outcome already carries.
fn cause_of(err: &BuildError) -> String {
    match err {
        BuildError::PhaseExecution { cause, .. } => cause.to_string(),
        other => other.to_string(),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// 2. Executor
// ---------------------------------------------------------------------------

/// Runs phases from a shared registry with one configuration.
#[derive(Debug, Clone)]
pub struct Executor {
    registry: Arc<PhaseRegistry>,
    config: ConfigContext,
}

impl Executor {
    pub fn new(registry: Arc<PhaseRegistry>, config: ConfigContext) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &PhaseRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ConfigContext {
        &self.config
    }

    /// Run one phase and record it.
    pub async fn run_phase(&self, name: &PhaseName, report: &mut RunReport) -> Result<(), BuildError> {
        let phase = self.registry.require(name)?;
        tracing::info!(phase = %name, "running phase");
        let started = Instant::now();
        let result = phase.run(&self.config).await;
        let elapsed = started.elapsed();
        log_outcome(name, elapsed, result.as_ref());
        report.record(name.clone(), elapsed, result.as_ref().map(|_| ()));
        result
    }

    /// Run `names` one after another, stopping at the first failure.
    pub async fn run_sequence(&self, names: &[PhaseName], report: &mut RunReport) -> Result<(), BuildError> {
        for name in names {
            self.run_phase(name, report).await?;
        }
        Ok(())
    }

    /// Run `names` concurrently. Completes when every member has finished;
    /// the first failure aborts the members still running.
    pub async fn run_parallel(&self, names: &[PhaseName], report: &mut RunReport) -> Result<(), BuildError> {
        let phases = names
            .iter()
            .map(|name| self.registry.require(name).cloned())
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(phases = ?names.iter().map(PhaseName::as_str).collect::<Vec<_>>(), "running parallel group");

        let mut set = JoinSet::new();
        for phase in phases {
            let config = self.config.clone();
            set.spawn(async move {
                let started = Instant::now();
                let result = phase.run(&config).await;
                (phase.name().clone(), started.elapsed(), result)
            });
        }

        let mut finished = BTreeSet::new();
        let mut first_error: Option<BuildError> = None;

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, elapsed, result)) => {
                    log_outcome(&name, elapsed, result.as_ref());
                    report.record(name.clone(), elapsed, result.as_ref().map(|_| ()));
                    finished.insert(name);
                    if let Err(err) = result {
                        if first_error.is_none() {
                            set.abort_all();
                            first_error = Some(err);
                        }
                    }
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    if first_error.is_none() {
                        set.abort_all();
                        first_error = Some(BuildError::PhaseExecution {
                            name: PhaseName::from(group_label(names)),
                            cause: PhaseFailure::Join(join_err.to_string()),
                        });
                    }
                }
            }
        }

        for name in names {
            if !finished.contains(name) {
                tracing::warn!(phase = %name, "cancelled");
                report.record_cancelled(name.clone());
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn group_label(names: &[PhaseName]) -> String {
    let names: Vec<&str> = names.iter().map(PhaseName::as_str).collect();
    format!("parallel[{}]", names.join(","))
}

fn log_outcome(name: &PhaseName, elapsed: Duration, result: Result<&(), &BuildError>) {
    match result {
        Ok(()) => tracing::info!(phase = %name, duration_ms = millis(elapsed), "phase finished"),
        Err(err) => tracing::error!(phase = %name, duration_ms = millis(elapsed), error = %err, "phase failed"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
