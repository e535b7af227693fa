//! Source-tree watcher.
//!
//! Changes under `${source}` are debounced into batches by
//! `notify-debouncer-full`: a path is reported once it has been quiet for the
//! debounce period. Each rule whose pattern matches a path in the batch fires
//! once, in registration order, and runs its phases one after another.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecursiveMode, Watcher as _};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::{broadcast, mpsc};

use kiln_build::{names, Executor, RunReport};
use kiln_core::glob::PatternSet;
use kiln_core::{ConfigContext, ConfigError, PhaseName};

use crate::error::{io_err, RuntimeError};

/// A path pattern and the phases to run when it matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRule {
    pub name: String,
    /// `${name}` references allowed; relative to the project root.
    pub pattern: String,
    pub phases: Vec<PhaseName>,
}

impl WatchRule {
    pub fn new(name: &str, pattern: &str, phases: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            phases: phases.iter().map(|p| PhaseName::from(*p)).collect(),
        }
    }
}

/// `js` (no phases), `compass`, `styles`.
pub fn standard_rules() -> Vec<WatchRule> {
    vec![
        WatchRule::new("js", "${source}/${scripts}/**/*.js", &[]),
        WatchRule::new(
            "compass",
            "${source}/${styles}/**/*.{scss,sass}",
            &[names::COMPASS, names::AUTOPREFIXER],
        ),
        WatchRule::new(
            "styles",
            "${source}/${styles}/**/*.css",
            &[names::COPY_STYLES, names::AUTOPREFIXER],
        ),
    ]
}

/// A rule with its pattern resolved to absolute globs.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    pub phases: Vec<PhaseName>,
    patterns: PatternSet,
}

impl CompiledRule {
    pub fn compile(rule: &WatchRule, config: &ConfigContext) -> Result<Self, ConfigError> {
        let pattern = config.expand(&rule.pattern)?;
        let patterns = PatternSet::rooted(config.root(), &[pattern])?;
        Ok(Self {
            name: rule.name.clone(),
            phases: rule.phases.clone(),
            patterns,
        })
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.patterns.matches(path)
    }
}

/// Rules that fire for `batch`, each once, in registration order.
pub fn rules_for_batch<'a>(rules: &'a [CompiledRule], batch: &BTreeSet<PathBuf>) -> Vec<&'a CompiledRule> {
    rules
        .iter()
        .filter(|rule| batch.iter().any(|path| rule.matches(path)))
        .collect()
}

#[derive(Debug)]
pub struct Watcher {
    executor: Executor,
    rules: Vec<CompiledRule>,
    debounce: Duration,
}

impl Watcher {
    pub fn new(executor: Executor, rules: &[WatchRule], debounce: Duration) -> Result<Self, RuntimeError> {
        let rules = rules
            .iter()
            .map(|rule| CompiledRule::compile(rule, executor.config()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            executor,
            rules,
            debounce,
        })
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Every phase a rule can trigger.
    pub fn phase_names(&self) -> impl Iterator<Item = &PhaseName> {
        self.rules.iter().flat_map(|rule| rule.phases.iter())
    }

    /// Watch `${source}` until `shutdown` fires.
    pub async fn watch(&self, shutdown: broadcast::Receiver<()>) -> Result<(), RuntimeError> {
        let source = self.executor.config().path("source")?;

        // Notify reports real paths (/private/var/... on macOS); map them
        // back under the configured root so the rule patterns match.
        let real = std::fs::canonicalize(&source).map_err(|e| io_err(&source, e))?;
        let (batch_tx, batch_rx) = mpsc::unbounded_channel::<BTreeSet<PathBuf>>();
        let relocate = Relocate {
            real: real.clone(),
            configured: source.clone(),
        };

        let mut debouncer = new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let batch: BTreeSet<PathBuf> = events
                        .into_iter()
                        .filter(|e| is_relevant_event_kind(&e.event.kind))
                        .flat_map(|e| e.event.paths)
                        .map(|path| relocate.apply(path))
                        .collect();
                    if !batch.is_empty() {
                        let _ = batch_tx.send(batch);
                    }
                }
                Err(errors) => {
                    for err in errors {
                        tracing::warn!(error = %err, "watcher event error");
                    }
                }
            }
        })?;
        debouncer.watcher().watch(&real, RecursiveMode::Recursive)?;
        debouncer.cache().add_root(&real, RecursiveMode::Recursive);

        tracing::info!(root = %source.display(), rules = self.rules.len(), "watching for changes");
        self.run_batches(batch_rx, shutdown).await;
        debouncer.stop();
        tracing::info!("watcher stopped");
        Ok(())
    }

    /// Handle debounced batches one at a time. Returns when `shutdown` fires
    /// or the batch channel closes.
    pub async fn run_batches(
        &self,
        mut batches: mpsc::UnboundedReceiver<BTreeSet<PathBuf>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                batch = batches.recv() => match batch {
                    Some(batch) => {
                        self.handle_batch(&batch).await;
                    }
                    None => break,
                },
            }
        }
    }

    /// Fire the matching rules for one batch. Failures are logged; the
    /// names of the rules that fired are returned.
    pub async fn handle_batch(&self, batch: &BTreeSet<PathBuf>) -> Vec<String> {
        let fired = rules_for_batch(&self.rules, batch);
        tracing::debug!(paths = batch.len(), rules = fired.len(), "change batch");

        let mut names = Vec::with_capacity(fired.len());
        for rule in fired {
            names.push(rule.name.clone());
            if rule.phases.is_empty() {
                tracing::info!(rule = %rule.name, "change detected, nothing to run");
                continue;
            }

            tracing::info!(rule = %rule.name, "change detected");
            let mut report = RunReport::new(format!("watch:{}", rule.name));
            report.start();
            let result = self.executor.run_sequence(&rule.phases, &mut report).await;
            report.finish(result.as_ref().map(|_| ()));
            match result {
                Ok(()) => tracing::info!(rule = %rule.name, duration_ms = report.duration_ms, "rule finished"),
                Err(err) => tracing::error!(rule = %rule.name, error = %err, "rule failed, still watching"),
            }
        }
        names
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

struct Relocate {
    real: PathBuf,
    configured: PathBuf,
}

impl Relocate {
    fn apply(&self, path: PathBuf) -> PathBuf {
        match path.strip_prefix(&self.real) {
            Ok(rest) => self.configured.join(rest),
            Err(_) => path,
        }
    }
}
