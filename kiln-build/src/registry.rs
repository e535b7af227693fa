//! Phase registry: named units of work with declared inputs and output.
//!
//! A [`Phase`] pairs a name with `${name}` input glob templates, one output
//! location template, and a [`PhaseAction`]. Templates are resolved against
//! the [`ConfigContext`] on every invocation, so the same registry can be
//! driven with different contexts in tests.
//!
//! Input templates prefixed with `!` are exclusions.
//!
//! A phase normally owns its output location. A phase built with
//! [`Phase::merging`] only adds files to a shared directory; two merging
//! phases may target the same location inside one parallel group.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use kiln_core::glob::{expand_braces, find_files, literal_base, PatternSet};
use kiln_core::{ConfigContext, ConfigError, PhaseName};

use crate::error::{BuildError, PhaseFailure};

// ---------------------------------------------------------------------------
// 1. Actions
// ---------------------------------------------------------------------------

/// The executable part of a phase.
#[async_trait]
pub trait PhaseAction: Send + Sync + fmt::Debug {
    /// Short label for listings (`tool:sass`, `copy`, ...).
    fn kind(&self) -> String;

    async fn run(&self, invocation: &PhaseInvocation) -> Result<(), PhaseFailure>;
}

/// Everything an action needs for one run, with templates already resolved.
///
/// `inputs` and `output` stay relative to the project directory.
#[derive(Debug, Clone)]
pub struct PhaseInvocation {
    pub name: PhaseName,
    pub inputs: Vec<String>,
    pub output: String,
    pub config: ConfigContext,
}

/// A file matched by an invocation's input globs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedFile {
    /// Absolute path.
    pub path: PathBuf,
    /// Path below the literal (wildcard-free) prefix of the glob that matched.
    pub relative: PathBuf,
}

impl PhaseInvocation {
    /// Project directory.
    pub fn root(&self) -> &Path {
        self.config.root()
    }

    pub fn output_path(&self) -> PathBuf {
        self.root().join(&self.output)
    }

    /// Input globs without the `!` exclusions.
    pub fn includes(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .map(String::as_str)
            .filter(|i| !i.starts_with('!'))
    }

    /// Exclusion patterns (the `!` prefix stripped), anchored at the root.
    pub fn exclusions(&self) -> Result<PatternSet, ConfigError> {
        let patterns: Vec<&str> = self
            .inputs
            .iter()
            .filter_map(|i| i.strip_prefix('!'))
            .collect();
        PatternSet::rooted(self.root(), &patterns)
    }

    /// Every file matched by the includes and not by an exclusion, in glob
    /// order. A file matched by two includes is reported once.
    pub fn matched_files(&self) -> Result<Vec<MatchedFile>, PhaseFailure> {
        let exclusions = self.exclusions()?;
        let mut seen = BTreeSet::new();
        let mut matched = Vec::new();

        for include in self.includes() {
            for pattern in expand_braces(include) {
                let base = self.root().join(literal_base(&pattern));
                for path in find_files(self.root(), &[&pattern])? {
                    if exclusions.matches(&path) || !seen.insert(path.clone()) {
                        continue;
                    }
                    let relative = match path.strip_prefix(&base) {
                        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
                        _ => path.file_name().map(PathBuf::from).unwrap_or_default(),
                    };
                    matched.push(MatchedFile { path, relative });
                }
            }
        }
        Ok(matched)
    }

    /// `path` relative to the project directory, for logs and commands.
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(self.root())
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}

/// Run blocking file work off the async executor.
pub(crate) async fn run_blocking<F>(work: F) -> Result<(), PhaseFailure>
where
    F: FnOnce() -> Result<(), PhaseFailure> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PhaseFailure::Join(e.to_string()))?
}

// ---------------------------------------------------------------------------
// 2. Phase
// ---------------------------------------------------------------------------

/// A registered unit of work. Immutable once built.
#[derive(Debug)]
pub struct Phase {
    name: PhaseName,
    inputs: Vec<String>,
    output: String,
    merges: bool,
    action: Arc<dyn PhaseAction>,
}

impl Phase {
    pub fn new<I, S>(
        name: impl Into<PhaseName>,
        inputs: I,
        output: impl Into<String>,
        action: impl PhaseAction + 'static,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            output: output.into(),
            merges: false,
            action: Arc::new(action),
        }
    }

    /// Mark the output as a directory this phase adds files to without
    /// owning it.
    pub fn merging(mut self) -> Self {
        self.merges = true;
        self
    }

    pub fn merges_output(&self) -> bool {
        self.merges
    }

    pub fn name(&self) -> &PhaseName {
        &self.name
    }

    /// Input glob templates, unresolved.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Output location template, unresolved.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn kind(&self) -> String {
        self.action.kind()
    }

    /// Resolve the phase's templates against `config`.
    pub fn invocation(&self, config: &ConfigContext) -> Result<PhaseInvocation, ConfigError> {
        let inputs = self
            .inputs
            .iter()
            .map(|t| config.expand(t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PhaseInvocation {
            name: self.name.clone(),
            inputs,
            output: config.expand(&self.output)?,
            config: config.clone(),
        })
    }

    /// Resolve and run once. Failures are never retried.
    pub async fn run(&self, config: &ConfigContext) -> Result<(), BuildError> {
        let invocation = self.invocation(config)?;
        self.action
            .run(&invocation)
            .await
            .map_err(|cause| BuildError::PhaseExecution {
                name: self.name.clone(),
                cause,
            })
    }
}

// ---------------------------------------------------------------------------
// 3. Registry
// ---------------------------------------------------------------------------

/// Name → phase, remembering registration order.
#[derive(Debug, Default, Clone)]
pub struct PhaseRegistry {
    phases: Vec<Arc<Phase>>,
    index: HashMap<PhaseName, usize>,
}

impl PhaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a phase. Fails with [`BuildError::DuplicateName`] if the name is taken.
    pub fn register(&mut self, phase: Phase) -> Result<(), BuildError> {
        if self.index.contains_key(phase.name()) {
            return Err(BuildError::DuplicateName {
                name: phase.name().clone(),
            });
        }
        self.index.insert(phase.name().clone(), self.phases.len());
        self.phases.push(Arc::new(phase));
        Ok(())
    }

    pub fn get(&self, name: &PhaseName) -> Option<&Arc<Phase>> {
        self.index.get(name).map(|&i| &self.phases[i])
    }

    /// Like [`get`](Self::get), failing with [`BuildError::UnknownPhase`].
    pub fn require(&self, name: &PhaseName) -> Result<&Arc<Phase>, BuildError> {
        self.get(name).ok_or_else(|| BuildError::UnknownPhase { name: name.clone() })
    }

    pub fn contains(&self, name: &PhaseName) -> bool {
        self.index.contains_key(name)
    }

    /// Registered phases in registration order.
    pub fn phases(&self) -> impl Iterator<Item = &Phase> {
        self.phases.iter().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Run the named phase with templates resolved against `config`.
    pub async fn invoke(&self, name: &PhaseName, config: &ConfigContext) -> Result<(), BuildError> {
        self.require(name)?.run(config).await
    }

    /// Check that no two members of a parallel group write to overlapping
    /// locations: equal paths, or one an ancestor of the other. Two merging
    /// phases never conflict with each other.
    pub fn validate_group(
        &self,
        names: &[PhaseName],
        config: &ConfigContext,
    ) -> Result<(), BuildError> {
        let mut outputs: Vec<(&PhaseName, PathBuf, bool)> = Vec::with_capacity(names.len());
        for name in names {
            let phase = self.require(name)?;
            let output = normalize(&config.expand(phase.output())?);
            for (other, other_output, other_merges) in &outputs {
                if phase.merges_output() && *other_merges {
                    continue;
                }
                if output.starts_with(other_output) || other_output.starts_with(&output) {
                    let path = if output.starts_with(other_output) {
                        other_output.clone()
                    } else {
                        output.clone()
                    };
                    return Err(BuildError::OutputConflict {
                        first: (*other).clone(),
                        second: name.clone(),
                        path,
                    });
                }
            }
            outputs.push((name, output, phase.merges_output()));
        }
        Ok(())
    }
}

/// Drop `.` components and trailing separators so `var/styles/` and
/// `./var/styles` compare equal.
fn normalize(path: &str) -> PathBuf {
    Path::new(path)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
