//! [`ConfigContext`], the resolved and immutable path configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ConfigError;
use crate::resolver::{self, VarMap};

/// Resolved path variables rooted at the project directory.
///
/// Built once at startup and passed by value (cloning shares the inner map).
/// There is no way to mutate a context after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigContext {
    inner: Arc<Inner>,
}

#[derive(Debug, PartialEq, Eq)]
struct Inner {
    root: PathBuf,
    vars: VarMap,
}

impl ConfigContext {
    /// Resolve `vars` and root the result at `root`.
    pub fn new(root: impl Into<PathBuf>, vars: &VarMap) -> Result<Self, ConfigError> {
        let vars = resolver::resolve(vars)?;
        Ok(Self {
            inner: Arc::new(Inner {
                root: root.into(),
                vars,
            }),
        })
    }

    /// Project directory every variable is relative to.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// All resolved variables.
    pub fn vars(&self) -> &VarMap {
        &self.inner.vars
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.vars.get(name).map(String::as_str)
    }

    /// Resolved value of `name`, or [`ConfigError::UnresolvedReference`].
    pub fn require(&self, name: &str) -> Result<&str, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::UnresolvedReference {
                variable: name.to_string(),
                referenced_by: String::new(),
            })
    }

    /// `<root>/<value of name>`.
    pub fn path(&self, name: &str) -> Result<PathBuf, ConfigError> {
        Ok(self.root().join(self.require(name)?))
    }

    /// Substitute `${name}` references in a phase template. The result stays
    /// relative to the project root.
    pub fn expand(&self, template: &str) -> Result<String, ConfigError> {
        resolver::expand(template, &self.inner.vars)
    }

    /// [`expand`](Self::expand) joined onto the project root.
    pub fn expand_path(&self, template: &str) -> Result<PathBuf, ConfigError> {
        Ok(self.root().join(self.expand(template)?))
    }
}
