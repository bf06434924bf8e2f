//! Directory-tree listing and differencing.
//!
//! Expected and generated outputs are listed recursively, reduced to
//! `/`-separated paths relative to their root, stripped of OS metadata files
//! and then matched by path.

use crate::config::IGNORE_PATTERN;
use crate::result::{FixturistError, FixturistResult};
use futures::future::BoxFuture;
use regex::{Regex, RegexBuilder};
use std::collections::{HashMap, VecDeque};
use std::path::{Component, Path, PathBuf};

/// Case-insensitive pattern of file names that never take part in a comparison
#[derive(Debug, Clone)]
pub struct IgnorePattern {
    regex: Regex,
}

impl Default for IgnorePattern {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        Self::new(IGNORE_PATTERN).expect("built-in ignore pattern is valid")
    }
}

impl IgnorePattern {
    /// Compile a case-insensitive ignore pattern
    pub fn new(pattern: &str) -> FixturistResult<Self> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| FixturistError::config(format!("invalid ignore pattern: {e}")))?;
        Ok(Self { regex })
    }

    /// Whether a (relative) path is ignored
    #[must_use]
    pub fn is_ignored(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Drop ignored paths, preserving order
    #[must_use]
    pub fn filter(&self, paths: Vec<String>) -> Vec<String> {
        paths.into_iter().filter(|p| !self.is_ignored(p)).collect()
    }
}

/// Recursive lister for named output subdirectories
#[derive(Debug, Clone, Default)]
pub struct DirectoryDiffer {
    optional_subdir: Option<String>,
}

impl DirectoryDiffer {
    /// Lister where every named subdirectory must exist
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `name` as empty when it does not exist
    #[must_use]
    pub fn with_optional_subdir(mut self, name: impl Into<String>) -> Self {
        self.optional_subdir = Some(name.into());
        self
    }

    /// List every file below each of `subdirs` of `base`
    ///
    /// Paths are `base`-joined, so they are absolute whenever `base` is.
    /// Within a directory, files come first in name order, followed by the
    /// contents of each nested directory in name order.
    pub async fn list_files(&self, base: &Path, subdirs: &[String]) -> FixturistResult<Vec<PathBuf>> {
        let mut all = Vec::new();
        for subdir in subdirs {
            let dir = base.join(subdir);
            match walk(dir.clone()).await {
                Ok(files) => all.extend(files),
                Err(e) if self.optional_subdir.as_deref() == Some(subdir.as_str())
                    && e.kind() == std::io::ErrorKind::NotFound =>
                {
                    tracing::debug!(dir = %dir.display(), "optional output directory absent");
                }
                Err(e) => {
                    return Err(FixturistError::comparison_io(format!(
                        "could not read directory {}: {e}",
                        dir.display()
                    )));
                }
            }
        }
        Ok(all)
    }

    /// List files below `subdirs` as `/`-separated paths relative to `base`
    pub async fn list_relative(&self, base: &Path, subdirs: &[String]) -> FixturistResult<Vec<String>> {
        let files = self.list_files(base, subdirs).await?;
        Ok(files
            .iter()
            .filter_map(|file| relativize(base, file))
            .collect())
    }
}

fn walk(dir: PathBuf) -> BoxFuture<'static, std::io::Result<Vec<PathBuf>>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = tokio::fs::metadata(&path).await?;
            if meta.is_dir() {
                dirs.push(path);
            } else if meta.is_file() {
                files.push(path);
            }
        }
        files.sort();
        dirs.sort();
        for nested in dirs {
            files.extend(walk(nested).await?);
        }
        Ok(files)
    })
}

/// `/`-separated form of `path` relative to `root`
#[must_use]
pub fn relativize(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Outcome of matching expected paths against actual paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    /// Expected paths absent from the actual tree, in expected order
    pub missing: Vec<String>,
    /// Actual paths left unmatched, in actual order
    pub unexpected: Vec<String>,
    /// Paths present in both, in expected order
    pub matched: Vec<String>,
}

impl TreeDiff {
    /// Whether both trees hold exactly the same paths
    #[must_use]
    pub fn is_identical(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Match each expected path against one occurrence of the same actual path
#[must_use]
pub fn diff_trees(expected: &[String], actual: &[String]) -> TreeDiff {
    let mut positions: HashMap<&str, VecDeque<usize>> = HashMap::new();
    for (index, path) in actual.iter().enumerate() {
        positions.entry(path.as_str()).or_default().push_back(index);
    }

    let mut taken = vec![false; actual.len()];
    let mut diff = TreeDiff::default();
    for path in expected {
        match positions.get_mut(path.as_str()).and_then(VecDeque::pop_front) {
            Some(index) => {
                taken[index] = true;
                diff.matched.push(path.clone());
            }
            None => diff.missing.push(path.clone()),
        }
    }

    diff.unexpected = actual
        .iter()
        .zip(taken)
        .filter(|(_, taken)| !taken)
        .map(|(path, _)| path.clone())
        .collect();
    diff
}
