//! Fixture discovery.
//!
//! Every directory under the fixture root is a candidate test. It qualifies
//! when it is not disabled, passes the selection filter, and holds a
//! document next to a `<document-stem>-assets` directory.

use crate::case::TestCase;
use crate::config::{FixtureLayout, RunConfig};
use crate::result::{FixturistError, FixturistResult};
use std::path::{Path, PathBuf};

/// Discover the qualifying tests under the configured fixture root, in name order
pub async fn discover_tests(
    config: &RunConfig,
    layout: &FixtureLayout,
) -> FixturistResult<Vec<TestCase>> {
    let root = absolute(&config.fixture_root)?;
    let entries = read_entries(&root).await.map_err(|e| {
        FixturistError::discovery(format!("cannot list {}: {e}", root.display()))
    })?;

    let mut tests = Vec::new();
    for entry in entries.into_iter().filter(|e| e.is_dir) {
        if layout.is_disabled(&entry.name) {
            tracing::debug!(dir = %entry.name, "skipping disabled fixture");
            continue;
        }
        if !config.is_selected(&entry.name) {
            continue;
        }
        match inspect_test_dir(&root.join(&entry.name), layout).await {
            Ok(Some(test)) => tests.push(test),
            Ok(None) => tracing::debug!(dir = %entry.name, "no document/output pair"),
            Err(e) => tracing::debug!(dir = %entry.name, error = %e, "unreadable fixture"),
        }
    }
    tracing::info!(count = tests.len(), root = %root.display(), "discovered tests");
    Ok(tests)
}

/// Build a test case from one fixture directory, if it qualifies
///
/// When several document/output pairs exist, the first document in name
/// order wins.
pub async fn inspect_test_dir(
    dir: &Path,
    layout: &FixtureLayout,
) -> FixturistResult<Option<TestCase>> {
    let entries = read_entries(dir).await?;
    let directories: Vec<&str> = entries
        .iter()
        .filter(|e| e.is_dir)
        .map(|e| e.name.as_str())
        .collect();

    let pair = entries
        .iter()
        .filter(|e| e.is_file && layout.is_document(&e.name))
        .find_map(|doc| {
            let output = layout.output_dir_for(&doc.name);
            directories
                .contains(&output.as_str())
                .then(|| (doc.name.clone(), output))
        });

    let Some((input, output)) = pair else {
        return Ok(None);
    };
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Some(TestCase::new(name, dir, input, output)))
}

struct Entry {
    name: String,
    is_dir: bool,
    is_file: bool,
}

async fn read_entries(dir: &Path) -> std::io::Result<Vec<Entry>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        // Follows symlinks
        let Ok(meta) = tokio::fs::metadata(entry.path()).await else {
            continue;
        };
        entries.push(Entry {
            name,
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn absolute(path: &Path) -> FixturistResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
