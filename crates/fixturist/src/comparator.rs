//! Pixel comparison through an external image-difference tool.

use crate::result::{FixturistError, FixturistResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Upper bound on simultaneously running comparison processes
pub const MAX_CONCURRENT_COMPARE_JOBS: usize = 10;

/// Metric recorded for a comparison the tool could not complete
pub const FAILED_COMPARISON_METRIC: f64 = 1_000_000.0;

/// Computes a scalar difference between two images (0 means identical)
#[async_trait]
pub trait PixelComparator: Send + Sync {
    /// Compare `expected` against `actual`
    async fn compare(&self, expected: &Path, actual: &Path) -> FixturistResult<f64>;
}

/// ImageMagick `convert` based comparator
///
/// Both images are flattened, composed with the `Difference` operator,
/// converted to grayscale, and the mean pixel value is read from stdout.
#[derive(Debug, Clone)]
pub struct ImageMagickComparator {
    executable: PathBuf,
}

impl Default for ImageMagickComparator {
    fn default() -> Self {
        Self::new(default_executable())
    }
}

impl ImageMagickComparator {
    /// Use a specific executable
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Executable that will be spawned
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Argument list for one comparison
    #[must_use]
    pub fn arguments(expected: &Path, actual: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = Vec::with_capacity(16);
        args.push("(".into());
        args.push(expected.as_os_str().to_owned());
        args.push("-flatten".into());
        args.push(")".into());
        args.push("(".into());
        args.push(actual.as_os_str().to_owned());
        args.push("-flatten".into());
        args.push(")".into());
        for arg in [
            "-compose",
            "Difference",
            "-composite",
            "-colorspace",
            "gray",
            "-format",
            "%[mean]",
            "info:",
        ] {
            args.push(arg.into());
        }
        args
    }
}

fn default_executable() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("convert.exe")
    } else {
        PathBuf::from("convert")
    }
}

#[async_trait]
impl PixelComparator for ImageMagickComparator {
    async fn compare(&self, expected: &Path, actual: &Path) -> FixturistResult<f64> {
        tracing::debug!(
            expected = %expected.display(),
            actual = %actual.display(),
            "comparing expected to actual"
        );

        let output = Command::new(&self.executable)
            .args(Self::arguments(expected, actual))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                FixturistError::pixel_tool(format!(
                    "cannot spawn {}: {e}",
                    self.executable.display()
                ))
            })?;

        if !output.status.success() {
            return Err(FixturistError::pixel_tool(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        parse_metric(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse the tool's plain-text mean value
///
/// NaN and infinities are rejected: they would never exceed a threshold.
pub fn parse_metric(stdout: &str) -> FixturistResult<f64> {
    let text = stdout.trim();
    let metric = text
        .parse::<f64>()
        .map_err(|_| FixturistError::pixel_tool(format!("unparsable metric output: {text:?}")))?;
    if !metric.is_finite() {
        return Err(FixturistError::pixel_tool(format!(
            "non-finite metric output: {text:?}"
        )));
    }
    Ok(metric)
}
