//! Result and error types for Fixturist.

use thiserror::Error;

/// Result type for Fixturist operations
pub type FixturistResult<T> = Result<T, FixturistError>;

/// Errors that can occur while orchestrating a run
///
/// Only run-level and test-level failures are represented here. Per-file
/// problems (missing or unexpected files, over-threshold metrics, pixel tool
/// failures inside a comparison) are recorded as strings on the test result
/// and never surface as `Err`.
#[derive(Debug, Error)]
pub enum FixturistError {
    /// Fixture root could not be listed (aborts the whole run)
    #[error("Discovery failed: {message}")]
    Discovery {
        /// Error message
        message: String,
    },

    /// Working directory could not be materialized (aborts one test)
    #[error("Setup failed: {message}")]
    Setup {
        /// Error message
        message: String,
    },

    /// Host did not produce a document or stopped signaling (aborts one test)
    #[error("Generation failed: {message}")]
    Generation {
        /// Error message
        message: String,
    },

    /// A required output directory could not be listed (aborts one test)
    #[error("Comparison failed: {message}")]
    ComparisonIo {
        /// Error message
        message: String,
    },

    /// External pixel-difference tool failed for one file pair
    #[error("Pixel tool failed: {message}")]
    PixelTool {
        /// Diagnostic output of the tool
        message: String,
    },

    /// A host plugin handle was not available within the acquisition window
    #[error("Plugin {plugin} not available after {waited_ms}ms")]
    PluginUnavailable {
        /// Plugin identifier
        plugin: String,
        /// How long acquisition was attempted
        waited_ms: u64,
    },

    /// Secondary verifier reported a failure
    #[error("Verification failed: {message}")]
    Verification {
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Host bridge protocol or transport error
    #[error("Host bridge error: {message}")]
    Bridge {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FixturistError {
    /// Create a discovery error
    #[must_use]
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            message: message.into(),
        }
    }

    /// Create a setup error
    #[must_use]
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup {
            message: message.into(),
        }
    }

    /// Create a generation error
    #[must_use]
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Create a comparison I/O error
    #[must_use]
    pub fn comparison_io(message: impl Into<String>) -> Self {
        Self::ComparisonIo {
            message: message.into(),
        }
    }

    /// Create a pixel tool error
    #[must_use]
    pub fn pixel_tool(message: impl Into<String>) -> Self {
        Self::PixelTool {
            message: message.into(),
        }
    }

    /// Create a verification error
    #[must_use]
    pub fn verification(message: impl Into<String>) -> Self {
        Self::Verification {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a bridge error
    #[must_use]
    pub fn bridge(message: impl Into<String>) -> Self {
        Self::Bridge {
            message: message.into(),
        }
    }
}
