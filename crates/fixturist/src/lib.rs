//! Fixturist: regression-test orchestrator for asset-generation pipelines
//!
//! Fixturist drives an asset-generation plugin running inside a host
//! application. Each fixture directory holds a source document and the
//! assets the plugin is expected to produce from it. A run copies every
//! document into a scratch directory, has the host open it, waits for the
//! plugin to go active and then idle, and compares what was generated
//! against the expected assets, pixel by pixel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    FIXTURIST Architecture                       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   ┌────────────┐    ┌────────────┐    ┌────────────┐            │
//! │   │ Discovery  │    │ Pipeline   │    │ Host       │            │
//! │   │ (fixture   │───►│ setup/gen/ │◄──►│ (bridge or │            │
//! │   │  root)     │    │ verify/cmp │    │  mock)     │            │
//! │   └────────────┘    └─────┬──────┘    └────────────┘            │
//! │                           │                                     │
//! │                     ┌─────▼──────┐    ┌────────────┐            │
//! │                     │ Batch      │───►│ Pixel tool │            │
//! │                     │ limiter    │    │ (ImageMag.)│            │
//! │                     └─────┬──────┘    └────────────┘            │
//! │                           │                                     │
//! │                     ┌─────▼──────┐                              │
//! │                     │ Report     │  summary, xUnit XML, alert   │
//! │                     └────────────┘                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tests run strictly one at a time; only the pixel comparisons inside a
//! test run concurrently, at most ten at once.

#![warn(missing_docs)]

pub mod case;
pub mod comparator;
pub mod config;
pub mod differ;
pub mod discovery;
pub mod host;
pub mod limiter;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
mod result;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]
mod testing;

pub use case::{Comparison, TestCase, TestOutcome, TestResult};
pub use comparator::{ImageMagickComparator, PixelComparator, FAILED_COMPARISON_METRIC};
pub use config::{FixtureLayout, PluginConfig, RunConfig, RunConfigBuilder, TestConfig};
pub use differ::{diff_trees, DirectoryDiffer, IgnorePattern, TreeDiff};
pub use discovery::discover_tests;
pub use host::bridge::HostBridge;
pub use host::{
    AssetPlugin, DocumentId, GenerationPlugin, HostDriver, PluginFlavor, SecondaryVerifier,
};
pub use limiter::{BatchError, BatchRunner, ReplenishOrder};
pub use orchestrator::{NoopObserver, Orchestrator, RunContext, RunObserver};
pub use pipeline::{CompareStage, PipelineRunner, Stage};
pub use report::RunReport;
pub use result::{FixturistError, FixturistResult};
