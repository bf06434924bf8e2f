//! Host Application Interfaces
//!
//! The host application, its asset-generation plugin and the optional
//! secondary verifier are external collaborators. They are consumed only
//! through the traits in this module.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │  HostDriver  (open / close documents, plugin lookup, alerts, triggers)    │
//! ├───────────────────────────────────────────────────────────────────────────┤
//! │                                                                           │
//! │  AssetPlugin (raw handle) ── resolved once ──▶ GenerationPlugin           │
//! │    ├── StatusApi  (whenActive / whenIdle futures, toggle active doc)     │
//! │    └── LegacyApi  (one-shot active / per-document idle events, activate) │
//! │                                                                           │
//! │  SecondaryVerifier (optional, absence tolerated)                          │
//! │                                                                           │
//! │  Implementations: bridge::HostBridge (child process, JSON lines)          │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Plugin handles appear some time after the host starts, so they are
//! obtained with [`acquire`], a bounded retry loop.

pub mod bridge;

use crate::case::TestCase;
use crate::config::PluginConfig;
use crate::result::{FixturistError, FixturistResult};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Host-assigned document identifier
pub type DocumentId = u64;

/// Driver for the host application
#[async_trait]
pub trait HostDriver: Send + Sync {
    /// Open a document, returning its identifier (`None` if the host gave none)
    async fn open_document(&self, path: &Path) -> FixturistResult<Option<DocumentId>>;

    /// Close every open document
    async fn close_all_documents(&self) -> FixturistResult<()>;

    /// Look up the asset-generation plugin by identifier
    async fn find_asset_plugin(&self, id: &str) -> FixturistResult<Option<Arc<dyn AssetPlugin>>>;

    /// Look up the secondary verifier by identifier
    async fn find_verifier(&self, id: &str) -> FixturistResult<Option<Arc<dyn SecondaryVerifier>>>;

    /// Show a message to the host user
    async fn alert(&self, message: &str) -> FixturistResult<()>;

    /// Wait for the host to request a run; `false` once it never will
    async fn next_run_request(&self) -> bool;
}

/// Raw asset-plugin handle as the host exposes it
///
/// A plugin exposes exactly one of two control surfaces; callers should go
/// through [`GenerationPlugin`] rather than inspect these themselves.
#[async_trait]
pub trait AssetPlugin: Send + Sync {
    /// Current live configuration
    async fn config(&self) -> FixturistResult<PluginConfig>;

    /// Replace (`merge == false`) or overlay (`merge == true`) the live configuration
    async fn set_config(&self, config: PluginConfig, merge: bool) -> FixturistResult<()>;

    /// Newer status-based control surface, if present
    fn status_api(self: Arc<Self>) -> Option<Arc<dyn StatusApi>>;

    /// Legacy event-based control surface, if present
    fn legacy_api(self: Arc<Self>) -> Option<Arc<dyn LegacyApi>>;
}

/// Status-based control surface
///
/// The returned futures are armed when the method is called, so a signal
/// that fires before the future is first polled is not lost.
#[async_trait]
pub trait StatusApi: Send + Sync {
    /// Resolves on the next "rendering active" signal
    fn when_active(&self) -> BoxFuture<'static, FixturistResult<()>>;

    /// Resolves on the next "rendering idle" signal
    fn when_idle(&self) -> BoxFuture<'static, FixturistResult<()>>;

    /// Make the most recently opened document the active one
    async fn toggle_active_document(&self) -> FixturistResult<()>;
}

/// Legacy event-based control surface
#[async_trait]
pub trait LegacyApi: Send + Sync {
    /// One-shot "render manager became active" event
    fn once_active(&self) -> oneshot::Receiver<()>;

    /// One-shot "asset manager became idle" event for a document
    ///
    /// `None` when the plugin has no asset manager for the document.
    fn once_idle(&self, document: DocumentId) -> Option<oneshot::Receiver<()>>;

    /// Activate generation for a document
    async fn activate(&self, document: DocumentId) -> FixturistResult<()>;
}

/// Optional secondary verification plugin
#[async_trait]
pub trait SecondaryVerifier: Send + Sync {
    /// Run the verifier's own pass over a generated test case
    async fn run_test(&self, case: TestCase) -> FixturistResult<TestCase>;
}

/// Which control surface a plugin was resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginFlavor {
    /// [`StatusApi`]
    Status,
    /// [`LegacyApi`]
    Legacy,
}

#[derive(Clone)]
enum Control {
    Status(Arc<dyn StatusApi>),
    Legacy(Arc<dyn LegacyApi>),
}

/// Asset-generation plugin with its control surface resolved once
#[derive(Clone)]
pub struct GenerationPlugin {
    raw: Arc<dyn AssetPlugin>,
    control: Control,
}

impl std::fmt::Debug for GenerationPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationPlugin")
            .field("flavor", &self.flavor())
            .finish_non_exhaustive()
    }
}

impl GenerationPlugin {
    /// Inspect a raw handle, preferring the status surface
    pub fn resolve(raw: Arc<dyn AssetPlugin>) -> FixturistResult<Self> {
        let control = if let Some(status) = Arc::clone(&raw).status_api() {
            Control::Status(status)
        } else if let Some(legacy) = Arc::clone(&raw).legacy_api() {
            Control::Legacy(legacy)
        } else {
            return Err(FixturistError::generation(
                "asset plugin exposes neither a status nor a legacy control surface",
            ));
        };
        Ok(Self { raw, control })
    }

    /// Resolved control surface
    #[must_use]
    pub fn flavor(&self) -> PluginFlavor {
        match self.control {
            Control::Status(_) => PluginFlavor::Status,
            Control::Legacy(_) => PluginFlavor::Legacy,
        }
    }

    /// Current live configuration
    pub async fn config(&self) -> FixturistResult<PluginConfig> {
        self.raw.config().await
    }

    /// Replace or overlay the live configuration
    pub async fn set_config(&self, config: PluginConfig, merge: bool) -> FixturistResult<()> {
        self.raw.set_config(config, merge).await
    }

    /// Armed future for the next "active" signal
    pub fn when_active(&self) -> BoxFuture<'static, FixturistResult<()>> {
        match &self.control {
            Control::Status(status) => status.when_active(),
            Control::Legacy(legacy) => signal(legacy.once_active(), "active"),
        }
    }

    /// Future for the next "idle" signal of `document`
    pub fn when_idle(&self, document: DocumentId) -> BoxFuture<'static, FixturistResult<()>> {
        match &self.control {
            Control::Status(status) => status.when_idle(),
            Control::Legacy(legacy) => match legacy.once_idle(document) {
                Some(rx) => signal(rx, "idle"),
                None => futures::future::ready(Err(FixturistError::generation(format!(
                    "no asset manager for document {document}"
                ))))
                .boxed(),
            },
        }
    }

    /// Trigger generation for `document`
    pub async fn activate(&self, document: DocumentId) -> FixturistResult<()> {
        match &self.control {
            Control::Status(status) => status.toggle_active_document().await,
            Control::Legacy(legacy) => legacy.activate(document).await,
        }
    }
}

fn signal(rx: oneshot::Receiver<()>, what: &'static str) -> BoxFuture<'static, FixturistResult<()>> {
    rx.map(move |received| {
        received.map_err(|_| {
            FixturistError::generation(format!("host stopped before signaling {what}"))
        })
    })
    .boxed()
}

/// Retry `lookup` every `interval` until it yields a handle or `timeout` elapses
///
/// The first lookup happens immediately. Lookup errors are returned as-is;
/// running out of time yields [`FixturistError::PluginUnavailable`].
pub async fn acquire<T, F, Fut>(
    plugin: &str,
    interval: Duration,
    timeout: Duration,
    mut lookup: F,
) -> FixturistResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FixturistResult<Option<T>>>,
{
    let started = Instant::now();
    loop {
        if let Some(handle) = lookup().await? {
            tracing::debug!(plugin, waited_ms = started.elapsed().as_millis() as u64, "plugin acquired");
            return Ok(handle);
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(FixturistError::PluginUnavailable {
                plugin: plugin.to_string(),
                waited_ms: elapsed.as_millis() as u64,
            });
        }
        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::{LegacyMockPlugin, MockPlugin};
    use std::sync::atomic::{AtomicUsize, Ordering};

    mod resolve_tests {
        use super::*;

        struct Bare;

        #[async_trait]
        impl AssetPlugin for Bare {
            async fn config(&self) -> FixturistResult<PluginConfig> {
                Ok(PluginConfig::new())
            }
            async fn set_config(&self, _: PluginConfig, _: bool) -> FixturistResult<()> {
                Ok(())
            }
            fn status_api(self: Arc<Self>) -> Option<Arc<dyn StatusApi>> {
                None
            }
            fn legacy_api(self: Arc<Self>) -> Option<Arc<dyn LegacyApi>> {
                None
            }
        }

        #[test]
        fn test_prefers_status_surface() {
            let plugin = GenerationPlugin::resolve(Arc::new(MockPlugin::new())).unwrap();
            assert_eq!(plugin.flavor(), PluginFlavor::Status);
        }

        #[test]
        fn test_falls_back_to_legacy() {
            let plugin = GenerationPlugin::resolve(Arc::new(LegacyMockPlugin::new())).unwrap();
            assert_eq!(plugin.flavor(), PluginFlavor::Legacy);
        }

        #[test]
        fn test_no_surface_is_error() {
            let err = GenerationPlugin::resolve(Arc::new(Bare)).unwrap_err();
            assert!(matches!(err, FixturistError::Generation { .. }));
        }
    }

    mod signal_tests {
        use super::*;

        #[tokio::test]
        async fn test_status_cycle() {
            let raw = Arc::new(MockPlugin::new());
            let plugin = GenerationPlugin::resolve(raw.clone()).unwrap();
            let active = plugin.when_active();
            plugin.activate(7).await.unwrap();
            active.await.unwrap();
            plugin.when_idle(7).await.unwrap();
            assert_eq!(raw.history(), vec!["toggle_active_document".to_string()]);
        }

        #[tokio::test]
        async fn test_legacy_cycle() {
            let raw = Arc::new(LegacyMockPlugin::new());
            let plugin = GenerationPlugin::resolve(raw.clone()).unwrap();
            let active = plugin.when_active();
            plugin.activate(3).await.unwrap();
            active.await.unwrap();
            plugin.when_idle(3).await.unwrap();
            assert_eq!(
                raw.history(),
                vec!["once_active", "activate:3", "once_idle:3"]
            );
        }

        #[tokio::test]
        async fn test_legacy_unknown_document() {
            let raw = Arc::new(LegacyMockPlugin::new().without_asset_manager());
            let plugin = GenerationPlugin::resolve(raw).unwrap();
            let err = plugin.when_idle(9).await.unwrap_err();
            assert!(err.to_string().contains("document 9"));
        }

        #[tokio::test]
        async fn test_dropped_signal_is_generation_error() {
            let (tx, rx) = oneshot::channel::<()>();
            drop(tx);
            let err = signal(rx, "idle").await.unwrap_err();
            assert!(err.to_string().contains("signaling idle"));
        }
    }

    mod acquire_tests {
        use super::*;

        #[tokio::test]
        async fn test_immediate_hit() {
            let handle = acquire("p", Duration::from_secs(1), Duration::from_secs(1), || async {
                Ok(Some(5))
            })
            .await
            .unwrap();
            assert_eq!(handle, 5);
        }

        #[tokio::test]
        async fn test_appears_after_retries() {
            let attempts = AtomicUsize::new(0);
            let handle = acquire("p", Duration::from_millis(1), Duration::from_secs(5), || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move { Ok((n >= 3).then_some("plugin")) }
            })
            .await
            .unwrap();
            assert_eq!(handle, "plugin");
            assert_eq!(attempts.load(Ordering::SeqCst), 4);
        }

        #[tokio::test]
        async fn test_times_out() {
            let err = acquire::<u8, _, _>(
                "generator-assets",
                Duration::from_millis(5),
                Duration::from_millis(20),
                || async { Ok(None) },
            )
            .await
            .unwrap_err();
            match err {
                FixturistError::PluginUnavailable { plugin, waited_ms } => {
                    assert_eq!(plugin, "generator-assets");
                    assert!(waited_ms >= 20);
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_lookup_error_propagates() {
            let err = acquire::<u8, _, _>("p", Duration::from_millis(1), Duration::from_secs(1), || async {
                Err(FixturistError::bridge("host gone"))
            })
            .await
            .unwrap_err();
            assert!(matches!(err, FixturistError::Bridge { .. }));
        }
    }
}
