//! JSON-lines bridge to a host process.
//!
//! The host side is any program speaking this protocol on its stdin/stdout:
//!
//! ```text
//! → {"id":1,"method":"open-document","params":{"path":"/tmp/x/doc.psd"}}
//! ← {"id":1,"result":17}
//! ← {"event":"active"}
//! ← {"event":"idle","document":17}
//! ← {"event":"run-requested"}
//! ```
//!
//! Every request carries an incrementing `id` echoed by its response, which
//! holds either `result` or `error`. Lines with an `event` member are
//! unsolicited notifications.
//!
//! Methods: `open-document`, `close-all-documents`, `find-plugin`,
//! `get-config`, `set-config`, `toggle-active-document`,
//! `activate-document`, `run-test`, `alert`. `find-plugin` answers `null`
//! when the plugin is not loaded, otherwise `{"api":"status"|"legacy"}`.

use crate::case::TestCase;
use crate::config::PluginConfig;
use crate::host::{
    AssetPlugin, DocumentId, HostDriver, LegacyApi, SecondaryVerifier, StatusApi,
};
use crate::result::{FixturistError, FixturistResult};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot};

type Pending = HashMap<u64, oneshot::Sender<Result<Value, String>>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Notification pushed by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Rendering became active
    Active,
    /// Rendering became idle, optionally for a specific document
    Idle(Option<DocumentId>),
    /// The bridge's input ended
    Closed,
}

#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<Value>,
    event: Option<String>,
    document: Option<DocumentId>,
}

struct Shared {
    writer: tokio::sync::Mutex<Writer>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    closed: AtomicBool,
    events: broadcast::Sender<HostEvent>,
    run_requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<()>>,
    child: Mutex<Option<Child>>,
}

/// Host driver backed by a JSON-lines peer
#[derive(Clone)]
pub struct HostBridge {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for HostBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBridge")
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl HostBridge {
    /// Spawn `program` and speak the protocol over its stdin/stdout
    ///
    /// The child's stderr is inherited; the child is killed when the last
    /// bridge handle is dropped.
    pub fn spawn(program: &str, args: &[String]) -> FixturistResult<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FixturistError::bridge(format!("cannot start host {program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FixturistError::bridge("host stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FixturistError::bridge("host stdout unavailable"))?;

        tracing::info!(program, "host bridge started");
        let bridge = Self::new(stdout, stdin);
        if let Ok(mut slot) = bridge.shared.child.lock() {
            *slot = Some(child);
        }
        Ok(bridge)
    }

    /// Speak the protocol over an arbitrary reader/writer pair
    ///
    /// Must be called within a tokio runtime; a reader task is spawned.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (events, _) = broadcast::channel(64);
        let (run_tx, run_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            events,
            run_requests: tokio::sync::Mutex::new(run_rx),
            child: Mutex::new(None),
        });
        tokio::spawn(read_loop(reader, Arc::clone(&shared), run_tx));
        Self { shared }
    }

    /// Subscribe to host events from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.shared.events.subscribe()
    }

    /// Whether the peer's output has ended
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its response
    pub async fn request(&self, method: &str, params: Value) -> FixturistResult<Value> {
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .map_err(|_| FixturistError::bridge("pending request table poisoned"))?
            .insert(id, tx);
        if self.is_closed() {
            self.forget(id);
            return Err(FixturistError::bridge("host bridge closed"));
        }

        let mut line = serde_json::to_string(&json!({
            "id": id,
            "method": method,
            "params": params,
        }))?;
        line.push('\n');
        tracing::trace!(id, method, "bridge request");

        let written = {
            let mut writer = self.shared.writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.forget(id);
            return Err(FixturistError::bridge(format!("cannot write {method}: {e}")));
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(FixturistError::bridge(format!("{method}: {message}"))),
            Err(_) => Err(FixturistError::bridge(format!(
                "host bridge closed while waiting for {method}"
            ))),
        }
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.remove(&id);
        }
    }

    /// Future resolving on the first event accepted by `matches`
    ///
    /// The subscription is taken before this returns.
    fn next_event<F>(&self, what: &'static str, matches: F) -> BoxFuture<'static, FixturistResult<()>>
    where
        F: Fn(&HostEvent) -> bool + Send + 'static,
    {
        let mut events = self.subscribe();
        let closed = self.is_closed();
        async move {
            if closed {
                return Err(FixturistError::generation(format!(
                    "host bridge closed before signaling {what}"
                )));
            }
            loop {
                match events.recv().await {
                    Ok(HostEvent::Closed) | Err(broadcast::error::RecvError::Closed) => {
                        return Err(FixturistError::generation(format!(
                            "host bridge closed before signaling {what}"
                        )));
                    }
                    Ok(event) if matches(&event) => return Ok(()),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "host events dropped");
                    }
                }
            }
        }
        .boxed()
    }
}

async fn read_loop<R>(reader: R, shared: Arc<Shared>, run_tx: mpsc::UnboundedSender<()>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "host bridge read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let incoming: Incoming = match serde_json::from_str(&line) {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::warn!(error = %e, line = %line, "ignoring malformed host message");
                continue;
            }
        };
        dispatch(incoming, &shared, &run_tx);
    }

    shared.closed.store(true, Ordering::SeqCst);
    if let Ok(mut pending) = shared.pending.lock() {
        pending.clear();
    }
    let _ = shared.events.send(HostEvent::Closed);
    tracing::debug!("host bridge closed");
}

fn dispatch(incoming: Incoming, shared: &Shared, run_tx: &mpsc::UnboundedSender<()>) {
    if let Some(event) = incoming.event.as_deref() {
        match event {
            "active" => {
                let _ = shared.events.send(HostEvent::Active);
            }
            "idle" => {
                let _ = shared.events.send(HostEvent::Idle(incoming.document));
            }
            "run-requested" => {
                let _ = run_tx.send(());
            }
            other => tracing::debug!(event = other, "ignoring unknown host event"),
        }
        return;
    }

    let Some(id) = incoming.id else {
        tracing::warn!("host message without id or event");
        return;
    };
    let waiter = shared.pending.lock().ok().and_then(|mut p| p.remove(&id));
    let Some(waiter) = waiter else {
        tracing::warn!(id, "response to unknown request");
        return;
    };
    let outcome = match incoming.error {
        Some(Value::String(message)) => Err(message),
        Some(other) => Err(other.to_string()),
        None => Ok(incoming.result.unwrap_or(Value::Null)),
    };
    let _ = waiter.send(outcome);
}

fn document_id(value: &Value) -> Option<DocumentId> {
    match value {
        Value::Number(n) => n.as_u64().filter(|id| *id != 0),
        Value::String(s) => s.parse().ok().filter(|id| *id != 0),
        _ => None,
    }
}

#[async_trait]
impl HostDriver for HostBridge {
    async fn open_document(&self, path: &Path) -> FixturistResult<Option<DocumentId>> {
        let result = self
            .request("open-document", json!({ "path": path }))
            .await?;
        Ok(document_id(&result))
    }

    async fn close_all_documents(&self) -> FixturistResult<()> {
        self.request("close-all-documents", Value::Null).await?;
        Ok(())
    }

    async fn find_asset_plugin(&self, id: &str) -> FixturistResult<Option<Arc<dyn AssetPlugin>>> {
        let found = self.request("find-plugin", json!({ "id": id })).await?;
        if found.is_null() {
            return Ok(None);
        }
        let api = match found.get("api").and_then(Value::as_str) {
            Some("legacy") => PluginApi::Legacy,
            _ => PluginApi::Status,
        };
        Ok(Some(Arc::new(BridgePlugin {
            bridge: self.clone(),
            id: id.to_string(),
            api,
        })))
    }

    async fn find_verifier(&self, id: &str) -> FixturistResult<Option<Arc<dyn SecondaryVerifier>>> {
        let found = self.request("find-plugin", json!({ "id": id })).await?;
        if found.is_null() {
            return Ok(None);
        }
        Ok(Some(Arc::new(BridgeVerifier {
            bridge: self.clone(),
            id: id.to_string(),
        })))
    }

    async fn alert(&self, message: &str) -> FixturistResult<()> {
        self.request("alert", json!({ "message": message })).await?;
        Ok(())
    }

    async fn next_run_request(&self) -> bool {
        self.shared.run_requests.lock().await.recv().await.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PluginApi {
    Status,
    Legacy,
}

/// Asset plugin living in the bridged host
#[derive(Debug)]
struct BridgePlugin {
    bridge: HostBridge,
    id: String,
    api: PluginApi,
}

#[async_trait]
impl AssetPlugin for BridgePlugin {
    async fn config(&self) -> FixturistResult<PluginConfig> {
        match self.bridge.request("get-config", json!({ "plugin": self.id })).await? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(PluginConfig::new()),
            other => Err(FixturistError::bridge(format!(
                "get-config returned a non-object: {other}"
            ))),
        }
    }

    async fn set_config(&self, config: PluginConfig, merge: bool) -> FixturistResult<()> {
        self.bridge
            .request(
                "set-config",
                json!({ "plugin": self.id, "config": config, "merge": merge }),
            )
            .await?;
        Ok(())
    }

    fn status_api(self: Arc<Self>) -> Option<Arc<dyn StatusApi>> {
        (self.api == PluginApi::Status).then_some(self as Arc<dyn StatusApi>)
    }

    fn legacy_api(self: Arc<Self>) -> Option<Arc<dyn LegacyApi>> {
        (self.api == PluginApi::Legacy).then_some(self as Arc<dyn LegacyApi>)
    }
}

#[async_trait]
impl StatusApi for BridgePlugin {
    fn when_active(&self) -> BoxFuture<'static, FixturistResult<()>> {
        self.bridge
            .next_event("active", |e| matches!(e, HostEvent::Active))
    }

    fn when_idle(&self) -> BoxFuture<'static, FixturistResult<()>> {
        self.bridge
            .next_event("idle", |e| matches!(e, HostEvent::Idle(_)))
    }

    async fn toggle_active_document(&self) -> FixturistResult<()> {
        self.bridge
            .request("toggle-active-document", json!({ "plugin": self.id }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LegacyApi for BridgePlugin {
    fn once_active(&self) -> oneshot::Receiver<()> {
        forward(self.bridge.next_event("active", |e| matches!(e, HostEvent::Active)))
    }

    fn once_idle(&self, document: DocumentId) -> Option<oneshot::Receiver<()>> {
        Some(forward(self.bridge.next_event("idle", move |e| {
            matches!(e, HostEvent::Idle(None)) || *e == HostEvent::Idle(Some(document))
        })))
    }

    async fn activate(&self, document: DocumentId) -> FixturistResult<()> {
        self.bridge
            .request(
                "activate-document",
                json!({ "plugin": self.id, "document": document }),
            )
            .await?;
        Ok(())
    }
}

fn forward(signal: BoxFuture<'static, FixturistResult<()>>) -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        if signal.await.is_ok() {
            let _ = tx.send(());
        }
    });
    rx
}

/// Secondary verifier living in the bridged host
#[derive(Debug)]
struct BridgeVerifier {
    bridge: HostBridge,
    id: String,
}

#[async_trait]
impl SecondaryVerifier for BridgeVerifier {
    async fn run_test(&self, case: TestCase) -> FixturistResult<TestCase> {
        let result = self
            .bridge
            .request("run-test", json!({ "plugin": self.id, "case": case }))
            .await?;
        if result.is_null() {
            return Ok(case);
        }
        serde_json::from_value(result)
            .map_err(|e| FixturistError::verification(format!("malformed test case: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::host::{GenerationPlugin, PluginFlavor};
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    /// Scripted host on the far end of an in-memory pipe
    struct FakeHost {
        lines: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeHost {
        async fn expect(&mut self, method: &str) -> (u64, Value) {
            let line = self.lines.next_line().await.unwrap().expect("request line");
            let request: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(request["method"], method, "unexpected request {request}");
            (request["id"].as_u64().unwrap(), request["params"].clone())
        }

        async fn send(&mut self, message: Value) {
            let mut line = message.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.flush().await.unwrap();
        }

        async fn reply(&mut self, id: u64, result: Value) {
            self.send(json!({ "id": id, "result": result })).await;
        }
    }

    fn connect() -> (HostBridge, FakeHost) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (read, write) = tokio::io::split(ours);
        let bridge = HostBridge::new(read, write);
        let (their_read, their_write) = tokio::io::split(theirs);
        let host = FakeHost {
            lines: BufReader::new(their_read).lines(),
            writer: their_write,
        };
        (bridge, host)
    }

    mod protocol_tests {
        use super::*;

        #[tokio::test]
        async fn test_open_document_round_trip() {
            let (bridge, mut host) = connect();
            let call = tokio::spawn({
                let bridge = bridge.clone();
                async move { bridge.open_document(Path::new("/w/doc.psd")).await }
            });
            let (id, params) = host.expect("open-document").await;
            assert_eq!(params["path"], "/w/doc.psd");
            host.reply(id, json!(17)).await;
            assert_eq!(call.await.unwrap().unwrap(), Some(17));
        }

        #[tokio::test]
        async fn test_falsy_document_id_is_none() {
            assert_eq!(document_id(&json!(0)), None);
            assert_eq!(document_id(&Value::Null), None);
            assert_eq!(document_id(&json!("42")), Some(42));
        }

        #[tokio::test]
        async fn test_error_response() {
            let (bridge, mut host) = connect();
            let call = tokio::spawn({
                let bridge = bridge.clone();
                async move { bridge.close_all_documents().await }
            });
            let (id, _) = host.expect("close-all-documents").await;
            host.send(json!({ "id": id, "error": "no photoshop" })).await;
            let err = call.await.unwrap().unwrap_err();
            assert!(err.to_string().contains("no photoshop"));
        }

        #[tokio::test]
        async fn test_closed_peer_fails_pending_requests() {
            let (bridge, host) = connect();
            let call = tokio::spawn({
                let bridge = bridge.clone();
                async move { bridge.alert("hello").await }
            });
            drop(host);
            let err = call.await.unwrap().unwrap_err();
            assert!(matches!(err, FixturistError::Bridge { .. }));
            assert!(!bridge.next_run_request().await);
        }

        #[tokio::test]
        async fn test_run_requested_event() {
            let (bridge, mut host) = connect();
            host.send(json!({ "event": "run-requested" })).await;
            assert!(bridge.next_run_request().await);
        }

        #[tokio::test]
        async fn test_malformed_lines_are_skipped() {
            let (bridge, mut host) = connect();
            let call = tokio::spawn({
                let bridge = bridge.clone();
                async move { bridge.alert("summary").await }
            });
            let (id, params) = host.expect("alert").await;
            assert_eq!(params["message"], "summary");
            host.writer.write_all(b"not json\n\n").await.unwrap();
            host.reply(id, Value::Null).await;
            call.await.unwrap().unwrap();
        }
    }

    mod plugin_tests {
        use super::*;

        async fn find(bridge: &HostBridge, host: &mut FakeHost, answer: Value) -> Option<Arc<dyn AssetPlugin>> {
            let call = tokio::spawn({
                let bridge = bridge.clone();
                async move { bridge.find_asset_plugin("generator-assets").await }
            });
            let (id, params) = host.expect("find-plugin").await;
            assert_eq!(params["id"], "generator-assets");
            host.reply(id, answer).await;
            call.await.unwrap().unwrap()
        }

        #[tokio::test]
        async fn test_plugin_not_loaded() {
            let (bridge, mut host) = connect();
            assert!(find(&bridge, &mut host, Value::Null).await.is_none());
        }

        #[tokio::test]
        async fn test_status_generation_cycle() {
            let (bridge, mut host) = connect();
            let raw = find(&bridge, &mut host, json!({ "api": "status" })).await.unwrap();
            let plugin = GenerationPlugin::resolve(raw).unwrap();
            assert_eq!(plugin.flavor(), PluginFlavor::Status);

            let active = plugin.when_active();
            let activate = tokio::spawn({
                let plugin = plugin.clone();
                async move { plugin.activate(17).await }
            });
            let (id, _) = host.expect("toggle-active-document").await;
            host.reply(id, Value::Null).await;
            activate.await.unwrap().unwrap();

            host.send(json!({ "event": "active" })).await;
            active.await.unwrap();

            let idle = plugin.when_idle(17);
            host.send(json!({ "event": "idle" })).await;
            idle.await.unwrap();
        }

        #[tokio::test]
        async fn test_legacy_idle_waits_for_its_document() {
            let (bridge, mut host) = connect();
            let raw = find(&bridge, &mut host, json!({ "api": "legacy" })).await.unwrap();
            let plugin = GenerationPlugin::resolve(raw).unwrap();
            assert_eq!(plugin.flavor(), PluginFlavor::Legacy);

            let mut idle = plugin.when_idle(5);
            host.send(json!({ "event": "idle", "document": 4 })).await;
            assert!(tokio::time::timeout(std::time::Duration::from_millis(50), &mut idle)
                .await
                .is_err());
            host.send(json!({ "event": "idle", "document": 5 })).await;
            idle.await.unwrap();
        }

        #[tokio::test]
        async fn test_config_round_trip() {
            let (bridge, mut host) = connect();
            let raw = find(&bridge, &mut host, json!({ "api": "status" })).await.unwrap();

            let get = tokio::spawn({
                let raw = Arc::clone(&raw);
                async move { raw.config().await }
            });
            let (id, params) = host.expect("get-config").await;
            assert_eq!(params["plugin"], "generator-assets");
            host.reply(id, json!({ "svg-enabled": true })).await;
            assert_eq!(get.await.unwrap().unwrap().len(), 1);

            let set = tokio::spawn({
                let raw = Arc::clone(&raw);
                async move { raw.set_config(PluginConfig::new(), true).await }
            });
            let (id, params) = host.expect("set-config").await;
            assert_eq!(params["merge"], true);
            host.reply(id, Value::Null).await;
            set.await.unwrap().unwrap();
        }

        #[tokio::test]
        async fn test_signal_after_close_is_generation_error() {
            let (bridge, mut host) = connect();
            let raw = find(&bridge, &mut host, json!({ "api": "status" })).await.unwrap();
            let plugin = GenerationPlugin::resolve(raw).unwrap();
            let idle = plugin.when_idle(1);
            drop(host);
            let err = idle.await.unwrap_err();
            assert!(matches!(err, FixturistError::Generation { .. }));
        }
    }

    mod verifier_tests {
        use super::*;

        #[tokio::test]
        async fn test_run_test_returns_updated_case() {
            let (bridge, mut host) = connect();
            let find = tokio::spawn({
                let bridge = bridge.clone();
                async move { bridge.find_verifier("crema").await }
            });
            let (id, _) = host.expect("find-plugin").await;
            host.reply(id, json!({})).await;
            let verifier = find.await.unwrap().unwrap().unwrap();

            let case = TestCase::new("caseA", "/fx/caseA", "doc.psd", "doc-assets");
            let run = tokio::spawn(async move { verifier.run_test(case).await });
            let (id, params) = host.expect("run-test").await;
            assert_eq!(params["plugin"], "crema");
            let mut echoed = params["case"].clone();
            echoed["maxCompareMetric"] = json!(4.0);
            host.reply(id, echoed).await;
            let updated = run.await.unwrap().unwrap();
            assert_eq!(updated.max_compare_metric, 4.0);
        }
    }
}
