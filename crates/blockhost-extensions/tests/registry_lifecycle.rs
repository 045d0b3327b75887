//! End-to-end registry lifecycle tests over the public API, using the
//! in-process loopback RPC boundary and doubles standing in for the host
//! runtime's worker infrastructure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use blockhost_extensions::{
    BlockArguments, BlockContext, BlockHandler, Environment, Extension, ExtensionError,
    ExtensionRegistry, ExtensionSource, HostRuntime, LoadOutcome, PaletteEntry, RawExtensionInfo,
    RegistryConfig, SimpleRuntime, WorkerHandle,
};
use blockhost_rpc::{LoopbackRpc, RpcBoundary, RpcError, RpcHandler};

// ---------------------------------------------------------------------------
// Doubles
// ---------------------------------------------------------------------------

/// In-process extension with mutable declared info.
struct ScriptedExtension {
    info: Mutex<RawExtensionInfo>,
    handlers: HashMap<String, BlockHandler>,
}

impl ScriptedExtension {
    fn new(info: Value) -> Self {
        Self {
            info: Mutex::new(serde_json::from_value(info).expect("info parses")),
            handlers: HashMap::new(),
        }
    }

    fn with_handler(
        mut self,
        func: &str,
        handler: impl Fn(&BlockArguments) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(
            func.to_owned(),
            Arc::new(move |args, _context, _info| Ok(handler(args))),
        );
        self
    }

    fn set_info(&self, info: Value) {
        *self.info.lock().unwrap() = serde_json::from_value(info).expect("info parses");
    }
}

impl Extension for ScriptedExtension {
    fn get_info(&self) -> RawExtensionInfo {
        self.info.lock().unwrap().clone()
    }

    fn handler(&self, func: &str) -> Option<BlockHandler> {
        self.handlers.get(func).cloned()
    }
}

/// RPC service standing in for a sandboxed worker's extension process.
struct FakeWorker {
    info: Mutex<Value>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl FakeWorker {
    fn new(info: Value) -> Self {
        Self {
            info: Mutex::new(info),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn set_info(&self, info: Value) {
        *self.info.lock().unwrap() = info;
    }

    fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcHandler for FakeWorker {
    async fn handle(&self, method: &str, args: Vec<Value>) -> blockhost_rpc::Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_owned(), args.clone()));
        match method {
            "getInfo" => Ok(self.info.lock().unwrap().clone()),
            "stamp" => Ok(json!({ "stamped": args })),
            other => Err(RpcError::MethodNotFound {
                service: "fake-worker".into(),
                method: other.to_owned(),
            }),
        }
    }
}

struct Harness {
    runtime: Arc<SimpleRuntime>,
    rpc: Arc<LoopbackRpc>,
    registry: Arc<ExtensionRegistry>,
    worker_spawns: mpsc::UnboundedReceiver<()>,
}

fn harness() -> Harness {
    let runtime = Arc::new(SimpleRuntime::new());
    let rpc = Arc::new(LoopbackRpc::new());
    let worker_spawns = rpc
        .take_worker_notifications()
        .expect("notifications taken once");
    let registry = ExtensionRegistry::new(
        RegistryConfig::default(),
        Arc::clone(&runtime) as Arc<dyn HostRuntime>,
        Arc::clone(&rpc) as Arc<dyn RpcBoundary>,
        Arc::new(blockhost_extensions::BuiltinLoader::new()),
    )
    .expect("registry constructs");
    Harness {
        runtime,
        rpc,
        registry,
        worker_spawns,
    }
}

/// Let a sandboxed load through: receive the spawn notification, allocate a
/// worker, stand up its fake service, and have it register its info.
async fn provision_worker(h: &mut Harness, info: Value) -> (WorkerHandle, Arc<FakeWorker>) {
    h.worker_spawns.recv().await.expect("spawn requested");
    let assignment = h.registry.allocate_worker().expect("load is waiting");

    let worker = Arc::new(FakeWorker::new(info));
    h.rpc
        .register_service(
            &format!("extension.{}", assignment.handle),
            Arc::clone(&worker) as Arc<dyn RpcHandler>,
        )
        .expect("worker service registers");

    let worker_info = worker.info.lock().unwrap().clone();
    h.rpc
        .call(
            "extensions",
            "register",
            vec![json!(assignment.handle), worker_info],
        )
        .await
        .expect("worker registration accepted");

    (assignment.handle, worker)
}

// ---------------------------------------------------------------------------
// Unsandboxed path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn object_load_publishes_palette_and_dispatches_blocks() {
    let h = harness();
    let extension = Arc::new(
        ScriptedExtension::new(json!({
            "id": "turtle",
            "name": "Turtle",
            "blocks": [{ "opcode": "forward", "text": "move [STEPS]" }]
        }))
        .with_handler("forward", |args| {
            json!({ "moved": args.get("STEPS").cloned() })
        }),
    );

    let outcome = h
        .registry
        .load(
            ExtensionSource::Object(extension),
            Environment::Unsandboxed,
        )
        .await
        .expect("loads");
    let LoadOutcome::Registered { id, metadata } = outcome else {
        panic!("expected immediate registration");
    };
    assert_eq!(id, "turtle");
    assert_eq!(h.runtime.palette_ids(), vec!["turtle".to_owned()]);

    let block = metadata.block("forward").expect("block published");
    let invoker = block.invoke.as_ref().expect("executable block is bound");
    let out = invoker
        .invoke(
            BlockArguments::new().with("STEPS", json!(10)),
            BlockContext::for_runtime(Arc::clone(&h.runtime) as Arc<dyn HostRuntime>),
        )
        .await
        .expect("dispatches in-process");
    assert_eq!(out, json!({ "moved": 10 }));
}

#[tokio::test]
async fn invalid_id_leaves_registry_empty() {
    let h = harness();
    let result = h
        .registry
        .load(
            ExtensionSource::Object(Arc::new(ScriptedExtension::new(json!({
                "id": "bad id!"
            })))),
            Environment::Unsandboxed,
        )
        .await;

    assert!(matches!(result, Err(ExtensionError::InvalidId { .. })));
    assert!(h.registry.loaded_extensions().is_empty());
    assert!(h.runtime.palette_ids().is_empty());
}

// ---------------------------------------------------------------------------
// Sandboxed path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sandboxed_load_end_to_end() {
    let mut h = harness();

    let registry = Arc::clone(&h.registry);
    let load = tokio::spawn(async move {
        registry
            .load(
                ExtensionSource::Url("https://ext.test/stamp.js".into()),
                Environment::Sandboxed,
            )
            .await
    });

    let (handle, worker) = provision_worker(
        &mut h,
        json!({
            "id": "stamper",
            "blocks": [{ "opcode": "stamp" }]
        }),
    )
    .await;
    h.registry
        .on_worker_init(handle, None)
        .expect("known handle");

    let outcome = load.await.expect("task").expect("load resolves");
    assert!(matches!(outcome, LoadOutcome::WorkerAssigned { handle: h } if h == handle));

    // Registration happened through the RPC callback.
    let info = h.registry.loaded_info();
    assert_eq!(info.extension_urls["stamper"], "https://ext.test/stamp.js");
    assert_eq!(info.extension_environments["stamper"], Environment::Sandboxed);
    assert_eq!(
        h.registry.id_by_url("https://ext.test/stamp.js").as_deref(),
        Some("stamper")
    );

    // Invoking the published block crosses the boundary to the worker.
    let metadata = h.registry.metadata("stamper").expect("metadata");
    let invoker = metadata
        .block("stamp")
        .and_then(|b| b.invoke.as_ref().cloned())
        .expect("bound block");
    let out = invoker
        .invoke(
            BlockArguments::new().with("X", json!(1)),
            BlockContext::for_runtime(Arc::clone(&h.runtime) as Arc<dyn HostRuntime>),
        )
        .await
        .expect("remote dispatch");
    assert_eq!(out.get("stamped").is_some(), true);
    assert!(worker.calls().iter().any(|(method, _)| method == "stamp"));
}

#[tokio::test]
async fn sandboxed_loads_are_served_in_submission_order() {
    let mut h = harness();
    let urls = [
        "https://ext.test/a.js",
        "https://ext.test/b.js",
        "https://ext.test/c.js",
    ];

    // Submit sequentially, waiting for each spawn request so queue order is
    // deterministic.
    let mut loads = Vec::new();
    for url in urls {
        let registry = Arc::clone(&h.registry);
        let url = url.to_owned();
        loads.push(tokio::spawn(async move {
            registry
                .load(ExtensionSource::Url(url), Environment::Sandboxed)
                .await
        }));
        h.worker_spawns.recv().await.expect("spawn requested");
    }

    let assignments: Vec<_> = (0..3)
        .map(|_| h.registry.allocate_worker().expect("pending load"))
        .collect();
    for (i, assignment) in assignments.iter().enumerate() {
        assert_eq!(assignment.handle, i as WorkerHandle);
        assert_eq!(assignment.url, urls[i]);
    }

    // Workers may finish bootstrapping in any order.
    for handle in [1, 2, 0] {
        h.registry
            .on_worker_init(handle, None)
            .expect("known handle");
    }

    for (i, load) in loads.into_iter().enumerate() {
        let outcome = load.await.expect("task").expect("load resolves");
        assert!(
            matches!(outcome, LoadOutcome::WorkerAssigned { handle } if handle == i as WorkerHandle)
        );
    }
}

#[tokio::test]
async fn worker_bootstrap_failure_rejects_the_load() {
    let mut h = harness();
    let registry = Arc::clone(&h.registry);
    let load = tokio::spawn(async move {
        registry
            .load(
                ExtensionSource::Url("https://ext.test/broken.js".into()),
                Environment::Sandboxed,
            )
            .await
    });

    h.worker_spawns.recv().await.expect("spawn requested");
    let assignment = h.registry.allocate_worker().expect("pending load");
    h.registry
        .on_worker_init(assignment.handle, Some("script threw during init".into()))
        .expect("known handle");

    let result = load.await.expect("task");
    assert!(matches!(
        result,
        Err(ExtensionError::WorkerInit { url, reason })
            if url == "https://ext.test/broken.js" && reason == "script threw during init"
    ));
}

#[tokio::test]
async fn repeated_worker_init_is_rejected() {
    let mut h = harness();
    let registry = Arc::clone(&h.registry);
    let load = tokio::spawn(async move {
        registry
            .load(
                ExtensionSource::Url("https://ext.test/a.js".into()),
                Environment::Sandboxed,
            )
            .await
    });

    h.worker_spawns.recv().await.expect("spawn requested");
    let assignment = h.registry.allocate_worker().expect("pending load");
    h.registry
        .on_worker_init(assignment.handle, None)
        .expect("first init");
    load.await.expect("task").expect("load resolves");

    let second = h.registry.on_worker_init(assignment.handle, None);
    assert!(matches!(
        second,
        Err(ExtensionError::UnknownWorkerHandle { handle }) if handle == assignment.handle
    ));
}

#[tokio::test]
async fn allocate_without_pending_load_is_none() {
    let h = harness();
    assert!(h.registry.allocate_worker().is_none());
}

// ---------------------------------------------------------------------------
// Reload
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reload_refetches_local_info() {
    let h = harness();
    let extension = Arc::new(ScriptedExtension::new(json!({
        "id": "turtle",
        "blocks": [{ "opcode": "forward" }]
    })));
    h.registry
        .load(
            ExtensionSource::Object(Arc::clone(&extension) as Arc<dyn Extension>),
            Environment::Unsandboxed,
        )
        .await
        .expect("loads");

    extension.set_info(json!({
        "id": "turtle",
        "blocks": [{ "opcode": "forward" }, { "opcode": "back" }]
    }));
    h.registry.reload("turtle").await.expect("reloads");

    let palette = h.runtime.palette("turtle").expect("palette refreshed");
    let opcodes: Vec<_> = palette
        .blocks
        .iter()
        .filter_map(|entry| match entry {
            PaletteEntry::Block(b) => Some(b.opcode.clone()),
            PaletteEntry::Separator => None,
        })
        .collect();
    assert_eq!(opcodes, vec!["forward".to_owned(), "back".to_owned()]);
}

#[tokio::test]
async fn reload_refetches_remote_info_over_rpc() {
    let mut h = harness();
    let registry = Arc::clone(&h.registry);
    let load = tokio::spawn(async move {
        registry
            .load(
                ExtensionSource::Url("https://ext.test/stamp.js".into()),
                Environment::Sandboxed,
            )
            .await
    });

    let (handle, worker) = provision_worker(
        &mut h,
        json!({ "id": "stamper", "blocks": [{ "opcode": "stamp" }] }),
    )
    .await;
    h.registry.on_worker_init(handle, None).expect("init");
    load.await.expect("task").expect("load resolves");

    worker.set_info(json!({
        "id": "stamper",
        "name": "Stamper Pro",
        "blocks": [{ "opcode": "stamp" }, { "opcode": "clear" }]
    }));
    h.registry.reload("stamper").await.expect("reloads");

    assert!(worker.calls().iter().any(|(method, _)| method == "getInfo"));
    let metadata = h.registry.metadata("stamper").expect("metadata");
    assert_eq!(metadata.name, "Stamper Pro");
    assert!(metadata.block("clear").is_some());
}

#[tokio::test]
async fn reload_all_failure_still_refreshes_the_others() {
    let mut h = harness();

    // One healthy local extension.
    let local = Arc::new(ScriptedExtension::new(json!({
        "id": "turtle",
        "blocks": [{ "opcode": "forward" }]
    })));
    h.registry
        .load(
            ExtensionSource::Object(Arc::clone(&local) as Arc<dyn Extension>),
            Environment::Unsandboxed,
        )
        .await
        .expect("loads");

    // One sandboxed extension whose worker then disappears.
    let registry = Arc::clone(&h.registry);
    let load = tokio::spawn(async move {
        registry
            .load(
                ExtensionSource::Url("https://ext.test/stamp.js".into(),),
                Environment::Sandboxed,
            )
            .await
    });
    let (handle, _worker) = provision_worker(&mut h, json!({ "id": "stamper" })).await;
    h.registry.on_worker_init(handle, None).expect("init");
    load.await.expect("task").expect("load resolves");
    assert!(h.rpc.unregister_service(&format!("extension.{handle}")));

    local.set_info(json!({
        "id": "turtle",
        "name": "Turtle 2",
        "blocks": [{ "opcode": "forward" }]
    }));

    let result = h.registry.reload_all().await;
    assert!(matches!(
        result,
        Err(ExtensionError::Rpc(RpcError::ServiceNotFound { .. }))
    ));
    // The healthy extension refreshed anyway.
    assert_eq!(
        h.registry.metadata("turtle").expect("metadata").name,
        "Turtle 2"
    );
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn loaded_info_covers_both_environments() {
    let mut h = harness();
    h.registry
        .load(
            ExtensionSource::Object(Arc::new(ScriptedExtension::new(json!({
                "id": "turtle"
            })))),
            Environment::Unsandboxed,
        )
        .await
        .expect("loads");

    let registry = Arc::clone(&h.registry);
    let load = tokio::spawn(async move {
        registry
            .load(
                ExtensionSource::Url("https://ext.test/stamp.js".into()),
                Environment::Sandboxed,
            )
            .await
    });
    let (handle, _worker) = provision_worker(&mut h, json!({ "id": "stamper" })).await;
    h.registry.on_worker_init(handle, None).expect("init");
    load.await.expect("task").expect("load resolves");

    let info = h.registry.loaded_info();
    assert_eq!(info.extension_urls.len(), 2);
    assert_eq!(info.extension_environments["turtle"], Environment::Unsandboxed);
    assert_eq!(info.extension_environments["stamper"], Environment::Sandboxed);
}
