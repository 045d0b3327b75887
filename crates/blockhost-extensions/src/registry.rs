//! Extension registry.
//!
//! The registry owns the full extension lifecycle: resolving sources through
//! the loader, queueing sandboxed loads for worker contexts, normalizing
//! declared metadata, publishing it to the host runtime, and serving the RPC
//! surface sandboxed workers call back into (`register`, `getLoadedInfo`).
//!
//! All collaborators are handed in at construction; the registry holds no
//! ambient global state, so several registries can coexist in one process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use blockhost_rpc::{RpcBoundary, RpcError, RpcHandler};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::config::RegistryConfig;
use crate::error::{ExtensionError, Result};
use crate::invoke::BindContext;
use crate::loader::{Extension, ExtensionHandle, ExtensionLoader};
use crate::normalize::normalize;
use crate::runtime::HostRuntime;
use crate::types::{Environment, ExtensionMetadata, RawExtensionInfo};
use crate::worker::{PendingWorkerRequest, WorkerAssignment, WorkerHandle, WorkerQueue};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// What to load: a source reference for the loader, or an extension object
/// supplied directly by the embedder.
#[derive(Clone)]
pub enum ExtensionSource {
    Url(String),
    Object(Arc<dyn Extension>),
}

impl std::fmt::Debug for ExtensionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => write!(f, "Url({url})"),
            Self::Object(_) => write!(f, "Object(..)"),
        }
    }
}

/// How a completed `load` call resolved.
#[derive(Debug)]
pub enum LoadOutcome {
    /// The extension registered in-process; its canonical metadata is
    /// available immediately.
    Registered {
        id: String,
        metadata: Arc<ExtensionMetadata>,
    },
    /// A sandboxed worker finished initializing under this handle.  The
    /// extension registers itself through the RPC boundary.
    WorkerAssigned { handle: WorkerHandle },
}

/// One registered extension, as tracked by the registry.
#[derive(Debug, Clone)]
pub struct LoadedExtension {
    pub id: String,
    pub url: String,
    pub environment: Environment,
    pub metadata: Arc<ExtensionMetadata>,
    pub handle: ExtensionHandle,
    pub registered_at: DateTime<Utc>,
}

/// Summary of everything loaded, keyed by extension id.  Serialized for the
/// `getLoadedInfo` RPC method and for tooling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedExtensionInfo {
    pub extension_urls: HashMap<String, String>,
    pub extension_environments: HashMap<String, Environment>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct RegistryState {
    loaded: HashMap<String, LoadedExtension>,
    workers: WorkerQueue,
    worker_urls: HashMap<WorkerHandle, String>,
}

/// The extension registry.  Cheap to share via `Arc`; construction registers
/// its callback service on the RPC boundary.
pub struct ExtensionRegistry {
    config: RegistryConfig,
    runtime: Arc<dyn HostRuntime>,
    rpc: Arc<dyn RpcBoundary>,
    loader: Arc<dyn ExtensionLoader>,
    state: Mutex<RegistryState>,
}

impl ExtensionRegistry {
    /// Create a registry and register its service with the RPC boundary.
    pub fn new(
        config: RegistryConfig,
        runtime: Arc<dyn HostRuntime>,
        rpc: Arc<dyn RpcBoundary>,
        loader: Arc<dyn ExtensionLoader>,
    ) -> Result<Arc<Self>> {
        let registry = Arc::new(Self {
            config,
            runtime,
            rpc,
            loader,
            state: Mutex::new(RegistryState {
                loaded: HashMap::new(),
                workers: WorkerQueue::new(),
                worker_urls: HashMap::new(),
            }),
        });

        let service = RegistryService {
            registry: Arc::downgrade(&registry),
        };
        registry
            .rpc
            .register_service(&registry.config.service_name, Arc::new(service))?;
        Ok(registry)
    }

    /// Load an extension from a source, in the requested environment.
    ///
    /// Object sources and unsandboxed URL sources resolve once registration
    /// completes.  Sandboxed URL sources resolve only after a worker context
    /// has been provisioned and reports successful initialization; requests
    /// are served strictly in submission order.
    pub async fn load(
        &self,
        source: ExtensionSource,
        environment: Environment,
    ) -> Result<LoadOutcome> {
        match (source, environment) {
            (ExtensionSource::Object(extension), _) => {
                // A directly supplied object always runs in-process; its id
                // doubles as the source reference.
                let url = extension.get_info().id.clone();
                let metadata = self.register_local(extension, url)?;
                Ok(LoadOutcome::Registered {
                    id: metadata.id.clone(),
                    metadata,
                })
            }

            (ExtensionSource::Url(url), Environment::Unsandboxed) => {
                let extension = self
                    .loader
                    .load(&url, Arc::clone(&self.runtime))
                    .await?;
                let metadata = self.register_local(extension, url)?;
                Ok(LoadOutcome::Registered {
                    id: metadata.id.clone(),
                    metadata,
                })
            }

            (ExtensionSource::Url(url), Environment::Sandboxed) => {
                let (completion, resolved) = oneshot::channel();
                {
                    // Spawn signal and queue entry commit under one lock: a
                    // failed signal leaves nothing queued, and a worker
                    // answering the signal cannot allocate before the entry
                    // is in place.
                    let mut state = self.lock_state();
                    self.rpc.add_worker().map_err(ExtensionError::from)?;
                    state.workers.enqueue(PendingWorkerRequest {
                        url: url.clone(),
                        completion,
                    });
                }
                tracing::info!(url = %url, "sandboxed load queued; worker requested");

                let handle = resolved
                    .await
                    .map_err(|_| ExtensionError::WorkerInit {
                        url,
                        reason: "allocation abandoned".to_owned(),
                    })??;
                Ok(LoadOutcome::WorkerAssigned { handle })
            }
        }
    }

    fn register_local(
        &self,
        extension: Arc<dyn Extension>,
        url: String,
    ) -> Result<Arc<ExtensionMetadata>> {
        let raw = extension.get_info();
        let handle = ExtensionHandle::Local(extension);
        let ctx = BindContext {
            handle: handle.clone(),
            rpc: Arc::clone(&self.rpc),
            runtime: Arc::clone(&self.runtime),
        };
        let metadata = normalize(&ctx, &raw)?;
        self.publish(handle, metadata, url, Environment::Unsandboxed)
    }

    /// Register a sandboxed extension that announced itself from the worker
    /// behind `handle`.
    pub fn register_remote(
        &self,
        handle: WorkerHandle,
        raw: &RawExtensionInfo,
    ) -> Result<Arc<ExtensionMetadata>> {
        let url = self
            .lock_state()
            .worker_urls
            .get(&handle)
            .cloned()
            .ok_or(ExtensionError::UnknownWorkerHandle { handle })?;

        let service = self.config.worker_service_name(handle);
        let remote = ExtensionHandle::Remote(service);
        let ctx = BindContext {
            handle: remote.clone(),
            rpc: Arc::clone(&self.rpc),
            runtime: Arc::clone(&self.runtime),
        };
        let metadata = normalize(&ctx, raw)?;
        self.publish(remote, metadata, url, Environment::Sandboxed)
    }

    /// Insert the registration record and push the palette to the runtime.
    ///
    /// Registering an id that already exists leaves the existing record
    /// untouched, but the runtime still receives the freshly normalized
    /// palette.
    fn publish(
        &self,
        handle: ExtensionHandle,
        metadata: ExtensionMetadata,
        url: String,
        environment: Environment,
    ) -> Result<Arc<ExtensionMetadata>> {
        let metadata = Arc::new(metadata);
        let mut state = self.lock_state();
        if let Some(existing) = state.loaded.get(&metadata.id) {
            tracing::debug!(id = %metadata.id, "extension already registered; keeping existing record");
            let kept = Arc::clone(&existing.metadata);
            drop(state);
            self.runtime.register_primitives(&metadata)?;
            return Ok(kept);
        }

        let id = metadata.id.clone();
        state.loaded.insert(
            id.clone(),
            LoadedExtension {
                id: id.clone(),
                url: url.clone(),
                environment,
                metadata: Arc::clone(&metadata),
                handle,
                registered_at: Utc::now(),
            },
        );
        drop(state);

        self.runtime.register_primitives(&metadata)?;
        tracing::info!(
            id = %id,
            url = %url,
            environment = %environment,
            blocks = metadata.blocks.len(),
            "extension registered"
        );
        Ok(metadata)
    }

    /// Re-fetch an extension's declared metadata, re-normalize it, and push
    /// the fresh palette to the runtime.
    pub async fn reload(&self, id: &str) -> Result<()> {
        let (handle, url) = {
            let state = self.lock_state();
            let entry = state
                .loaded
                .get(id)
                .ok_or_else(|| ExtensionError::NotLoaded { id: id.to_owned() })?;
            (entry.handle.clone(), entry.url.clone())
        };

        let raw = match &handle {
            ExtensionHandle::Local(extension) => extension.get_info(),
            ExtensionHandle::Remote(service) => {
                let value = self.rpc.call(service, "getInfo", Vec::new()).await?;
                serde_json::from_value(value)?
            }
        };

        let ctx = BindContext {
            handle,
            rpc: Arc::clone(&self.rpc),
            runtime: Arc::clone(&self.runtime),
        };
        let metadata = Arc::new(normalize(&ctx, &raw)?);

        {
            let mut state = self.lock_state();
            // The extension may have been dropped while we were fetching.
            let entry = state
                .loaded
                .get_mut(id)
                .ok_or_else(|| ExtensionError::NotLoaded { id: id.to_owned() })?;
            entry.metadata = Arc::clone(&metadata);
        }

        self.runtime.refresh_primitives(&metadata)?;
        tracing::info!(id = %id, url = %url, "extension reloaded");
        Ok(())
    }

    /// Reload every registered extension.
    ///
    /// All reloads run to completion before the aggregate resolves; the first
    /// failure (in registration order) fails the aggregate, but never
    /// prevents the other extensions from refreshing.
    pub async fn reload_all(&self) -> Result<()> {
        let ids: Vec<String> = {
            let state = self.lock_state();
            let mut ids: Vec<_> = state.loaded.values().collect();
            ids.sort_by_key(|entry| entry.registered_at);
            ids.iter().map(|entry| entry.id.clone()).collect()
        };

        let results = join_all(ids.iter().map(|id| self.reload(id))).await;
        results.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    /// Pair a newly available worker context with the oldest waiting
    /// sandboxed load.
    ///
    /// Returns `None` when no load is waiting; the caller should release the
    /// worker in that case.
    pub fn allocate_worker(&self) -> Option<WorkerAssignment> {
        let mut state = self.lock_state();
        match state.workers.allocate() {
            Some(assignment) => {
                state
                    .worker_urls
                    .insert(assignment.handle, assignment.url.clone());
                tracing::info!(
                    handle = assignment.handle,
                    url = %assignment.url,
                    "worker assigned to pending load"
                );
                Some(assignment)
            }
            None => {
                tracing::warn!("worker became available but no extension is waiting");
                None
            }
        }
    }

    /// Record that the worker behind `handle` finished bootstrapping,
    /// resolving the originating `load` call.
    ///
    /// `error` carries the worker's failure message, if bootstrap failed.
    pub fn on_worker_init(&self, handle: WorkerHandle, error: Option<String>) -> Result<()> {
        let PendingWorkerRequest { url, completion } = self
            .lock_state()
            .workers
            .take_assigned(handle)
            .ok_or(ExtensionError::UnknownWorkerHandle { handle })?;

        let outcome = match error {
            None => Ok(handle),
            Some(reason) => {
                tracing::warn!(handle, url = %url, reason = %reason, "worker initialization failed");
                Err(ExtensionError::WorkerInit { url, reason })
            }
        };
        if completion.send(outcome).is_err() {
            tracing::warn!(handle, "load caller went away before worker init resolved");
        }
        Ok(())
    }

    // -- Queries -------------------------------------------------------------

    /// Sources and environments of everything loaded, keyed by id.
    pub fn loaded_info(&self) -> LoadedExtensionInfo {
        let state = self.lock_state();
        let mut info = LoadedExtensionInfo::default();
        for entry in state.loaded.values() {
            info.extension_urls
                .insert(entry.id.clone(), entry.url.clone());
            info.extension_environments
                .insert(entry.id.clone(), entry.environment);
        }
        info
    }

    /// The id registered for a source reference, if any.
    pub fn id_by_url(&self, url: &str) -> Option<String> {
        self.lock_state()
            .loaded
            .values()
            .find(|entry| entry.url == url)
            .map(|entry| entry.id.clone())
    }

    /// Snapshot of every registration record.
    pub fn loaded_extensions(&self) -> Vec<LoadedExtension> {
        self.lock_state().loaded.values().cloned().collect()
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.lock_state().loaded.contains_key(id)
    }

    /// Canonical metadata for a loaded extension.
    pub fn metadata(&self, id: &str) -> Option<Arc<ExtensionMetadata>> {
        self.lock_state()
            .loaded
            .get(id)
            .map(|entry| Arc::clone(&entry.metadata))
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().expect("registry state lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// RPC surface
// ---------------------------------------------------------------------------

/// The registry's callback service on the RPC boundary.  Holds a weak
/// reference so the boundary never keeps a dropped registry alive.
struct RegistryService {
    registry: Weak<ExtensionRegistry>,
}

impl RegistryService {
    fn registry(&self) -> blockhost_rpc::Result<Arc<ExtensionRegistry>> {
        self.registry.upgrade().ok_or_else(|| RpcError::Handler {
            reason: "extension registry has shut down".to_owned(),
        })
    }
}

#[async_trait]
impl RpcHandler for RegistryService {
    async fn handle(&self, method: &str, args: Vec<Value>) -> blockhost_rpc::Result<Value> {
        let registry = self.registry()?;
        match method {
            "register" => {
                let mut args = args.into_iter();
                let handle: WorkerHandle =
                    serde_json::from_value(args.next().unwrap_or(Value::Null))?;
                let raw: RawExtensionInfo =
                    serde_json::from_value(args.next().unwrap_or(Value::Null))?;

                let metadata = registry
                    .register_remote(handle, &raw)
                    .map_err(|e| RpcError::Handler {
                        reason: e.to_string(),
                    })?;
                Ok(serde_json::to_value(metadata.to_raw())?)
            }

            "getLoadedInfo" => Ok(serde_json::to_value(registry.loaded_info())?),

            other => Err(RpcError::MethodNotFound {
                service: registry.config.service_name.clone(),
                method: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
