//! In-process loopback boundary.
//!
//! [`LoopbackRpc`] keeps every registered service in a [`DashMap`] and
//! dispatches calls directly, without crossing a process boundary.  It backs
//! the demo binary and the integration tests, and doubles as the reference
//! implementation of the [`RpcBoundary`] contract.
//!
//! `add_worker` does not spawn anything itself: it pushes a notification on
//! an mpsc channel that the worker-host infrastructure (or a test standing in
//! for it) consumes to drive allocation.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::boundary::{RpcBoundary, RpcHandler};
use crate::error::{Result, RpcError};

/// In-process implementation of [`RpcBoundary`].
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct LoopbackRpc {
    inner: Arc<LoopbackInner>,
}

struct LoopbackInner {
    services: DashMap<String, Arc<dyn RpcHandler>>,
    worker_tx: mpsc::UnboundedSender<()>,
    worker_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
}

impl LoopbackRpc {
    /// Create an empty loopback boundary.
    #[must_use]
    pub fn new() -> Self {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(LoopbackInner {
                services: DashMap::new(),
                worker_tx,
                worker_rx: Mutex::new(Some(worker_rx)),
            }),
        }
    }

    /// Take the receiver for worker-spawn notifications.
    ///
    /// One notification is delivered per [`RpcBoundary::add_worker`] call.
    /// The receiver can be taken exactly once; subsequent calls return
    /// `None`.
    pub fn take_worker_notifications(&self) -> Option<mpsc::UnboundedReceiver<()>> {
        self.inner
            .worker_rx
            .lock()
            .expect("worker receiver lock poisoned")
            .take()
    }

    /// Remove a registered service, returning whether it existed.
    ///
    /// Models a worker going away; mainly useful in tests.
    pub fn unregister_service(&self, name: &str) -> bool {
        let removed = self.inner.services.remove(name).is_some();
        if removed {
            tracing::debug!(service = %name, "service unregistered");
        }
        removed
    }

    /// Number of currently registered services.
    pub fn service_count(&self) -> usize {
        self.inner.services.len()
    }
}

impl Default for LoopbackRpc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RpcBoundary for LoopbackRpc {
    fn register_service(&self, name: &str, handler: Arc<dyn RpcHandler>) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.inner.services.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(RpcError::ServiceExists {
                service: name.to_owned(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                tracing::debug!(service = %name, "service registered");
                Ok(())
            }
        }
    }

    fn add_worker(&self) -> Result<()> {
        self.inner
            .worker_tx
            .send(())
            .map_err(|_| RpcError::Transport {
                reason: "worker host is gone".into(),
            })?;
        tracing::debug!("worker spawn requested");
        Ok(())
    }

    async fn call(&self, service: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let handler = self
            .inner
            .services
            .get(service)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RpcError::ServiceNotFound {
                service: service.to_owned(),
            })?;

        tracing::trace!(service = %service, method = %method, "dispatching call");
        handler.handle(method, args).await
    }

    fn is_remote_service(&self, service: &str) -> bool {
        self.inner.services.contains_key(service)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
