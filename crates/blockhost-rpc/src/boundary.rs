//! Core boundary traits.
//!
//! The host and its sandboxed workers only ever talk through an
//! [`RpcBoundary`].  The boundary carries named services: the host registers
//! itself as a service so workers can call back in, and every worker that
//! finishes bootstrapping registers its extension as a service the host can
//! dispatch block invocations to.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A callable service endpoint reachable through the boundary.
///
/// Handlers receive the method name and positional JSON arguments and return
/// a JSON value.  Implementations must never panic across the boundary; all
/// failures are surfaced as [`RpcError`](crate::RpcError) values.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Invoke a named method with positional arguments.
    async fn handle(&self, method: &str, args: Vec<Value>) -> Result<Value>;
}

/// The message-passing service boundary.
///
/// Implementations own the transport (in-process channels, worker message
/// ports, sockets) and expose a uniform service namespace on top of it.
#[async_trait]
pub trait RpcBoundary: Send + Sync {
    /// Register a service under `name` so other endpoints can call it.
    ///
    /// Registration is rejected loudly if the name is already taken.
    fn register_service(&self, name: &str, handler: Arc<dyn RpcHandler>) -> Result<()>;

    /// Request that the platform spin up a new sandbox worker.
    ///
    /// The boundary only signals the infrastructure; the worker announces
    /// itself later by fetching its assignment from the host and registering
    /// its own service.
    fn add_worker(&self) -> Result<()>;

    /// Invoke `method` on the named service and await its result.
    async fn call(&self, service: &str, method: &str, args: Vec<Value>) -> Result<Value>;

    /// Whether `service` is currently reachable for remote dispatch.
    fn is_remote_service(&self, service: &str) -> bool;
}
