//! Registry configuration.
//!
//! [`RegistryConfig`] controls how the extension registry presents itself on
//! the RPC boundary.  Sensible defaults are provided via the [`Default`]
//! implementation, and a builder-style API allows callers to customise
//! individual fields fluently.

use crate::worker::WorkerHandle;

/// Configuration for the extension registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Service name under which the registry registers itself with the RPC
    /// boundary so sandboxed workers can call back into the host.
    ///
    /// Default: **`extensions`**.
    pub service_name: String,

    /// Prefix for the per-worker service names; the assigned worker handle
    /// is appended (e.g. `extension.0`, `extension.1`).
    ///
    /// Default: **`extension.`**.
    pub worker_service_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            service_name: "extensions".to_owned(),
            worker_service_prefix: "extension.".to_owned(),
        }
    }
}

impl RegistryConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the registry's own service name.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the prefix used to derive per-worker service names.
    pub fn with_worker_service_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_service_prefix = prefix.into();
        self
    }

    /// The service name a worker with the given handle registers under.
    pub fn worker_service_name(&self, handle: WorkerHandle) -> String {
        format!("{}{}", self.worker_service_prefix, handle)
    }
}
