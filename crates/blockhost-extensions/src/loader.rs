//! Extension objects and the plugin-loading contract.
//!
//! An [`Extension`] is the host-side view of a loaded extension: it declares
//! its raw metadata through [`Extension::get_info`] and exposes its
//! capabilities as lookup tables keyed by function name, built once at
//! registration.  The invocation binder looks handlers up by key; there is no
//! reflection on method names.
//!
//! An [`ExtensionLoader`] is the collaborator responsible for turning a
//! source reference (URL or builtin id) into an extension object.  Running
//! arbitrary fetched code never happens in the host's own execution context;
//! that requirement lives entirely behind the worker-sandbox boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{ExtensionError, Result};
use crate::invoke::{BlockArguments, BlockContext};
use crate::runtime::HostRuntime;
use crate::types::{BlockInfo, RawExtensionInfo, RawMenuItem};

// ---------------------------------------------------------------------------
// Capability tables
// ---------------------------------------------------------------------------

/// A block implementation: receives the call arguments, a runtime utility
/// handle, and the resolved effective block metadata.
pub type BlockHandler =
    Arc<dyn Fn(&BlockArguments, &BlockContext, &BlockInfo) -> Result<Value> + Send + Sync>;

/// A menu-items producer: receives the id of the target the menu is opened
/// for and returns the raw item list.
pub type MenuHandler = Arc<dyn Fn(Option<&str>) -> Result<Vec<RawMenuItem>> + Send + Sync>;

/// An in-process extension object.
pub trait Extension: Send + Sync {
    /// The extension's self-declared raw metadata.
    fn get_info(&self) -> RawExtensionInfo;

    /// Look up a block handler by resolved function name.
    ///
    /// Looked up again at call time, so handlers may be attached after
    /// registration.
    fn handler(&self, func: &str) -> Option<BlockHandler>;

    /// Look up a menu-items producer by function name.
    fn menu_handler(&self, _func: &str) -> Option<MenuHandler> {
        None
    }
}

/// A reference to a loaded extension: an in-process object or the service
/// name of a sandboxed worker — never both.
#[derive(Clone)]
pub enum ExtensionHandle {
    Local(Arc<dyn Extension>),
    Remote(String),
}

impl std::fmt::Debug for ExtensionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(_) => write!(f, "Local(..)"),
            Self::Remote(service) => write!(f, "Remote({service})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading contract
// ---------------------------------------------------------------------------

/// Resolves a source reference into an extension object for unsandboxed
/// loading.
#[async_trait]
pub trait ExtensionLoader: Send + Sync {
    /// Load the extension behind `url`, instantiating it with the host
    /// runtime handle.
    async fn load(&self, url: &str, runtime: Arc<dyn HostRuntime>) -> Result<Arc<dyn Extension>>;
}

/// Constructor for a statically bundled extension.
pub type ExtensionFactory = Arc<dyn Fn(Arc<dyn HostRuntime>) -> Arc<dyn Extension> + Send + Sync>;

/// Loader for statically bundled ("built-in") extensions, keyed by source
/// reference.
pub struct BuiltinLoader {
    factories: Mutex<HashMap<String, ExtensionFactory>>,
}

impl BuiltinLoader {
    /// Create an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: Mutex::new(HashMap::new()),
        }
    }

    /// Register a factory under a source reference.
    ///
    /// An existing factory under the same reference is replaced.
    pub fn register(&self, url: impl Into<String>, factory: ExtensionFactory) {
        let url = url.into();
        tracing::debug!(url = %url, "builtin extension factory registered");
        self.factories
            .lock()
            .expect("factory table lock poisoned")
            .insert(url, factory);
    }

    /// Source references of every registered factory.
    pub fn urls(&self) -> Vec<String> {
        self.factories
            .lock()
            .expect("factory table lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl Default for BuiltinLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExtensionLoader for BuiltinLoader {
    async fn load(&self, url: &str, runtime: Arc<dyn HostRuntime>) -> Result<Arc<dyn Extension>> {
        let factory = self
            .factories
            .lock()
            .expect("factory table lock poisoned")
            .get(url)
            .cloned()
            .ok_or_else(|| ExtensionError::UnresolvedSource {
                url: url.to_owned(),
            })?;
        Ok(factory(runtime))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
