//! Invocation binder.
//!
//! For every executable block the normalizer produces a single uniform
//! callable, a [`BlockInvoker`].  Each invocation costs one metadata
//! resolution (static descriptor, or the mutation-carried shape for dynamic
//! blocks) plus one dispatch.  The dispatch path is selected once at bind
//! time: directly into the extension's handler table for in-process
//! extensions, or through the RPC boundary for sandboxed ones.
//!
//! Menus declared as a function name get the same treatment via
//! [`MenuGenerator`].

use std::sync::Arc;

use blockhost_rpc::RpcBoundary;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{ExtensionError, Result};
use crate::loader::ExtensionHandle;
use crate::runtime::{HostRuntime, IdentityMessages, MessageContext, Target};
use crate::types::{BlockInfo, MenuItem, RawMenuItem};

// ---------------------------------------------------------------------------
// Call-side types
// ---------------------------------------------------------------------------

/// Arguments of one block invocation.
///
/// `values` maps argument names to their filled-in values; `mutation` carries
/// the per-call shape payload for dynamically-shaped blocks.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockArguments {
    #[serde(flatten)]
    pub values: std::collections::HashMap<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation: Option<Value>,
}

impl BlockArguments {
    /// Empty argument set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one named argument, builder-style.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Attach a mutation payload, builder-style.
    pub fn with_mutation(mut self, mutation: Value) -> Self {
        self.mutation = Some(mutation);
        self
    }

    /// Look up one named argument.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}

/// Runtime utility handle passed to in-process block handlers.
#[derive(Clone)]
pub struct BlockContext {
    /// The target the block executes against, if known.
    pub target: Option<Target>,
    /// The host runtime, for handlers that need to query it.
    pub runtime: Arc<dyn HostRuntime>,
}

impl BlockContext {
    /// Context focused on the runtime's currently-edited target.
    pub fn for_runtime(runtime: Arc<dyn HostRuntime>) -> Self {
        let target = runtime.editing_target();
        Self { target, runtime }
    }

    /// Replace the focused target, builder-style.
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }
}

impl std::fmt::Debug for BlockContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockContext")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Everything the binder needs to wire a capability to its invocation path.
pub struct BindContext {
    pub handle: ExtensionHandle,
    pub rpc: Arc<dyn RpcBoundary>,
    pub runtime: Arc<dyn HostRuntime>,
}

// ---------------------------------------------------------------------------
// Block invoker
// ---------------------------------------------------------------------------

type InvokeFn = dyn Fn(BlockArguments, BlockContext) -> BoxFuture<'static, Result<Value>>
    + Send
    + Sync;

/// The uniform callable the host runtime sees for one executable block.
#[derive(Clone)]
pub struct BlockInvoker {
    inner: Arc<InvokeFn>,
}

impl BlockInvoker {
    fn from_fn<F>(f: F) -> Self
    where
        F: Fn(BlockArguments, BlockContext) -> BoxFuture<'static, Result<Value>>
            + Send
            + Sync
            + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Invoke the block.
    pub async fn invoke(&self, args: BlockArguments, context: BlockContext) -> Result<Value> {
        (self.inner)(args, context).await
    }
}

impl std::fmt::Debug for BlockInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockInvoker(..)")
    }
}

/// Resolve the effective block metadata for one invocation.
///
/// Dynamic blocks carry their shape in the call's mutation payload under
/// `blockInfo`; a missing or malformed payload degrades to the static
/// descriptor rather than failing the call.
pub(crate) fn effective_block_info(static_info: &BlockInfo, args: &BlockArguments) -> BlockInfo {
    if !static_info.is_dynamic {
        return static_info.clone();
    }

    let Some(payload) = args.mutation.as_ref().and_then(|m| m.get("blockInfo")) else {
        tracing::warn!(
            opcode = %static_info.opcode,
            "dynamic block call carried no blockInfo mutation; using static descriptor"
        );
        return static_info.clone();
    };

    match serde_json::from_value::<BlockInfo>(payload.clone()) {
        Ok(info) => info,
        Err(error) => {
            tracing::warn!(
                opcode = %static_info.opcode,
                error = %error,
                "malformed blockInfo mutation; using static descriptor"
            );
            static_info.clone()
        }
    }
}

/// Build the invocation path for one executable block.
///
/// The local/remote choice happens here, once; the returned invoker performs
/// one metadata resolution and one dispatch per call.
pub(crate) fn bind_block(
    ctx: &BindContext,
    extension_id: &str,
    static_info: BlockInfo,
    func: &str,
) -> BlockInvoker {
    match &ctx.handle {
        ExtensionHandle::Local(extension) => {
            if extension.handler(func).is_none() {
                // The handler may be attached later; absence only matters if
                // the block is actually invoked while still missing.
                tracing::warn!(
                    extension = %extension_id,
                    func = %func,
                    "handler not present at bind time"
                );
            }

            let extension = Arc::clone(extension);
            let extension_id = extension_id.to_owned();
            let func = func.to_owned();
            BlockInvoker::from_fn(move |args, context| {
                let extension = Arc::clone(&extension);
                let extension_id = extension_id.clone();
                let func = func.clone();
                let info = effective_block_info(&static_info, &args);
                Box::pin(async move {
                    match extension.handler(&func) {
                        Some(handler) => handler(&args, &context, &info),
                        None => Err(ExtensionError::MissingHandler {
                            extension: extension_id,
                            func,
                        }),
                    }
                })
            })
        }

        ExtensionHandle::Remote(service) => {
            if ctx.rpc.is_remote_service(service) {
                let rpc = Arc::clone(&ctx.rpc);
                let service = service.clone();
                let func = func.to_owned();
                BlockInvoker::from_fn(move |args, _context| {
                    let rpc = Arc::clone(&rpc);
                    let service = service.clone();
                    let func = func.clone();
                    let info = effective_block_info(&static_info, &args);
                    Box::pin(async move {
                        let payload =
                            vec![serde_json::to_value(&args)?, serde_json::to_value(&info)?];
                        Ok(rpc.call(&service, &func, payload).await?)
                    })
                })
            } else {
                // Never throw from inside the block's execution path: with no
                // dispatchable service and no local object, the block becomes
                // a no-op.
                tracing::warn!(
                    extension = %extension_id,
                    service = %service,
                    func = %func,
                    "service is not remote-dispatchable; binding no-op"
                );
                BlockInvoker::from_fn(|_args, _context| Box::pin(async { Ok(Value::Null) }))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Menu generator
// ---------------------------------------------------------------------------

type MenuFn =
    dyn Fn(Option<Target>) -> BoxFuture<'static, Result<Vec<MenuItem>>> + Send + Sync;

/// A bound dynamic-menu items producer.
#[derive(Clone)]
pub struct MenuGenerator {
    inner: Arc<MenuFn>,
}

impl MenuGenerator {
    /// Produce the menu items for the given target.
    ///
    /// With no explicit target, the runtime's editing target is used, then
    /// the stage.  Labels pass through the target's message-formatting
    /// context.  An empty result is an [`ExtensionError::EmptyMenu`].
    pub async fn items(&self, target: Option<Target>) -> Result<Vec<MenuItem>> {
        (self.inner)(target).await
    }
}

impl std::fmt::Debug for MenuGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MenuGenerator(..)")
    }
}

/// Bind the generator for a menu declared as a function name.
pub(crate) fn bind_menu(
    ctx: &BindContext,
    extension_id: &str,
    menu: &str,
    func: &str,
) -> MenuGenerator {
    let handle = ctx.handle.clone();
    let rpc = Arc::clone(&ctx.rpc);
    let runtime = Arc::clone(&ctx.runtime);
    let extension_id = extension_id.to_owned();
    let menu = menu.to_owned();
    let func = func.to_owned();

    MenuGenerator {
        inner: Arc::new(move |explicit| {
            let handle = handle.clone();
            let rpc = Arc::clone(&rpc);
            let runtime = Arc::clone(&runtime);
            let extension_id = extension_id.clone();
            let menu = menu.clone();
            let func = func.clone();

            Box::pin(async move {
                let target = explicit
                    .or_else(|| runtime.editing_target())
                    .or_else(|| runtime.stage_target());
                let messages: Arc<dyn MessageContext> = match &target {
                    Some(target) => runtime.message_context(target),
                    None => Arc::new(IdentityMessages),
                };
                let target_id = target.map(|t| t.id);

                let raw_items: Vec<RawMenuItem> = match &handle {
                    ExtensionHandle::Local(extension) => {
                        let handler = extension.menu_handler(&func).ok_or_else(|| {
                            ExtensionError::MissingHandler {
                                extension: extension_id.clone(),
                                func: func.clone(),
                            }
                        })?;
                        handler(target_id.as_deref())?
                    }
                    ExtensionHandle::Remote(service) => {
                        let value = rpc
                            .call(service, &func, vec![serde_json::to_value(&target_id)?])
                            .await?;
                        serde_json::from_value(value)?
                    }
                };

                let items: Vec<MenuItem> = raw_items
                    .into_iter()
                    .map(|item| match item {
                        RawMenuItem::Text(text) => {
                            let label = messages.format(&text);
                            MenuItem {
                                text: label,
                                value: Value::String(text),
                            }
                        }
                        RawMenuItem::Entry(entry) => MenuItem {
                            text: messages.format(&entry.text),
                            value: entry.value,
                        },
                    })
                    .collect();

                if items.is_empty() {
                    return Err(ExtensionError::EmptyMenu {
                        extension: extension_id,
                        menu,
                    });
                }
                Ok(items)
            })
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
