//! Extension registry for a block-based visual programming host.
//!
//! Extensions declare their palette (blocks, menus, arguments) as loose raw
//! metadata; this crate validates and normalizes that metadata, binds every
//! executable block to an invocation path, and publishes the result to the
//! host runtime.  Extensions run either in-process ("unsandboxed") or in
//! isolated worker contexts ("sandboxed") reached through the RPC boundary
//! defined in `blockhost-rpc`.
//!
//! The entry point is [`ExtensionRegistry`]; everything it needs — runtime,
//! RPC boundary, loader, configuration — is handed in at construction.

pub mod config;
pub mod error;
pub mod invoke;
pub mod loader;
pub mod normalize;
pub mod registry;
pub mod runtime;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::RegistryConfig;
pub use error::{ExtensionError, Result};
pub use invoke::{BindContext, BlockArguments, BlockContext, BlockInvoker, MenuGenerator};
pub use loader::{
    BlockHandler, BuiltinLoader, Extension, ExtensionFactory, ExtensionHandle, ExtensionLoader,
    MenuHandler,
};
pub use normalize::normalize;
pub use registry::{
    ExtensionRegistry, ExtensionSource, LoadOutcome, LoadedExtension, LoadedExtensionInfo,
};
pub use runtime::{HostRuntime, IdentityMessages, MessageContext, SimpleRuntime, Target};
pub use types::{
    ArgumentSpec, ArgumentType, BlockDescriptor, BlockInfo, BlockType, Environment,
    ExtensionMetadata, MenuDescriptor, MenuItem, PaletteEntry, RawBlock, RawBlockEntry,
    RawExtensionInfo, RawMenu, RawMenuDescriptor, RawMenuEntry, RawMenuItem, RawMenuItems,
    SEPARATOR,
};
pub use worker::{PendingWorkerRequest, WorkerAssignment, WorkerHandle, WorkerQueue};
