//! Blockhost RPC service boundary.
//!
//! This crate defines the message-passing layer through which the host
//! reaches sandboxed extension workers, and through which those workers call
//! back into the host:
//!
//! - **[`boundary`]** -- the [`RpcBoundary`] and [`RpcHandler`] traits that
//!   every transport must implement.
//! - **[`error`]** -- [`RpcError`] enumerates every failure mode.
//! - **[`loopback`]** -- [`LoopbackRpc`], an in-process implementation used
//!   by tests and the demo binary.
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod boundary;
pub mod error;
pub mod loopback;

// Re-export the most commonly used types at the crate root.
pub use boundary::{RpcBoundary, RpcHandler};
pub use error::{Result, RpcError};
pub use loopback::LoopbackRpc;
