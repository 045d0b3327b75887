//! Extension subsystem error types.
//!
//! All extension subsystems surface errors through [`ExtensionError`], which
//! is the single error type returned by every public API in this crate.  Each
//! variant carries enough context for callers to decide how to handle the
//! failure without inspecting opaque strings.

use blockhost_rpc::RpcError;

/// Unified error type for the extension registry and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    // -- Validation errors --------------------------------------------------
    /// The extension declared an id that is not purely alphanumeric.
    #[error("invalid extension id: `{id}`")]
    InvalidId {
        /// The offending id as declared.
        id: String,
    },

    /// An executable block was declared without an opcode.
    #[error("block {index} of extension `{extension}` has no opcode")]
    MissingOpcode { extension: String, index: usize },

    /// A string could not be parsed as an extension environment.
    #[error("unknown extension environment: {value}")]
    InvalidEnvironment { value: String },

    // -- Not-found errors ---------------------------------------------------
    /// The referenced extension has never been registered.
    #[error("extension not loaded: {id}")]
    NotLoaded { id: String },

    /// `on_worker_init` was called for a handle with no pending request.
    /// Callers must guarantee handle validity; this is a contract violation,
    /// not a recoverable condition.
    #[error("no pending worker request for handle {handle}")]
    UnknownWorkerHandle { handle: u32 },

    // -- Transport / initialization errors ----------------------------------
    /// A sandbox worker reported a bootstrap failure.
    #[error("worker for {url} failed to initialize: {reason}")]
    WorkerInit { url: String, reason: String },

    /// A remote call through the RPC boundary failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    // -- Invocation errors --------------------------------------------------
    /// A block was invoked whose handler is still missing on the extension.
    #[error("extension `{extension}` has no handler named `{func}`")]
    MissingHandler { extension: String, func: String },

    /// A dynamic menu produced zero items; a menu must never present as
    /// having no choices.
    #[error("menu `{menu}` of extension `{extension}` produced no items")]
    EmptyMenu { extension: String, menu: String },

    // -- Loading / registration errors --------------------------------------
    /// No loader recognizes the given source reference.
    #[error("no loader can resolve extension source: {url}")]
    UnresolvedSource { url: String },

    /// The host runtime rejected a primitive registration.
    #[error("runtime registration failed: {reason}")]
    Registration { reason: String },

    /// Raw metadata or a call payload could not be (de)serialized.
    #[error("malformed metadata payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Convenience alias used throughout the extensions crate.
pub type Result<T> = std::result::Result<T, ExtensionError>;
