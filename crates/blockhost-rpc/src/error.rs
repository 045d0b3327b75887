//! RPC boundary error types.
//!
//! All transports surface errors through [`RpcError`], which is the single
//! error type returned by every public API in this crate.

/// Unified error type for the RPC service boundary.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// A service with the same name is already registered.
    #[error("service already registered: {service}")]
    ServiceExists {
        /// The conflicting service name.
        service: String,
    },

    /// The named service is not registered with the boundary.
    #[error("service not found: {service}")]
    ServiceNotFound { service: String },

    /// The service exists but does not implement the requested method.
    #[error("service `{service}` has no method `{method}`")]
    MethodNotFound { service: String, method: String },

    /// The remote handler returned an error.
    #[error("remote call failed: {reason}")]
    Handler { reason: String },

    /// The underlying transport failed (worker gone, channel closed).
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// An argument or return value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the rpc crate.
pub type Result<T> = std::result::Result<T, RpcError>;
