//! Error types surfaced across the `loomio` crate boundary.
//!
//! Most of the error taxonomy described by the framework (protocol
//! malformation, handler panics, combinator failures) is handled by
//! logging and continuing rather than by returning a `Result` to user
//! code — see the crate-level docs. [`CoreError`] covers the handful of
//! calls that do hand a `Result` back to the embedder.

use std::io;

/// Errors returned directly to embedder code.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// An outbound `connect` failed at the driver level.
    #[error("connect to {host}:{port} failed: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Binding a listening socket failed.
    #[error("bind to {address} failed: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// A route was registered twice for the same method and path.
    #[error("route already registered: {method} {path}")]
    DuplicateRoute { method: String, path: String },

    /// A socket address string could not be parsed.
    #[error("invalid socket address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: io::Error,
    },
}
