//! Ferry Web - HTTP control plane

#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
//!
//! JSON endpoints for the directory service and for storage nodes, plus the
//! bootstrap that runs a node's control plane next to its transfer server.

pub mod directory;
pub mod node;

use axum::Json;
use axum::http::StatusCode;
use ferry_core::FerryError;
use ferry_core::protocol::ErrorResponse;
// Re-export main types
pub use directory::{directory_router, run_directory, serve_directory};
pub use node::{NodeServer, NodeState, node_router, run_node};

/// Errors that stop a control-plane server.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// Listener could not be bound
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// Address that was requested
        address: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Server loop failed after start
    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),

    /// Node setup failed in a core component
    #[error(transparent)]
    Core(#[from] FerryError),
}

/// Error reply used by every handler.
pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub(crate) async fn bind_listener(address: &str) -> Result<tokio::net::TcpListener, WebError> {
    tokio::net::TcpListener::bind(address)
        .await
        .map_err(|source| WebError::Bind {
            address: address.to_string(),
            source,
        })
}
