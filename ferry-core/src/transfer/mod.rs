//! Transfer surface: moving file bytes between nodes.
//!
//! Each node runs a [`TransferServer`] over its [`LocalStore`](crate::storage::LocalStore).
//! Requests and responses travel as length-prefixed frames (see [`codec`]).
//! Successful uploads notify the [`Registrar`], which keeps the directory's
//! view of this node current.

pub mod client;
pub mod codec;
pub mod registrar;
pub mod server;
pub mod service;

use async_trait::async_trait;
use bytes::Bytes;
pub use client::TcpTransferClient;
pub use codec::{FrameCodec, TransferMessage};
pub use registrar::{Registrar, RegistrarHandle, RegistrationError};
pub use server::TransferServer;
pub use service::FileTransferService;

use crate::protocol::TransferAddress;

/// Result of an upload RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub ok: bool,
    pub message: String,
}

impl UploadResponse {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Result of a download RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResponse {
    pub ok: bool,
    pub content: Bytes,
    pub message: String,
}

impl DownloadResponse {
    /// Message reported when the file is absent.
    pub const NOT_FOUND: &'static str = "Not found";

    pub fn found(content: impl Into<Bytes>) -> Self {
        Self {
            ok: true,
            content: content.into(),
            message: "OK".to_string(),
        }
    }

    pub fn not_found() -> Self {
        Self::failed(Self::NOT_FOUND)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            content: Bytes::new(),
            message: message.into(),
        }
    }
}

/// Errors on the transfer surface itself (as opposed to ok=false results).
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Could not connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Transfer with {address} timed out")]
    Timeout { address: String },

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Failed to bind transfer server on {address}: {reason}")]
    BindFailed { address: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client side of the transfer RPCs.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Uploads `content` as `filename` to the node at `address`.
    ///
    /// # Errors
    ///
    /// - `TransferError::ConnectionFailed` / `TransferError::Timeout` - Node unreachable
    /// - `TransferError::ProtocolError` - Node answered with an unexpected frame
    async fn upload(
        &self,
        address: &TransferAddress,
        filename: &str,
        content: Bytes,
    ) -> Result<UploadResponse, TransferError>;

    /// Downloads `filename` from the node at `address`.
    ///
    /// # Errors
    ///
    /// - `TransferError::ConnectionFailed` / `TransferError::Timeout` - Node unreachable
    /// - `TransferError::ProtocolError` - Node answered with an unexpected frame
    async fn download(
        &self,
        address: &TransferAddress,
        filename: &str,
    ) -> Result<DownloadResponse, TransferError>;
}
