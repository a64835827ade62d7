//! Upload and download handling over a node's local store.

use std::sync::Arc;

use bytes::Bytes;

use super::{DownloadResponse, RegistrarHandle, UploadResponse};
use crate::storage::LocalStore;

/// Serves transfer RPCs from a [`LocalStore`].
///
/// Uploads trigger re-registration of the node's file set and wait a bounded
/// time for it, so a file is locatable once its upload has been acknowledged.
/// A failed registration is logged and never turns a stored upload into a
/// failure.
pub struct FileTransferService {
    store: Arc<LocalStore>,
    registrar: RegistrarHandle,
}

impl FileTransferService {
    pub fn new(store: Arc<LocalStore>, registrar: RegistrarHandle) -> Self {
        Self { store, registrar }
    }

    /// Stores `content` as `filename`, replacing any previous content.
    pub async fn upload(&self, filename: &str, content: &[u8]) -> UploadResponse {
        if let Err(e) = self.store.write(filename, content).await {
            tracing::warn!("Upload of {} rejected: {}", filename, e);
            return UploadResponse::failed(e.to_string());
        }
        tracing::info!("Stored upload {} ({} bytes)", filename, content.len());

        match self
            .registrar
            .notify_and_wait(format!("upload of {filename}"))
            .await
        {
            Some(Ok(_)) => {}
            Some(Err(e)) => tracing::warn!("{} stored but not registered: {}", filename, e),
            None => tracing::warn!(
                "Registration after upload of {} still pending, continuing",
                filename
            ),
        }

        UploadResponse::succeeded(format!("Saved {filename}"))
    }

    /// Returns the full content of `filename`.
    pub async fn download(&self, filename: &str) -> DownloadResponse {
        match self.store.read(filename).await {
            Ok(Some(content)) => {
                tracing::debug!("Serving {} ({} bytes)", filename, content.len());
                DownloadResponse::found(Bytes::from(content))
            }
            Ok(None) => DownloadResponse::not_found(),
            Err(e) => {
                tracing::warn!("Download of {} failed: {}", filename, e);
                DownloadResponse::failed(e.to_string())
            }
        }
    }
}
