//! Client-side fetch and push driving transfers against candidate nodes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::directory::DirectoryClient;
use crate::protocol::{PeerLocation, TransferAddress};
use crate::resolver::CandidateSource;
use crate::storage::{StorageError, validate_filename};
use crate::transfer::{TransferClient, UploadResponse};
use crate::{FerryError, Result};

/// Where candidate nodes for a fetch come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSelector {
    /// Ask the directory service directly
    Directory,
    /// Ask a node's resolver (local store, friends, then its directory)
    PeerDiscovery,
}

/// One candidate that did not deliver the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    pub location: PeerLocation,
    pub reason: String,
}

/// Result of [`TransferOrchestrator::fetch_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// File saved to `path` from the node at `source`
    Downloaded {
        source: PeerLocation,
        path: PathBuf,
        bytes: usize,
    },
    /// No source knows the file
    NotFound,
    /// Every candidate was tried and none delivered the file
    AllCandidatesFailed { attempts: Vec<FailedAttempt> },
}

/// Fetches files from the first working candidate and pushes files to a node.
pub struct TransferOrchestrator {
    transfer: Arc<dyn TransferClient>,
    download_dir: PathBuf,
    directory: Option<Arc<dyn DirectoryClient>>,
    discovery: Option<Arc<dyn CandidateSource>>,
}

impl TransferOrchestrator {
    pub fn new(transfer: Arc<dyn TransferClient>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            transfer,
            download_dir: download_dir.into(),
            directory: None,
            discovery: None,
        }
    }

    /// Uses `directory` for [`SourceSelector::Directory`].
    pub fn with_directory(mut self, directory: Arc<dyn DirectoryClient>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Uses `discovery` for [`SourceSelector::PeerDiscovery`].
    pub fn with_discovery(mut self, discovery: Arc<dyn CandidateSource>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Local path a fetched `filename` is saved to.
    pub fn download_path(&self, filename: &str) -> PathBuf {
        self.download_dir.join(format!("downloaded_{filename}"))
    }

    /// Candidate list from the selected source. A failing source yields no candidates.
    ///
    /// # Errors
    ///
    /// - `FerryError::Configuration` - No source configured for `selector`
    pub async fn candidates(
        &self,
        filename: &str,
        selector: SourceSelector,
    ) -> Result<Vec<PeerLocation>> {
        let lookup = match selector {
            SourceSelector::Directory => {
                let directory = self
                    .directory
                    .as_ref()
                    .ok_or_else(|| missing_source("directory"))?;
                directory.locate(filename).await
            }
            SourceSelector::PeerDiscovery => {
                let discovery = self
                    .discovery
                    .as_ref()
                    .ok_or_else(|| missing_source("peer discovery"))?;
                discovery.candidates(filename).await
            }
        };

        Ok(lookup.unwrap_or_else(|e| {
            tracing::warn!("Candidate lookup for {} failed: {}", filename, e);
            Vec::new()
        }))
    }

    /// Downloads `filename` from the first candidate that has it.
    ///
    /// Candidates are tried in order. The content is saved as
    /// `downloaded_{filename}` in the download directory.
    ///
    /// # Errors
    ///
    /// - `FerryError::Storage` - Invalid filename, or the download could not be saved
    /// - `FerryError::Configuration` - No source configured for `selector`
    pub async fn fetch_file(
        &self,
        filename: &str,
        selector: SourceSelector,
    ) -> Result<FetchOutcome> {
        validate_filename(filename)?;

        let candidates = self.candidates(filename, selector).await?;
        if candidates.is_empty() {
            tracing::info!("No candidates hold {}", filename);
            return Ok(FetchOutcome::NotFound);
        }

        let mut attempts = Vec::new();
        for location in candidates {
            let address = match location.transfer_address() {
                Ok(address) => address,
                Err(e) => {
                    tracing::warn!("Skipping candidate {}: {}", location.endpoint, e);
                    attempts.push(FailedAttempt {
                        location,
                        reason: format!("invalid endpoint: {e}"),
                    });
                    continue;
                }
            };

            match self.transfer.download(&address, filename).await {
                Ok(response) if response.ok => {
                    let path = self.download_path(filename);
                    tokio::fs::create_dir_all(&self.download_dir)
                        .await
                        .map_err(StorageError::from)?;
                    tokio::fs::write(&path, &response.content)
                        .await
                        .map_err(StorageError::from)?;
                    tracing::info!(
                        "Downloaded {} ({} bytes) from {} to {}",
                        filename,
                        response.content.len(),
                        address,
                        path.display()
                    );
                    return Ok(FetchOutcome::Downloaded {
                        source: location,
                        path,
                        bytes: response.content.len(),
                    });
                }
                Ok(response) => {
                    tracing::warn!(
                        "{} answered for {}: {}",
                        address,
                        filename,
                        response.message
                    );
                    attempts.push(FailedAttempt {
                        location,
                        reason: response.message,
                    });
                }
                Err(e) => {
                    tracing::warn!("Download of {} from {} failed: {}", filename, address, e);
                    attempts.push(FailedAttempt {
                        location,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(FetchOutcome::AllCandidatesFailed { attempts })
    }

    /// Uploads the file at `local_path` to `target` as `filename`.
    ///
    /// The node's answer is returned as is. An unreachable node becomes an
    /// ok=false response carrying the connection error.
    ///
    /// # Errors
    ///
    /// - `FerryError::Storage` - Local file could not be read
    pub async fn push_file(
        &self,
        target: &TransferAddress,
        filename: &str,
        local_path: &Path,
    ) -> Result<UploadResponse> {
        let content = tokio::fs::read(local_path)
            .await
            .map_err(StorageError::from)?;
        tracing::debug!(
            "Pushing {} ({} bytes) to {} as {}",
            local_path.display(),
            content.len(),
            target,
            filename
        );

        match self.transfer.upload(target, filename, Bytes::from(content)).await {
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::warn!("Upload of {} to {} failed: {}", filename, target, e);
                Ok(UploadResponse::failed(format!("Connection error: {e}")))
            }
        }
    }
}

fn missing_source(kind: &str) -> FerryError {
    FerryError::Configuration {
        reason: format!("no {kind} source configured"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mocks::{MockDirectoryClient, MockTransferClient};

    struct StaticCandidates(Vec<PeerLocation>);

    #[async_trait::async_trait]
    impl CandidateSource for StaticCandidates {
        async fn candidates(
            &self,
            _file: &str,
        ) -> std::result::Result<Vec<PeerLocation>, crate::directory::ClientError> {
            Ok(self.0.clone())
        }
    }

    fn location(port: u16) -> PeerLocation {
        PeerLocation::new(format!("http://127.0.0.1:{}", port - 1), port)
    }

    fn address(port: u16) -> TransferAddress {
        TransferAddress::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_fetch_stops_at_first_success() {
        let temp_dir = tempfile::tempdir().unwrap();
        let transfer = Arc::new(MockTransferClient::new());
        transfer.set_unreachable(&address(7002));
        transfer.add_file(&address(8002), "x.txt", b"second");
        transfer.add_file(&address(9002), "x.txt", b"third");
        let discovery = Arc::new(StaticCandidates(vec![
            location(7002),
            location(8002),
            location(9002),
        ]));
        let orchestrator = TransferOrchestrator::new(transfer.clone(), temp_dir.path())
            .with_discovery(discovery);

        let outcome = orchestrator
            .fetch_file("x.txt", SourceSelector::PeerDiscovery)
            .await
            .unwrap();

        let expected_path = temp_dir.path().join("downloaded_x.txt");
        assert_eq!(
            outcome,
            FetchOutcome::Downloaded {
                source: location(8002),
                path: expected_path.clone(),
                bytes: 6,
            }
        );
        assert_eq!(std::fs::read(expected_path).unwrap(), b"second");
        assert_eq!(
            transfer.download_calls(),
            vec!["127.0.0.1:7002".to_string(), "127.0.0.1:8002".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fetch_without_candidates_is_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let orchestrator =
            TransferOrchestrator::new(Arc::new(MockTransferClient::new()), temp_dir.path())
                .with_directory(Arc::new(MockDirectoryClient::new()));

        let outcome = orchestrator
            .fetch_file("x.txt", SourceSelector::Directory)
            .await
            .unwrap();

        assert_eq!(outcome, FetchOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_unreachable_directory_counts_as_no_candidates() {
        let temp_dir = tempfile::tempdir().unwrap();
        let directory = Arc::new(MockDirectoryClient::new());
        directory.set_unreachable(true);
        let orchestrator =
            TransferOrchestrator::new(Arc::new(MockTransferClient::new()), temp_dir.path())
                .with_directory(directory);

        let outcome = orchestrator
            .fetch_file("x.txt", SourceSelector::Directory)
            .await
            .unwrap();

        assert_eq!(outcome, FetchOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_all_candidates_failing_is_reported() {
        let temp_dir = tempfile::tempdir().unwrap();
        let directory = Arc::new(MockDirectoryClient::new());
        directory
            .directory()
            .register("http://127.0.0.1:7001", &["x.txt".to_string()], 7002)
            .unwrap();
        directory
            .directory()
            .register("http://127.0.0.1:8001", &["x.txt".to_string()], 8002)
            .unwrap();
        let transfer = Arc::new(MockTransferClient::new());
        transfer.set_unreachable(&address(7002));
        let orchestrator =
            TransferOrchestrator::new(transfer, temp_dir.path()).with_directory(directory);

        let outcome = orchestrator
            .fetch_file("x.txt", SourceSelector::Directory)
            .await
            .unwrap();

        let FetchOutcome::AllCandidatesFailed { attempts } = outcome else {
            panic!("expected every candidate to fail, got {outcome:?}");
        };
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].location, location(7002));
        assert_eq!(attempts[1].reason, "Not found");
        assert!(!temp_dir.path().join("downloaded_x.txt").exists());
    }

    #[tokio::test]
    async fn test_fetch_rejects_path_like_names() {
        let temp_dir = tempfile::tempdir().unwrap();
        let orchestrator =
            TransferOrchestrator::new(Arc::new(MockTransferClient::new()), temp_dir.path())
                .with_directory(Arc::new(MockDirectoryClient::new()));

        let result = orchestrator
            .fetch_file("../x.txt", SourceSelector::Directory)
            .await;

        assert!(matches!(result, Err(FerryError::Storage(_))));
    }

    #[tokio::test]
    async fn test_missing_source_is_configuration_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let orchestrator =
            TransferOrchestrator::new(Arc::new(MockTransferClient::new()), temp_dir.path());

        let result = orchestrator
            .fetch_file("x.txt", SourceSelector::PeerDiscovery)
            .await;

        assert!(matches!(result, Err(FerryError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_push_uploads_local_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let local = temp_dir.path().join("report.pdf");
        std::fs::write(&local, b"pdf bytes").unwrap();
        let transfer = Arc::new(MockTransferClient::new());
        let orchestrator = TransferOrchestrator::new(transfer.clone(), temp_dir.path());

        let response = orchestrator
            .push_file(&address(9002), "report.pdf", &local)
            .await
            .unwrap();

        assert_eq!(response, UploadResponse::succeeded("Saved report.pdf"));
        assert_eq!(
            transfer.file(&address(9002), "report.pdf"),
            Some(Bytes::from_static(b"pdf bytes"))
        );
    }

    #[tokio::test]
    async fn test_push_to_unreachable_node_is_connection_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let local = temp_dir.path().join("x.txt");
        std::fs::write(&local, b"hi").unwrap();
        let transfer = Arc::new(MockTransferClient::new());
        transfer.set_unreachable(&address(9002));
        let orchestrator = TransferOrchestrator::new(transfer, temp_dir.path());

        let response = orchestrator
            .push_file(&address(9002), "x.txt", &local)
            .await
            .unwrap();

        assert!(!response.ok);
        assert!(response.message.starts_with("Connection error: "));
    }

    #[tokio::test]
    async fn test_push_missing_local_file_is_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let orchestrator =
            TransferOrchestrator::new(Arc::new(MockTransferClient::new()), temp_dir.path());

        let result = orchestrator
            .push_file(&address(9002), "x.txt", &temp_dir.path().join("absent"))
            .await;

        assert!(matches!(result, Err(FerryError::Storage(_))));
    }
}
