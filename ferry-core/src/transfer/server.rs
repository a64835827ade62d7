//! TCP listener serving transfer RPCs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use super::{FileTransferService, FrameCodec, TransferError, TransferMessage};
use crate::config::FerryConfig;

/// Accepts transfer connections and dispatches each frame to a [`FileTransferService`].
///
/// A connection may carry any number of request/response exchanges. At most
/// `max_concurrent_handlers` requests are handled at once; a connection only
/// holds a handler slot while one of its requests is being served, never
/// while it sits idle between frames.
pub struct TransferServer {
    listener: TcpListener,
    service: Arc<FileTransferService>,
    semaphore: Arc<Semaphore>,
    idle_timeout: Duration,
    max_frame_size: usize,
}

impl TransferServer {
    /// Binds the transfer listener.
    ///
    /// # Errors
    ///
    /// - `TransferError::BindFailed` - Address invalid or already in use
    pub async fn bind(
        address: &str,
        service: Arc<FileTransferService>,
        config: &FerryConfig,
    ) -> Result<Self, TransferError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| TransferError::BindFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            listener,
            service,
            semaphore: Arc::new(Semaphore::new(config.transfer.max_concurrent_handlers.max(1))),
            idle_timeout: config.network.transfer_timeout,
            max_frame_size: config.transfer.max_frame_size,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// - `TransferError::Io` - Socket no longer has a local address
    pub fn local_addr(&self) -> Result<SocketAddr, TransferError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until the task is cancelled.
    ///
    /// # Errors
    ///
    /// Accept failures are logged and retried, so this only returns if the
    /// task is torn down.
    pub async fn run(self) -> Result<(), TransferError> {
        if let Ok(address) = self.listener.local_addr() {
            tracing::info!("Transfer server listening on {}", address);
        }

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Failed to accept transfer connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            };
            tracing::debug!("Accepted transfer connection from {}", peer_addr);

            let handler = ConnectionHandler {
                service: Arc::clone(&self.service),
                semaphore: Arc::clone(&self.semaphore),
                idle_timeout: self.idle_timeout,
                max_frame_size: self.max_frame_size,
            };
            tokio::spawn(async move {
                if let Err(e) = handler.serve(stream, peer_addr).await {
                    tracing::debug!("Transfer connection from {} ended: {}", peer_addr, e);
                }
            });
        }
    }
}

struct ConnectionHandler {
    service: Arc<FileTransferService>,
    semaphore: Arc<Semaphore>,
    idle_timeout: Duration,
    max_frame_size: usize,
}

impl ConnectionHandler {
    async fn serve(
        &self,
        mut stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), TransferError> {
        loop {
            let message = match tokio::time::timeout(
                self.idle_timeout,
                FrameCodec::read_message(&mut stream, self.max_frame_size),
            )
            .await
            {
                Ok(Ok(Some(message))) => message,
                Ok(Ok(None)) => return Ok(()),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(TransferError::Timeout {
                        address: peer_addr.to_string(),
                    });
                }
            };

            // Released once the response is written, before the next read.
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|e| TransferError::Io(std::io::Error::other(e)))?;

            let response = match message {
                TransferMessage::UploadRequest { filename, content } => {
                    tracing::debug!("Upload of {} from {}", filename, peer_addr);
                    TransferMessage::UploadResponse(self.service.upload(&filename, &content).await)
                }
                TransferMessage::DownloadRequest { filename } => {
                    tracing::debug!("Download of {} by {}", filename, peer_addr);
                    TransferMessage::DownloadResponse(self.service.download(&filename).await)
                }
                other => {
                    tracing::warn!("Unexpected {:?} frame from {}", other, peer_addr);
                    return Err(TransferError::ProtocolError {
                        message: "expected a request frame".to_string(),
                    });
                }
            };

            FrameCodec::write_message(&mut stream, &response).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::protocol::TransferAddress;
    use crate::storage::test_fixtures::create_temp_store;
    use crate::test_mocks::MockDirectoryClient;
    use crate::transfer::{DownloadResponse, Registrar, TcpTransferClient, TransferClient};

    async fn start_server(
        config: &FerryConfig,
    ) -> (tempfile::TempDir, TransferAddress, Arc<MockDirectoryClient>) {
        let (temp_dir, store) = create_temp_store();
        let store = Arc::new(store);
        let directory = Arc::new(MockDirectoryClient::new());
        let registrar = Registrar::spawn(Arc::new(Registrar::new(
            Arc::clone(&store),
            directory.clone(),
            "http://127.0.0.1:9001",
            9002,
            config.registration.clone(),
        )));
        let service = Arc::new(FileTransferService::new(store, registrar));
        let server = TransferServer::bind("127.0.0.1:0", service, config)
            .await
            .unwrap();
        let port = server.local_addr().unwrap().port();
        tokio::spawn(server.run());

        (temp_dir, TransferAddress::new("127.0.0.1", port), directory)
    }

    #[tokio::test]
    async fn test_upload_then_download_over_tcp() {
        let config = FerryConfig::for_testing();
        let (_temp_dir, address, directory) = start_server(&config).await;
        let client = TcpTransferClient::new(&config);

        let upload = client
            .upload(&address, "x.txt", Bytes::from_static(b"hi"))
            .await
            .unwrap();
        let download = client.download(&address, "x.txt").await.unwrap();

        assert!(upload.ok);
        assert_eq!(upload.message, "Saved x.txt");
        assert_eq!(download, DownloadResponse::found(Bytes::from_static(b"hi")));
        assert_eq!(directory.directory().locate("x.txt").len(), 1);
    }

    #[tokio::test]
    async fn test_download_missing_file() {
        let config = FerryConfig::for_testing();
        let (_temp_dir, address, _directory) = start_server(&config).await;
        let client = TcpTransferClient::new(&config);

        let download = client.download(&address, "missing.txt").await.unwrap();

        assert!(!download.ok);
        assert_eq!(download.message, "Not found");
    }

    #[tokio::test]
    async fn test_connection_serves_several_requests() {
        let config = FerryConfig::for_testing();
        let (_temp_dir, address, _directory) = start_server(&config).await;
        let mut stream = TcpStream::connect(address.to_string()).await.unwrap();

        for name in ["a.txt", "b.txt"] {
            let request = TransferMessage::UploadRequest {
                filename: name.to_string(),
                content: Bytes::from_static(b"data"),
            };
            FrameCodec::write_message(&mut stream, &request).await.unwrap();
            let reply = FrameCodec::read_message(&mut stream, 1024).await.unwrap();
            assert!(matches!(
                reply,
                Some(TransferMessage::UploadResponse(ref r)) if r.ok
            ));
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let mut config = FerryConfig::for_testing();
        config.transfer.max_frame_size = 16;
        let (_temp_dir, address, _directory) = start_server(&config).await;
        let mut stream = TcpStream::connect(address.to_string()).await.unwrap();

        stream.write_all(&1024u32.to_be_bytes()).await.unwrap();
        let reply = FrameCodec::read_message(&mut stream, 1024).await;

        assert!(matches!(reply, Ok(None) | Err(TransferError::Io(_))));
    }

    #[tokio::test]
    async fn test_idle_connection_leaves_handler_free() {
        let mut config = FerryConfig::for_testing();
        config.transfer.max_concurrent_handlers = 1;
        let (_temp_dir, address, _directory) = start_server(&config).await;

        let _idle = TcpStream::connect(address.to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = TcpTransferClient::new(&config);
        let download = tokio::time::timeout(
            Duration::from_millis(500),
            client.download(&address, "x.txt"),
        )
        .await
        .expect("idle connection starved the handler pool")
        .unwrap();
        assert_eq!(download.message, "Not found");
    }

    #[tokio::test]
    async fn test_requests_wait_for_a_free_handler() {
        let mut config = FerryConfig::for_testing();
        config.transfer.max_concurrent_handlers = 1;
        let (_temp_dir, address, directory) = start_server(&config).await;
        // The upload keeps its handler until its registration completes.
        directory.delay_next_registration(Duration::from_millis(400));
        let client = TcpTransferClient::new(&config);

        let (upload, blocked) = tokio::join!(
            client.upload(&address, "slow.txt", Bytes::from_static(b"x")),
            async {
                while directory.registration_attempts() == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                tokio::time::timeout(
                    Duration::from_millis(100),
                    client.download(&address, "slow.txt"),
                )
                .await
            }
        );

        assert!(upload.unwrap().ok);
        assert!(blocked.is_err());
        let download = client.download(&address, "slow.txt").await.unwrap();
        assert!(download.ok);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let config = FerryConfig::for_testing();
        let (_temp_dir, address, _directory) = start_server(&config).await;
        let (_other_dir, store) = create_temp_store();
        let store = Arc::new(store);
        let registrar = Registrar::spawn(Arc::new(Registrar::new(
            Arc::clone(&store),
            Arc::new(MockDirectoryClient::new()),
            "http://127.0.0.1:9001",
            9002,
            config.registration.clone(),
        )));
        let service = Arc::new(FileTransferService::new(store, registrar));

        let result = TransferServer::bind(&address.to_string(), service, &config).await;

        assert!(matches!(result, Err(TransferError::BindFailed { .. })));
    }
}
