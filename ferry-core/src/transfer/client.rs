//! TCP client for the transfer surface.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpStream;

use super::{
    DownloadResponse, FrameCodec, TransferClient, TransferError, TransferMessage, UploadResponse,
};
use crate::config::FerryConfig;
use crate::protocol::TransferAddress;

/// Opens one connection per RPC and exchanges a single request/response pair.
#[derive(Debug, Clone)]
pub struct TcpTransferClient {
    timeout: Duration,
    max_frame_size: usize,
}

impl TcpTransferClient {
    pub fn new(config: &FerryConfig) -> Self {
        Self {
            timeout: config.network.transfer_timeout,
            max_frame_size: config.transfer.max_frame_size,
        }
    }

    async fn exchange(
        &self,
        address: &TransferAddress,
        request: TransferMessage,
    ) -> Result<TransferMessage, TransferError> {
        let target = address.to_string();

        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| TransferError::Timeout {
                address: target.clone(),
            })?
            .map_err(|e| TransferError::ConnectionFailed {
                address: target.clone(),
                reason: e.to_string(),
            })?;

        let exchange = async {
            FrameCodec::write_message(&mut stream, &request).await?;
            FrameCodec::read_message(&mut stream, self.max_frame_size).await
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(Some(response))) => Ok(response),
            Ok(Ok(None)) => Err(TransferError::ConnectionFailed {
                address: target,
                reason: "connection closed before a response arrived".to_string(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransferError::Timeout { address: target }),
        }
    }
}

#[async_trait]
impl TransferClient for TcpTransferClient {
    async fn upload(
        &self,
        address: &TransferAddress,
        filename: &str,
        content: Bytes,
    ) -> Result<UploadResponse, TransferError> {
        let request = TransferMessage::UploadRequest {
            filename: filename.to_string(),
            content,
        };

        match self.exchange(address, request).await? {
            TransferMessage::UploadResponse(response) => Ok(response),
            other => Err(unexpected_reply("upload response", &other)),
        }
    }

    async fn download(
        &self,
        address: &TransferAddress,
        filename: &str,
    ) -> Result<DownloadResponse, TransferError> {
        let request = TransferMessage::DownloadRequest {
            filename: filename.to_string(),
        };

        match self.exchange(address, request).await? {
            TransferMessage::DownloadResponse(response) => Ok(response),
            other => Err(unexpected_reply("download response", &other)),
        }
    }
}

fn unexpected_reply(expected: &str, received: &TransferMessage) -> TransferError {
    TransferError::ProtocolError {
        message: format!("expected {expected}, received {}", received.kind_name()),
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_refused_connection_is_connection_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let client = TcpTransferClient::new(&FerryConfig::for_testing());

        let result = client
            .download(&TransferAddress::new("127.0.0.1", port), "x.txt")
            .await;

        assert!(matches!(result, Err(TransferError::ConnectionFailed { .. })));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut config = FerryConfig::for_testing();
        config.network.transfer_timeout = Duration::from_millis(100);
        let client = TcpTransferClient::new(&config);

        let result = client
            .download(&TransferAddress::new("127.0.0.1", port), "x.txt")
            .await;

        assert!(matches!(result, Err(TransferError::Timeout { .. })));
        drop(listener);
    }

    #[tokio::test]
    async fn test_mismatched_reply_is_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = FrameCodec::read_message(&mut stream, 1024).await.unwrap();
            let reply = TransferMessage::UploadResponse(UploadResponse::succeeded("Saved x"));
            FrameCodec::write_message(&mut stream, &reply).await.unwrap();
        });
        let client = TcpTransferClient::new(&FerryConfig::for_testing());

        let result = client
            .download(&TransferAddress::new("127.0.0.1", port), "x.txt")
            .await;

        assert!(matches!(result, Err(TransferError::ProtocolError { .. })));
    }
}
