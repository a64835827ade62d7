//! HTTP client for the directory service control plane.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::NetworkConfig;
use crate::protocol::{
    ErrorResponse, LocateResponse, NodeSummary, PeerLocation, PeersResponse, RegisterRequest,
    RegisterResponse,
};

/// Errors from control-plane HTTP calls.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Could not reach {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("{url} answered with status {status}: {message}")]
    UnexpectedStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Malformed response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("HTTP client error")]
    Http(#[from] reqwest::Error),
}

impl ClientError {
    /// Whether the remote side could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout { .. } | ClientError::ConnectionFailed { .. }
        )
    }
}

/// Builds the shared reqwest client used by control-plane clients.
///
/// # Errors
///
/// - `ClientError::Http` - TLS backend or resolver could not be initialised
pub(crate) fn build_http_client(
    timeout: Duration,
    user_agent: &str,
) -> Result<reqwest::Client, ClientError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()?)
}

/// Joins a base URL and a path without doubling the slash.
pub(crate) fn endpoint_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Builds `{base}{path}?file=<encoded>`.
pub(crate) fn file_query_url(base: &str, path: &str, file: &str) -> String {
    format!(
        "{}?file={}",
        endpoint_url(base, path),
        urlencoding::encode(file)
    )
}

fn transport_error(url: &str, error: reqwest::Error) -> ClientError {
    if error.is_timeout() {
        ClientError::Timeout {
            url: url.to_string(),
        }
    } else {
        ClientError::ConnectionFailed {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}

async fn decode_response<T: DeserializeOwned>(
    url: &str,
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        tracing::warn!("{} returned error status {}: {}", url, status, message);
        return Err(ClientError::UnexpectedStatus {
            url: url.to_string(),
            status: status.as_u16(),
            message,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ClientError::InvalidResponse {
            url: url.to_string(),
            reason: e.to_string(),
        })
}

/// Issues a GET and decodes the JSON body.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, ClientError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| transport_error(url, e))?;
    decode_response(url, response).await
}

/// Issues a POST with a JSON body and decodes the JSON response.
pub(crate) async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
) -> Result<T, ClientError> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| transport_error(url, e))?;
    decode_response(url, response).await
}

/// Operations a node or client needs from the directory service.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Registers a node's current file set.
    ///
    /// # Errors
    ///
    /// - `ClientError::Timeout` / `ClientError::ConnectionFailed` - Directory unreachable
    /// - `ClientError::UnexpectedStatus` - Directory rejected the registration
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ClientError>;

    /// Returns the locations advertising `file`.
    ///
    /// # Errors
    ///
    /// - `ClientError::Timeout` / `ClientError::ConnectionFailed` - Directory unreachable
    /// - `ClientError::InvalidResponse` - Body was not a locate response
    async fn locate(&self, file: &str) -> Result<Vec<PeerLocation>, ClientError>;

    /// Lists every registered node.
    ///
    /// # Errors
    ///
    /// - `ClientError::Timeout` / `ClientError::ConnectionFailed` - Directory unreachable
    async fn peers(&self) -> Result<Vec<NodeSummary>, ClientError>;

    /// Base URL of the directory, for logging.
    fn directory_url(&self) -> &str;
}

/// Directory client speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDirectoryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDirectoryClient {
    /// Creates a client for the directory at `base_url` using the directory timeout.
    ///
    /// # Errors
    ///
    /// - `ClientError::Http` - HTTP client could not be built
    pub fn new(base_url: impl Into<String>, config: &NetworkConfig) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: base_url.into(),
            client: build_http_client(config.directory_timeout, config.user_agent)?,
        })
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        let url = endpoint_url(&self.base_url, "/register");
        tracing::debug!(
            "Registering {} ({} files) with {}",
            request.peer,
            request.files.len(),
            self.base_url
        );
        post_json(&self.client, &url, request).await
    }

    async fn locate(&self, file: &str) -> Result<Vec<PeerLocation>, ClientError> {
        let url = file_query_url(&self.base_url, "/locate", file);
        let response: LocateResponse = get_json(&self.client, &url).await?;
        Ok(response.peers)
    }

    async fn peers(&self) -> Result<Vec<NodeSummary>, ClientError> {
        let url = endpoint_url(&self.base_url, "/peers");
        let response: PeersResponse = get_json(&self.client, &url).await?;
        Ok(response.peers)
    }

    fn directory_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_trims_trailing_slash() {
        assert_eq!(
            endpoint_url("http://localhost:9000/", "/register"),
            "http://localhost:9000/register"
        );
        assert_eq!(
            endpoint_url("http://localhost:9000", "/peers"),
            "http://localhost:9000/peers"
        );
    }

    #[test]
    fn test_file_query_url_encodes_name() {
        assert_eq!(
            file_query_url("http://localhost:9000", "/locate", "my file&x.txt"),
            "http://localhost:9000/locate?file=my%20file%26x.txt"
        );
    }

    #[tokio::test]
    async fn test_unreachable_directory_reports_connection_failure() {
        let config = NetworkConfig {
            directory_timeout: Duration::from_millis(500),
            ..NetworkConfig::default()
        };
        // Port 1 on loopback is reserved and refuses connections.
        let client = HttpDirectoryClient::new("http://127.0.0.1:1", &config).unwrap();

        let error = client.locate("a.txt").await.unwrap_err();

        assert!(error.is_unreachable());
    }
}
