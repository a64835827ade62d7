//! HTTP calls against another node's control plane.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::NetworkConfig;
use crate::directory::ClientError;
use crate::directory::client::{build_http_client, endpoint_url, file_query_url, get_json};
use crate::protocol::{LocateResponse, NodeInfo, PeerLocation, SearchResponse};

/// Existence and identity queries against a friend node.
#[async_trait]
pub trait FriendProbe: Send + Sync {
    /// Asks `node_url` whether it holds `file`.
    ///
    /// # Errors
    ///
    /// - `ClientError::Timeout` / `ClientError::ConnectionFailed` - Node unreachable
    /// - `ClientError::InvalidResponse` - Body was not a search response
    async fn search(&self, node_url: &str, file: &str) -> Result<bool, ClientError>;

    /// Fetches the identity and transfer port of `node_url`.
    ///
    /// # Errors
    ///
    /// - `ClientError::Timeout` / `ClientError::ConnectionFailed` - Node unreachable
    /// - `ClientError::InvalidResponse` - Body was not an info response
    async fn info(&self, node_url: &str) -> Result<NodeInfo, ClientError>;
}

/// reqwest client for node control planes.
#[derive(Debug, Clone)]
pub struct HttpNodeClient {
    client: reqwest::Client,
}

impl HttpNodeClient {
    /// Creates a client bounded by the friend probe timeout.
    ///
    /// # Errors
    ///
    /// - `ClientError::Http` - HTTP client could not be built
    pub fn new(config: &NetworkConfig) -> Result<Self, ClientError> {
        Self::with_timeout(config.friend_timeout, config)
    }

    /// Creates a client with an explicit per-request timeout.
    ///
    /// # Errors
    ///
    /// - `ClientError::Http` - HTTP client could not be built
    pub fn with_timeout(timeout: Duration, config: &NetworkConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_http_client(timeout, config.user_agent)?,
        })
    }

    /// Runs the resolver of the node at `node_url`.
    ///
    /// # Errors
    ///
    /// - `ClientError::Timeout` / `ClientError::ConnectionFailed` - Node unreachable
    pub async fn locate(
        &self,
        node_url: &str,
        file: &str,
    ) -> Result<Vec<PeerLocation>, ClientError> {
        let url = file_query_url(node_url, "/locate", file);
        let response: LocateResponse = get_json(&self.client, &url).await?;
        Ok(response.peers)
    }
}

#[async_trait]
impl FriendProbe for HttpNodeClient {
    async fn search(&self, node_url: &str, file: &str) -> Result<bool, ClientError> {
        let url = file_query_url(node_url, "/search", file);
        let response: SearchResponse = get_json(&self.client, &url).await?;
        Ok(response.exists)
    }

    async fn info(&self, node_url: &str) -> Result<NodeInfo, ClientError> {
        let url = endpoint_url(node_url, "/info");
        get_json(&self.client, &url).await
    }
}

/// Peer discovery through another node's `/locate`.
#[derive(Debug, Clone)]
pub struct RemoteResolver {
    node_url: String,
    client: HttpNodeClient,
}

impl RemoteResolver {
    /// Creates a resolver backed by the node at `node_url`.
    ///
    /// The remote node may probe two friends and then its directory before
    /// answering, so the request timeout covers that whole chain.
    ///
    /// # Errors
    ///
    /// - `ClientError::Http` - HTTP client could not be built
    pub fn new(node_url: impl Into<String>, config: &NetworkConfig) -> Result<Self, ClientError> {
        let timeout = config.friend_timeout * 4 + config.directory_timeout;
        Ok(Self {
            node_url: node_url.into(),
            client: HttpNodeClient::with_timeout(timeout, config)?,
        })
    }

    pub fn node_url(&self) -> &str {
        &self.node_url
    }

    /// Asks the remote node for candidates holding `file`.
    ///
    /// # Errors
    ///
    /// - `ClientError::Timeout` / `ClientError::ConnectionFailed` - Node unreachable
    pub async fn locate(&self, file: &str) -> Result<Vec<PeerLocation>, ClientError> {
        self.client.locate(&self.node_url, file).await
    }
}
