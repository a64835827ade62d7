//! Control-plane message types shared by the directory service, nodes and clients.
//!
//! Every type here crosses a process boundary as JSON, so field names are part
//! of the wire contract.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Where a file can be fetched: a node's control-plane endpoint plus its transfer port.
///
/// Two locations are the same peer when their endpoints match; the transfer
/// port is an attribute that may change across registrations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerLocation {
    /// Control-plane endpoint, e.g. `http://127.0.0.1:9001`
    #[serde(rename = "rest")]
    pub endpoint: String,
    /// Port of the node's transfer server
    pub transfer_port: u16,
}

impl PeerLocation {
    /// Creates a location from an endpoint URL and transfer port.
    pub fn new(endpoint: impl Into<String>, transfer_port: u16) -> Self {
        Self {
            endpoint: endpoint.into(),
            transfer_port,
        }
    }

    /// Resolves the transfer-service address for this location.
    ///
    /// The host is taken from the endpoint URL; the port is the advertised
    /// transfer port.
    ///
    /// # Errors
    ///
    /// - `url::ParseError` - Endpoint is not a valid URL
    /// - `url::ParseError::EmptyHost` - Endpoint URL has no host
    pub fn transfer_address(&self) -> Result<TransferAddress, url::ParseError> {
        let url = Url::parse(&self.endpoint)?;
        let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;
        // Bracketed IPv6 hosts must lose their brackets before reaching the socket layer.
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(TransferAddress::new(host, self.transfer_port))
    }
}

/// Host and port of a node's transfer server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferAddress {
    pub host: String,
    pub port: u16,
}

impl TransferAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for TransferAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Body of `POST /register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Control-plane endpoint of the registering node; doubles as its identity
    pub peer: String,
    pub files: Vec<String>,
    pub transfer_port: u16,
}

/// Response to a successful `POST /register`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub status: String,
    pub peer: String,
    pub files: Vec<String>,
    pub transfer_port: u16,
}

/// Response of `GET /locate` on both the directory and nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocateResponse {
    pub file: String,
    pub peers: Vec<PeerLocation>,
}

/// One entry of `GET /peers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub rest: String,
    pub transfer_port: u16,
    pub files: Vec<String>,
    pub registered_at: DateTime<Utc>,
    pub registrations: u64,
}

/// Response of `GET /peers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<NodeSummary>,
}

/// Response of `GET /directory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryResponse {
    pub directory: BTreeMap<String, Vec<PeerLocation>>,
}

/// Response of a node's `GET /files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesResponse {
    pub peer: String,
    pub files: Vec<String>,
}

/// Response of a node's `GET /search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub peer: String,
    pub file: String,
    pub exists: bool,
}

/// Response of a node's `GET /info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub rest_url: String,
    pub transfer_port: u16,
    pub files: Vec<String>,
}

/// Response of a node's `POST /refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub status: String,
    pub files: Vec<String>,
    pub registry_response: RegisterResponse,
}

/// Query string shared by `/locate` and `/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct FileQuery {
    pub file: String,
}

/// Error body returned by control-plane handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
