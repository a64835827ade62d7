//! Mock implementations of the network-facing traits for testing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::directory::{ClientError, DirectoryClient, PeerDirectory};
use crate::protocol::{
    NodeInfo, NodeSummary, PeerLocation, RegisterRequest, RegisterResponse, TransferAddress,
};
use crate::resolver::FriendProbe;
use crate::transfer::{DownloadResponse, TransferClient, TransferError, UploadResponse};

const MOCK_DIRECTORY_URL: &str = "mock://directory";

fn unreachable(url: &str) -> ClientError {
    ClientError::ConnectionFailed {
        url: url.to_string(),
        reason: "connection refused (mock)".to_string(),
    }
}

/// Directory client backed by an in-process [`PeerDirectory`].
#[derive(Debug, Default)]
pub struct MockDirectoryClient {
    directory: PeerDirectory,
    unreachable: AtomicBool,
    failing_registrations: AtomicU32,
    registration_attempts: AtomicUsize,
    registration_delay: Mutex<Option<Duration>>,
    locate_calls: AtomicUsize,
}

impl MockDirectoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry the mock reads and writes.
    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    /// Makes every call fail as if the directory were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Makes the next `count` registrations fail.
    pub fn fail_next_registrations(&self, count: u32) {
        self.failing_registrations.store(count, Ordering::SeqCst);
    }

    /// Holds the next registration for `delay` before it is applied.
    pub fn delay_next_registration(&self, delay: Duration) {
        *self.registration_delay.lock() = Some(delay);
    }

    /// Registration calls received, failed ones included.
    pub fn registration_attempts(&self) -> usize {
        self.registration_attempts.load(Ordering::SeqCst)
    }

    /// Locate calls received.
    pub fn locate_calls(&self) -> usize {
        self.locate_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failing_registrations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DirectoryClient for MockDirectoryClient {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        self.registration_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.registration_delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.load(Ordering::SeqCst) || self.take_failure() {
            return Err(unreachable(MOCK_DIRECTORY_URL));
        }

        let ack = self
            .directory
            .register(&request.peer, &request.files, request.transfer_port)
            .map_err(|e| ClientError::UnexpectedStatus {
                url: MOCK_DIRECTORY_URL.to_string(),
                status: 400,
                message: e.to_string(),
            })?;

        Ok(RegisterResponse {
            status: "registered".to_string(),
            peer: ack.node_id,
            files: ack.files,
            transfer_port: ack.transfer_port,
        })
    }

    async fn locate(&self, file: &str) -> Result<Vec<PeerLocation>, ClientError> {
        self.locate_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(unreachable(MOCK_DIRECTORY_URL));
        }
        Ok(self.directory.locate(file))
    }

    async fn peers(&self) -> Result<Vec<NodeSummary>, ClientError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(unreachable(MOCK_DIRECTORY_URL));
        }
        Ok(self
            .directory
            .list_nodes()
            .iter()
            .map(|node| node.summary())
            .collect())
    }

    fn directory_url(&self) -> &str {
        MOCK_DIRECTORY_URL
    }
}

/// How a mocked friend answers probes.
#[derive(Debug, Clone)]
pub enum FriendBehavior {
    /// Holds every file and reports this transfer port
    Has { transfer_port: u16 },
    /// Answers `search` positively but fails `info`
    HasWithoutInfo,
    /// Holds nothing
    Missing,
    /// Refuses connections
    Unreachable,
    /// Answers `search` negatively after the delay
    Slow(Duration),
}

/// Friend probe with scripted per-friend answers and a call log.
#[derive(Debug, Default)]
pub struct MockFriendProbe {
    behaviors: Mutex<HashMap<String, FriendBehavior>>,
    calls: Mutex<Vec<String>>,
}

impl MockFriendProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the answers of the friend at `node_url`. Unscripted friends are unreachable.
    pub fn set(&self, node_url: &str, behavior: FriendBehavior) {
        self.behaviors.lock().insert(node_url.to_string(), behavior);
    }

    /// Calls made so far, as `"search <url>"` or `"info <url>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn behavior(&self, node_url: &str) -> FriendBehavior {
        self.behaviors
            .lock()
            .get(node_url)
            .cloned()
            .unwrap_or(FriendBehavior::Unreachable)
    }
}

#[async_trait]
impl FriendProbe for MockFriendProbe {
    async fn search(&self, node_url: &str, _file: &str) -> Result<bool, ClientError> {
        self.calls.lock().push(format!("search {node_url}"));
        match self.behavior(node_url) {
            FriendBehavior::Has { .. } | FriendBehavior::HasWithoutInfo => Ok(true),
            FriendBehavior::Missing => Ok(false),
            FriendBehavior::Unreachable => Err(unreachable(node_url)),
            FriendBehavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(false)
            }
        }
    }

    async fn info(&self, node_url: &str) -> Result<NodeInfo, ClientError> {
        self.calls.lock().push(format!("info {node_url}"));
        match self.behavior(node_url) {
            FriendBehavior::Has { transfer_port } => Ok(NodeInfo {
                id: node_url.to_string(),
                rest_url: node_url.to_string(),
                transfer_port,
                files: Vec::new(),
            }),
            _ => Err(unreachable(node_url)),
        }
    }
}

/// Transfer client over in-memory per-node file sets.
#[derive(Debug, Default)]
pub struct MockTransferClient {
    nodes: Mutex<HashMap<String, HashMap<String, Bytes>>>,
    unreachable: Mutex<HashSet<String>>,
    downloads: Mutex<Vec<String>>,
}

impl MockTransferClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `content` on the node at `address`.
    pub fn add_file(&self, address: &TransferAddress, filename: &str, content: &[u8]) {
        self.nodes
            .lock()
            .entry(address.to_string())
            .or_default()
            .insert(filename.to_string(), Bytes::copy_from_slice(content));
    }

    /// Makes every call to `address` fail to connect.
    pub fn set_unreachable(&self, address: &TransferAddress) {
        self.unreachable.lock().insert(address.to_string());
    }

    /// Content held by the node at `address`, if any.
    pub fn file(&self, address: &TransferAddress, filename: &str) -> Option<Bytes> {
        self.nodes
            .lock()
            .get(&address.to_string())
            .and_then(|files| files.get(filename).cloned())
    }

    /// Addresses downloaded from, in call order.
    pub fn download_calls(&self) -> Vec<String> {
        self.downloads.lock().clone()
    }

    fn check_reachable(&self, address: &TransferAddress) -> Result<(), TransferError> {
        if self.unreachable.lock().contains(&address.to_string()) {
            return Err(TransferError::ConnectionFailed {
                address: address.to_string(),
                reason: "connection refused (mock)".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TransferClient for MockTransferClient {
    async fn upload(
        &self,
        address: &TransferAddress,
        filename: &str,
        content: Bytes,
    ) -> Result<UploadResponse, TransferError> {
        self.check_reachable(address)?;
        self.nodes
            .lock()
            .entry(address.to_string())
            .or_default()
            .insert(filename.to_string(), content);
        Ok(UploadResponse::succeeded(format!("Saved {filename}")))
    }

    async fn download(
        &self,
        address: &TransferAddress,
        filename: &str,
    ) -> Result<DownloadResponse, TransferError> {
        self.downloads.lock().push(address.to_string());
        self.check_reachable(address)?;
        Ok(match self.file(address, filename) {
            Some(content) => DownloadResponse::found(content),
            None => DownloadResponse::not_found(),
        })
    }
}
