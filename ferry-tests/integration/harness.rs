//! Loopback directory and node fixtures.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ferry_core::config::{FerryConfig, NodeConfig};
use ferry_core::{PeerDirectory, PeerLocation, TransferAddress};
use ferry_web::NodeServer;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Directory service running on an ephemeral port.
pub struct TestDirectory {
    pub url: String,
    pub directory: Arc<PeerDirectory>,
}

pub async fn start_directory() -> TestDirectory {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let directory = Arc::new(PeerDirectory::new());
    tokio::spawn(ferry_web::serve_directory(listener, Arc::clone(&directory)));
    TestDirectory { url, directory }
}

/// A URL nothing listens on.
pub fn dead_url() -> String {
    format!("http://127.0.0.1:{}", free_port())
}

/// Storage node running on ephemeral ports.
pub struct TestNode {
    _temp_dir: TempDir,
    pub config: NodeConfig,
    pub url: String,
    pub transfer: TransferAddress,
}

impl TestNode {
    pub fn location(&self) -> PeerLocation {
        PeerLocation::new(self.url.clone(), self.transfer.port)
    }

    pub fn shared_dir(&self) -> PathBuf {
        self.config.shared_dir.clone()
    }

    pub fn download_dir(&self) -> PathBuf {
        self.config.download_dir()
    }
}

pub struct NodeSpec<'a> {
    pub id: &'a str,
    pub directory_url: String,
    pub friends: Vec<String>,
    pub files: Vec<(&'a str, &'a [u8])>,
}

impl<'a> NodeSpec<'a> {
    pub fn new(id: &'a str, directory_url: &str) -> Self {
        Self {
            id,
            directory_url: directory_url.to_string(),
            friends: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn friend(mut self, url: &str) -> Self {
        self.friends.push(url.to_string());
        self
    }

    pub fn file(mut self, name: &'a str, content: &'a [u8]) -> Self {
        self.files.push((name, content));
        self
    }
}

/// Starts a node and waits until its control plane answers.
///
/// Files are written before start so the initial registration advertises them.
pub async fn start_node(spec: NodeSpec<'_>) -> TestNode {
    let temp_dir = tempfile::tempdir().unwrap();
    let shared_dir = temp_dir.path().join("shared");
    std::fs::create_dir_all(&shared_dir).unwrap();
    for (name, content) in &spec.files {
        std::fs::write(shared_dir.join(name), content).unwrap();
    }

    let port = free_port();
    let mut transfer_port = free_port();
    while transfer_port == port {
        transfer_port = free_port();
    }

    let mut friends = spec.friends.into_iter();
    let config = NodeConfig {
        id: spec.id.to_string(),
        ip: "127.0.0.1".to_string(),
        port,
        transfer_port,
        shared_dir,
        directory_url: spec.directory_url,
        public_url: None,
        friend_peer_primary: friends.next(),
        friend_peer_backup: friends.next(),
        download_dir: Some(temp_dir.path().join("downloads")),
    };

    let server = NodeServer::bind(&config, &FerryConfig::for_testing())
        .await
        .unwrap();
    tokio::spawn(server.serve());

    let url = config.base_url();
    wait_until_ready(&url).await;

    TestNode {
        _temp_dir: temp_dir,
        url,
        transfer: TransferAddress::new("127.0.0.1", transfer_port),
        config,
    }
}

async fn wait_until_ready(url: &str) {
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(response) = client.get(format!("{url}/info")).send().await
            && response.status().is_success()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("node at {url} never became ready");
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
