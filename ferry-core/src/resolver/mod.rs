//! Tiered lookup of the nodes holding a file.
//!
//! A node answers from its own store first, then asks its friends in
//! configured order, and only falls back to the directory when no friend
//! had the file. Every network hop is bounded by a timeout and a failed hop
//! never aborts resolution.

pub mod probe;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
pub use probe::{FriendProbe, HttpNodeClient, RemoteResolver};

use crate::config::NetworkConfig;
use crate::directory::{ClientError, DirectoryClient, HttpDirectoryClient};
use crate::protocol::PeerLocation;
use crate::storage::LocalStore;

/// Outcome of asking one friend about a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Found(PeerLocation),
    NotFound,
    Unreachable(String),
}

/// Anything that can produce an ordered candidate list for a file.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Returns the nodes believed to hold `file`, best first.
    ///
    /// # Errors
    ///
    /// - `ClientError` - The source itself could not be queried
    async fn candidates(&self, file: &str) -> Result<Vec<PeerLocation>, ClientError>;
}

/// Per-node resolution over local storage, friends and the directory.
pub struct LocationResolver {
    store: Arc<LocalStore>,
    self_location: PeerLocation,
    friends: Vec<String>,
    probe: Arc<dyn FriendProbe>,
    directory: Arc<dyn DirectoryClient>,
    friend_timeout: Duration,
    directory_timeout: Duration,
}

impl LocationResolver {
    pub fn new(
        store: Arc<LocalStore>,
        self_location: PeerLocation,
        friends: Vec<String>,
        probe: Arc<dyn FriendProbe>,
        directory: Arc<dyn DirectoryClient>,
        config: &NetworkConfig,
    ) -> Self {
        Self {
            store,
            self_location,
            friends,
            probe,
            directory,
            friend_timeout: config.friend_timeout,
            directory_timeout: config.directory_timeout,
        }
    }

    pub fn friends(&self) -> &[String] {
        &self.friends
    }

    /// Resolves `file` to candidate locations. Empty when no tier knows it.
    pub async fn resolve(&self, file: &str) -> Vec<PeerLocation> {
        if self.store.contains(file).await {
            tracing::debug!("{} is held locally", file);
            return vec![self.self_location.clone()];
        }

        let mut candidates = Vec::new();
        for friend in &self.friends {
            match self.probe_friend(friend, file).await {
                ProbeOutcome::Found(location) => {
                    tracing::debug!("Friend {} holds {}", friend, file);
                    candidates.push(location);
                }
                ProbeOutcome::NotFound => {
                    tracing::debug!("Friend {} does not hold {}", friend, file);
                }
                ProbeOutcome::Unreachable(reason) => {
                    tracing::warn!(
                        "Friend {} unreachable while resolving {}: {}",
                        friend,
                        file,
                        reason
                    );
                }
            }
        }
        if !candidates.is_empty() {
            return candidates;
        }

        match tokio::time::timeout(self.directory_timeout, self.directory.locate(file)).await {
            Ok(Ok(locations)) => locations,
            Ok(Err(e)) => {
                tracing::warn!(
                    "Directory {} unavailable while resolving {}: {}",
                    self.directory.directory_url(),
                    file,
                    e
                );
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    "Directory {} timed out while resolving {}",
                    self.directory.directory_url(),
                    file
                );
                Vec::new()
            }
        }
    }

    /// Asks one friend whether it holds `file` and, if so, where to fetch it.
    pub async fn probe_friend(&self, friend: &str, file: &str) -> ProbeOutcome {
        let search = self.probe.search(friend, file);
        let exists = match tokio::time::timeout(self.friend_timeout, search).await {
            Ok(Ok(exists)) => exists,
            Ok(Err(e)) => return ProbeOutcome::Unreachable(e.to_string()),
            Err(_) => return ProbeOutcome::Unreachable("search timed out".to_string()),
        };
        if !exists {
            return ProbeOutcome::NotFound;
        }

        match tokio::time::timeout(self.friend_timeout, self.probe.info(friend)).await {
            Ok(Ok(info)) => ProbeOutcome::Found(PeerLocation::new(friend, info.transfer_port)),
            Ok(Err(e)) => ProbeOutcome::Unreachable(e.to_string()),
            Err(_) => ProbeOutcome::Unreachable("info timed out".to_string()),
        }
    }
}

#[async_trait]
impl CandidateSource for LocationResolver {
    async fn candidates(&self, file: &str) -> Result<Vec<PeerLocation>, ClientError> {
        Ok(self.resolve(file).await)
    }
}

#[async_trait]
impl CandidateSource for RemoteResolver {
    async fn candidates(&self, file: &str) -> Result<Vec<PeerLocation>, ClientError> {
        self.locate(file).await
    }
}

#[async_trait]
impl CandidateSource for HttpDirectoryClient {
    async fn candidates(&self, file: &str) -> Result<Vec<PeerLocation>, ClientError> {
        self.locate(file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_fixtures::create_temp_store;
    use crate::test_mocks::{FriendBehavior, MockDirectoryClient, MockFriendProbe};

    const SELF_URL: &str = "http://127.0.0.1:9001";
    const PRIMARY: &str = "http://primary:9001";
    const BACKUP: &str = "http://backup:9001";

    struct Harness {
        _temp_dir: tempfile::TempDir,
        store: Arc<LocalStore>,
        probe: Arc<MockFriendProbe>,
        directory: Arc<MockDirectoryClient>,
        resolver: LocationResolver,
    }

    fn harness(friends: &[&str]) -> Harness {
        let (temp_dir, store) = create_temp_store();
        let store = Arc::new(store);
        let probe = Arc::new(MockFriendProbe::new());
        let directory = Arc::new(MockDirectoryClient::new());
        let resolver = LocationResolver::new(
            Arc::clone(&store),
            PeerLocation::new(SELF_URL, 9002),
            friends.iter().map(|f| f.to_string()).collect(),
            probe.clone(),
            directory.clone(),
            &crate::config::FerryConfig::for_testing().network,
        );
        Harness {
            _temp_dir: temp_dir,
            store,
            probe,
            directory,
            resolver,
        }
    }

    #[tokio::test]
    async fn test_local_file_short_circuits() {
        let h = harness(&[PRIMARY]);
        h.store.write("x.txt", b"hi").await.unwrap();

        let candidates = h.resolver.resolve("x.txt").await;

        assert_eq!(candidates, vec![PeerLocation::new(SELF_URL, 9002)]);
        assert!(h.probe.calls().is_empty());
        assert_eq!(h.directory.locate_calls(), 0);
    }

    #[tokio::test]
    async fn test_backup_found_after_primary_misses() {
        let h = harness(&[PRIMARY, BACKUP]);
        h.probe.set(PRIMARY, FriendBehavior::Missing);
        h.probe.set(BACKUP, FriendBehavior::Has { transfer_port: 9102 });

        let candidates = h.resolver.resolve("x.txt").await;

        assert_eq!(candidates, vec![PeerLocation::new(BACKUP, 9102)]);
        assert_eq!(
            h.probe.calls(),
            vec![
                format!("search {PRIMARY}"),
                format!("search {BACKUP}"),
                format!("info {BACKUP}"),
            ]
        );
        assert_eq!(h.directory.locate_calls(), 0);
    }

    #[tokio::test]
    async fn test_slow_primary_times_out_before_backup() {
        let h = harness(&[PRIMARY, BACKUP]);
        h.probe.set(PRIMARY, FriendBehavior::Slow(Duration::from_secs(10)));
        h.probe.set(BACKUP, FriendBehavior::Has { transfer_port: 9102 });

        let candidates = h.resolver.resolve("x.txt").await;

        assert_eq!(candidates, vec![PeerLocation::new(BACKUP, 9102)]);
        assert_eq!(h.directory.locate_calls(), 0);
    }

    #[tokio::test]
    async fn test_every_friend_with_the_file_is_returned() {
        let h = harness(&[PRIMARY, BACKUP]);
        h.probe.set(PRIMARY, FriendBehavior::Has { transfer_port: 9101 });
        h.probe.set(BACKUP, FriendBehavior::Has { transfer_port: 9102 });

        let candidates = h.resolver.resolve("x.txt").await;

        assert_eq!(
            candidates,
            vec![PeerLocation::new(PRIMARY, 9101), PeerLocation::new(BACKUP, 9102)]
        );
    }

    #[tokio::test]
    async fn test_unreachable_friends_fall_back_to_directory() {
        let h = harness(&[PRIMARY, BACKUP]);
        h.probe.set(PRIMARY, FriendBehavior::Unreachable);
        h.probe.set(BACKUP, FriendBehavior::Missing);
        h.directory
            .directory()
            .register("http://far:9001", &["x.txt".to_string()], 9300)
            .unwrap();

        let candidates = h.resolver.resolve("x.txt").await;

        assert_eq!(candidates, vec![PeerLocation::new("http://far:9001", 9300)]);
        assert_eq!(h.directory.locate_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_info_counts_as_unreachable() {
        let h = harness(&[PRIMARY]);
        h.probe.set(PRIMARY, FriendBehavior::HasWithoutInfo);

        let outcome = h.resolver.probe_friend(PRIMARY, "x.txt").await;

        assert!(matches!(outcome, ProbeOutcome::Unreachable(_)));
    }

    #[tokio::test]
    async fn test_nothing_anywhere_is_empty() {
        let h = harness(&[]);
        h.directory.set_unreachable(true);

        let candidates = h.resolver.resolve("x.txt").await;

        assert!(candidates.is_empty());
        assert_eq!(h.directory.locate_calls(), 1);
    }
}
