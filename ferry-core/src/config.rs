//! Centralized configuration for Ferry.
//!
//! Tunable timings and limits live in [`FerryConfig`]; per-process identity
//! (addresses, storage directory, friends) is loaded from JSON into
//! [`NodeConfig`] or [`DirectoryConfig`] once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{FerryError, Result};

/// Central configuration for all Ferry components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct FerryConfig {
    pub network: NetworkConfig,
    pub transfer: TransferConfig,
    pub registration: RegistrationConfig,
}

/// Control-plane timeouts and HTTP client settings.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Timeout for each friend probe (`/search`, `/info`)
    pub friend_timeout: Duration,
    /// Timeout for directory calls; longer since the directory is authoritative
    pub directory_timeout: Duration,
    /// Connect and exchange timeout for transfer RPCs
    pub transfer_timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            friend_timeout: Duration::from_secs(3),
            directory_timeout: Duration::from_secs(5),
            transfer_timeout: Duration::from_secs(30),
            user_agent: "ferry/0.1.0",
        }
    }
}

/// Transfer server limits.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Maximum number of transfer requests handled at once
    pub max_concurrent_handlers: usize,
    /// Largest frame accepted on the transfer surface
    pub max_frame_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: 10,
            max_frame_size: 256 * 1024 * 1024, // 256 MiB
        }
    }
}

/// Re-registration behaviour after local file changes.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Attempts per registration event before giving up
    pub max_attempts: u32,
    /// Delay between attempts, multiplied by the attempt number
    pub retry_backoff: Duration,
    /// How long an upload waits for its registration attempt to finish
    pub wait_timeout: Duration,
    /// Pending registration events before senders wait
    pub queue_depth: usize,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            wait_timeout: Duration::from_secs(5),
            queue_depth: 32,
        }
    }
}

impl FerryConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(seconds) = env_number::<u64>("FERRY_FRIEND_TIMEOUT") {
            config.network.friend_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = env_number::<u64>("FERRY_DIRECTORY_TIMEOUT") {
            config.network.directory_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = env_number::<u64>("FERRY_TRANSFER_TIMEOUT") {
            config.network.transfer_timeout = Duration::from_secs(seconds);
        }

        if let Some(handlers) = env_number::<usize>("FERRY_MAX_HANDLERS")
            && handlers > 0
        {
            config.transfer.max_concurrent_handlers = handlers;
        }

        if let Some(attempts) = env_number::<u32>("FERRY_REGISTRATION_ATTEMPTS")
            && attempts > 0
        {
            config.registration.max_attempts = attempts;
        }

        config
    }

    /// Creates a configuration with short timings for tests.
    pub fn for_testing() -> Self {
        Self {
            network: NetworkConfig {
                friend_timeout: Duration::from_millis(500),
                directory_timeout: Duration::from_secs(1),
                transfer_timeout: Duration::from_secs(5),
                ..NetworkConfig::default()
            },
            registration: RegistrationConfig {
                retry_backoff: Duration::from_millis(10),
                wait_timeout: Duration::from_secs(2),
                ..RegistrationConfig::default()
            },
            ..Default::default()
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

/// Identity and addresses of a storage node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Human-readable node name reported by `/files`, `/search` and `/info`
    pub id: String,
    /// Address the control plane binds to
    pub ip: String,
    /// Control-plane port
    pub port: u16,
    /// Transfer server port
    pub transfer_port: u16,
    /// Directory holding the files this node shares
    pub shared_dir: PathBuf,
    /// Base URL of the directory service
    #[serde(alias = "maestro_url")]
    pub directory_url: String,
    /// Endpoint other nodes use to reach this node; defaults to `http://{ip}:{port}`
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub friend_peer_primary: Option<String>,
    #[serde(default)]
    pub friend_peer_backup: Option<String>,
    /// Where fetched files are written; defaults to the working directory
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

impl NodeConfig {
    /// Loads and validates a node configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// - `FerryError::Io` - File could not be read
    /// - `FerryError::Configuration` - Invalid JSON or invalid values
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks identity, ports and URLs.
    ///
    /// # Errors
    ///
    /// - `FerryError::Configuration` - Blank id, clashing ports or malformed URL
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(configuration("node id must not be empty"));
        }
        if self.port == self.transfer_port {
            return Err(configuration(format!(
                "control-plane port and transfer port must differ (both {})",
                self.port
            )));
        }
        validate_url("directory_url", &self.directory_url)?;
        if let Some(public_url) = &self.public_url {
            validate_url("public_url", public_url)?;
        }
        for (field, friend) in self.friend_fields() {
            validate_url(field, friend)?;
        }
        Ok(())
    }

    /// Endpoint advertised to the directory and to friends.
    pub fn base_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.ip, self.port))
    }

    /// Configured friends in probe order: primary, then backup.
    pub fn friends(&self) -> Vec<String> {
        self.friend_fields()
            .into_iter()
            .map(|(_, friend)| friend.clone())
            .collect()
    }

    /// Address the control plane binds to.
    pub fn rest_bind_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Address the transfer server binds to.
    pub fn transfer_bind_address(&self) -> String {
        format!("{}:{}", self.ip, self.transfer_port)
    }

    /// Directory fetched files are written to.
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    fn friend_fields(&self) -> Vec<(&'static str, &String)> {
        [
            ("friend_peer_primary", self.friend_peer_primary.as_ref()),
            ("friend_peer_backup", self.friend_peer_backup.as_ref()),
        ]
        .into_iter()
        .filter_map(|(field, friend)| friend.map(|f| (field, f)))
        .filter(|(_, friend)| !friend.trim().is_empty())
        .collect()
    }
}

/// Listen address of the directory service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub ip: String,
    pub port: u16,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 9000,
        }
    }
}

impl DirectoryConfig {
    /// Loads a directory configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// - `FerryError::Io` - File could not be read
    /// - `FerryError::Configuration` - Invalid JSON
    pub fn from_file(path: &Path) -> Result<Self> {
        read_json(path)
    }

    /// Address the directory binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| FerryError::Configuration {
        reason: format!("{}: {e}", path.display()),
    })
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| configuration(format!("{field} '{value}' is not a valid URL: {e}")))
}

fn configuration(reason: impl Into<String>) -> FerryError {
    FerryError::Configuration {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const NODE_JSON: &str = r#"{
        "id": "peer1",
        "ip": "127.0.0.1",
        "port": 9001,
        "transfer_port": 9002,
        "shared_dir": "./shared",
        "maestro_url": "http://127.0.0.1:9000",
        "friend_peer_primary": "http://127.0.0.1:9003",
        "friend_peer_backup": ""
    }"#;

    #[test]
    fn test_default_config_values() {
        let config = FerryConfig::default();

        assert_eq!(config.network.friend_timeout, Duration::from_secs(3));
        assert_eq!(config.network.directory_timeout, Duration::from_secs(5));
        assert_eq!(config.transfer.max_concurrent_handlers, 10);
        assert_eq!(config.registration.max_attempts, 3);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("FERRY_FRIEND_TIMEOUT", "7");
            std::env::set_var("FERRY_MAX_HANDLERS", "4");
            std::env::set_var("FERRY_REGISTRATION_ATTEMPTS", "0");
        }

        let config = FerryConfig::from_env();

        assert_eq!(config.network.friend_timeout, Duration::from_secs(7));
        assert_eq!(config.transfer.max_concurrent_handlers, 4);
        // Zero attempts would disable registration entirely, so it is ignored.
        assert_eq!(config.registration.max_attempts, 3);

        unsafe {
            std::env::remove_var("FERRY_FRIEND_TIMEOUT");
            std::env::remove_var("FERRY_MAX_HANDLERS");
            std::env::remove_var("FERRY_REGISTRATION_ATTEMPTS");
        }
    }

    #[test]
    fn test_node_config_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(NODE_JSON.as_bytes()).unwrap();

        let config = NodeConfig::from_file(file.path()).unwrap();

        assert_eq!(config.id, "peer1");
        assert_eq!(config.directory_url, "http://127.0.0.1:9000");
        assert_eq!(config.base_url(), "http://127.0.0.1:9001");
        assert_eq!(config.friends(), vec!["http://127.0.0.1:9003".to_string()]);
        assert_eq!(config.transfer_bind_address(), "127.0.0.1:9002");
    }

    #[test]
    fn test_public_url_overrides_base_url() {
        let mut config: NodeConfig = serde_json::from_str(NODE_JSON).unwrap();
        config.public_url = Some("http://node1.lan:9001".to_string());

        assert_eq!(config.base_url(), "http://node1.lan:9001");
    }

    #[test]
    fn test_validate_rejects_shared_ports() {
        let mut config: NodeConfig = serde_json::from_str(NODE_JSON).unwrap();
        config.transfer_port = config.port;

        assert!(matches!(
            config.validate(),
            Err(FerryError::Configuration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_friend_url() {
        let mut config: NodeConfig = serde_json::from_str(NODE_JSON).unwrap();
        config.friend_peer_backup = Some("not-a-url".to_string());

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ \"id\": ").unwrap();

        let result = NodeConfig::from_file(file.path());

        assert!(matches!(result, Err(FerryError::Configuration { .. })));
    }

    #[test]
    fn test_directory_config_defaults() {
        let config = DirectoryConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:9000");
    }
}
