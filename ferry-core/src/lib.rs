//! Ferry Core - peer-to-peer file location and transfer
//!
//! This crate provides the building blocks of a Ferry network: the directory
//! registry mapping files to nodes, the per-node location resolver, the
//! binary transfer service, and the client-side orchestrator that fetches
//! and pushes files.

pub mod config;
pub mod directory;
pub mod orchestrator;
pub mod protocol;
pub mod resolver;
pub mod storage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;
pub mod tracing_setup;
pub mod transfer;

// Re-export main types for convenient access
pub use config::{DirectoryConfig, FerryConfig, NodeConfig};
pub use directory::{ClientError, DirectoryError, PeerDirectory};
pub use orchestrator::{FetchOutcome, SourceSelector, TransferOrchestrator};
pub use protocol::{PeerLocation, TransferAddress};
pub use resolver::LocationResolver;
pub use storage::{LocalStore, StorageError};
pub use transfer::{RegistrationError, TransferError};

/// Core errors that can bubble up from any Ferry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum FerryError {
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Control plane error: {0}")]
    Client(#[from] ClientError),

    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FerryError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            FerryError::Directory(DirectoryError::InvalidRegistration { reason }) => {
                format!("Registration rejected: {reason}")
            }
            FerryError::Storage(StorageError::InvalidFilename { name, reason }) => {
                format!("'{name}' is not a valid file name: {reason}")
            }
            FerryError::Storage(_) => "Local storage error occurred".to_string(),
            FerryError::Transfer(TransferError::BindFailed { address, .. }) => {
                format!("Could not listen on {address}")
            }
            FerryError::Transfer(TransferError::ConnectionFailed { address, .. })
            | FerryError::Transfer(TransferError::Timeout { address }) => {
                format!("Could not reach node at {address}")
            }
            FerryError::Transfer(_) => "Transfer error occurred".to_string(),
            FerryError::Client(e) if e.is_unreachable() => {
                "Could not reach the directory or peer".to_string()
            }
            FerryError::Client(_) => "Unexpected answer from the control plane".to_string(),
            FerryError::Registration(_) => "Could not register with the directory".to_string(),
            FerryError::Configuration { reason } => format!("Configuration error: {reason}"),
            FerryError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            FerryError::Configuration { .. }
                | FerryError::Directory(DirectoryError::InvalidRegistration { .. })
                | FerryError::Storage(StorageError::InvalidFilename { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, FerryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filename_is_user_error() {
        let error = FerryError::from(StorageError::InvalidFilename {
            name: "../x".to_string(),
            reason: "name contains a path separator",
        });

        assert!(error.is_user_error());
        assert!(error.user_message().contains("../x"));
    }

    #[test]
    fn test_unreachable_node_message() {
        let error = FerryError::from(TransferError::Timeout {
            address: "10.0.0.2:9002".to_string(),
        });

        assert!(!error.is_user_error());
        assert_eq!(error.user_message(), "Could not reach node at 10.0.0.2:9002");
    }
}
