//! Directory service: the registry of which node advertises which files.
//!
//! [`PeerDirectory`] holds the authoritative state inside the directory
//! process. Nodes and clients reach it over HTTP through [`DirectoryClient`].

pub mod client;
pub mod registry;

pub use client::{ClientError, DirectoryClient, HttpDirectoryClient};
pub use registry::{NodeRecord, PeerDirectory, RegistrationAck};

/// Errors raised by directory operations.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Registration carried a blank identity or file name; state is unchanged
    #[error("Invalid registration: {reason}")]
    InvalidRegistration {
        /// What was wrong with the request
        reason: String,
    },
}
