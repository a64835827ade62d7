//! Keeps the directory's record of this node in step with local storage.
//!
//! Uploads emit a [`RegistrationEvent`] through a [`RegistrarHandle`]; a
//! background task consumes the events and re-registers the node's current
//! file set with bounded retry. The registration outcome never changes the
//! result of the upload that caused it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::config::RegistrationConfig;
use crate::directory::{ClientError, DirectoryClient};
use crate::protocol::{RegisterRequest, RegisterResponse};
use crate::storage::{LocalStore, StorageError};

/// Errors from registering this node with the directory.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("Could not list local files: {0}")]
    Storage(#[from] StorageError),

    #[error("Directory registration failed after {attempts} attempt(s): {source}")]
    Directory {
        attempts: u32,
        #[source]
        source: ClientError,
    },

    #[error("Registrar is not running")]
    Stopped,
}

type Completion = oneshot::Sender<Result<RegisterResponse, RegistrationError>>;

/// Request to re-register after a local change.
#[derive(Debug)]
pub struct RegistrationEvent {
    /// What changed, for logging
    pub reason: String,
    completion: Completion,
}

/// Registers one node's file set with the directory.
pub struct Registrar {
    store: Arc<LocalStore>,
    directory: Arc<dyn DirectoryClient>,
    endpoint: String,
    transfer_port: u16,
    config: RegistrationConfig,
}

impl Registrar {
    /// Creates a registrar advertising `endpoint` and `transfer_port`.
    pub fn new(
        store: Arc<LocalStore>,
        directory: Arc<dyn DirectoryClient>,
        endpoint: impl Into<String>,
        transfer_port: u16,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            store,
            directory,
            endpoint: endpoint.into(),
            transfer_port,
            config,
        }
    }

    /// Builds the registration for the store's current contents.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - Shared directory could not be listed
    pub async fn current_request(&self) -> Result<RegisterRequest, StorageError> {
        Ok(RegisterRequest {
            peer: self.endpoint.clone(),
            files: self.store.list_files().await?,
            transfer_port: self.transfer_port,
        })
    }

    /// Registers the current file set, retrying with linear backoff.
    ///
    /// The file list is re-read before every attempt so a retry never
    /// advertises a stale set. Once the node is serving, registrations go
    /// through [`RegistrarHandle`] so they reach the directory in order.
    ///
    /// # Errors
    ///
    /// - `RegistrationError::Storage` - Shared directory could not be listed
    /// - `RegistrationError::Directory` - Every attempt failed
    pub async fn register_with_retry(&self) -> Result<RegisterResponse, RegistrationError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let request = self.current_request().await?;
            match self.directory.register(&request).await {
                Ok(response) => {
                    tracing::info!(
                        "Registered {} files with {}",
                        request.files.len(),
                        self.directory.directory_url()
                    );
                    return Ok(response);
                }
                Err(source) if attempt >= max_attempts => {
                    return Err(RegistrationError::Directory {
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "Registration attempt {}/{} with {} failed: {}",
                        attempt,
                        max_attempts,
                        self.directory.directory_url(),
                        e
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Spawns the background task consuming registration events.
    ///
    /// The task ends once every handle has been dropped.
    pub fn spawn(registrar: Arc<Self>) -> RegistrarHandle {
        let (sender, receiver) = mpsc::channel(registrar.config.queue_depth.max(1));
        let wait_timeout = registrar.config.wait_timeout;

        tokio::spawn(run_registration_loop(registrar, receiver));

        RegistrarHandle {
            sender,
            wait_timeout,
        }
    }
}

async fn run_registration_loop(
    registrar: Arc<Registrar>,
    mut receiver: mpsc::Receiver<RegistrationEvent>,
) {
    tracing::debug!("Registrar for {} started", registrar.endpoint);

    while let Some(event) = receiver.recv().await {
        tracing::debug!("Re-registering after {}", event.reason);
        let result = registrar.register_with_retry().await;
        if let Err(e) = &result {
            tracing::warn!("Re-registration after {} failed: {}", event.reason, e);
        }
        let _ = event.completion.send(result);
    }

    tracing::debug!("Registrar for {} stopped", registrar.endpoint);
}

/// Sends registration events to a running [`Registrar`].
///
/// Events are handled one at a time, so a registration queued later always
/// reaches the directory after every earlier one.
#[derive(Clone)]
pub struct RegistrarHandle {
    sender: mpsc::Sender<RegistrationEvent>,
    wait_timeout: Duration,
}

impl RegistrarHandle {
    /// Queues a re-registration and waits, up to the configured timeout, for it to finish.
    ///
    /// Returns `None` if the attempt did not finish in time; it keeps running
    /// in the background.
    pub async fn notify_and_wait(
        &self,
        reason: impl Into<String>,
    ) -> Option<Result<RegisterResponse, RegistrationError>> {
        let (completion, done) = oneshot::channel();
        let event = RegistrationEvent {
            reason: reason.into(),
            completion,
        };

        let wait = async {
            if self.sender.send(event).await.is_err() {
                return Err(RegistrationError::Stopped);
            }
            done.await.unwrap_or(Err(RegistrationError::Stopped))
        };

        tokio::time::timeout(self.wait_timeout, wait).await.ok()
    }
}
