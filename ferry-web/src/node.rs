//! Storage node control plane and bootstrap.
//!
//! A node serves two surfaces at once: these JSON endpoints for discovery
//! and diagnostics, and the binary transfer server for file bytes. Both run
//! as independent tasks so a slow transfer never stalls a probe.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use ferry_core::config::{FerryConfig, NodeConfig};
use ferry_core::directory::{DirectoryClient, HttpDirectoryClient};
use ferry_core::protocol::{
    FileQuery, FilesResponse, LocateResponse, NodeInfo, PeerLocation, RefreshResponse,
    SearchResponse,
};
use ferry_core::resolver::{HttpNodeClient, LocationResolver};
use ferry_core::transfer::{FileTransferService, Registrar, RegistrarHandle, TransferServer};
use ferry_core::{FerryError, LocalStore};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::{ApiError, WebError, api_error, bind_listener};

/// Shared state of a node's control-plane handlers.
#[derive(Clone)]
pub struct NodeState {
    /// Node name reported to callers
    pub id: String,
    /// Endpoint this node advertises
    pub base_url: String,
    /// Port of this node's transfer server
    pub transfer_port: u16,
    /// Files shared by this node
    pub store: Arc<LocalStore>,
    /// Tiered lookup used by `/locate`
    pub resolver: Arc<LocationResolver>,
    /// Queue of directory registrations shared with uploads
    pub registrar: RegistrarHandle,
}

/// Builds the node router.
pub fn node_router(state: NodeState) -> Router {
    Router::new()
        .route("/", get(node_status))
        .route("/files", get(files))
        .route("/search", get(search))
        .route("/locate", get(locate))
        .route("/info", get(info))
        .route("/refresh", post(refresh))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// A node with both listeners bound, ready to serve.
pub struct NodeServer {
    rest_listener: TcpListener,
    transfer_server: TransferServer,
    registrar: Arc<Registrar>,
    state: NodeState,
}

impl NodeServer {
    /// Opens storage, binds both listeners and starts the registrar.
    ///
    /// # Errors
    ///
    /// - `WebError::Core` - Invalid configuration, unusable shared directory or
    ///   transfer port unavailable
    /// - `WebError::Bind` - Control-plane port unavailable
    pub async fn bind(node: &NodeConfig, config: &FerryConfig) -> Result<Self, WebError> {
        node.validate()?;

        let store = Arc::new(LocalStore::open(&node.shared_dir).map_err(FerryError::from)?);
        let base_url = node.base_url();
        let directory: Arc<dyn DirectoryClient> = Arc::new(
            HttpDirectoryClient::new(&node.directory_url, &config.network)
                .map_err(FerryError::from)?,
        );

        let registrar = Arc::new(Registrar::new(
            Arc::clone(&store),
            Arc::clone(&directory),
            base_url.clone(),
            node.transfer_port,
            config.registration.clone(),
        ));
        let handle = Registrar::spawn(Arc::clone(&registrar));
        let service = Arc::new(FileTransferService::new(Arc::clone(&store), handle.clone()));

        let transfer_server = TransferServer::bind(&node.transfer_bind_address(), service, config)
            .await
            .map_err(FerryError::from)?;
        let rest_listener = bind_listener(&node.rest_bind_address()).await?;

        let probe = Arc::new(HttpNodeClient::new(&config.network).map_err(FerryError::from)?);
        let resolver = Arc::new(LocationResolver::new(
            Arc::clone(&store),
            PeerLocation::new(base_url.clone(), node.transfer_port),
            node.friends(),
            probe,
            directory,
            &config.network,
        ));

        Ok(Self {
            rest_listener,
            transfer_server,
            registrar,
            state: NodeState {
                id: node.id.clone(),
                base_url,
                transfer_port: node.transfer_port,
                store,
                resolver,
                registrar: handle,
            },
        })
    }

    /// Bound control-plane address.
    ///
    /// # Errors
    ///
    /// - `WebError::Serve` - Socket no longer has a local address
    pub fn rest_addr(&self) -> Result<SocketAddr, WebError> {
        Ok(self.rest_listener.local_addr()?)
    }

    /// Bound transfer address.
    ///
    /// # Errors
    ///
    /// - `WebError::Core` - Socket no longer has a local address
    pub fn transfer_addr(&self) -> Result<SocketAddr, WebError> {
        Ok(self.transfer_server.local_addr().map_err(FerryError::from)?)
    }

    /// Registers with the directory, then serves both surfaces until one fails.
    ///
    /// A failed initial registration is logged; the node serves regardless.
    /// Nothing else registers until both surfaces are up, so the initial
    /// registration runs outside the registrar queue.
    ///
    /// # Errors
    ///
    /// - `WebError::Serve` - Control-plane loop failed
    /// - `WebError::Core` - Transfer server failed
    pub async fn serve(self) -> Result<(), WebError> {
        let Self {
            rest_listener,
            transfer_server,
            registrar,
            state,
        } = self;

        match registrar.register_with_retry().await {
            Ok(response) => tracing::info!(
                "Node {} registered {} files",
                state.id,
                response.files.len()
            ),
            Err(e) => tracing::warn!("Node {} started unregistered: {}", state.id, e),
        }

        tracing::info!(
            "Node {} control plane on {}, transfer port {}",
            state.id,
            state.base_url,
            state.transfer_port
        );

        let app = node_router(state);
        tokio::try_join!(
            async {
                axum::serve(rest_listener, app)
                    .await
                    .map_err(WebError::Serve)
            },
            async {
                transfer_server
                    .run()
                    .await
                    .map_err(|e| WebError::Core(e.into()))
            },
        )?;
        Ok(())
    }
}

/// Runs a node until either surface fails.
///
/// # Errors
///
/// - Any error from [`NodeServer::bind`] or [`NodeServer::serve`]
pub async fn run_node(node: NodeConfig, config: FerryConfig) -> Result<(), WebError> {
    NodeServer::bind(&node, &config).await?.serve().await
}

async fn list_local(state: &NodeState) -> Result<Vec<String>, ApiError> {
    state.store.list_files().await.map_err(|e| {
        tracing::error!("Could not list {}: {}", state.store.root().display(), e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

async fn node_status(State(state): State<NodeState>) -> Result<Json<Value>, ApiError> {
    let files = list_local(&state).await?;
    Ok(Json(json!({
        "message": format!("Ferry node {}", state.id),
        "status": "running",
        "files": files,
    })))
}

async fn files(State(state): State<NodeState>) -> Result<Json<FilesResponse>, ApiError> {
    let files = list_local(&state).await?;
    Ok(Json(FilesResponse {
        peer: state.id,
        files,
    }))
}

async fn search(
    State(state): State<NodeState>,
    Query(query): Query<FileQuery>,
) -> Json<SearchResponse> {
    let exists = state.store.contains(&query.file).await;
    Json(SearchResponse {
        peer: state.id,
        file: query.file,
        exists,
    })
}

async fn locate(
    State(state): State<NodeState>,
    Query(query): Query<FileQuery>,
) -> Json<LocateResponse> {
    let peers = state.resolver.resolve(&query.file).await;
    Json(LocateResponse {
        file: query.file,
        peers,
    })
}

async fn info(State(state): State<NodeState>) -> Result<Json<NodeInfo>, ApiError> {
    let files = list_local(&state).await?;
    Ok(Json(NodeInfo {
        id: state.id,
        rest_url: state.base_url,
        transfer_port: state.transfer_port,
        files,
    }))
}

async fn refresh(State(state): State<NodeState>) -> Result<Json<RefreshResponse>, ApiError> {
    let response = match state.registrar.notify_and_wait("manual refresh").await {
        Some(Ok(response)) => response,
        Some(Err(e)) => {
            tracing::warn!("Manual re-registration of {} failed: {}", state.id, e);
            return Err(api_error(StatusCode::BAD_GATEWAY, e.to_string()));
        }
        None => {
            tracing::warn!("Manual re-registration of {} still pending", state.id);
            return Err(api_error(StatusCode::GATEWAY_TIMEOUT, "registration still pending"));
        }
    };

    Ok(Json(RefreshResponse {
        status: "updated".to_string(),
        files: response.files.clone(),
        registry_response: response,
    }))
}
