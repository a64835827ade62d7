//! Directory service endpoints.

use std::sync::Arc;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use ferry_core::PeerDirectory;
use ferry_core::config::DirectoryConfig;
use ferry_core::protocol::{
    DirectoryResponse, FileQuery, LocateResponse, PeersResponse, RegisterRequest,
    RegisterResponse,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::{ApiError, WebError, api_error, bind_listener};

/// Builds the directory router over `directory`.
pub fn directory_router(directory: Arc<PeerDirectory>) -> Router {
    Router::new()
        .route("/", get(directory_status))
        .route("/register", post(register))
        .route("/locate", get(locate))
        .route("/peers", get(peers))
        .route("/directory", get(snapshot))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(directory)
}

/// Binds the configured address and serves a fresh directory.
///
/// # Errors
///
/// - `WebError::Bind` - Address invalid or in use
/// - `WebError::Serve` - Server loop failed
pub async fn run_directory(config: DirectoryConfig) -> Result<(), WebError> {
    let listener = bind_listener(&config.bind_address()).await?;
    serve_directory(listener, Arc::new(PeerDirectory::new())).await
}

/// Serves `directory` on an already bound listener.
///
/// # Errors
///
/// - `WebError::Serve` - Server loop failed
pub async fn serve_directory(
    listener: TcpListener,
    directory: Arc<PeerDirectory>,
) -> Result<(), WebError> {
    tracing::info!("Directory service listening on {}", listener.local_addr()?);
    axum::serve(listener, directory_router(directory)).await?;
    Ok(())
}

async fn directory_status(State(directory): State<Arc<PeerDirectory>>) -> Json<Value> {
    Json(json!({
        "message": "Ferry directory service",
        "status": "running",
        "registered_peers": directory.node_count(),
    }))
}

async fn register(
    State(directory): State<Arc<PeerDirectory>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let Json(request) = payload
        .map_err(|rejection| api_error(StatusCode::BAD_REQUEST, rejection.body_text()))?;

    let ack = directory
        .register(&request.peer, &request.files, request.transfer_port)
        .map_err(|e| {
            tracing::warn!("Rejected registration from {:?}: {}", request.peer, e);
            api_error(StatusCode::BAD_REQUEST, e.to_string())
        })?;

    tracing::info!(
        "Registered {} with {} files (transfer port {}, registration #{})",
        ack.node_id,
        ack.files.len(),
        ack.transfer_port,
        ack.registrations
    );

    Ok(Json(RegisterResponse {
        status: "registered".to_string(),
        peer: ack.node_id,
        files: ack.files,
        transfer_port: ack.transfer_port,
    }))
}

async fn locate(
    State(directory): State<Arc<PeerDirectory>>,
    Query(query): Query<FileQuery>,
) -> Json<LocateResponse> {
    let peers = directory.locate(&query.file);
    tracing::debug!("Locate {} -> {} peers", query.file, peers.len());
    Json(LocateResponse {
        file: query.file,
        peers,
    })
}

async fn peers(State(directory): State<Arc<PeerDirectory>>) -> Json<PeersResponse> {
    Json(PeersResponse {
        peers: directory
            .list_nodes()
            .iter()
            .map(|node| node.summary())
            .collect(),
    })
}

async fn snapshot(State(directory): State<Arc<PeerDirectory>>) -> Json<DirectoryResponse> {
    Json(DirectoryResponse {
        directory: directory.snapshot(),
    })
}
