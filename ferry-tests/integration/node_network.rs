//! Registration, upload and download across a directory and its nodes.

use std::sync::Arc;

use bytes::Bytes;
use ferry_core::config::FerryConfig;
use ferry_core::directory::{DirectoryClient, HttpDirectoryClient};
use ferry_core::orchestrator::{FetchOutcome, SourceSelector, TransferOrchestrator};
use ferry_core::transfer::{TcpTransferClient, TransferClient};

use crate::harness::{NodeSpec, dead_url, start_directory, start_node};

#[tokio::test]
async fn test_node_registers_shared_files_at_startup() {
    let directory = start_directory().await;
    let node = start_node(
        NodeSpec::new("node-a", &directory.url)
            .file("a.txt", b"a")
            .file("b.txt", b"b"),
    )
    .await;

    assert_eq!(directory.directory.locate("a.txt"), vec![node.location()]);
    assert_eq!(directory.directory.locate("b.txt"), vec![node.location()]);

    let client = HttpDirectoryClient::new(&directory.url, &FerryConfig::for_testing().network)
        .unwrap();
    let peers = client.peers().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].rest, node.url);
    assert_eq!(peers[0].files, vec!["a.txt".to_string(), "b.txt".to_string()]);
}

#[tokio::test]
async fn test_upload_then_locate() {
    let config = FerryConfig::for_testing();
    let directory = start_directory().await;
    let node = start_node(NodeSpec::new("node-a", &directory.url)).await;
    let transfer = TcpTransferClient::new(&config);

    let response = transfer
        .upload(&node.transfer, "x.txt", Bytes::from_static(b"hi"))
        .await
        .unwrap();

    assert!(response.ok);
    assert_eq!(response.message, "Saved x.txt");
    assert_eq!(std::fs::read(node.shared_dir().join("x.txt")).unwrap(), b"hi");

    let client = HttpDirectoryClient::new(&directory.url, &config.network).unwrap();
    assert_eq!(client.locate("x.txt").await.unwrap(), vec![node.location()]);
}

#[tokio::test]
async fn test_upload_succeeds_without_directory() {
    let config = FerryConfig::for_testing();
    let node = start_node(NodeSpec::new("node-a", &dead_url())).await;
    let transfer = TcpTransferClient::new(&config);

    let response = transfer
        .upload(&node.transfer, "x.txt", Bytes::from_static(b"hi"))
        .await
        .unwrap();

    assert!(response.ok);
    let download = transfer.download(&node.transfer, "x.txt").await.unwrap();
    assert_eq!(download.content, Bytes::from_static(b"hi"));
}

#[tokio::test]
async fn test_download_missing_file_is_not_found() {
    let config = FerryConfig::for_testing();
    let directory = start_directory().await;
    let node = start_node(NodeSpec::new("node-a", &directory.url)).await;

    let response = TcpTransferClient::new(&config)
        .download(&node.transfer, "missing.txt")
        .await
        .unwrap();

    assert!(!response.ok);
    assert!(response.content.is_empty());
    assert_eq!(response.message, "Not found");
}

#[tokio::test]
async fn test_fetch_through_directory() {
    let config = FerryConfig::for_testing();
    let directory = start_directory().await;
    let holder = start_node(
        NodeSpec::new("holder", &directory.url).file("movie.bin", &[7u8; 4096]),
    )
    .await;
    let output = tempfile::tempdir().unwrap();
    let orchestrator =
        TransferOrchestrator::new(Arc::new(TcpTransferClient::new(&config)), output.path())
            .with_directory(Arc::new(
                HttpDirectoryClient::new(&directory.url, &config.network).unwrap(),
            ));

    let outcome = orchestrator
        .fetch_file("movie.bin", SourceSelector::Directory)
        .await
        .unwrap();

    let saved = output.path().join("downloaded_movie.bin");
    assert_eq!(
        outcome,
        FetchOutcome::Downloaded {
            source: holder.location(),
            path: saved.clone(),
            bytes: 4096,
        }
    );
    assert_eq!(std::fs::read(saved).unwrap(), vec![7u8; 4096]);
}

#[tokio::test]
async fn test_fetch_of_unknown_file_is_not_found() {
    let config = FerryConfig::for_testing();
    let directory = start_directory().await;
    let output = tempfile::tempdir().unwrap();
    let orchestrator =
        TransferOrchestrator::new(Arc::new(TcpTransferClient::new(&config)), output.path())
            .with_directory(Arc::new(
                HttpDirectoryClient::new(&directory.url, &config.network).unwrap(),
            ));

    let outcome = orchestrator
        .fetch_file("nothing.txt", SourceSelector::Directory)
        .await
        .unwrap();

    assert_eq!(outcome, FetchOutcome::NotFound);
}

#[tokio::test]
async fn test_push_then_fetch_round_trip() {
    let config = FerryConfig::for_testing();
    let directory = start_directory().await;
    let node = start_node(NodeSpec::new("node-a", &directory.url)).await;
    let local = tempfile::tempdir().unwrap();
    let source = local.path().join("notes.md");
    std::fs::write(&source, b"# notes").unwrap();
    let orchestrator =
        TransferOrchestrator::new(Arc::new(TcpTransferClient::new(&config)), node.download_dir())
            .with_directory(Arc::new(
                HttpDirectoryClient::new(&directory.url, &config.network).unwrap(),
            ));

    let pushed = orchestrator
        .push_file(&node.transfer, "notes.md", &source)
        .await
        .unwrap();
    let fetched = orchestrator
        .fetch_file("notes.md", SourceSelector::Directory)
        .await
        .unwrap();

    assert!(pushed.ok);
    assert!(matches!(fetched, FetchOutcome::Downloaded { bytes: 7, .. }));
    assert_eq!(
        std::fs::read(node.download_dir().join("downloaded_notes.md")).unwrap(),
        b"# notes"
    );
}
