//! Friend-first resolution between live nodes.

use std::sync::Arc;

use ferry_core::config::FerryConfig;
use ferry_core::orchestrator::{FetchOutcome, SourceSelector, TransferOrchestrator};
use ferry_core::resolver::{HttpNodeClient, RemoteResolver};
use ferry_core::transfer::TcpTransferClient;

use crate::harness::{NodeSpec, dead_url, start_directory, start_node};

#[tokio::test]
async fn test_friend_found_without_directory() {
    let config = FerryConfig::for_testing();
    let holder = start_node(NodeSpec::new("node-b", &dead_url()).file("song.mp3", b"la")).await;
    let asker = start_node(NodeSpec::new("node-a", &dead_url()).friend(&holder.url)).await;

    let located = HttpNodeClient::new(&config.network)
        .unwrap()
        .locate(&asker.url, "song.mp3")
        .await
        .unwrap();

    assert_eq!(located, vec![holder.location()]);
}

#[tokio::test]
async fn test_dead_primary_falls_back_to_backup() {
    let config = FerryConfig::for_testing();
    let holder = start_node(NodeSpec::new("node-b", &dead_url()).file("song.mp3", b"la")).await;
    let asker = start_node(
        NodeSpec::new("node-a", &dead_url())
            .friend(&dead_url())
            .friend(&holder.url),
    )
    .await;

    let located = RemoteResolver::new(asker.url.clone(), &config.network)
        .unwrap()
        .locate("song.mp3")
        .await
        .unwrap();

    assert_eq!(located, vec![holder.location()]);
}

#[tokio::test]
async fn test_local_file_answers_with_own_location() {
    let config = FerryConfig::for_testing();
    let node = start_node(NodeSpec::new("node-a", &dead_url()).file("own.txt", b"mine")).await;

    let located = RemoteResolver::new(node.url.clone(), &config.network)
        .unwrap()
        .locate("own.txt")
        .await
        .unwrap();

    assert_eq!(located, vec![node.location()]);
}

#[tokio::test]
async fn test_directory_consulted_when_friends_miss() {
    let config = FerryConfig::for_testing();
    let directory = start_directory().await;
    let holder = start_node(NodeSpec::new("node-c", &directory.url).file("doc.pdf", b"%PDF")).await;
    let friend = start_node(NodeSpec::new("node-b", &dead_url())).await;
    let asker = start_node(NodeSpec::new("node-a", &directory.url).friend(&friend.url)).await;

    let located = RemoteResolver::new(asker.url.clone(), &config.network)
        .unwrap()
        .locate("doc.pdf")
        .await
        .unwrap();

    assert_eq!(located, vec![holder.location()]);
}

#[tokio::test]
async fn test_unknown_everywhere_is_empty() {
    let config = FerryConfig::for_testing();
    let friend = start_node(NodeSpec::new("node-b", &dead_url())).await;
    let asker = start_node(NodeSpec::new("node-a", &dead_url()).friend(&friend.url)).await;

    let located = RemoteResolver::new(asker.url.clone(), &config.network)
        .unwrap()
        .locate("ghost.txt")
        .await
        .unwrap();

    assert!(located.is_empty());
}

#[tokio::test]
async fn test_fetch_through_peer_discovery() {
    let config = FerryConfig::for_testing();
    let holder = start_node(NodeSpec::new("node-b", &dead_url()).file("song.mp3", b"la la")).await;
    let asker = start_node(NodeSpec::new("node-a", &dead_url()).friend(&holder.url)).await;
    let output = tempfile::tempdir().unwrap();
    let orchestrator =
        TransferOrchestrator::new(Arc::new(TcpTransferClient::new(&config)), output.path())
            .with_discovery(Arc::new(
                RemoteResolver::new(asker.url.clone(), &config.network).unwrap(),
            ));

    let outcome = orchestrator
        .fetch_file("song.mp3", SourceSelector::PeerDiscovery)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        FetchOutcome::Downloaded {
            source: holder.location(),
            path: output.path().join("downloaded_song.mp3"),
            bytes: 5,
        }
    );
    assert_eq!(
        std::fs::read(output.path().join("downloaded_song.mp3")).unwrap(),
        b"la la"
    );
}
