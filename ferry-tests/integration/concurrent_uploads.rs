//! Parallel uploads against one node's transfer server.

use bytes::Bytes;
use ferry_core::config::FerryConfig;
use ferry_core::transfer::{TcpTransferClient, TransferClient};
use futures::future::join_all;

use crate::harness::{NodeSpec, start_directory, start_node};

const PAYLOAD_LEN: usize = 256 * 1024;

#[tokio::test]
async fn test_same_name_uploads_leave_one_whole_version() {
    let config = FerryConfig::for_testing();
    let directory = start_directory().await;
    let node = start_node(NodeSpec::new("node-a", &directory.url)).await;
    let transfer = TcpTransferClient::new(&config);

    let uploads = (0..8u8).map(|writer| {
        let transfer = &transfer;
        let target = &node.transfer;
        async move {
            transfer
                .upload(target, "shared.bin", Bytes::from(vec![writer; PAYLOAD_LEN]))
                .await
        }
    });
    let responses = join_all(uploads).await;

    for response in responses {
        assert!(response.unwrap().ok);
    }
    let stored = std::fs::read(node.shared_dir().join("shared.bin")).unwrap();
    assert_eq!(stored.len(), PAYLOAD_LEN);
    assert!(stored.iter().all(|byte| *byte == stored[0]));
    assert_eq!(directory.directory.locate("shared.bin"), vec![node.location()]);
}

#[tokio::test]
async fn test_distinct_uploads_all_land() {
    let config = FerryConfig::for_testing();
    let directory = start_directory().await;
    let node = start_node(NodeSpec::new("node-a", &directory.url)).await;
    let transfer = TcpTransferClient::new(&config);

    let names: Vec<String> = (0..10).map(|i| format!("part-{i}.txt")).collect();
    let uploads = names.iter().map(|name| {
        let transfer = &transfer;
        let target = &node.transfer;
        async move {
            transfer
                .upload(target, name, Bytes::from(name.clone().into_bytes()))
                .await
        }
    });
    let responses = join_all(uploads).await;

    for (name, response) in names.iter().zip(responses) {
        let response = response.unwrap();
        assert!(response.ok);
        assert_eq!(response.message, format!("Saved {name}"));
    }
    for name in &names {
        let stored = std::fs::read(node.shared_dir().join(name)).unwrap();
        assert_eq!(stored, name.as_bytes());
        assert_eq!(directory.directory.locate(name), vec![node.location()]);
    }
}
