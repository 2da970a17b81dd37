mod support;

use std::sync::Arc;

use duplexrpc_frame::{Packet, PacketFlags, PacketTransport};
use duplexrpc_peer::{BinaryStream, ConnectionConfig, PacketConnection, RpcError};
use support::{memory_pair_with, pattern, stream_pair, summarize, Blobs, PatternBlobs};

const LARGE: usize = 3 * 1024 * 1024 + 17;

fn small_chunks() -> ConnectionConfig {
    ConnectionConfig::default()
        .with_chunk_size(4096)
        .with_binary_buffer_size(8192)
}

#[tokio::test]
async fn large_upload_arrives_intact() {
    let (client, server) = stream_pair(small_chunks());
    server.serve_default::<dyn Blobs>(Arc::new(PatternBlobs));

    let blobs = client.remote_default::<dyn Blobs>();
    let data = pattern(LARGE);
    let summary = blobs
        .upload(BinaryStream::from_bytes(data.clone()))
        .await
        .expect("upload should succeed");
    assert_eq!(summary, summarize(&data));
}

#[tokio::test]
async fn large_download_arrives_intact() {
    let (client, server) = stream_pair(small_chunks());
    server.serve_default::<dyn Blobs>(Arc::new(PatternBlobs));

    let blobs = client.remote_default::<dyn Blobs>();
    let stream = blobs
        .download(LARGE as u64)
        .await
        .expect("download should start");
    let received = stream.read_to_end().await.expect("stream should complete");
    assert_eq!(received.len(), LARGE);
    assert_eq!(received, pattern(LARGE));
}

#[tokio::test]
async fn empty_payloads_in_both_directions() {
    let (client, server) = memory_pair_with(ConnectionConfig::default());
    server.serve_default::<dyn Blobs>(Arc::new(PatternBlobs));
    let blobs = client.remote_default::<dyn Blobs>();

    assert_eq!(blobs.upload(BinaryStream::empty()).await.unwrap(), (0, 0));
    let received = blobs.download(0).await.unwrap().read_to_end().await.unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn concurrent_transfers_do_not_mix() {
    let (client, server) = memory_pair_with(small_chunks());
    server.serve_default::<dyn Blobs>(Arc::new(PatternBlobs));
    let blobs = client.remote_default::<dyn Blobs>();

    let sizes = [1usize, 4095, 4096, 4097, 100_000, 250_001];
    let mut tasks = Vec::new();
    for size in sizes {
        let blobs = blobs.clone();
        tasks.push(tokio::spawn(async move {
            let data = pattern(size);
            let summary = blobs.upload(BinaryStream::from_bytes(data.clone())).await?;
            let echoed = blobs.download(size as u64).await?.read_to_end().await?;
            Ok::<_, RpcError>((summary == summarize(&data), echoed == data))
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), (true, true));
    }
}

/// Chunks sent ahead of their announcement, and out of order, are reassembled.
#[tokio::test]
async fn chunks_before_announcement_are_reassembled() {
    let (raw, peer) = duplexrpc_frame::memory::pair();
    let server = PacketConnection::new(peer, ConnectionConfig::default());
    server.serve_default::<dyn Blobs>(Arc::new(PatternBlobs));

    let transfer = "manual-transfer";
    raw.send(Packet::chunk(transfer, 1, &b"world"[..])).await.unwrap();
    raw.send(Packet::chunk(transfer, 0, &b"hello "[..])).await.unwrap();
    raw.send(Packet::new(
        "",
        "1",
        "upload",
        PacketFlags::REQUEST | PacketFlags::STARTS_BINARY,
        transfer,
    ))
    .await
    .unwrap();
    raw.send(Packet::chunk(transfer, 2, &b""[..])).await.unwrap();

    let response = raw.receive().await.unwrap();
    assert_eq!(response.message_id, "1");
    assert!(!response.flags.is_request());
    assert!(!response.flags.is_error(), "unexpected error: {response:?}");
    let summary: (u64, u64) = serde_json::from_slice(&response.payload).unwrap();
    assert_eq!(summary, summarize(b"hello world"));
}
