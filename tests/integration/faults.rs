use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;

use lowpass_core::config::ServerConfig;
use lowpass_core::wire::split;

use crate::*;

/// Junk datagrams are dropped and the server keeps serving.
#[tokio::test]
async fn garbage_datagrams_do_not_stop_server() {
    let server = start_server(ServerConfig::default()).await.unwrap();

    let junk = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    junk.send_to(&[0xde, 0xad], server.addr).await.unwrap();
    junk.send_to(&[0u8; 12], server.addr).await.unwrap();

    let client = client_for(server.addr, Duration::from_secs(10));
    let reply = client.submit_image(&noise_image(16, 16), 1.0).await.unwrap();
    assert_eq!(reply.width(), 16);
    server.stop().await.unwrap();
}

/// A transfer that never completes is evicted after its TTL.
#[tokio::test]
async fn partial_transfer_is_evicted() {
    let server = start_server(ServerConfig {
        reassembly_ttl_secs: 1,
        ..ServerConfig::default()
    })
    .await
    .unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let fragments = split(Bytes::from(vec![1u8; 3000]), 1000, Some(1.0)).unwrap();
    sender.send_to(&fragments[0].encode(), server.addr).await.unwrap();

    let peer = sender.local_addr().unwrap();
    let mut seen = false;
    for _ in 0..20 {
        if server.reassembler.progress(&peer).is_some() {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(seen, "first fragment never arrived");

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(server.reassembler.progress(&peer), None);
    server.stop().await.unwrap();
}

/// Nothing listening: the client gives up with zero fragments received.
#[tokio::test]
async fn no_server_times_out() {
    let vacant = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = vacant.local_addr().unwrap();
    drop(vacant);

    let client = client_for(addr, Duration::from_millis(500));
    let err = client
        .submit_encoded(Bytes::from_static(b"anything"), 1.0)
        .await
        .unwrap_err();
    // Linux may report the ICMP port-unreachable as a receive error instead.
    assert!(matches!(
        err,
        TransferError::IncompleteTransferTimeout { received: 0, .. } | TransferError::Transport { .. }
    ));
}

/// An undecodable payload fails its job without a reply; the server survives.
#[tokio::test]
async fn undecodable_image_gets_no_reply() {
    let server = start_server(ServerConfig::default()).await.unwrap();

    let client = client_for(server.addr, Duration::from_millis(500));
    let err = client
        .submit_encoded(Bytes::from(vec![7u8; 2500]), 1.0)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::IncompleteTransferTimeout { .. }));

    let client = client_for(server.addr, Duration::from_secs(10));
    assert!(client.submit_image(&noise_image(8, 8), 1.0).await.is_ok());
    server.stop().await.unwrap();
}
