use std::time::Duration;

use lowpass_core::config::ServerConfig;
use lowpass_services::ConvolutionEngine;

use crate::*;

/// Concurrent clients each get their own image back, even when the server
/// filters one image at a time.
#[tokio::test]
async fn concurrent_clients_get_their_own_results() {
    let server = start_server(ServerConfig {
        max_concurrent_jobs: 1,
        ..ServerConfig::default()
    })
    .await
    .unwrap();

    let brightness = [0.5f32, 1.0, 1.5, 2.0];
    let mut tasks = Vec::new();
    for (i, &b) in brightness.iter().enumerate() {
        let client = client_for(server.addr, Duration::from_secs(20));
        let image = noise_image(40 + i as u32, 30);
        tasks.push(tokio::spawn(async move {
            let reply = client.submit_image(&image, b).await.unwrap();
            (image, b, reply)
        }));
    }

    let engine = ConvolutionEngine::default();
    for task in tasks {
        let (image, b, reply) = task.await.unwrap();
        assert_eq!(reply, engine.apply(&image, b, 1).unwrap(), "brightness {b}");
    }
    assert_eq!(server.reassembler.pending_count(), 0);
    let summary = server.stop().await.unwrap();
    assert_eq!(summary.completed, brightness.len());
    assert_eq!(summary.failed, 0);
}

/// One client reused for sequential transfers binds a new port each time.
#[tokio::test]
async fn sequential_transfers_from_one_client() {
    let server = start_server(ServerConfig::default()).await.unwrap();
    let client = client_for(server.addr, Duration::from_secs(10));
    let image = noise_image(24, 24);

    for _ in 0..3 {
        let reply = client.submit_image(&image, 1.0).await.unwrap();
        assert_eq!((reply.width(), reply.height()), (24, 24));
    }
    server.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_idle_server() {
    let server = start_server(ServerConfig::default()).await.unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(5), server.stop())
        .await
        .expect("server did not stop")
        .unwrap();
    assert_eq!(summary, ServeSummary::default());
}

