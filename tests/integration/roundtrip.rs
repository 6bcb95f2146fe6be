use std::time::Duration;

use lowpass_core::config::{OutputFormat, ServerConfig};
use lowpass_core::ChannelLayout;
use lowpass_services::ConvolutionEngine;

use crate::*;

/// The server's reply equals running the filter locally.
#[tokio::test]
async fn server_result_matches_local_filter() {
    let server = start_server(ServerConfig::default()).await.unwrap();
    let client = client_for(server.addr, Duration::from_secs(10));

    let image = noise_image(64, 48);
    let reply = client.submit_image(&image, 1.5).await.unwrap();

    let expected = ConvolutionEngine::default().apply(&image, 1.5, 1).unwrap();
    assert_eq!(reply, expected);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn zero_brightness_gives_black() {
    let server = start_server(ServerConfig::default()).await.unwrap();
    let client = client_for(server.addr, Duration::from_secs(10));

    let reply = client.submit_image(&noise_image(20, 20), 0.0).await.unwrap();
    assert!(reply.data().iter().all(|&b| b == 0));
    server.stop().await.unwrap();
}

/// Negative factors clamp every channel to zero instead of being refused.
#[tokio::test]
async fn negative_brightness_gives_black() {
    let server = start_server(ServerConfig::default()).await.unwrap();
    let client = client_for(server.addr, Duration::from_secs(10));

    let reply = client.submit_image(&noise_image(12, 9), -2.0).await.unwrap();
    assert_eq!((reply.width(), reply.height()), (12, 9));
    assert!(reply.data().iter().all(|&b| b == 0));
    server.stop().await.unwrap();
}

/// Enough fragments in both directions to exercise pacing and reassembly.
#[tokio::test]
async fn large_image_spans_many_fragments() {
    let server = start_server(ServerConfig {
        parallelism: 4,
        ..ServerConfig::default()
    })
    .await
    .unwrap();
    let client = client_for(server.addr, Duration::from_secs(20));

    let image = noise_image(160, 120);
    let reply = client.submit_image(&image, 1.0).await.unwrap();

    assert_eq!((reply.width(), reply.height()), (160, 120));
    assert_eq!(reply, ConvolutionEngine::default().apply(&image, 1.0, 1).unwrap());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn jpeg_output_keeps_dimensions() {
    let server = start_server(ServerConfig {
        output_format: OutputFormat::Jpeg,
        compare_sequential: true,
        ..ServerConfig::default()
    })
    .await
    .unwrap();
    let client = client_for(server.addr, Duration::from_secs(10));

    let reply = client.submit_image(&noise_image(33, 17), 1.0).await.unwrap();
    assert_eq!((reply.width(), reply.height()), (33, 17));
    assert_eq!(reply.layout(), ChannelLayout::Rgb8);
    server.stop().await.unwrap();
}
