//! lowpass integration test harness.
//!
//! Every test starts its own server on an OS-assigned loopback port, so
//! tests run in parallel without sharing sockets. Servers are stopped
//! through their shutdown channel when the handle drops.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use lowpass_core::config::{ClientConfig, NetworkConfig, ServerConfig};
use lowpass_core::{ChannelLayout, PixelBuffer};
use lowpass_services::{ImageClient, ImageServer, Reassembler, ServeSummary, TransferError};

mod concurrency;
mod faults;
mod roundtrip;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Small fragments so even test images span several datagrams.
pub const TEST_FRAGMENT_SIZE: usize = 1024;

pub fn test_network() -> NetworkConfig {
    NetworkConfig {
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        fragment_size: TEST_FRAGMENT_SIZE,
        pacing_ms: 1,
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub reassembler: Arc<Reassembler>,
    shutdown: broadcast::Sender<()>,
    task: Option<JoinHandle<Result<ServeSummary, TransferError>>>,
}

impl TestServer {
    /// Signal shutdown and wait for the receive loop to exit.
    pub async fn stop(mut self) -> Result<ServeSummary> {
        let _ = self.shutdown.send(());
        let task = self.task.take().context("server already stopped")?;
        Ok(task.await.context("server task panicked")??)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

pub async fn start_server(config: ServerConfig) -> Result<TestServer> {
    let server = ImageServer::bind(&test_network(), &config).await?;
    let addr = server.local_addr()?;
    let reassembler = server.reassembler();
    let (shutdown, rx) = broadcast::channel(1);
    let task = tokio::spawn(server.run(rx));
    Ok(TestServer {
        addr,
        reassembler,
        shutdown,
        task: Some(task),
    })
}

pub fn client_for(addr: SocketAddr, reply_timeout: Duration) -> ImageClient {
    ImageClient::new(addr, &test_network(), &ClientConfig::default()).with_reply_timeout(reply_timeout)
}

/// Deterministic noise. Compresses badly, so the PNG stays large.
pub fn noise_image(width: u32, height: u32) -> PixelBuffer {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    let mut state: u32 = 0x9e37_79b9;
    for _ in 0..width * height * 3 {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        data.push((state >> 24) as u8);
    }
    PixelBuffer::packed(width, height, ChannelLayout::Rgb8, data).expect("noise image")
}
