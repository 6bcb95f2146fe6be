//! lowpassd — UDP image filtering server.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use anyhow::{Context, Result};

use lowpass_core::config::LowpassConfig;
use lowpass_services::ImageServer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    let mut config = LowpassConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        LowpassConfig::default()
    });

    if let Some(port) = std::env::args().nth(1) {
        config.network.port = port
            .parse()
            .with_context(|| format!("invalid port: {port}"))?;
    }
    tracing::info!(
        port = config.network.port,
        parallelism = config.server.parallelism,
        output_format = ?config.server.output_format,
        "lowpassd starting"
    );

    // Address other hosts should use to reach us; no packet is sent.
    let local_ip: IpAddr = {
        let probe = std::net::UdpSocket::bind("0.0.0.0:0")?;
        match probe.connect("8.8.8.8:80").and_then(|_| probe.local_addr()) {
            Ok(addr) => addr.ip(),
            Err(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    };

    let server = ImageServer::bind(&config.network, &config.server)
        .await
        .context("failed to start image server")?;
    tracing::info!(addr = %server.local_addr()?, local_ip = %local_ip, "listening");

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let _progress_printer = {
        let reassembler = server.reassembler();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                for (peer, received, total) in reassembler.in_progress() {
                    tracing::info!(%peer, received, total, "transfer in progress");
                }
            }
        })
    };

    server.run(shutdown_rx).await?;
    tracing::info!("lowpassd stopped");
    Ok(())
}
