//! Many concurrent transfers of the same image.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::task::JoinSet;

use lowpass_core::config::LowpassConfig;

/// Gap between launching consecutive transfers.
const STAGGER: Duration = Duration::from_millis(10);

pub async fn cmd_stress(config: &LowpassConfig, image: &str, count: usize) -> Result<()> {
    let data = Bytes::from(
        std::fs::read(image).with_context(|| format!("failed to read image: {}", image))?,
    );
    let client = super::client(config)?;
    let brightness = config.client.brightness;

    let started = Instant::now();
    let mut transfers = JoinSet::new();
    for n in 0..count {
        let client = client.clone();
        let data = data.clone();
        transfers.spawn(async move {
            let t = Instant::now();
            let result = client.submit_encoded(data, brightness).await;
            (n, t.elapsed(), result)
        });
        tokio::time::sleep(STAGGER).await;
    }

    let mut ok = 0usize;
    let mut slowest = Duration::ZERO;
    while let Some(joined) = transfers.join_next().await {
        let (n, elapsed, result) = joined.context("transfer task panicked")?;
        match result {
            Ok(reply) => {
                ok += 1;
                slowest = slowest.max(elapsed);
                tracing::info!(transfer = n, bytes = reply.len(), elapsed_ms = elapsed.as_millis() as u64, "transfer done");
            }
            Err(e) => tracing::error!(transfer = n, error = %e, "transfer failed"),
        }
    }

    println!("═══════════════════════════════════════");
    println!("  Stress run against {}", client.server_addr());
    println!("═══════════════════════════════════════");
    println!("  Transfers  : {}", count);
    println!("  Succeeded  : {}", ok);
    println!("  Failed     : {}", count - ok);
    println!("  Slowest    : {} ms", slowest.as_millis());
    println!("  Wall clock : {} ms", started.elapsed().as_millis());

    if ok < count {
        anyhow::bail!("{} of {} transfers failed", count - ok, count);
    }
    Ok(())
}
