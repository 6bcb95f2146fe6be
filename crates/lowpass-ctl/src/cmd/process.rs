//! Send one image through the server.

use std::time::Instant;

use anyhow::{Context, Result};
use bytes::Bytes;

use lowpass_core::config::{LowpassConfig, OutputFormat};
use lowpass_services::{decode_image, encode_image};

pub async fn cmd_process(config: &LowpassConfig, input: &str, output: &str) -> Result<()> {
    let data = std::fs::read(input).with_context(|| format!("failed to read image: {}", input))?;
    let client = super::client(config)?;

    let started = Instant::now();
    let reply = client
        .submit_encoded(Bytes::from(data), config.client.brightness)
        .await
        .with_context(|| format!("transfer to {} failed", client.server_addr()))?;
    let elapsed = started.elapsed();

    // The server picks the reply encoding; re-encode only if the file name
    // asks for something else.
    let out = match super::format_for(output) {
        OutputFormat::Png if reply.starts_with(b"\x89PNG") => reply,
        format => encode_image(&decode_image(&reply)?, format)?,
    };
    std::fs::write(output, &out).with_context(|| format!("failed to write image: {}", output))?;

    println!("Processed {} → {}", input, output);
    println!("  server     : {}", client.server_addr());
    println!("  brightness : {}", config.client.brightness);
    println!("  reply      : {} bytes", out.len());
    println!("  round trip : {} ms", elapsed.as_millis());
    Ok(())
}
