//! CLI command modules.

pub mod blur;
pub mod process;
pub mod stress;

use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::{Context, Result};

use lowpass_core::config::{LowpassConfig, OutputFormat};
use lowpass_services::ImageClient;

/// Build a client for the configured server, resolving host names.
pub fn client(config: &LowpassConfig) -> Result<ImageClient> {
    let addr = &config.client.server_addr;
    let server: SocketAddr = addr
        .to_socket_addrs()
        .with_context(|| format!("invalid server address: {}", addr))?
        .next()
        .with_context(|| format!("server address did not resolve: {}", addr))?;
    Ok(ImageClient::new(server, &config.network, &config.client))
}

/// Output format implied by a file name. Unknown extensions get PNG.
pub fn format_for(path: &str) -> OutputFormat {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .and_then(|e| e.parse().ok())
        .unwrap_or(OutputFormat::Png)
}
