//! Image client — sends one image, waits for the filtered reply.
//!
//! Every transfer binds a fresh ephemeral socket, so the server sees each
//! transfer as a distinct sender and concurrent transfers from one process
//! never share a reassembly buffer. The socket is not connected; replies
//! are filtered by source address instead.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;

use lowpass_core::config::{ClientConfig, NetworkConfig, OutputFormat};
use lowpass_core::wire::{self, Direction};
use lowpass_core::PixelBuffer;

use crate::codec::{decode_image, encode_image};
use crate::convolution::ConvolutionError;
use crate::error::TransferError;
use crate::reassembler::{Reassembler, Reassembly};
use crate::transfer::{advance, send_fragments, TransferState, RECV_BUFFER_LEN};

#[derive(Debug, Clone)]
pub struct ImageClient {
    server: SocketAddr,
    bind_ip: String,
    fragment_size: usize,
    pacing: Duration,
    reply_timeout: Duration,
}

impl ImageClient {
    pub fn new(server: SocketAddr, network: &NetworkConfig, client: &ClientConfig) -> Self {
        let bind_ip = if server.is_ipv6() { "::" } else { "0.0.0.0" };
        Self {
            server,
            bind_ip: bind_ip.to_string(),
            fragment_size: network.fragment_size.clamp(1, Direction::Request.max_body()),
            pacing: Duration::from_millis(network.pacing_ms),
            reply_timeout: Duration::from_secs(client.reply_timeout_secs),
        }
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    /// Override the per-datagram reply timeout.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Encode `image` as PNG, submit it, and decode the reply.
    pub async fn submit_image(
        &self,
        image: &PixelBuffer,
        brightness: f32,
    ) -> Result<PixelBuffer, TransferError> {
        let encoded = encode_image(image, OutputFormat::Png)?;
        let reply = self.submit_encoded(encoded, brightness).await?;
        Ok(decode_image(&reply)?)
    }

    /// Submit already-encoded image bytes and return the encoded reply.
    pub async fn submit_encoded(&self, image: Bytes, brightness: f32) -> Result<Bytes, TransferError> {
        if !brightness.is_finite() {
            return Err(ConvolutionError::InvalidBrightness(brightness).into());
        }

        let socket = UdpSocket::bind((self.bind_ip.as_str(), 0))
            .await
            .map_err(|e| TransferError::transport("failed to bind client socket", e))?;

        let mut state = TransferState::Idle;
        let result = self.run(&socket, &mut state, image, brightness).await;
        let last = if result.is_ok() { TransferState::Done } else { TransferState::Failed };
        advance(&mut state, last, self.server);
        result
    }

    async fn run(
        &self,
        socket: &UdpSocket,
        state: &mut TransferState,
        image: Bytes,
        brightness: f32,
    ) -> Result<Bytes, TransferError> {
        let fragments = wire::split(image, self.fragment_size, Some(brightness))?;
        tracing::info!(
            server = %self.server,
            fragments = fragments.len(),
            brightness,
            "sending image"
        );

        advance(state, TransferState::Sending, self.server);
        send_fragments(socket, self.server, &fragments, self.pacing).await?;

        advance(state, TransferState::AwaitingReply, self.server);
        self.receive_reply(socket, state).await
    }

    async fn receive_reply(
        &self,
        socket: &UdpSocket,
        state: &mut TransferState,
    ) -> Result<Bytes, TransferError> {
        let reassembler = Reassembler::new(Duration::ZERO);
        let mut buf = vec![0u8; RECV_BUFFER_LEN];

        loop {
            let received = tokio::time::timeout(self.reply_timeout, socket.recv_from(&mut buf)).await;
            let (len, from) = match received {
                Ok(r) => r.map_err(|e| TransferError::transport("failed to receive reply", e))?,
                Err(_) => {
                    let (received, expected) = reassembler.progress(&self.server).unwrap_or((0, 0));
                    return Err(TransferError::IncompleteTransferTimeout {
                        peer: self.server,
                        received,
                        expected,
                    });
                }
            };

            if from != self.server {
                tracing::debug!(%from, "ignoring datagram from unexpected peer");
                continue;
            }

            let fragment = match wire::parse(&buf[..len], Direction::Response) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(peer = %from, error = %e, "malformed reply fragment, dropping");
                    continue;
                }
            };

            if *state == TransferState::AwaitingReply {
                advance(state, TransferState::Reassembling, self.server);
            }

            let (index, total) = (fragment.index, fragment.total);
            match reassembler.ingest(from, fragment) {
                Ok(Reassembly::Complete(message)) => {
                    tracing::info!(
                        server = %from,
                        fragments = message.fragments,
                        bytes = message.payload.len(),
                        elapsed_ms = message.elapsed.as_millis() as u64,
                        "reply received"
                    );
                    return Ok(message.payload);
                }
                Ok(Reassembly::Pending { received, .. }) => {
                    tracing::debug!(received, "received reply fragment {} of {}", index + 1, total);
                }
                Ok(Reassembly::Stray { .. }) => {}
                Err(e) => tracing::warn!(error = %e, "inconsistent reply fragment, dropping"),
            }
        }
    }
}
