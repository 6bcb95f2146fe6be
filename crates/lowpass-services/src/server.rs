//! Image server — filters fragmented images and sends them back.
//!
//! One receive loop owns the socket's read side. Completed transfers become
//! tracked jobs in a `JoinSet`. Each job holds an admission permit from
//! decode until its reply is sent, so the number of images in flight is
//! bounded while fragment reception never stalls.
//!
//! Replies go to the datagram source address of the request. The socket is
//! shared by every job: `UdpSocket::send_to` takes `&self` and concurrent
//! sends are safe, so no extra serialization is applied.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinError, JoinSet};

use lowpass_core::config::{NetworkConfig, OutputFormat, ServerConfig};
use lowpass_core::wire::{self, Direction};

use crate::codec::{decode_image, encode_image};
use crate::convolution::{ConvolutionEngine, ConvolutionError, Kernel};
use crate::error::TransferError;
use crate::reassembler::{Reassembler, Reassembly, ReassembledMessage};
use crate::transfer::{send_fragments, RECV_BUFFER_LEN};

/// How often partial transfers are checked against the TTL.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one successfully processed image.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub peer: SocketAddr,
    pub input_bytes: usize,
    pub output_bytes: usize,
    pub reply_fragments: usize,
    pub filter_elapsed: Duration,
    pub total_elapsed: Duration,
}

/// Job outcomes over one `run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    pub completed: usize,
    pub failed: usize,
    /// Jobs still waiting for admission when shutdown closed the semaphore.
    pub cancelled: usize,
}

impl ServeSummary {
    fn record(&mut self, joined: Result<Result<JobReport, TransferError>, JoinError>) {
        match joined {
            Ok(Ok(report)) => {
                self.completed += 1;
                tracing::info!(
                    peer = %report.peer,
                    input_bytes = report.input_bytes,
                    output_bytes = report.output_bytes,
                    fragments = report.reply_fragments,
                    filter_ms = report.filter_elapsed.as_millis() as u64,
                    total_ms = report.total_elapsed.as_millis() as u64,
                    "image processed and sent back"
                );
            }
            Ok(Err(TransferError::Shutdown)) => {
                self.cancelled += 1;
                tracing::info!("queued image job cancelled by shutdown");
            }
            Ok(Err(e)) => {
                self.failed += 1;
                tracing::error!(error = %e, "image job failed");
            }
            Err(e) => {
                self.failed += 1;
                tracing::error!(error = %e, "image job panicked or was cancelled");
            }
        }
    }
}

/// Everything a job needs, cheap to clone into each task.
#[derive(Clone)]
struct JobContext {
    socket: Arc<UdpSocket>,
    admission: Arc<Semaphore>,
    engine: Arc<ConvolutionEngine>,
    parallelism: usize,
    output_format: OutputFormat,
    compare_sequential: bool,
    fragment_size: usize,
    pacing: Duration,
}

pub struct ImageServer {
    socket: Arc<UdpSocket>,
    reassembler: Arc<Reassembler>,
    context: JobContext,
    reassembly_ttl: Duration,
    max_jobs: usize,
}

impl ImageServer {
    /// Bind the server socket described by `network`.
    pub async fn bind(network: &NetworkConfig, server: &ServerConfig) -> Result<Self, TransferError> {
        let socket = UdpSocket::bind((network.bind_addr.as_str(), network.port))
            .await
            .map_err(|e| TransferError::transport("failed to bind server socket", e))?;
        Ok(Self::from_socket(socket, network, server, Kernel::box_blur()))
    }

    /// Build a server around an already bound socket.
    pub fn from_socket(
        socket: UdpSocket,
        network: &NetworkConfig,
        server: &ServerConfig,
        kernel: Kernel,
    ) -> Self {
        let max_jobs = if server.max_concurrent_jobs == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            server.max_concurrent_jobs as usize
        };

        let socket = Arc::new(socket);
        let context = JobContext {
            socket: socket.clone(),
            admission: Arc::new(Semaphore::new(max_jobs)),
            engine: Arc::new(ConvolutionEngine::new(kernel)),
            parallelism: server.parallelism.max(1) as usize,
            output_format: server.output_format,
            compare_sequential: server.compare_sequential,
            fragment_size: network.fragment_size.clamp(1, Direction::Response.max_body()),
            pacing: Duration::from_millis(network.pacing_ms),
        };

        Self {
            socket,
            reassembler: Arc::new(Reassembler::new(Duration::from_millis(server.stray_window_ms))),
            context,
            reassembly_ttl: Duration::from_secs(server.reassembly_ttl_secs),
            max_jobs,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransferError> {
        self.socket
            .local_addr()
            .map_err(|e| TransferError::transport("failed to read local address", e))
    }

    pub fn reassembler(&self) -> Arc<Reassembler> {
        self.reassembler.clone()
    }

    /// Serve until `shutdown` fires. Jobs already admitted finish and send
    /// their replies; jobs still waiting for admission end with `Shutdown`.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<ServeSummary, TransferError> {
        let mut summary = ServeSummary::default();
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        let mut jobs: JoinSet<Result<JobReport, TransferError>> = JoinSet::new();
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        tracing::info!(
            addr = %self.local_addr()?,
            max_concurrent_jobs = self.max_jobs,
            parallelism = self.context.parallelism,
            "image server started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!(in_flight = jobs.len(), "image server shutting down");
                    break;
                }

                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            // ICMP errors from earlier replies surface here on
                            // some platforms; they concern one peer, not the loop.
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    if let Some(message) = self.accept(&buf[..len], peer) {
                        let context = self.context.clone();
                        jobs.spawn(process(context, message));
                    }
                }

                _ = sweep.tick() => {
                    self.reassembler.evict_expired(self.reassembly_ttl);
                }

                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    summary.record(joined);
                }
            }
        }

        self.context.admission.close();
        while let Some(joined) = jobs.join_next().await {
            summary.record(joined);
        }
        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "image server stopped"
        );
        Ok(summary)
    }

    /// Parse and ingest one datagram. Returns the message it completed, if any.
    fn accept(&self, datagram: &[u8], peer: SocketAddr) -> Option<ReassembledMessage> {
        let fragment = match wire::parse(datagram, Direction::Request) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "malformed fragment, dropping");
                return None;
            }
        };

        let (index, total) = (fragment.index, fragment.total);
        match self.reassembler.ingest(peer, fragment) {
            Ok(Reassembly::Complete(message)) => {
                tracing::info!(
                    %peer,
                    fragments = message.fragments,
                    bytes = message.payload.len(),
                    "image received"
                );
                Some(message)
            }
            Ok(Reassembly::Pending { received, .. }) => {
                tracing::debug!(%peer, index, total, received, "received fragment {} of {}", index + 1, total);
                None
            }
            Ok(Reassembly::Stray { .. }) => None,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "inconsistent fragment, dropping");
                None
            }
        }
    }
}

/// One job: admission → decode/filter/encode → paced reply.
async fn process(context: JobContext, message: ReassembledMessage) -> Result<JobReport, TransferError> {
    let started = Instant::now();
    let peer = message.sender;
    let input_bytes = message.payload.len();

    let _permit = context
        .admission
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| TransferError::Shutdown)?;

    let brightness = message.param.unwrap_or(1.0);
    let engine = context.engine.clone();
    let (parallelism, format, compare) = (
        context.parallelism,
        context.output_format,
        context.compare_sequential,
    );
    let payload = message.payload;

    let (reply, filter_elapsed) = tokio::task::spawn_blocking(move || {
        render(&engine, &payload, brightness, parallelism, format, compare)
    })
    .await
    .map_err(|e| ConvolutionError::Aborted(e.to_string()))??;

    let fragments = wire::split(reply, context.fragment_size, None)?;
    send_fragments(&context.socket, peer, &fragments, context.pacing).await?;

    Ok(JobReport {
        peer,
        input_bytes,
        output_bytes: fragments.iter().map(|f| f.body.len()).sum(),
        reply_fragments: fragments.len(),
        filter_elapsed,
        total_elapsed: started.elapsed(),
    })
}

/// Decode, filter and re-encode one image. Runs on the blocking pool.
fn render(
    engine: &ConvolutionEngine,
    payload: &[u8],
    brightness: f32,
    parallelism: usize,
    format: OutputFormat,
    compare_sequential: bool,
) -> Result<(Bytes, Duration), TransferError> {
    let image = decode_image(payload)?;

    if compare_sequential {
        let (_, sequential) = engine.apply_timed(&image, brightness, 1)?;
        tracing::info!(
            width = image.width(),
            height = image.height(),
            elapsed_ms = sequential.as_millis() as u64,
            "sequential filter timing"
        );
    }

    let (filtered, elapsed) = engine.apply_timed(&image, brightness, parallelism)?;
    tracing::info!(
        width = image.width(),
        height = image.height(),
        parallelism,
        elapsed_ms = elapsed.as_millis() as u64,
        "filter applied"
    );

    Ok((encode_image(&filtered, format)?, elapsed))
}
