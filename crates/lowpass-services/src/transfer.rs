//! Paced fragment sending and the per-transfer state machine.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use lowpass_core::Fragment;

use crate::error::TransferError;

/// Receive buffer size. Larger than any valid datagram so oversized ones
/// are not silently truncated into something that parses.
pub const RECV_BUFFER_LEN: usize = 65_536;

/// Lifecycle of one image transfer, client or server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Sending,
    AwaitingReply,
    Reassembling,
    Done,
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Idle => "idle",
            TransferState::Sending => "sending",
            TransferState::AwaitingReply => "awaiting_reply",
            TransferState::Reassembling => "reassembling",
            TransferState::Done => "done",
            TransferState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Move `state` to `next`, logging the transition.
pub fn advance(state: &mut TransferState, next: TransferState, peer: SocketAddr) {
    tracing::debug!(%peer, from = %state, to = %next, "transfer state");
    *state = next;
}

/// Send fragments in index order with `pacing` between consecutive sends.
///
/// The delay is a crude rate limiter to keep the receiver's socket buffer
/// from overflowing; it is not flow control. Stops at the first failure.
pub async fn send_fragments(
    socket: &UdpSocket,
    peer: SocketAddr,
    fragments: &[Fragment],
    pacing: Duration,
) -> Result<(), TransferError> {
    for (i, fragment) in fragments.iter().enumerate() {
        if i > 0 && !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }

        let datagram = fragment.encode();
        socket
            .send_to(&datagram, peer)
            .await
            .map_err(|e| TransferError::transport("failed to send fragment", e))?;

        tracing::debug!(
            %peer,
            index = fragment.index,
            total = fragment.total,
            bytes = datagram.len(),
            "sent fragment {} of {}",
            fragment.index + 1,
            fragment.total
        );
    }
    Ok(())
}
