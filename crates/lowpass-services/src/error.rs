//! Terminal failures of one image transfer, as surfaced to callers.

use std::net::SocketAddr;

use lowpass_core::WireError;

use crate::codec::CodecError;
use crate::convolution::ConvolutionError;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Socket bind/send/receive failure. The transfer's socket is dropped.
    #[error("transport error: {context}: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed fragment: {0}")]
    MalformedFragment(#[from] WireError),

    #[error("incomplete transfer from {peer}: {received} of {expected} fragments before timeout")]
    IncompleteTransferTimeout {
        peer: SocketAddr,
        received: u32,
        expected: u32,
    },

    #[error("convolution failure: {0}")]
    ConvolutionFailure(#[from] ConvolutionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("server is shutting down")]
    Shutdown,
}

impl TransferError {
    pub(crate) fn transport(context: &'static str, source: std::io::Error) -> Self {
        TransferError::Transport { context, source }
    }
}
