//! lowpass-services — image transfer and filtering.
//! Used by both lowpassd and lowpass-ctl.

pub mod client;
pub mod codec;
pub mod convolution;
pub mod error;
pub mod reassembler;
pub mod server;
pub mod transfer;

pub use client::ImageClient;
pub use codec::{decode_image, encode_image, CodecError};
pub use convolution::{partition_columns, ConvolutionEngine, ConvolutionError, Kernel};
pub use error::TransferError;
pub use reassembler::{ExpiredTransfer, ReassembledMessage, Reassembler, Reassembly, ReassemblyError};
pub use server::{ImageServer, JobReport, ServeSummary};
pub use transfer::{send_fragments, TransferState};
