//! lowpass-core — wire format, pixel buffers and configuration.
//! All other lowpass crates depend on this one.

pub mod config;
pub mod pixel;
pub mod wire;

pub use pixel::{ChannelLayout, PixelBuffer, PixelError};
pub use wire::{Direction, Fragment, WireError};
