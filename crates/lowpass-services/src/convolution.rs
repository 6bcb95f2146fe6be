//! Convolution engine — 3×3 kernel plus brightness over a raw pixel buffer.
//!
//! The image is split into column ranges, one per worker of a dedicated rayon
//! pool sized to the requested parallelism. Each worker reads the whole
//! source (neighbors cross partition edges) and writes only into its own
//! tile. Tiles are stitched into the destination after every worker has
//! finished, so no two workers ever touch the same output byte and no
//! locking is needed.
//!
//! Arithmetic is f32 in a fixed order per pixel, which makes the partitioned
//! result bit-identical to the sequential one.

use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use lowpass_core::pixel::COLOR_CHANNELS;
use lowpass_core::PixelBuffer;

/// 3×3 weight matrix with its normalization divisor.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    weights: [[f32; 3]; 3],
    divisor: f32,
}

impl Kernel {
    /// The divisor is the sum of the weights, or 1 when they sum to zero.
    pub fn new(weights: [[f32; 3]; 3]) -> Self {
        let sum: f32 = weights.iter().flatten().sum();
        let divisor = if sum == 0.0 { 1.0 } else { sum };
        Self { weights, divisor }
    }

    /// Uniform low-pass filter.
    pub fn box_blur() -> Self {
        Self::new([[1.0; 3]; 3])
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::box_blur()
    }
}

/// Output of one worker: a column range across every row, tightly packed.
struct Tile {
    columns: Range<usize>,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ConvolutionEngine {
    kernel: Kernel,
}

impl ConvolutionEngine {
    pub fn new(kernel: Kernel) -> Self {
        Self { kernel }
    }

    /// Filter `source` into a new buffer of the same shape.
    ///
    /// `parallelism <= 1` runs on the calling thread. Padding bytes and alpha
    /// are copied from the source unchanged.
    pub fn apply(
        &self,
        source: &PixelBuffer,
        brightness: f32,
        parallelism: usize,
    ) -> Result<PixelBuffer, ConvolutionError> {
        if !brightness.is_finite() {
            return Err(ConvolutionError::InvalidBrightness(brightness));
        }

        let width = source.width() as usize;
        let tiles = if parallelism <= 1 {
            vec![self.convolve_columns(source, 0..width, brightness)]
        } else {
            self.convolve_partitioned(source, brightness, parallelism)?
        };

        let mut output = source.clone();
        let bpp = source.bytes_per_pixel();
        for tile in tiles {
            let tile_row = tile.columns.len() * bpp;
            let start = tile.columns.start * bpp;
            for (y, src) in tile.data.chunks_exact(tile_row).enumerate() {
                output.row_mut(y as u32)[start..start + tile_row].copy_from_slice(src);
            }
        }
        Ok(output)
    }

    /// `apply` plus wall-clock time spent.
    pub fn apply_timed(
        &self,
        source: &PixelBuffer,
        brightness: f32,
        parallelism: usize,
    ) -> Result<(PixelBuffer, Duration), ConvolutionError> {
        let start = Instant::now();
        let output = self.apply(source, brightness, parallelism)?;
        Ok((output, start.elapsed()))
    }

    fn convolve_partitioned(
        &self,
        source: &PixelBuffer,
        brightness: f32,
        parallelism: usize,
    ) -> Result<Vec<Tile>, ConvolutionError> {
        let ranges = partition_columns(source.width() as usize, parallelism);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(ranges.len())
            .build()
            .map_err(|e| ConvolutionError::Aborted(e.to_string()))?;

        // Panics are caught per partition so the failing one can be named.
        let finished: Vec<std::thread::Result<Tile>> = pool.install(|| {
            ranges
                .par_iter()
                .cloned()
                .map(|columns| {
                    panic::catch_unwind(AssertUnwindSafe(|| {
                        self.convolve_columns(source, columns, brightness)
                    }))
                })
                .collect()
        });

        finished
            .into_iter()
            .enumerate()
            .map(|(partition, result)| {
                result.map_err(|_| {
                    tracing::error!(partition, "convolution worker panicked");
                    ConvolutionError::WorkerPanicked { partition }
                })
            })
            .collect()
    }

    fn convolve_columns(&self, source: &PixelBuffer, columns: Range<usize>, brightness: f32) -> Tile {
        let width = source.width() as usize;
        let height = source.height() as usize;
        let bpp = source.bytes_per_pixel();
        let has_alpha = source.layout().has_alpha();
        let weights = &self.kernel.weights;

        let mut data = Vec::with_capacity(columns.len() * bpp * height);

        for y in 0..height {
            // Clamped neighbor rows for this output row.
            let rows = [
                source.row(clamp(y as isize - 1, height) as u32),
                source.row(y as u32),
                source.row(clamp(y as isize + 1, height) as u32),
            ];

            for x in columns.clone() {
                let neighbors = [clamp(x as isize - 1, width), x, clamp(x as isize + 1, width)];

                let mut acc = [0f32; COLOR_CHANNELS];
                for (ky, row) in rows.iter().enumerate() {
                    for (kx, &nx) in neighbors.iter().enumerate() {
                        let weight = weights[ky][kx];
                        let px = &row[nx * bpp..nx * bpp + COLOR_CHANNELS];
                        for (sum, &value) in acc.iter_mut().zip(px) {
                            *sum += value as f32 * weight;
                        }
                    }
                }

                for sum in acc {
                    data.push(finish(sum, self.kernel.divisor, brightness));
                }
                if has_alpha {
                    data.push(rows[1][x * bpp + COLOR_CHANNELS]);
                }
            }
        }

        Tile { columns, data }
    }
}

impl Default for ConvolutionEngine {
    fn default() -> Self {
        Self::new(Kernel::box_blur())
    }
}

/// Split `width` columns into at most `parallelism` contiguous ranges of
/// `ceil(width / parallelism)` columns. Empty trailing ranges are dropped.
pub fn partition_columns(width: usize, parallelism: usize) -> Vec<Range<usize>> {
    let parallelism = parallelism.max(1);
    let span = width.div_ceil(parallelism).max(1);
    (0..parallelism)
        .map(|i| (i * span).min(width)..((i + 1) * span).min(width))
        .filter(|r| !r.is_empty())
        .collect()
}

fn clamp(coord: isize, len: usize) -> usize {
    coord.clamp(0, len as isize - 1) as usize
}

/// Normalize, scale, clamp to [0, 255], truncate.
fn finish(sum: f32, divisor: f32, brightness: f32) -> u8 {
    ((sum / divisor) * brightness).clamp(0.0, 255.0) as u8
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvolutionError {
    #[error("convolution worker for partition {partition} panicked")]
    WorkerPanicked { partition: usize },

    #[error("brightness {0} is not a finite number")]
    InvalidBrightness(f32),

    #[error("convolution task aborted: {0}")]
    Aborted(String),
}
