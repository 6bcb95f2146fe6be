//! Local filtering, no server involved.

use anyhow::{Context, Result};

use lowpass_services::{decode_image, encode_image, ConvolutionEngine};

pub fn cmd_blur(input: &str, output: &str, brightness: f32, threads: usize) -> Result<()> {
    let data = std::fs::read(input).with_context(|| format!("failed to read image: {}", input))?;
    let image = decode_image(&data)?;

    let engine = ConvolutionEngine::default();
    let (filtered, elapsed) = engine.apply_timed(&image, brightness, threads)?;

    let out = encode_image(&filtered, super::format_for(output))?;
    std::fs::write(output, &out).with_context(|| format!("failed to write image: {}", output))?;

    println!("Filtered {} → {}", input, output);
    println!("  size       : {}x{}", image.width(), image.height());
    println!("  threads    : {}", threads.max(1));
    println!("  brightness : {}", brightness);
    println!("  filter     : {} ms", elapsed.as_millis());
    Ok(())
}
