//! lowpass-ctl — command-line client for the lowpass image server.

use anyhow::{Context, Result};

use lowpass_core::config::LowpassConfig;

mod cmd;

fn print_usage() {
    println!("Usage: lowpass-ctl [--server <addr>] [--brightness <factor>] <command>");
    println!();
    println!("Commands:");
    println!("  process <in> <out>      Send an image to the server, save the filtered reply");
    println!("  stress <image> <count>  Submit <count> concurrent copies and report timings");
    println!("  blur <in> <out>         Filter an image locally without the server");
    println!();
    println!("Options:");
    println!("  --server <addr>         Server address (default: from config, 127.0.0.1:8888)");
    println!("  --brightness <factor>   Brightness multiplier, >= 0 (default: from config, 1.0)");
    println!("  --threads <n>           Column partitions for `blur` (default: from config)");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = LowpassConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        LowpassConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse options
    let mut threads = config.server.parallelism;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--server" => {
                i += 1;
                config.client.server_addr = args.get(i).context("--server requires a value")?.clone();
            }
            "--brightness" => {
                i += 1;
                config.client.brightness = args
                    .get(i)
                    .context("--brightness requires a value")?
                    .parse()
                    .context("--brightness must be a number")?;
            }
            "--threads" => {
                i += 1;
                threads = args
                    .get(i)
                    .context("--threads requires a value")?
                    .parse()
                    .context("--threads must be a number")?;
            }
            _ => remaining.push(&args[i]),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["process", input, output] => cmd::process::cmd_process(&config, input, output).await,
        ["stress", image, count] => {
            let count: usize = count.parse().context("count must be a number")?;
            cmd::stress::cmd_stress(&config, image, count).await
        }
        ["blur", input, output] => {
            cmd::blur::cmd_blur(input, output, config.client.brightness, threads as usize)
        }
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            print_usage();
            std::process::exit(1);
        }
    }
}
