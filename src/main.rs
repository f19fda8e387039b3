//! Venue replay.
//!
//! Reads a JSON log of blocks, applies them to a fresh engine and prints the
//! state hash after each block. Two replicas fed the same log print the same
//! hashes; a diverging line is the first block they disagree on.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};
use venue_core::config::VenueConfig;
use venue_core::processor::{Block, Processor};

#[derive(Parser)]
#[command(name = "venue-replay", about = "Replay a block log through the venue core")]
struct Cli {
    /// JSON file holding an array of blocks.
    log: PathBuf,

    /// TOML file with engine and network parameters. Defaults apply without it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write every emitted event as one JSON line to this file.
    #[arg(long)]
    events: Option<PathBuf>,

    /// Only print the final hash.
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => VenueConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => VenueConfig::default(),
    };
    let raw = std::fs::read_to_string(&cli.log).with_context(|| format!("reading {}", cli.log.display()))?;
    let blocks: Vec<Block> = serde_json::from_str(&raw).context("parsing block log")?;

    let mut events_out = match &cli.events {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => None,
    };

    let mut processor = Processor::new(config);
    let mut hash = processor.state_hash()?;
    for (height, block) in blocks.iter().enumerate() {
        let outcome = processor.apply_block(block);
        if let Some(out) = events_out.as_mut() {
            for event in processor.drain_events() {
                serde_json::to_writer(&mut *out, &event)?;
                out.write_all(b"\n")?;
            }
        } else {
            processor.drain_events();
        }
        if let Err(e) = outcome {
            bail!("block {height} at {} halted the engine: {e}", block.time);
        }
        hash = processor.state_hash()?;
        if !cli.quiet {
            println!("{height} {} {hash}", block.time.as_millis());
        }
    }
    if let Some(mut out) = events_out {
        out.flush()?;
    }
    if cli.quiet {
        println!("{hash}");
    }
    Ok(())
}
