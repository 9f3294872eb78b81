#![warn(rust_2018_idioms)]

use osnt_gen::{CaptureCodec, Clock, Config, LoadStats, PcapFile, RateEstimate};

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Frame statistics of a capture and the rate the generator would reach
/// replaying it
#[derive(Parser, Debug)]
#[clap(about, version)]
struct Args {
    /// Capture file
    pcap: PathBuf,

    /// Rate limiter code; all codes up to 16 when omitted
    #[clap(short, long)]
    rate: Option<u32>,

    /// Datapath clock (Hz)
    #[clap(long, default_value_t = Config::DATAPATH_FREQUENCY)]
    clock_hz: u64,

    /// Line rate (bps)
    #[clap(long, default_value_t = Config::LINK_RATE)]
    link_rate: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args = Args::parse();
    let frames = PcapFile.decode(&args.pcap)?;
    let stats = LoadStats::from_frames(&frames)
        .ok_or_else(|| anyhow!("{} has no frames", args.pcap.display()))?;
    println!("{}: {}", args.pcap.display(), stats);

    let clock = Clock::new(args.clock_hz)?;
    let codes = match args.rate {
        Some(r) => r..=r,
        None => 0..=16,
    };
    for code in codes {
        let est = RateEstimate::new(
            code,
            stats.average_frame_len,
            stats.average_word_count,
            clock,
            args.link_rate,
        )?;
        println!("rate {:>2}: {}", code, est);
    }
    Ok(())
}
