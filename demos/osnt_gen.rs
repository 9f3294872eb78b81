#![warn(rust_2018_idioms)]

use osnt_gen::{CaptureSet, Config, PcapFile, PerPort, Port, Session, Verify};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

static RUNNING: AtomicBool = AtomicBool::new(true);

#[derive(Parser, Debug)]
#[clap(about, version)]
struct Args {
    /// Capture to replay on port 0
    #[clap(long)]
    ifp0: Option<PathBuf>,

    /// Capture to replay on port 1
    #[clap(long)]
    ifp1: Option<PathBuf>,

    /// Capture to replay on port 0 with its original timing
    #[clap(long)]
    ifpt0: Option<PathBuf>,

    /// Capture to replay on port 1 with its original timing
    #[clap(long)]
    ifpt1: Option<PathBuf>,

    /// Replay count on port 0
    #[clap(long)]
    rpn0: Option<u32>,

    /// Replay count on port 1
    #[clap(long)]
    rpn1: Option<u32>,

    /// Inter packet gap on port 0 (ns)
    #[clap(long)]
    ipg0: Option<u64>,

    /// Inter packet gap on port 1 (ns)
    #[clap(long)]
    ipg1: Option<u64>,

    /// Rate limiter code on port 0
    #[clap(long)]
    rate0: Option<u32>,

    /// Rate limiter code on port 1
    #[clap(long)]
    rate1: Option<u32>,

    /// Trigger replay once configured
    #[clap(long)]
    run: bool,

    /// Stop replay and zero the replay counts, then exit
    #[clap(long)]
    clear: bool,

    /// After triggering, wait for Ctrl-C and stop the replay
    #[clap(long)]
    wait: bool,

    /// Register access helper
    #[clap(long, default_value = "./axilib")]
    axilib: PathBuf,

    /// Interface the register helper talks through
    #[clap(long, default_value = "ens1f0")]
    axi_iface: String,

    /// Staging interface for port 0
    #[clap(long, default_value = "ens1f0")]
    iface0: String,

    /// Staging interface for port 1
    #[clap(long, default_value = "ens1f1")]
    iface1: String,

    /// Append every register access to this file
    #[clap(long)]
    audit_log: Option<PathBuf>,

    /// Accept read-backs that disagree with what was written
    #[clap(long)]
    trust: bool,

    /// Pcap replay engine base address
    #[clap(
        long, default_value = "0x12000",
        parse(try_from_str = parse_int::parse)
    )]
    engine_base: u32,

    /// Print module status when done
    #[clap(short, long)]
    status: bool,
}

impl Args {
    fn config(&self) -> Config {
        Config {
            axilib: self.axilib.clone(),
            axi_iface: self.axi_iface.clone(),
            audit_log: self.audit_log.clone(),
            verify: if self.trust {
                Verify::Trust
            } else {
                Verify::Strict
            },
            interfaces: PerPort::new(self.iface0.clone(), self.iface1.clone()),
            pcap_engine_base: self.engine_base,
            ..Config::default()
        }
    }

    // Either every chosen capture keeps its timing or none does.
    fn captures(&self) -> Result<(PerPort<Option<PathBuf>>, bool)> {
        let plain = PerPort::new(self.ifp0.clone(), self.ifp1.clone());
        let timed = PerPort::new(self.ifpt0.clone(), self.ifpt1.clone());
        let any = |p: &PerPort<Option<PathBuf>>| p.iter().any(|(_, v)| v.is_some());
        match (any(&plain), any(&timed)) {
            (true, true) => bail!("--ifp* and --ifpt* cannot be mixed"),
            (_, true) => Ok((timed, true)),
            _ => Ok((plain, false)),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args = Args::parse();
    let config = args.config();
    let mut session = Session::open(&config)?;

    if args.clear {
        session.clear()?;
        info!("generator cleared");
        return Ok(());
    }

    let (paths, timestamped) = args.captures()?;
    let captures = CaptureSet::open(&PcapFile, &paths)?;
    let stats = session.load(&captures, timestamped)?;

    let gaps = PerPort::new(args.ipg0, args.ipg1);
    let rates = PerPort::new(args.rate0, args.rate1);
    for port in Port::ALL {
        session.set_gap(port, gaps[port], timestamped)?;
        session.set_rate(port, rates[port])?;
    }
    session.set_replay_count(&PerPort::new(args.rpn0, args.rpn1))?;

    for (port, stats) in stats.iter() {
        if let Some(stats) = stats {
            println!("{}: {}", port, stats);
            println!("{}: {}", port, session.rate_estimate(port, stats)?);
        }
    }

    if args.run {
        session.run()?;
        println!("replay started");

        if args.wait {
            ctrlc::set_handler(|| {
                println!("Received Ctrl-C, stopping replay...");
                RUNNING.store(false, Ordering::SeqCst);
            })?;
            while RUNNING.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(100));
            }
            session.stop()?;
        }
    }

    if args.status {
        session.refresh()?;
        print!("{}", session.status());
    }
    Ok(())
}
