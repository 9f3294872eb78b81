use crate::port::PerPort;

use std::path::PathBuf;

/// How a register write is confirmed
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verify {
    /// Re-read after every write; a disagreement that survives one retry is
    /// a `RegisterMismatch`
    Strict,
    /// Re-read after every write and accept whatever the hardware reports
    Trust,
}

/// Hardware description and host-side settings
///
/// `Config::default()` describes the reference OSNT design: a 250 MHz
/// datapath behind 100G ports, register modules at their stock addresses.
#[derive(Clone, Debug)]
pub struct Config {
    /// Datapath clock in Hz
    pub clock_hz: u64,
    /// Physical line rate in bits per second
    pub link_rate_bps: u64,
    /// Register access helper executable
    pub axilib: PathBuf,
    /// Interface `axilib` talks through
    pub axi_iface: String,
    /// Append-only register access log
    pub audit_log: Option<PathBuf>,
    pub verify: Verify,
    /// Interfaces frames are staged through, per port
    pub interfaces: PerPort<String>,
    pub pcap_engine_base: u32,
    pub delay_header_extractor_base: u32,
    pub rate_limiter_base: PerPort<u32>,
    pub delay_base: PerPort<u32>,
}

impl Config {
    pub const DATAPATH_FREQUENCY: u64 = 250_000_000;
    pub const LINK_RATE: u64 = 100_000_000_000;
}

impl Default for Config {
    fn default() -> Self {
        Config {
            clock_hz: Config::DATAPATH_FREQUENCY,
            link_rate_bps: Config::LINK_RATE,
            axilib: PathBuf::from("./axilib"),
            axi_iface: "ens1f0".to_string(),
            audit_log: None,
            verify: Verify::Strict,
            interfaces: PerPort::new("ens1f0".to_string(), "ens1f1".to_string()),
            pcap_engine_base: 0x12000,
            delay_header_extractor_base: 0x10000,
            rate_limiter_base: PerPort::new(0x14000, 0x14024),
            delay_base: PerPort::new(0x13000, 0x13030),
        }
    }
}
