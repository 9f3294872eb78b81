//! AXI-lite register access
//!
//! The actual bus transaction is performed by an external transport; this
//! module turns its hexadecimal replies into register values, keeps every
//! value to 32 bits, and records each access in the audit log.

use crate::config::{Config, Verify};
use crate::error::Error;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{trace, warn};

const REG_MASK: u64 = 0xFFFF_FFFF;

/// Absolute register address of `offset` inside the module at `base`
pub fn address(base: u32, offset: u32) -> u32 {
    base.wrapping_add(offset)
}

/// Parse a transport reply such as `0x1f`, `1F` or `  0x0000001f\n`
///
/// Values wider than 32 bits are masked, like every other register value.
pub fn parse_hex(addr: u32, reply: &str) -> Result<u32, Error> {
    let s = reply.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() || digits.len() > 16 {
        return Err(Error::transport(
            addr,
            format!("unparsable reply {:?}", reply),
        ));
    }
    let v = u64::from_str_radix(digits, 16)
        .map_err(|_| Error::transport(addr, format!("unparsable reply {:?}", reply)))?;
    Ok((v & REG_MASK) as u32)
}

/// The physical register bus
pub trait BusTransport {
    /// Read a register, returning the value as hexadecimal text
    fn read(&mut self, addr: u32) -> Result<String, Error>;
    fn write(&mut self, addr: u32, value: u32) -> Result<(), Error>;
}

/// Transport that runs the `axilib` helper for every access
///
/// ```text
/// read:  axilib -i <iface> -a <addr>
/// write: axilib -i <iface> -a <addr> -w <value>
/// ```
#[derive(Debug)]
pub struct AxiLib {
    pub program: PathBuf,
    pub iface: String,
}

impl AxiLib {
    pub fn new(program: impl Into<PathBuf>, iface: impl Into<String>) -> Self {
        AxiLib {
            program: program.into(),
            iface: iface.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        AxiLib::new(&config.axilib, &config.axi_iface)
    }

    fn run(&self, addr: u32, value: Option<u32>) -> Result<String, Error> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-i")
            .arg(&self.iface)
            .arg("-a")
            .arg(format!("{:#x}", addr));
        if let Some(v) = value {
            cmd.arg("-w").arg(format!("{:#x}", v));
        }
        let out = cmd.output().map_err(|e| {
            Error::transport(addr, format!("cannot run {}: {}", self.program.display(), e))
        })?;
        if !out.status.success() {
            return Err(Error::transport(
                addr,
                format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

impl BusTransport for AxiLib {
    fn read(&mut self, addr: u32) -> Result<String, Error> {
        self.run(addr, None)
    }

    fn write(&mut self, addr: u32, value: u32) -> Result<(), Error> {
        self.run(addr, Some(value)).map(|_| ())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }
}

/// Append-only record of register accesses
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AuditLog { path: path.into() }
    }

    // The log is a side channel: failures are reported, never propagated.
    fn record(&self, dir: Direction, addr: u32, value: u32) {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let line = format!(
            "{}.{:06} {} {:#x} {:#x}\n",
            ts.as_secs(),
            ts.subsec_micros(),
            dir.as_str(),
            addr,
            value
        );
        let res = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = res {
            warn!(path = %self.path.display(), error = %e, "audit log write failed");
        }
    }
}

/// Register accessor bound to one transport
pub struct RegisterBus<T> {
    transport: T,
    audit: Option<AuditLog>,
    verify: Verify,
    sleep: fn(Duration),
}

impl<T: BusTransport> RegisterBus<T> {
    pub fn new(transport: T) -> Self {
        RegisterBus {
            transport,
            audit: None,
            verify: Verify::Strict,
            sleep: std::thread::sleep,
        }
    }

    pub fn from_config(transport: T, config: &Config) -> Self {
        let mut bus = RegisterBus::new(transport).with_verify(config.verify);
        if let Some(path) = &config.audit_log {
            bus = bus.with_audit_log(AuditLog::new(path));
        }
        bus
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_verify(mut self, verify: Verify) -> Self {
        self.verify = verify;
        self
    }

    /// Replace the function used to wait out settle intervals
    pub fn with_sleep(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn verify(&self) -> Verify {
        self.verify
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn read(&mut self, addr: u32) -> Result<u32, Error> {
        let reply = self.transport.read(addr)?;
        let value = parse_hex(addr, &reply)?;
        self.audit(Direction::Read, addr, value);
        Ok(value)
    }

    pub fn write(&mut self, addr: u32, value: u32) -> Result<(), Error> {
        self.transport.write(addr, value)?;
        self.audit(Direction::Write, addr, value);
        Ok(())
    }

    /// Block for a fixed hardware settle interval
    pub fn settle(&self, d: Duration) {
        trace!(?d, "settle");
        (self.sleep)(d);
    }

    fn audit(&self, dir: Direction, addr: u32, value: u32) {
        trace!("{} {:#x} {:#x}", dir.as_str(), addr, value);
        if let Some(log) = &self.audit {
            log.record(dir, addr, value);
        }
    }
}
