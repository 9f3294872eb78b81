//! In-memory stand-ins for the bus transport and the link, used by tests

use crate::axi::BusTransport;
use crate::error::Error;
use crate::link::LinkTransmit;
use crate::port::Port;

use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Op {
    Read(u32),
    Write(u32, u32),
}

/// A register file that answers like `axilib` does
#[derive(Debug, Default)]
pub(crate) struct FakeBus {
    regs: HashMap<u32, u32>,
    stuck: HashMap<u32, u32>,
    glitches: HashMap<u32, VecDeque<u32>>,
    broken: HashSet<u32>,
    pub(crate) ops: Vec<Op>,
}

impl FakeBus {
    pub(crate) fn new() -> Self {
        FakeBus::default()
    }

    pub(crate) fn with(mut self, addr: u32, value: u32) -> Self {
        self.regs.insert(addr, value);
        self
    }

    pub(crate) fn reg(&self, addr: u32) -> u32 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    /// Reads of `addr` always return `value`, whatever was written
    pub(crate) fn stick(&mut self, addr: u32, value: u32) {
        self.stuck.insert(addr, value);
    }

    /// The next read of `addr` returns `value` once
    pub(crate) fn glitch(&mut self, addr: u32, value: u32) {
        self.glitches.entry(addr).or_default().push_back(value);
    }

    /// Reads of `addr` return garbage
    pub(crate) fn fail_reads_at(&mut self, addr: u32) {
        self.broken.insert(addr);
    }

    pub(crate) fn writes(&self) -> Vec<(u32, u32)> {
        self.ops
            .iter()
            .filter_map(|op| match *op {
                Op::Write(a, v) => Some((a, v)),
                Op::Read(_) => None,
            })
            .collect()
    }

    pub(crate) fn writes_to(&self, addr: u32) -> Vec<u32> {
        self.writes()
            .into_iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, v)| v)
            .collect()
    }

    pub(crate) fn clear_ops(&mut self) {
        self.ops.clear();
    }
}

impl BusTransport for FakeBus {
    fn read(&mut self, addr: u32) -> Result<String, Error> {
        self.ops.push(Op::Read(addr));
        if self.broken.contains(&addr) {
            return Ok("axilib: bus error".to_string());
        }
        if let Some(v) = self.glitches.get_mut(&addr).and_then(|q| q.pop_front()) {
            return Ok(format!("{:#x}", v));
        }
        let v = match self.stuck.get(&addr) {
            Some(v) => *v,
            None => self.reg(addr),
        };
        Ok(format!("{:#010x}\n", v))
    }

    fn write(&mut self, addr: u32, value: u32) -> Result<(), Error> {
        self.ops.push(Op::Write(addr, value));
        self.regs.insert(addr, value);
        Ok(())
    }
}

/// Collects every frame handed to the link
#[derive(Debug, Default)]
pub(crate) struct RecordingLink {
    pub(crate) sent: Vec<(Port, Vec<u8>)>,
}

impl RecordingLink {
    pub(crate) fn frames_on(&self, port: Port) -> Vec<&[u8]> {
        self.sent
            .iter()
            .filter(|(p, _)| *p == port)
            .map(|(_, f)| f.as_slice())
            .collect()
    }
}

impl LinkTransmit for RecordingLink {
    fn send(&mut self, port: Port, frame: &[u8]) -> Result<(), Error> {
        self.sent.push((port, frame.to_vec()));
        Ok(())
    }
}

pub(crate) fn no_sleep(_: std::time::Duration) {}
