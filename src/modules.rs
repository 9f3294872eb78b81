//! The generator's control modules
//!
//! Each module is a field layout over [`ControlDevice`]; the accessors below
//! only name the fields.

use crate::axi::{BusTransport, RegisterBus};
use crate::error::Error;
use crate::port::Port;
use crate::register::{ControlDevice, FieldSpec, RESET};
use crate::timing::{format_ns, Clock, Nanos};

use std::fmt;

/// Strips the synthetic timing header from frames replayed with capture
/// timing
#[derive(Debug)]
pub struct DelayHeaderExtractor {
    dev: ControlDevice,
}

impl DelayHeaderExtractor {
    const ENABLE: usize = 1;
    const LAYOUT: [FieldSpec; 2] = [
        FieldSpec::flag("reset", 0x0),
        FieldSpec::flag("enable", 0x4).resets_to(0),
    ];

    pub fn new<T: BusTransport>(bus: &mut RegisterBus<T>, base: u32) -> Result<Self, Error> {
        let dev = ControlDevice::new(bus, "delay header extractor", base, &Self::LAYOUT)?;
        Ok(DelayHeaderExtractor { dev })
    }

    pub fn reset<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<bool, Error> {
        self.dev.get_flag(bus, RESET)
    }

    pub fn set_reset<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        reset: bool,
    ) -> Result<bool, Error> {
        self.dev.set_reset(bus, reset)
    }

    pub fn enable<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<bool, Error> {
        self.dev.get_flag(bus, Self::ENABLE)
    }

    pub fn set_enable<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        enable: bool,
    ) -> Result<bool, Error> {
        self.dev.set_flag(bus, Self::ENABLE, enable)
    }

    pub fn device(&self) -> &ControlDevice {
        &self.dev
    }
}

impl fmt::Display for DelayHeaderExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.dev, f)
    }
}

/// Per-port transmit rate limiter
///
/// The rate code `r` lets one frame out every `2^r + 1` slots; see
/// [`crate::timing::RateEstimate`].
#[derive(Debug)]
pub struct RateLimiter {
    port: Port,
    dev: ControlDevice,
}

impl RateLimiter {
    const RATE: usize = 1;
    const ENABLE: usize = 2;
    // Reset clears the rate first, then the enable bit.
    const LAYOUT: [FieldSpec; 3] = [
        FieldSpec::flag("reset", 0x0),
        FieldSpec::value("rate", 0x8).resets_to(0),
        FieldSpec::flag("enable", 0x4).resets_to(0),
    ];

    pub fn new<T: BusTransport>(
        bus: &mut RegisterBus<T>,
        port: Port,
        base: u32,
    ) -> Result<Self, Error> {
        let dev = ControlDevice::new(bus, format!("{} rate limiter", port), base, &Self::LAYOUT)?;
        Ok(RateLimiter { port, dev })
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn rate<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<u32, Error> {
        self.dev.get_value(bus, Self::RATE)
    }

    pub fn set_rate<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        rate: u32,
    ) -> Result<u32, Error> {
        self.dev.set_value(bus, Self::RATE, rate)
    }

    pub fn cached_rate(&self) -> u32 {
        self.dev.register(Self::RATE).value()
    }

    pub fn enable<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<bool, Error> {
        self.dev.get_flag(bus, Self::ENABLE)
    }

    pub fn set_enable<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        enable: bool,
    ) -> Result<bool, Error> {
        self.dev.set_flag(bus, Self::ENABLE, enable)
    }

    pub fn reset<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<bool, Error> {
        self.dev.get_flag(bus, RESET)
    }

    pub fn set_reset<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        reset: bool,
    ) -> Result<bool, Error> {
        self.dev.set_reset(bus, reset)
    }

    pub fn device(&self) -> &ControlDevice {
        &self.dev
    }
}

impl fmt::Display for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.dev, f)
    }
}

/// Per-port inter-packet delay
///
/// The delay register counts datapath clock ticks. With `use_reg` set the
/// module spaces frames by the register value; cleared, it takes the gap
/// from each frame's timing header instead.
#[derive(Debug)]
pub struct InterPacketDelay {
    port: Port,
    clock: Clock,
    dev: ControlDevice,
}

impl InterPacketDelay {
    const ENABLE: usize = 1;
    const DELAY: usize = 2;
    const USE_REG: usize = 3;
    const LAYOUT: [FieldSpec; 4] = [
        FieldSpec::flag("reset", 0x0),
        FieldSpec::flag("enable", 0x4).resets_to(0),
        FieldSpec::value("delay", 0xc).resets_to(0),
        FieldSpec::flag("use_reg", 0x8).resets_to(0),
    ];

    pub fn new<T: BusTransport>(
        bus: &mut RegisterBus<T>,
        port: Port,
        base: u32,
        clock: Clock,
    ) -> Result<Self, Error> {
        let dev = ControlDevice::new(bus, format!("{} delay", port), base, &Self::LAYOUT)?;
        Ok(InterPacketDelay { port, clock, dev })
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn delay_ticks<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<u32, Error> {
        self.dev.get_value(bus, Self::DELAY)
    }

    pub fn set_delay_ticks<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        ticks: u32,
    ) -> Result<u32, Error> {
        self.dev.set_value(bus, Self::DELAY, ticks)
    }

    /// Program the gap in nanoseconds, truncated to whole ticks
    pub fn set_delay_ns<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        ns: u64,
    ) -> Result<u32, Error> {
        let ticks = self.clock.ns_to_ticks(Nanos::whole(ns));
        let ticks = u32::try_from(ticks).map_err(|_| {
            Error::InvalidArgument(format!(
                "gap of {}ns is {} ticks, more than the delay register holds",
                ns, ticks
            ))
        })?;
        self.set_delay_ticks(bus, ticks)
    }

    /// Cached delay in nanoseconds
    pub fn delay_ns(&self) -> u64 {
        self.clock
            .ticks_to_ns(self.dev.register(Self::DELAY).value() as u64)
            .floor()
    }

    pub fn enable<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<bool, Error> {
        self.dev.get_flag(bus, Self::ENABLE)
    }

    pub fn set_enable<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        enable: bool,
    ) -> Result<bool, Error> {
        self.dev.set_flag(bus, Self::ENABLE, enable)
    }

    pub fn use_reg<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<bool, Error> {
        self.dev.get_flag(bus, Self::USE_REG)
    }

    pub fn set_use_reg<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        use_reg: bool,
    ) -> Result<bool, Error> {
        self.dev.set_flag(bus, Self::USE_REG, use_reg)
    }

    pub fn reset<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<bool, Error> {
        self.dev.get_flag(bus, RESET)
    }

    pub fn set_reset<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        reset: bool,
    ) -> Result<bool, Error> {
        self.dev.set_reset(bus, reset)
    }

    pub fn device(&self) -> &ControlDevice {
        &self.dev
    }
}

impl fmt::Display for InterPacketDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reg = |i: usize| self.dev.register(i);
        write!(
            f,
            "{}: delay {} enable {} reset {} use_reg {}",
            self.dev.name(),
            format_ns(self.delay_ns()),
            reg(Self::ENABLE).flag(),
            reg(RESET).flag(),
            reg(Self::USE_REG).flag()
        )
    }
}
