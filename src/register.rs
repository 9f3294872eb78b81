//! Registers mirrored in memory
//!
//! Hardware is the source of truth: a [`Register`] only changes its cached
//! value from what a read returned, and a write is not complete until the
//! confirming read agrees with it.

use crate::axi::{address, BusTransport, RegisterBus};
use crate::config::Verify;
use crate::error::Error;

use std::fmt;

use tracing::debug;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FieldKind {
    /// 0 is false, anything else is true
    Flag,
    /// Plain 32-bit integer
    Value,
}

/// Where a field lives inside its module and what reset does to it
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub offset: u32,
    pub kind: FieldKind,
    /// Value forced into the field when the module reset is asserted
    pub reset_default: Option<u32>,
}

impl FieldSpec {
    pub const fn flag(name: &'static str, offset: u32) -> Self {
        FieldSpec {
            name,
            offset,
            kind: FieldKind::Flag,
            reset_default: None,
        }
    }

    pub const fn value(name: &'static str, offset: u32) -> Self {
        FieldSpec {
            name,
            offset,
            kind: FieldKind::Value,
            reset_default: None,
        }
    }

    pub const fn resets_to(mut self, v: u32) -> Self {
        self.reset_default = Some(v);
        self
    }

    fn decode(&self, raw: u32) -> u32 {
        match self.kind {
            FieldKind::Flag => (raw != 0) as u32,
            FieldKind::Value => raw,
        }
    }
}

/// A cached register bound to one address
#[derive(Clone, Debug)]
pub struct Register {
    spec: FieldSpec,
    addr: u32,
    value: u32,
}

impl Register {
    pub fn new(spec: FieldSpec, base: u32) -> Self {
        Register {
            spec,
            addr: address(base, spec.offset),
            value: 0,
        }
    }

    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    pub fn addr(&self) -> u32 {
        self.addr
    }

    /// Last value read from hardware
    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn flag(&self) -> bool {
        self.value != 0
    }

    /// Read the register and cache what hardware reports
    pub fn refresh<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<u32, Error> {
        self.value = bus.read(self.addr)?;
        Ok(self.value)
    }

    /// Write `value`, then read it back
    ///
    /// Under [`Verify::Strict`] a read-back that disagrees is retried once
    /// (write and read again) before failing with `RegisterMismatch`.
    pub fn commit<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        value: u32,
    ) -> Result<u32, Error> {
        let want = self.spec.decode(value);
        for attempt in 0..2 {
            bus.write(self.addr, value)?;
            let got = self.refresh(bus)?;
            if bus.verify() == Verify::Trust || self.spec.decode(got) == want {
                debug!(field = self.spec.name, addr = self.addr, value = got, "commit");
                return Ok(got);
            }
            debug!(
                field = self.spec.name,
                addr = self.addr,
                wrote = value,
                read = got,
                attempt,
                "read-back disagrees"
            );
        }
        Err(Error::RegisterMismatch {
            field: self.spec.name,
            addr: self.addr,
            expected: value,
            actual: self.value,
        })
    }
}

/// Index of the reset field; every layout starts with it
pub const RESET: usize = 0;

/// A hardware module: a set of registers sharing one base address
#[derive(Clone, Debug)]
pub struct ControlDevice {
    name: String,
    base: u32,
    regs: Vec<Register>,
}

impl ControlDevice {
    /// Bind `layout` to `base` and read every field from hardware
    pub fn new<T: BusTransport>(
        bus: &mut RegisterBus<T>,
        name: impl Into<String>,
        base: u32,
        layout: &[FieldSpec],
    ) -> Result<Self, Error> {
        debug_assert_eq!(layout.first().map(|f| f.name), Some("reset"));
        let mut dev = ControlDevice {
            name: name.into(),
            base,
            regs: layout.iter().map(|spec| Register::new(*spec, base)).collect(),
        };
        dev.refresh_all(bus)?;
        Ok(dev)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn register(&self, field: usize) -> &Register {
        &self.regs[field]
    }

    pub fn registers(&self) -> &[Register] {
        &self.regs
    }

    pub fn refresh_all<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<(), Error> {
        for reg in self.regs.iter_mut() {
            reg.refresh(bus)?;
        }
        Ok(())
    }

    pub fn get_flag<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        field: usize,
    ) -> Result<bool, Error> {
        Ok(self.regs[field].refresh(bus)? != 0)
    }

    pub fn set_flag<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        field: usize,
        on: bool,
    ) -> Result<bool, Error> {
        Ok(self.regs[field].commit(bus, on as u32)? != 0)
    }

    pub fn get_value<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        field: usize,
    ) -> Result<u32, Error> {
        self.regs[field].refresh(bus)
    }

    pub fn set_value<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        field: usize,
        value: u32,
    ) -> Result<u32, Error> {
        self.regs[field].commit(bus, value)
    }

    /// Assert or release the module reset
    ///
    /// Asserting reset also forces every field with a reset default back to
    /// that default, in layout order, then re-reads the reset bit.
    pub fn set_reset<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        reset: bool,
    ) -> Result<bool, Error> {
        self.set_flag(bus, RESET, reset)?;
        if reset {
            debug!(module = %self.name, "reset cascade");
            for reg in self.regs.iter_mut().skip(RESET + 1) {
                if let Some(v) = reg.spec().reset_default {
                    reg.commit(bus, v)?;
                }
            }
            return self.get_flag(bus, RESET);
        }
        Ok(self.regs[RESET].flag())
    }
}

impl fmt::Display for ControlDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.name)?;
        for reg in &self.regs {
            match reg.spec().kind {
                FieldKind::Flag => write!(f, " {} {}", reg.spec().name, reg.flag())?,
                FieldKind::Value => write!(f, " {} {}", reg.spec().name, reg.value())?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::{FakeBus, Op};

    const LAYOUT: [FieldSpec; 3] = [
        FieldSpec::flag("reset", 0x0),
        FieldSpec::flag("enable", 0x4).resets_to(0),
        FieldSpec::value("level", 0x8).resets_to(0),
    ];
    const ENABLE: usize = 1;
    const LEVEL: usize = 2;

    fn bus(fake: FakeBus) -> RegisterBus<FakeBus> {
        RegisterBus::new(fake)
    }

    #[test]
    fn construction_reads_hardware() {
        let mut bus = bus(FakeBus::new().with(0x2004, 1).with(0x2008, 42));
        let dev = ControlDevice::new(&mut bus, "dev", 0x2000, &LAYOUT).unwrap();
        assert!(dev.register(ENABLE).flag());
        assert_eq!(dev.register(LEVEL).value(), 42);
        assert_eq!(
            bus.transport().ops,
            vec![Op::Read(0x2000), Op::Read(0x2004), Op::Read(0x2008)]
        );
    }

    #[test]
    fn set_then_get() {
        let mut bus = bus(FakeBus::new());
        let mut dev = ControlDevice::new(&mut bus, "dev", 0x2000, &LAYOUT).unwrap();
        assert!(dev.set_flag(&mut bus, ENABLE, true).unwrap());
        assert!(dev.get_flag(&mut bus, ENABLE).unwrap());
        assert_eq!(dev.set_value(&mut bus, LEVEL, 7).unwrap(), 7);
        assert_eq!(dev.get_value(&mut bus, LEVEL).unwrap(), 7);
    }

    #[test]
    fn flag_accepts_any_nonzero() {
        let mut fake = FakeBus::new();
        fake.stick(0x2004, 0x3);
        let mut bus = bus(fake);
        let mut dev = ControlDevice::new(&mut bus, "dev", 0x2000, &LAYOUT).unwrap();
        assert!(dev.set_flag(&mut bus, ENABLE, true).unwrap());
    }

    #[test]
    fn mismatch_after_one_retry() {
        let mut fake = FakeBus::new();
        fake.stick(0x2004, 0);
        let mut bus = bus(fake);
        let mut dev = ControlDevice::new(&mut bus, "dev", 0x2000, &LAYOUT).unwrap();
        bus.transport_mut().clear_ops();
        let err = dev.set_flag(&mut bus, ENABLE, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RegisterMismatch);
        assert_eq!(bus.transport().writes_to(0x2004), vec![1, 1]);
    }

    #[test]
    fn glitch_is_retried() {
        let mut bus = bus(FakeBus::new());
        let mut dev = ControlDevice::new(&mut bus, "dev", 0x2000, &LAYOUT).unwrap();
        bus.transport_mut().glitch(0x2008, 5);
        assert_eq!(dev.set_value(&mut bus, LEVEL, 9).unwrap(), 9);
        assert_eq!(bus.transport().writes_to(0x2008), vec![9, 9]);
    }

    #[test]
    fn trust_accepts_disagreement() {
        let mut fake = FakeBus::new();
        fake.stick(0x2008, 1);
        let mut bus = bus(fake).with_verify(Verify::Trust);
        let mut dev = ControlDevice::new(&mut bus, "dev", 0x2000, &LAYOUT).unwrap();
        assert_eq!(dev.set_value(&mut bus, LEVEL, 9).unwrap(), 1);
        assert_eq!(dev.register(LEVEL).value(), 1);
    }

    #[test]
    fn reset_cascades() {
        let mut bus = bus(FakeBus::new().with(0x2004, 1).with(0x2008, 3));
        let mut dev = ControlDevice::new(&mut bus, "dev", 0x2000, &LAYOUT).unwrap();
        assert!(dev.set_reset(&mut bus, true).unwrap());
        assert!(!dev.get_flag(&mut bus, ENABLE).unwrap());
        assert_eq!(dev.get_value(&mut bus, LEVEL).unwrap(), 0);

        bus.transport_mut().clear_ops();
        assert!(!dev.set_reset(&mut bus, false).unwrap());
        assert_eq!(bus.transport().writes(), vec![(0x2000, 0)]);
    }

    #[test]
    fn display() {
        let mut bus = bus(FakeBus::new().with(0x2008, 12));
        let dev = ControlDevice::new(&mut bus, "dev", 0x2000, &LAYOUT).unwrap();
        assert_eq!(dev.to_string(), "dev: reset false enable false level 12");
    }
}
