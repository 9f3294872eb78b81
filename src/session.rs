//! One generator, driven as a whole
//!
//! # Example
//!
//! ```no_run
//! use osnt_gen::{CaptureSet, Config, PcapFile, PerPort, Port, Session};
//!
//! # fn main() -> Result<(), osnt_gen::Error> {
//! let config = Config::default();
//! let mut session = Session::open(&config)?;
//!
//! let paths = PerPort::new(Some("tx0.pcap".into()), None);
//! let captures = CaptureSet::open(&PcapFile, &paths)?;
//! session.load(&captures, false)?;
//! session.set_gap(Port::Port0, Some(1000), false)?;
//! session.set_replay_count(&PerPort::new(Some(10), None))?;
//! session.run()?;
//! # Ok(())
//! # }
//! ```

use crate::axi::{AxiLib, BusTransport, RegisterBus};
use crate::capture::CaptureSet;
use crate::config::Config;
use crate::engine::{LoadStats, PcapEngine};
use crate::error::Error;
use crate::link::{LinkTransmit, PnetLink};
use crate::modules::{DelayHeaderExtractor, InterPacketDelay, RateLimiter};
use crate::port::{PerPort, Port};
use crate::timing::{Clock, RateEstimate};

use std::fmt;

use tracing::info;

pub struct Session<T, L> {
    clock: Clock,
    link_rate_bps: u64,
    bus: RegisterBus<T>,
    link: L,
    engine: PcapEngine,
    extractor: DelayHeaderExtractor,
    rate_limiters: PerPort<RateLimiter>,
    delays: PerPort<InterPacketDelay>,
}

impl Session<AxiLib, PnetLink> {
    /// Session on real hardware: `axilib` for registers, raw sockets for
    /// frames
    pub fn open(config: &Config) -> Result<Self, Error> {
        let bus = RegisterBus::from_config(AxiLib::from_config(config), config);
        let link = PnetLink::new(config.interfaces.clone());
        Session::new(bus, link, config)
    }
}

impl<T: BusTransport, L: LinkTransmit> Session<T, L> {
    /// Read every module's state, then release the header extractor from
    /// reset and leave it disabled
    pub fn new(mut bus: RegisterBus<T>, link: L, config: &Config) -> Result<Self, Error> {
        let clock = Clock::new(config.clock_hz)?;
        let engine = PcapEngine::from_config(&mut bus, config)?;
        let mut extractor = DelayHeaderExtractor::new(&mut bus, config.delay_header_extractor_base)?;
        let rate_limiters =
            PerPort::try_from_fn(|p| RateLimiter::new(&mut bus, p, config.rate_limiter_base[p]))?;
        let delays = PerPort::try_from_fn(|p| {
            InterPacketDelay::new(&mut bus, p, config.delay_base[p], clock)
        })?;

        extractor.set_reset(&mut bus, false)?;
        extractor.set_enable(&mut bus, false)?;
        info!("generator session ready");

        Ok(Session {
            clock,
            link_rate_bps: config.link_rate_bps,
            bus,
            link,
            engine,
            extractor,
            rate_limiters,
            delays,
        })
    }

    /// Stage and arm the chosen captures
    ///
    /// With nothing chosen this is a no-op that touches no hardware.
    pub fn load(
        &mut self,
        captures: &CaptureSet,
        timestamped: bool,
    ) -> Result<PerPort<Option<LoadStats>>, Error> {
        if captures.is_empty() {
            return Ok(PerPort::default());
        }
        if timestamped {
            self.engine
                .load_pcap_timestamped(&mut self.bus, &mut self.link, captures)
        } else {
            self.engine
                .load_pcap(&mut self.bus, &mut self.link, captures)
        }
    }

    /// Stage frames only, leaving replay state alone
    pub fn load_only(&mut self, captures: &CaptureSet) -> Result<(), Error> {
        if captures.is_empty() {
            return Ok(());
        }
        self.engine
            .load_only(&mut self.bus, &mut self.link, captures)
    }

    /// Fixed gap between frames on `port`
    ///
    /// Timestamped replay takes its gaps from the timing headers, so the
    /// delay register is programmed but not selected.
    pub fn set_gap(&mut self, port: Port, ns: Option<u64>, timestamped: bool) -> Result<(), Error> {
        let ns = match ns {
            Some(ns) => ns,
            None => return Ok(()),
        };
        let delay = &mut self.delays[port];
        let ticks = delay.set_delay_ns(&mut self.bus, ns)?;
        delay.set_enable(&mut self.bus, true)?;
        delay.set_use_reg(&mut self.bus, !timestamped)?;
        info!(%port, ns, ticks, timestamped, "inter-packet gap set");
        Ok(())
    }

    /// Rate code for `port`; the limiter is enabled along with it
    pub fn set_rate(&mut self, port: Port, rate_code: Option<u32>) -> Result<(), Error> {
        let rate_code = match rate_code {
            Some(r) => r,
            None => return Ok(()),
        };
        let limiter = &mut self.rate_limiters[port];
        limiter.set_rate(&mut self.bus, rate_code)?;
        limiter.set_enable(&mut self.bus, true)?;
        info!(%port, rate_code, "rate limit set");
        Ok(())
    }

    pub fn set_replay_count(&mut self, counts: &PerPort<Option<u32>>) -> Result<PerPort<u32>, Error> {
        self.engine.set_replay_count(&mut self.bus, counts)
    }

    pub fn clear(&mut self) -> Result<(), Error> {
        self.engine.clear(&mut self.bus)
    }

    pub fn run(&mut self) -> Result<(), Error> {
        self.engine.run(&mut self.bus)
    }

    pub fn stop(&mut self) -> Result<(), Error> {
        self.engine.stop_replay(&mut self.bus)
    }

    /// Throughput `port` reaches with its current rate code, given what was
    /// loaded on it
    pub fn rate_estimate(&self, port: Port, stats: &LoadStats) -> Result<RateEstimate, Error> {
        RateEstimate::new(
            self.rate_limiters[port].cached_rate(),
            stats.average_frame_len,
            stats.average_word_count,
            self.clock,
            self.link_rate_bps,
        )
    }

    /// Re-read every module
    pub fn refresh(&mut self) -> Result<(), Error> {
        let bus = &mut self.bus;
        self.engine.replay_count(bus)?;
        self.engine.reset(bus)?;
        self.engine.begin_replay(bus)?;
        self.extractor.reset(bus)?;
        self.extractor.enable(bus)?;
        for (_, limiter) in self.rate_limiters.iter_mut() {
            limiter.rate(bus)?;
            limiter.enable(bus)?;
            limiter.reset(bus)?;
        }
        for (_, delay) in self.delays.iter_mut() {
            delay.delay_ticks(bus)?;
            delay.enable(bus)?;
            delay.use_reg(bus)?;
            delay.reset(bus)?;
        }
        Ok(())
    }

    /// Status lines for every module, as last read
    pub fn status(&self) -> impl fmt::Display + '_ {
        Status(self)
    }

    pub fn engine(&self) -> &PcapEngine {
        &self.engine
    }

    pub fn extractor(&self) -> &DelayHeaderExtractor {
        &self.extractor
    }

    pub fn rate_limiter(&self, port: Port) -> &RateLimiter {
        &self.rate_limiters[port]
    }

    pub fn delay(&self, port: Port) -> &InterPacketDelay {
        &self.delays[port]
    }

    pub fn bus(&self) -> &RegisterBus<T> {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut RegisterBus<T> {
        &mut self.bus
    }

    pub fn link(&self) -> &L {
        &self.link
    }
}

struct Status<'a, T, L>(&'a Session<T, L>);

impl<T, L> fmt::Display for Status<'_, T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        writeln!(f, "{}", s.engine)?;
        writeln!(f, "{}", s.extractor)?;
        for (_, limiter) in s.rate_limiters.iter() {
            writeln!(f, "{}", limiter)?;
        }
        for (_, delay) in s.delays.iter() {
            writeln!(f, "{}", delay)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CapturedFrame;
    use crate::config::Verify;
    use crate::engine::ReplayState;
    use crate::error::ErrorKind;
    use crate::mock::{no_sleep, FakeBus, RecordingLink};

    use std::time::Duration;

    fn session_with(fake: FakeBus) -> Session<FakeBus, RecordingLink> {
        let bus = RegisterBus::new(fake).with_sleep(no_sleep);
        Session::new(bus, RecordingLink::default(), &Config::default()).unwrap()
    }

    fn session() -> Session<FakeBus, RecordingLink> {
        let mut s = session_with(FakeBus::new());
        s.bus_mut().transport_mut().clear_ops();
        s
    }

    fn frames(lens: &[usize]) -> Vec<CapturedFrame> {
        lens.iter()
            .enumerate()
            .map(|(i, len)| CapturedFrame::new(vec![0u8; *len], Duration::from_millis(i as u64)))
            .collect()
    }

    #[test]
    fn construction_releases_extractor() {
        let fake = FakeBus::new().with(0x10000, 1).with(0x10004, 1);
        let s = session_with(fake);
        let writes = s.bus().transport().writes();
        assert_eq!(writes, vec![(0x10000, 0), (0x10004, 0)]);
        assert!(!s.extractor().device().register(1).flag());
    }

    #[test]
    fn zero_clock_rejected_before_hardware() {
        let config = Config {
            clock_hz: 0,
            ..Config::default()
        };
        let bus = RegisterBus::new(FakeBus::new()).with_sleep(no_sleep);
        let err = Session::new(bus, RecordingLink::default(), &config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn empty_load_touches_nothing() {
        let mut s = session();
        let report = s.load(&CaptureSet::new(), true).unwrap();
        assert_eq!(report, PerPort::default());
        assert!(s.bus().transport().ops.is_empty());
        assert!(s.link().sent.is_empty());
        assert_eq!(s.engine().state(), &ReplayState::Idle);
    }

    #[test]
    fn load_and_estimate() {
        let mut s = session();
        s.set_rate(Port::Port1, Some(10)).unwrap();
        let captures = CaptureSet::new().with(Port::Port1, frames(&[64, 64]));
        let report = s.load(&captures, false).unwrap();
        let stats = report[Port::Port1].unwrap();
        assert_eq!(stats.average_word_count, 1.0);

        let est = s.rate_estimate(Port::Port1, &stats).unwrap();
        let expect = 1.0 / 1025.0 * 68.0 * 8.0 * 250e6;
        assert!((est.rate_bps - expect).abs() < 1e-6);
        assert_eq!(s.link().frames_on(Port::Port1).len(), 2);
    }

    #[test]
    fn gap_register_path() {
        let mut s = session();
        s.set_gap(Port::Port0, Some(1000), false).unwrap();
        assert_eq!(
            s.bus().transport().writes(),
            vec![(0x1300c, 250), (0x13004, 1), (0x13008, 1)]
        );
        assert_eq!(s.delay(Port::Port0).delay_ns(), 1000);
    }

    #[test]
    fn gap_timestamped_uses_headers() {
        let mut s = session();
        s.set_gap(Port::Port1, Some(40), true).unwrap();
        assert_eq!(
            s.bus().transport().writes(),
            vec![(0x1303c, 10), (0x13034, 1), (0x13038, 0)]
        );
    }

    #[test]
    fn gap_none_is_noop() {
        let mut s = session();
        s.set_gap(Port::Port0, None, false).unwrap();
        s.set_rate(Port::Port0, None).unwrap();
        assert!(s.bus().transport().ops.is_empty());
    }

    #[test]
    fn gap_too_large() {
        let mut s = session();
        let err = s.set_gap(Port::Port0, Some(u64::MAX / 2), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(s.bus().transport().ops.is_empty());
    }

    #[test]
    fn rate_enables_limiter() {
        let mut s = session();
        s.set_rate(Port::Port1, Some(3)).unwrap();
        assert_eq!(
            s.bus().transport().writes(),
            vec![(0x1402c, 3), (0x14028, 1)]
        );
        assert_eq!(s.rate_limiter(Port::Port1).cached_rate(), 3);
    }

    #[test]
    fn full_cycle() {
        let mut s = session();
        let captures = CaptureSet::new()
            .with(Port::Port0, frames(&[60]))
            .with(Port::Port1, frames(&[60, 120]));
        s.load(&captures, true).unwrap();
        s.set_replay_count(&PerPort::new(Some(1), Some(2))).unwrap();
        s.run().unwrap();
        assert_eq!(
            s.engine().state(),
            &ReplayState::Triggered {
                ports: vec![Port::Port0, Port::Port1]
            }
        );
        s.stop().unwrap();
        s.clear().unwrap();
        assert_eq!(s.engine().cached_replay_count(), PerPort::new(0, 0));
        assert_eq!(s.engine().state(), &ReplayState::Idle);
        // header + frame for each of three frames
        assert_eq!(s.link().sent.len(), 6);
    }

    #[test]
    fn trust_mode_tolerates_stuck_bits() {
        let mut fake = FakeBus::new();
        fake.stick(0x14004, 0);
        let bus = RegisterBus::new(fake)
            .with_sleep(no_sleep)
            .with_verify(Verify::Trust);
        let mut s = Session::new(bus, RecordingLink::default(), &Config::default()).unwrap();
        s.set_rate(Port::Port0, Some(1)).unwrap();
        assert!(!s.rate_limiter(Port::Port0).device().register(2).flag());
    }

    #[test]
    fn status_lines() {
        let mut s = session();
        s.set_gap(Port::Port0, Some(1000), false).unwrap();
        s.refresh().unwrap();
        let status = s.status().to_string();
        assert_eq!(status.lines().count(), 6);
        assert!(status.contains("nf0 delay: delay 1,000ns enable true reset false use_reg true"));
        assert!(status.contains("nf1 rate limiter:"));
    }
}
