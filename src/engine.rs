//! Pcap replay engine
//!
//! Frames are staged into the generator by transmitting them once on the
//! port they will be replayed from; the engine's registers then control when
//! and how often the staged frames are replayed.
//!
//! ```text
//!   Idle --load--> Loading --strobes done--> Armed --run--> Triggered
//!    ^                                                          |
//!    +--------------------------- clear ------------------------+
//! ```

use crate::axi::{address, BusTransport, RegisterBus};
use crate::capture::{delta_ticks, CaptureSet, CapturedFrame, TimingHeader};
use crate::config::Config;
use crate::error::Error;
use crate::link::LinkTransmit;
use crate::port::{PerPort, Port};
use crate::register::{ControlDevice, FieldSpec, RESET};

use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

/// Hold time of the begin-replay pulse
const BEGIN_REPLAY_PULSE: Duration = Duration::from_millis(100);
/// Wait after a port's frames are sent, before its load strobe
const PORT_SETTLE: Duration = Duration::from_secs(1);
/// Hold time of a port's load strobe
const LOAD_STROBE_HOLD: Duration = Duration::from_millis(500);
/// Wait after asserting reset in a bare load
const RESET_SETTLE: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReplayState {
    Idle,
    Loading,
    Armed { ports: Vec<Port> },
    Triggered { ports: Vec<Port> },
}

/// What was staged on one port
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LoadStats {
    /// Mean frame length in bytes, FCS excluded
    pub average_frame_len: f64,
    /// Mean number of 64-byte words per frame
    pub average_word_count: f64,
    pub frames_loaded: usize,
}

impl LoadStats {
    /// Averages over `frames`; `None` when there are none
    pub fn from_frames(frames: &[CapturedFrame]) -> Option<Self> {
        if frames.is_empty() {
            return None;
        }
        let n = frames.len() as f64;
        let total_len: usize = frames.iter().map(CapturedFrame::len).sum();
        let total_words: usize = frames.iter().map(CapturedFrame::word_count).sum();
        Some(LoadStats {
            average_frame_len: total_len as f64 / n,
            average_word_count: total_words as f64 / n,
            frames_loaded: frames.len(),
        })
    }
}

impl fmt::Display for LoadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} frames, average length {:.2}B, average {:.2} words",
            self.frames_loaded, self.average_frame_len, self.average_word_count
        )
    }
}

#[derive(Debug)]
pub struct PcapEngine {
    dev: ControlDevice,
    strobes: PerPort<u32>,
    state: ReplayState,
}

impl PcapEngine {
    const BEGIN_REPLAY: usize = 1;
    const REPLAY_CNT: [usize; 2] = [2, 3];
    // Writing 0x4 triggers both ports at once.
    const LAYOUT: [FieldSpec; 4] = [
        FieldSpec::flag("reset", 0x0),
        FieldSpec::flag("begin_replay", 0x4),
        FieldSpec::value("replay_cnt_0", 0xc),
        FieldSpec::value("replay_cnt_1", 0x10),
    ];
    /// Per-port "frames loaded" strobes, write-only
    const LOAD_STROBE: [u32; 2] = [0x2c, 0x30];

    /// Bind the engine and read its state from hardware
    pub fn new<T: BusTransport>(bus: &mut RegisterBus<T>, base: u32) -> Result<Self, Error> {
        let dev = ControlDevice::new(bus, "pcap engine", base, &Self::LAYOUT)?;
        Ok(PcapEngine {
            dev,
            strobes: PerPort::from_fn(|p| address(base, Self::LOAD_STROBE[p.index()])),
            state: ReplayState::Idle,
        })
    }

    pub fn from_config<T: BusTransport>(
        bus: &mut RegisterBus<T>,
        config: &Config,
    ) -> Result<Self, Error> {
        PcapEngine::new(bus, config.pcap_engine_base)
    }

    pub fn state(&self) -> &ReplayState {
        &self.state
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

    pub fn begin_replay<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
    ) -> Result<bool, Error> {
        self.dev.get_flag(bus, Self::BEGIN_REPLAY)
    }

    pub fn replay_count<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
    ) -> Result<PerPort<u32>, Error> {
        PerPort::try_from_fn(|p| self.dev.get_value(bus, Self::REPLAY_CNT[p.index()]))
    }

    /// Program the replay counters; ports given `None` keep theirs
    pub fn set_replay_count<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        counts: &PerPort<Option<u32>>,
    ) -> Result<PerPort<u32>, Error> {
        for (port, count) in counts.iter() {
            if let Some(n) = count {
                self.dev.set_value(bus, Self::REPLAY_CNT[port.index()], *n)?;
                debug!(%port, count = n, "replay count set");
            }
        }
        Ok(self.cached_replay_count())
    }

    pub fn cached_replay_count(&self) -> PerPort<u32> {
        PerPort::from_fn(|p| self.dev.register(Self::REPLAY_CNT[p.index()]).value())
    }

    /// Stage `captures` and arm replay on every port that has frames
    ///
    /// Returns, per staged port, the averages the rate limiter needs.
    pub fn load_pcap<T: BusTransport, L: LinkTransmit>(
        &mut self,
        bus: &mut RegisterBus<T>,
        link: &mut L,
        captures: &CaptureSet,
    ) -> Result<PerPort<Option<LoadStats>>, Error> {
        self.load(bus, link, captures, false)
    }

    /// Like [`PcapEngine::load_pcap`], with a timing header ahead of every
    /// frame carrying the frame's original gap to its predecessor
    pub fn load_pcap_timestamped<T: BusTransport, L: LinkTransmit>(
        &mut self,
        bus: &mut RegisterBus<T>,
        link: &mut L,
        captures: &CaptureSet,
    ) -> Result<PerPort<Option<LoadStats>>, Error> {
        self.load(bus, link, captures, true)
    }

    fn load<T: BusTransport, L: LinkTransmit>(
        &mut self,
        bus: &mut RegisterBus<T>,
        link: &mut L,
        captures: &CaptureSet,
        timestamped: bool,
    ) -> Result<PerPort<Option<LoadStats>>, Error> {
        validate(captures)?;
        info!(timestamped, "loading captures");

        self.set_reset(bus, true)?;
        self.pulse_begin_replay(bus)?;
        self.set_reset(bus, false)?;
        self.state = ReplayState::Loading;

        let mut report = PerPort::default();
        let mut ports = vec![];
        for (port, frames) in captures.iter() {
            let deltas = if timestamped {
                delta_ticks(frames)
            } else {
                vec![]
            };
            for (i, frame) in frames.iter().enumerate() {
                if let Some(ticks) = deltas.get(i) {
                    link.send(port, &TimingHeader::new(*ticks).to_frame())?;
                }
                link.send(port, &frame.data)?;
            }
            let stats = LoadStats::from_frames(frames);
            if let Some(stats) = &stats {
                info!(%port, %stats, "frames staged");
            }
            report[port] = stats;

            self.strobe(bus, port, Some(LOAD_STROBE_HOLD))?;
            ports.push(port);
        }

        self.state = ReplayState::Armed { ports };
        Ok(report)
    }

    /// Stage frames without touching replay state or computing statistics
    ///
    /// Reset is left asserted; the next load or clear releases it.
    pub fn load_only<T: BusTransport, L: LinkTransmit>(
        &mut self,
        bus: &mut RegisterBus<T>,
        link: &mut L,
        captures: &CaptureSet,
    ) -> Result<(), Error> {
        validate(captures)?;
        self.set_reset(bus, true)?;
        bus.settle(RESET_SETTLE);
        self.state = ReplayState::Loading;
        for (port, frames) in captures.iter() {
            for frame in frames {
                link.send(port, &frame.data)?;
            }
            self.strobe(bus, port, None)?;
        }
        Ok(())
    }

    /// Start replay on the armed ports
    ///
    /// The current begin-replay value is read but does not decide anything:
    /// the pulse is issued whatever the state, and the flag ends deasserted.
    pub fn run<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<(), Error> {
        let current = self.begin_replay(bus)?;
        debug!(begin_replay = current, "trigger");
        self.pulse_begin_replay(bus)?;
        let ports = match &self.state {
            ReplayState::Armed { ports } | ReplayState::Triggered { ports } => ports.clone(),
            _ => vec![],
        };
        info!(?ports, "replay triggered");
        self.state = ReplayState::Triggered { ports };
        Ok(())
    }

    /// Alias of [`PcapEngine::run`]
    pub fn trigger<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<(), Error> {
        self.run(bus)
    }

    /// Pulse begin-replay to halt replay; the replay state is kept
    pub fn stop_replay<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<(), Error> {
        self.pulse_begin_replay(bus)
    }

    /// Return to idle: no replay, both counters zero, reset released
    pub fn clear<T: BusTransport>(&mut self, bus: &mut RegisterBus<T>) -> Result<(), Error> {
        self.set_reset(bus, true)?;
        self.pulse_begin_replay(bus)?;
        self.set_replay_count(bus, &PerPort::new(Some(0), Some(0)))?;
        self.set_reset(bus, false)?;
        self.state = ReplayState::Idle;
        info!("replay cleared");
        Ok(())
    }

    // write 1, hold, write 0 and confirm
    fn pulse_begin_replay<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
    ) -> Result<(), Error> {
        let addr = self.dev.register(Self::BEGIN_REPLAY).addr();
        bus.write(addr, 1)?;
        bus.settle(BEGIN_REPLAY_PULSE);
        self.dev.set_flag(bus, Self::BEGIN_REPLAY, false)?;
        Ok(())
    }

    fn strobe<T: BusTransport>(
        &mut self,
        bus: &mut RegisterBus<T>,
        port: Port,
        hold: Option<Duration>,
    ) -> Result<(), Error> {
        let addr = self.strobes[port];
        bus.settle(PORT_SETTLE);
        bus.write(addr, 1)?;
        if let Some(d) = hold {
            bus.settle(d);
        }
        bus.write(addr, 0)?;
        debug!(%port, "load strobe");
        Ok(())
    }
}

impl fmt::Display for PcapEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.dev, self.state)
    }
}

fn validate(captures: &CaptureSet) -> Result<(), Error> {
    if captures.is_empty() {
        return Err(Error::InvalidArgument("no capture chosen for any port".to_string()));
    }
    for (port, frames) in captures.iter() {
        if frames.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "capture for {} has no frames",
                port
            )));
        }
    }
    Ok(())
}
