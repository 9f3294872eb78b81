#![doc = include_str!("../README.md")]
#![warn(rust_2018_idioms)]

pub use crate::axi::{AuditLog, AxiLib, BusTransport, RegisterBus};
pub use crate::capture::{CaptureCodec, CaptureSet, CapturedFrame, PcapFile, TimingHeader};
pub use crate::config::{Config, Verify};
pub use crate::engine::{LoadStats, PcapEngine, ReplayState};
pub use crate::error::{Error, ErrorKind};
pub use crate::link::{LinkTransmit, PnetLink};
pub use crate::modules::{DelayHeaderExtractor, InterPacketDelay, RateLimiter};
pub use crate::port::{PerPort, Port};
pub use crate::session::Session;
pub use crate::timing::{Clock, Nanos, RateEstimate};

pub mod axi;
pub mod capture;
pub mod register;
pub mod timing;

mod config;
mod engine;
mod error;
mod link;
mod modules;
mod port;
mod session;

#[cfg(test)]
mod mock;
