//! Captured frames, capture files and the synthetic timing header

use crate::error::Error;
use crate::port::{PerPort, Port};

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};
use zerocopy::byteorder::{BigEndian, U64};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

/// One frame as recorded, with its original capture time
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CapturedFrame {
    pub data: Bytes,
    /// Time since the Unix epoch
    pub timestamp: Duration,
}

impl CapturedFrame {
    pub fn new(data: impl Into<Bytes>, timestamp: Duration) -> Self {
        CapturedFrame {
            data: data.into(),
            timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of 64-byte datapath words the frame occupies
    pub fn word_count(&self) -> usize {
        (self.data.len() + 63) / 64
    }
}

/// Reads capture files
pub trait CaptureCodec {
    /// Decode every frame of `path`, in file order, timestamps untouched
    fn decode(&self, path: &Path) -> Result<Vec<CapturedFrame>, Error>;
}

/// Frames to replay, per port
#[derive(Clone, Debug, Default)]
pub struct CaptureSet {
    ports: PerPort<Option<Vec<CapturedFrame>>>,
}

impl CaptureSet {
    pub fn new() -> Self {
        CaptureSet::default()
    }

    pub fn with(mut self, port: Port, frames: Vec<CapturedFrame>) -> Self {
        self.insert(port, frames);
        self
    }

    pub fn insert(&mut self, port: Port, frames: Vec<CapturedFrame>) {
        self.ports[port] = Some(frames);
    }

    /// Decode the capture chosen for each port; ports without one are left out
    ///
    /// Every file is decoded before anything is returned, so a bad file
    /// leaves nothing half-loaded.
    pub fn open<C: CaptureCodec>(
        codec: &C,
        paths: &PerPort<Option<PathBuf>>,
    ) -> Result<Self, Error> {
        let ports = PerPort::try_from_fn(|port| {
            paths[port]
                .as_deref()
                .map(|path| codec.decode(path))
                .transpose()
        })?;
        Ok(CaptureSet { ports })
    }

    pub fn frames(&self, port: Port) -> Option<&[CapturedFrame]> {
        self.ports[port].as_deref()
    }

    /// Ports that have a capture, in port order
    pub fn iter(&self) -> impl Iterator<Item = (Port, &[CapturedFrame])> {
        self.ports
            .iter()
            .filter_map(|(port, frames)| frames.as_deref().map(|f| (port, f)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// Signature that opens every timing header frame
pub const TS_SIGNATURE: [u8; 8] = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x00, 0x00, 0x00];

/// Gap charged to the first frame of a capture, which has no predecessor
pub const FIRST_DELTA: Duration = Duration::from_secs(1);

/// Nanoseconds per timing header tick
const HEADER_NS_PER_TICK: u128 = 4;

/// Frame sent ahead of each replayed frame in timestamp mode
///
/// ```text
/// +---------------+---------------+---------------+---------------+
/// |      de       |      ad       |      be       |      ef       |
/// +---------------+---------------+---------------+---------------+
/// |      00       |      00       |      00       |      00       |
/// +---------------+---------------+---------------+---------------+
/// |                      Delay (ticks, 64bit BE)                  |
/// +                                                               +
/// |                                                               |
/// +---------------+---------------+---------------+---------------+
/// ```
#[derive(AsBytes, FromBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C)]
pub struct TimingHeader {
    signature: [u8; 8],
    delay: U64<BigEndian>,
}

impl TimingHeader {
    pub fn new(ticks: u64) -> Self {
        TimingHeader {
            signature: TS_SIGNATURE,
            delay: U64::new(ticks),
        }
    }

    /// Delay carried by a timing header frame, if `frame` is one
    pub fn parse(frame: &[u8]) -> Option<u64> {
        let hdr = LayoutVerified::<_, TimingHeader>::new_unaligned(frame)?;
        (hdr.signature == TS_SIGNATURE).then(|| hdr.delay.get())
    }

    pub fn ticks(&self) -> u64 {
        self.delay.get()
    }

    pub fn to_frame(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(std::mem::size_of::<TimingHeader>());
        frame.extend_from_slice(self.as_bytes());
        frame.freeze()
    }
}

/// Gaps between consecutive frames, as timing header ticks
///
/// The first frame is charged [`FIRST_DELTA`]. A frame stamped earlier than
/// its predecessor gets a zero gap.
pub fn delta_ticks(frames: &[CapturedFrame]) -> Vec<u64> {
    let mut prev: Option<Duration> = None;
    frames
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            let delta = match prev {
                None => FIRST_DELTA,
                Some(p) => frame.timestamp.checked_sub(p).unwrap_or_else(|| {
                    warn!(frame = i, "capture timestamps go backwards, using a zero gap");
                    Duration::ZERO
                }),
            };
            prev = Some(frame.timestamp);
            header_ticks(delta)
        })
        .collect()
}

/// `round(ns / 4.0)`, halves rounding up
fn header_ticks(delta: Duration) -> u64 {
    let ticks = (delta.as_nanos() + HEADER_NS_PER_TICK / 2) / HEADER_NS_PER_TICK;
    ticks.min(u64::MAX as u128) as u64
}

// Classic libpcap file layout. Byte order and timestamp resolution come from
// the magic number.

#[derive(AsBytes, FromBytes, Unaligned)]
#[repr(C)]
#[allow(dead_code)]
struct PcapGlobalHeader {
    magic: [u8; 4],
    version_major: [u8; 2],
    version_minor: [u8; 2],
    thiszone: [u8; 4],
    sigfigs: [u8; 4],
    snaplen: [u8; 4],
    network: [u8; 4],
}

#[derive(AsBytes, FromBytes, Unaligned)]
#[repr(C)]
#[allow(dead_code)]
struct PcapRecordHeader {
    ts_sec: [u8; 4],
    ts_frac: [u8; 4],
    incl_len: [u8; 4],
    orig_len: [u8; 4],
}

const PCAP_MAGIC_USEC: u32 = 0xa1b2_c3d4;
const PCAP_MAGIC_NSEC: u32 = 0xa1b2_3c4d;
const LINKTYPE_ETHERNET: u32 = 1;
const PCAP_SNAPLEN: u32 = 65535;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Endian {
    Little,
    Big,
}

impl Endian {
    fn u32(self, b: [u8; 4]) -> u32 {
        match self {
            Endian::Little => u32::from_le_bytes(b),
            Endian::Big => u32::from_be_bytes(b),
        }
    }
}

/// libpcap capture file codec
#[derive(Copy, Clone, Debug, Default)]
pub struct PcapFile;

impl PcapFile {
    /// Decode an in-memory capture; `path` only labels errors
    pub fn decode_bytes(path: &Path, data: Bytes) -> Result<Vec<CapturedFrame>, Error> {
        let (ghdr, _) = LayoutVerified::<_, PcapGlobalHeader>::new_unaligned_from_prefix(&data[..])
            .ok_or_else(|| Error::decode(path, "file is shorter than a pcap header"))?;
        let (endian, frac_ns) = match (
            u32::from_le_bytes(ghdr.magic),
            u32::from_be_bytes(ghdr.magic),
        ) {
            (PCAP_MAGIC_USEC, _) => (Endian::Little, 1_000),
            (PCAP_MAGIC_NSEC, _) => (Endian::Little, 1),
            (_, PCAP_MAGIC_USEC) => (Endian::Big, 1_000),
            (_, PCAP_MAGIC_NSEC) => (Endian::Big, 1),
            _ => {
                return Err(Error::decode(
                    path,
                    format!("bad magic {:02x?}", ghdr.magic),
                ))
            }
        };

        let mut frames = vec![];
        let mut off = std::mem::size_of::<PcapGlobalHeader>();
        while off < data.len() {
            let (rhdr, _) =
                LayoutVerified::<_, PcapRecordHeader>::new_unaligned_from_prefix(&data[off..])
                    .ok_or_else(|| {
                        Error::decode(path, format!("truncated record header at byte {}", off))
                    })?;
            let len = endian.u32(rhdr.incl_len) as usize;
            let sec = endian.u32(rhdr.ts_sec) as u64;
            let frac = endian.u32(rhdr.ts_frac) as u64 * frac_ns;
            if frac >= 1_000_000_000 {
                return Err(Error::decode(
                    path,
                    format!("bad timestamp fraction in record {}", frames.len()),
                ));
            }
            let start = off + std::mem::size_of::<PcapRecordHeader>();
            let end = start
                .checked_add(len)
                .filter(|end| *end <= data.len())
                .ok_or_else(|| {
                    Error::decode(path, format!("truncated record {}", frames.len()))
                })?;
            frames.push(CapturedFrame {
                data: data.slice(start..end),
                timestamp: Duration::from_secs(sec) + Duration::from_nanos(frac),
            });
            off = end;
        }
        debug!(path = %path.display(), frames = frames.len(), "capture decoded");
        Ok(frames)
    }

    /// Encode frames as a little-endian, nanosecond-resolution capture
    pub fn encode(frames: &[CapturedFrame]) -> Bytes {
        let ghdr = PcapGlobalHeader {
            magic: PCAP_MAGIC_NSEC.to_le_bytes(),
            version_major: 2u16.to_le_bytes(),
            version_minor: 4u16.to_le_bytes(),
            thiszone: [0; 4],
            sigfigs: [0; 4],
            snaplen: PCAP_SNAPLEN.to_le_bytes(),
            network: LINKTYPE_ETHERNET.to_le_bytes(),
        };
        let mut out = BytesMut::new();
        out.extend_from_slice(ghdr.as_bytes());
        for frame in frames {
            let len = (frame.len() as u32).to_le_bytes();
            let rhdr = PcapRecordHeader {
                ts_sec: (frame.timestamp.as_secs() as u32).to_le_bytes(),
                ts_frac: frame.timestamp.subsec_nanos().to_le_bytes(),
                incl_len: len,
                orig_len: len,
            };
            out.extend_from_slice(rhdr.as_bytes());
            out.extend_from_slice(&frame.data);
        }
        out.freeze()
    }
}

impl CaptureCodec for PcapFile {
    fn decode(&self, path: &Path) -> Result<Vec<CapturedFrame>, Error> {
        let data = std::fs::read(path).map_err(|e| Error::decode(path, e.to_string()))?;
        PcapFile::decode_bytes(path, Bytes::from(data))
    }
}
