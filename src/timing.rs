//! Conversions between hardware ticks, nanoseconds and bit rates

use crate::config::Config;
use crate::error::Error;

use std::fmt;

const NS_PER_SEC: u64 = 1_000_000_000;

/// Frame check sequence, bytes
const FCS_LEN: f64 = 4.0;
/// Per-frame overhead on the wire, bits: FCS (32), inter-frame gap (96)
/// and preamble (64)
const FCS_BITS: f64 = 32.0;
const IFG_BITS: f64 = 96.0;
const PREAMBLE_BITS: f64 = 64.0;

/// A span of nanoseconds kept as the exact fraction `num / den`
#[derive(Copy, Clone, Debug)]
pub struct Nanos {
    num: u128,
    den: u128,
}

impl Nanos {
    pub const fn whole(ns: u64) -> Self {
        Nanos {
            num: ns as u128,
            den: 1,
        }
    }

    pub fn as_f64(self) -> f64 {
        (self.num / self.den) as f64 + (self.num % self.den) as f64 / self.den as f64
    }

    /// Whole nanoseconds, rounded down
    pub fn floor(self) -> u64 {
        (self.num / self.den).min(u64::MAX as u128) as u64
    }
}

impl From<u64> for Nanos {
    fn from(ns: u64) -> Self {
        Nanos::whole(ns)
    }
}

impl PartialEq for Nanos {
    fn eq(&self, other: &Self) -> bool {
        self.num * other.den == other.num * self.den
    }
}

impl fmt::Display for Nanos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.as_f64())
    }
}

/// Datapath clock
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Clock {
    hz: u64,
}

impl Clock {
    pub fn new(hz: u64) -> Result<Self, Error> {
        if hz == 0 {
            return Err(Error::InvalidArgument("clock frequency must be nonzero".to_string()));
        }
        Ok(Clock { hz })
    }

    pub fn hz(&self) -> u64 {
        self.hz
    }

    /// `ticks * 1e9 / hz`, exactly
    pub fn ticks_to_ns(&self, ticks: u64) -> Nanos {
        let g = gcd(NS_PER_SEC, self.hz);
        Nanos {
            num: ticks as u128 * (NS_PER_SEC / g) as u128,
            den: (self.hz / g) as u128,
        }
    }

    /// `floor(ns * hz / 1e9)`
    pub fn ns_to_ticks(&self, ns: Nanos) -> u64 {
        let t = ns.num * self.hz as u128 / (ns.den * NS_PER_SEC as u128);
        t.min(u64::MAX as u128) as u64
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl Default for Clock {
    fn default() -> Self {
        Clock {
            hz: Config::DATAPATH_FREQUENCY,
        }
    }
}

/// Transmit rate reachable with a given rate code
///
/// The rate limiter lets one frame through every `2^r + 1` slots; each slot
/// moves one 64-byte word per clock. The result is capped at what the line
/// itself can carry once per-frame overhead is paid.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RateEstimate {
    /// Achievable rate, bits per second, capped at `rate_max_bps`
    pub rate_bps: f64,
    /// Line rate left for frame data, bits per second
    pub rate_max_bps: f64,
    pub utilization_pct: f64,
}

impl RateEstimate {
    /// `avg_len` excludes the FCS; `avg_words` is the mean count of 64-byte
    /// words per frame
    pub fn new(
        rate_code: u32,
        avg_len: f64,
        avg_words: f64,
        clock: Clock,
        link_rate_bps: u64,
    ) -> Result<Self, Error> {
        if !(avg_len.is_finite() && avg_len > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "average frame length must be positive, got {}",
                avg_len
            )));
        }
        if !(avg_words.is_finite() && avg_words > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "average word count must be positive, got {}",
                avg_words
            )));
        }
        let rate = rate_bps(rate_code, avg_len, avg_words, clock);
        let rate_max = rate_max_bps(avg_len, link_rate_bps);
        let rate = rate.min(rate_max);
        Ok(RateEstimate {
            rate_bps: rate,
            rate_max_bps: rate_max,
            utilization_pct: rate / rate_max * 100.0,
        })
    }
}

/// `1 / (2^r + 1) * (L + 4) * 8 * hz / W`
pub fn rate_bps(rate_code: u32, avg_len: f64, avg_words: f64, clock: Clock) -> f64 {
    let slots = (rate_code as f64).exp2() + 1.0;
    1.0 / slots * (avg_len + FCS_LEN) * 8.0 * clock.hz as f64 / avg_words
}

/// `link * (8L + 32) / (8L + 32 + 96 + 64)`
pub fn rate_max_bps(avg_len: f64, link_rate_bps: u64) -> f64 {
    let frame_bits = avg_len * 8.0 + FCS_BITS;
    link_rate_bps as f64 * frame_bits / (frame_bits + IFG_BITS + PREAMBLE_BITS)
}

impl fmt::Display for RateEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (value, unit) = scale_bps(self.rate_bps);
        write!(f, "{:.2}{} {:.4}%", value, unit, self.utilization_pct)
    }
}

fn scale_bps(bps: f64) -> (f64, &'static str) {
    if bps >= 1e9 {
        (bps / 1e9, "Gbps")
    } else if bps >= 1e6 {
        (bps / 1e6, "Mbps")
    } else if bps >= 1e3 {
        (bps / 1e3, "Kbps")
    } else {
        (bps, "bps")
    }
}

/// `12345` -> `12,345ns`
pub fn format_ns(ns: u64) -> String {
    let digits = ns.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 2);
    for (i, c) in digits.chars().enumerate() {
        if i != 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.push_str("ns");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    const CLOCK: Clock = Clock {
        hz: Config::DATAPATH_FREQUENCY,
    };

    #[test]
    fn tick_conversion() {
        assert_eq!(CLOCK.ticks_to_ns(1).as_f64(), 4.0);
        assert_eq!(CLOCK.ticks_to_ns(250), Nanos::whole(1000));
        assert_eq!(CLOCK.ns_to_ticks(Nanos::whole(1000)), 250);
        assert_eq!(CLOCK.ns_to_ticks(Nanos::whole(7)), 1);
        let slow = Clock::new(156_250_000).unwrap();
        assert_eq!(slow.ns_to_ticks(Nanos::whole(64)), 10);
        assert_eq!(slow.ticks_to_ns(1).floor(), 6);
        assert_eq!(slow.ticks_to_ns(1).as_f64(), 6.4);
    }

    #[test]
    fn round_trip_off_divisor_clock() {
        let clock = Clock::new(156_250_000).unwrap();
        for t in 0..20 {
            assert_eq!(clock.ns_to_ticks(clock.ticks_to_ns(t)), t);
        }
    }

    #[test]
    fn zero_clock_rejected() {
        assert_eq!(Clock::new(0).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(Clock::default().hz(), Config::DATAPATH_FREQUENCY);
    }

    #[test]
    fn rate_at_line_rate() {
        // 0.5 * 1504 * 8 * 250e6 / 10 = 150.4G, above what a 100G line carries
        let est = RateEstimate::new(0, 1500.0, 10.0, CLOCK, Config::LINK_RATE).unwrap();
        assert_eq!(est.rate_bps, est.rate_max_bps);
        assert_eq!(est.utilization_pct, 100.0);
        let max = 1e11 * 12032.0 / 12192.0;
        assert!((est.rate_max_bps - max).abs() < 1e-3);
    }

    #[test]
    fn rate_below_line_rate() {
        // 1/(2^10+1) * 68 * 8 * 250e6 / 2
        let est = RateEstimate::new(10, 64.0, 2.0, CLOCK, Config::LINK_RATE).unwrap();
        let expect = 1.0 / 1025.0 * 68.0 * 8.0 * 250e6 / 2.0;
        assert!((est.rate_bps - expect).abs() < 1e-6);
        assert_eq!(est.to_string(), "66.34Mbps 0.0859%");
    }

    #[test]
    fn display_units() {
        let mk = |rate_bps| RateEstimate {
            rate_bps,
            rate_max_bps: 1e10,
            utilization_pct: rate_bps / 1e10 * 100.0,
        };
        assert_eq!(mk(9.5e9).to_string(), "9.50Gbps 95.0000%");
        assert_eq!(mk(2.5e6).to_string(), "2.50Mbps 0.0250%");
        assert_eq!(mk(1000.0).to_string(), "1.00Kbps 0.0000%");
        assert_eq!(mk(999.0).to_string(), "999.00bps 0.0000%");
    }

    #[test]
    fn rejects_degenerate_averages() {
        assert!(RateEstimate::new(0, 0.0, 1.0, CLOCK, Config::LINK_RATE).is_err());
        assert!(RateEstimate::new(0, 64.0, 0.0, CLOCK, Config::LINK_RATE).is_err());
        assert!(RateEstimate::new(0, f64::NAN, 1.0, CLOCK, Config::LINK_RATE).is_err());
    }

    #[test]
    fn ns_grouping() {
        assert_eq!(format_ns(0), "0ns");
        assert_eq!(format_ns(999), "999ns");
        assert_eq!(format_ns(1000), "1,000ns");
        assert_eq!(format_ns(1234567), "1,234,567ns");
    }

    proptest! {
        #[test]
        fn ticks_round_trip(
            t in any::<u64>(),
            hz in prop::sample::select(vec![
                250_000_000u64,
                156_250_000,
                322_265_625,
                200_000_000,
                1,
                3_000_000_007,
            ]),
        ) {
            let clock = Clock::new(hz).unwrap();
            prop_assert_eq!(clock.ns_to_ticks(clock.ticks_to_ns(t)), t);
        }

        #[test]
        fn rate_never_exceeds_line(
            r in 0u32..64,
            len in 1.0f64..16384.0,
            words in 1.0f64..256.0,
        ) {
            let est = RateEstimate::new(r, len, words, CLOCK, Config::LINK_RATE).unwrap();
            prop_assert!(est.rate_bps <= est.rate_max_bps);
            prop_assert!(est.utilization_pct >= 0.0 && est.utilization_pct <= 100.0);
        }
    }
}
