use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Asynchronous event code reported by a transmit DSP.
    ///
    /// Carried in the low byte of a context packet's trailer. Code zero is a
    /// plain flow-control acknowledgement and never becomes an event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventCode: u8 {
        const BURST_ACK           = 0x01;
        const UNDERFLOW           = 0x02;
        const SEQ_ERROR           = 0x04;
        const TIME_ERROR          = 0x08;
        const UNDERFLOW_IN_PACKET = 0x10;
        const SEQ_ERROR_IN_BURST  = 0x20;
        const OTHER               = 0x40;
    }
}

impl EventCode {
    /// Code zero: the packet only acknowledges sequence progress.
    pub const FLOW_CONTROL_ACK: u8 = 0;

    /// Build from a wire code, keeping unknown bits.
    pub fn from_wire(code: u8) -> Self {
        Self::from_bits_retain(code)
    }

    /// One-letter console classification: `U` underflow, `S` sequence
    /// error, `L` late packet.
    pub fn letter(self) -> Option<char> {
        if self.intersects(Self::UNDERFLOW | Self::UNDERFLOW_IN_PACKET) {
            Some('U')
        } else if self.intersects(Self::SEQ_ERROR | Self::SEQ_ERROR_IN_BURST) {
            Some('S')
        } else if self.contains(Self::TIME_ERROR) {
            Some('L')
        } else {
            None
        }
    }

    /// Names of the known flags set in this code.
    pub fn flag_names(self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

/// Absolute device time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeSpec {
    pub full_secs: i64,
    /// Fraction of a second in `[0, 1)`.
    pub frac_secs: f64,
}

impl TimeSpec {
    /// Time from integer seconds plus `ticks` at `tick_rate` Hz.
    pub fn from_ticks(seconds: u32, ticks: u64, tick_rate: f64) -> Self {
        if tick_rate.is_nan() || tick_rate <= 0.0 {
            return Self {
                full_secs: i64::from(seconds),
                frac_secs: 0.0,
            };
        }
        let rate = tick_rate as u64;
        let (whole, rem) = if rate > 0 && (rate as f64) == tick_rate {
            (ticks / rate, (ticks % rate) as f64 / tick_rate)
        } else {
            let t = ticks as f64 / tick_rate;
            (t.trunc() as u64, t.fract())
        };
        Self {
            full_secs: i64::from(seconds) + whole as i64,
            frac_secs: rem,
        }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.full_secs as f64 + self.frac_secs
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.9}s", self.as_secs_f64())
    }
}

/// A device notification surfaced to the application.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncEvent {
    /// Logical transmit channel the report belongs to.
    pub channel: usize,
    pub code: EventCode,
    pub time_spec: Option<TimeSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_letters() {
        assert_eq!(EventCode::UNDERFLOW.letter(), Some('U'));
        assert_eq!(EventCode::UNDERFLOW_IN_PACKET.letter(), Some('U'));
        assert_eq!(EventCode::SEQ_ERROR_IN_BURST.letter(), Some('S'));
        assert_eq!(EventCode::TIME_ERROR.letter(), Some('L'));
        assert_eq!(EventCode::BURST_ACK.letter(), None);
    }

    #[test]
    fn unknown_bits_are_kept() {
        let code = EventCode::from_wire(0x82);
        assert_eq!(code.bits(), 0x82);
        assert_eq!(code.flag_names(), vec!["UNDERFLOW"]);
    }

    #[test]
    fn ticks_convert_through_rate() {
        let ts = TimeSpec::from_ticks(10, 150_000_000, 100e6);
        assert_eq!(ts.full_secs, 11);
        assert!((ts.frac_secs - 0.5).abs() < 1e-12);

        let odd = TimeSpec::from_ticks(0, 3, 2.5);
        assert_eq!(odd.full_secs, 1);
        assert!((odd.frac_secs - 0.2).abs() < 1e-9);
    }

    #[test]
    fn zero_rate_drops_fraction() {
        let ts = TimeSpec::from_ticks(7, 99, 0.0);
        assert_eq!(ts, TimeSpec { full_secs: 7, frac_secs: 0.0 });
    }
}
