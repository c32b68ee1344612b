//! Sample conversion between wire and host formats.
//!
//! Wire samples are big-endian complex integers:
//! - `sc16`: one 32-bit word per sample, I in the high half-word
//! - `sc8`: one 16-bit half-word per sample, I in the high byte
//!
//! Host samples are `Complex<f32>` (`fc32`) or `Complex<i16>` (`sc16`).

use std::fmt;
use std::str::FromStr;

use num_complex::Complex;

use crate::error::PacketError;

const SC16_FULL_SCALE: f32 = 32768.0;
const SC8_FULL_SCALE: f32 = 128.0;

/// Over-the-wire sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WireFormat {
    #[default]
    Sc16,
    /// Receive only.
    Sc8,
}

impl WireFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            WireFormat::Sc16 => 4,
            WireFormat::Sc8 => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WireFormat::Sc16 => "sc16",
            WireFormat::Sc8 => "sc8",
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireFormat {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sc16" => Ok(WireFormat::Sc16),
            "sc8" => Ok(WireFormat::Sc8),
            other => Err(PacketError::UnknownFormat(other.to_string())),
        }
    }
}

/// Host-side sample format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HostFormat {
    #[default]
    Fc32,
    Sc16,
}

impl HostFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            HostFormat::Fc32 => "fc32",
            HostFormat::Sc16 => "sc16",
        }
    }
}

impl fmt::Display for HostFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostFormat {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fc32" => Ok(HostFormat::Fc32),
            "sc16" => Ok(HostFormat::Sc16),
            other => Err(PacketError::UnknownFormat(other.to_string())),
        }
    }
}

/// A host sample type a streamer can be instantiated over.
pub trait HostSample: Copy + Default + Send + Sync + 'static {
    const FORMAT: HostFormat;

    /// Convert one `sc16` wire sample. `scale` is the streamer scale factor.
    fn from_sc16(i: i16, q: i16, scale: f32) -> Self;

    /// Convert one `sc8` wire sample.
    fn from_sc8(i: i8, q: i8, scale: f32) -> Self;

    /// Convert to an `sc16` wire sample, saturating.
    fn to_sc16(self) -> (i16, i16);
}

impl HostSample for Complex<f32> {
    const FORMAT: HostFormat = HostFormat::Fc32;

    fn from_sc16(i: i16, q: i16, scale: f32) -> Self {
        let k = scale / SC16_FULL_SCALE;
        Complex::new(f32::from(i) * k, f32::from(q) * k)
    }

    fn from_sc8(i: i8, q: i8, scale: f32) -> Self {
        let k = scale / SC8_FULL_SCALE;
        Complex::new(f32::from(i) * k, f32::from(q) * k)
    }

    fn to_sc16(self) -> (i16, i16) {
        (saturate(self.re), saturate(self.im))
    }
}

impl HostSample for Complex<i16> {
    const FORMAT: HostFormat = HostFormat::Sc16;

    fn from_sc16(i: i16, q: i16, _scale: f32) -> Self {
        Complex::new(i, q)
    }

    fn from_sc8(i: i8, q: i8, _scale: f32) -> Self {
        Complex::new(i16::from(i), i16::from(q))
    }

    fn to_sc16(self) -> (i16, i16) {
        (self.re, self.im)
    }
}

fn saturate(x: f32) -> i16 {
    // `as` saturates and maps NaN to zero.
    (x * SC16_FULL_SCALE) as i16
}

/// Convert wire samples in `src` into `dst`.
///
/// Returns the number of samples written: the smaller of the whole samples
/// in `src` and `dst.len()`.
pub fn wire_to_host<T: HostSample>(wire: WireFormat, src: &[u8], dst: &mut [T], scale: f32) -> usize {
    let width = wire.bytes_per_sample();
    let count = (src.len() / width).min(dst.len());
    for (sample, out) in src.chunks_exact(width).zip(dst.iter_mut()).take(count) {
        *out = match wire {
            WireFormat::Sc16 => T::from_sc16(
                i16::from_be_bytes([sample[0], sample[1]]),
                i16::from_be_bytes([sample[2], sample[3]]),
                scale,
            ),
            WireFormat::Sc8 => T::from_sc8(sample[0] as i8, sample[1] as i8, scale),
        };
    }
    count
}

/// Convert host samples into `sc16` wire samples.
///
/// Returns the number of samples written.
pub fn host_to_wire<T: HostSample>(src: &[T], dst: &mut [u8]) -> usize {
    let width = WireFormat::Sc16.bytes_per_sample();
    let count = src.len().min(dst.len() / width);
    for (sample, out) in src.iter().zip(dst.chunks_exact_mut(width)).take(count) {
        let (i, q) = sample.to_sc16();
        out[..2].copy_from_slice(&i.to_be_bytes());
        out[2..].copy_from_slice(&q.to_be_bytes());
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sc16_puts_i_in_high_half_word() {
        let src = [Complex::new(0x0102i16, -2)];
        let mut wire = [0u8; 4];
        assert_eq!(host_to_wire(&src, &mut wire), 1);
        assert_eq!(wire, [0x01, 0x02, 0xff, 0xfe]);

        let mut back = [Complex::<i16>::default()];
        assert_eq!(wire_to_host(WireFormat::Sc16, &wire, &mut back, 1.0), 1);
        assert_eq!(back, src);
    }

    #[test]
    fn fc32_is_scaled_from_full_scale() {
        let wire = [0x40, 0x00, 0xc0, 0x00];
        let mut out = [Complex::<f32>::default()];
        wire_to_host(WireFormat::Sc16, &wire, &mut out, 1.0);
        assert_eq!(out[0], Complex::new(0.5, -0.5));

        wire_to_host(WireFormat::Sc16, &wire, &mut out, 2.0);
        assert_eq!(out[0], Complex::new(1.0, -1.0));
    }

    #[test]
    fn sc8_scales_by_128() {
        let wire = [0x40, 0x80, 0x20, 0x00];
        let mut out = [Complex::<f32>::default(); 4];
        assert_eq!(wire_to_host(WireFormat::Sc8, &wire, &mut out, 1.0), 2);
        assert_eq!(out[0], Complex::new(0.5, -1.0));
        assert_eq!(out[1], Complex::new(0.25, 0.0));
    }

    #[test]
    fn fc32_to_wire_saturates() {
        let src = [Complex::new(2.0f32, -2.0), Complex::new(0.25, f32::NAN)];
        let mut wire = [0u8; 8];
        assert_eq!(host_to_wire(&src, &mut wire), 2);
        assert_eq!(&wire[..4], &[0x7f, 0xff, 0x80, 0x00]);
        assert_eq!(&wire[4..], &[0x20, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn conversion_stops_at_shorter_side() {
        let src = [Complex::new(1i16, 1); 3];
        let mut wire = [0u8; 10];
        assert_eq!(host_to_wire(&src, &mut wire), 2);

        let mut out = [Complex::<i16>::default(); 1];
        assert_eq!(wire_to_host(WireFormat::Sc16, &wire, &mut out, 1.0), 1);
    }

    #[test]
    fn format_names_parse() {
        assert_eq!("sc8".parse::<WireFormat>(), Ok(WireFormat::Sc8));
        assert_eq!("fc32".parse::<HostFormat>(), Ok(HostFormat::Fc32));
        assert_eq!(
            "fc64".parse::<HostFormat>(),
            Err(PacketError::UnknownFormat("fc64".into()))
        );
    }
}
