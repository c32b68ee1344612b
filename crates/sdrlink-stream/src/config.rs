use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use sdrlink_vrt::{HostFormat, WireFormat, RX_SID_BASE, TX_ASYNC_SID_BASE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StreamError};
use crate::event_queue::DEFAULT_EVENT_QUEUE_DEPTH;

/// Default on-device transmit buffer capacity.
pub const DEFAULT_DEVICE_BUFFER_BYTES: usize = 1 << 20;

/// Default sc8 wire scalar.
pub const DEFAULT_SC8_SCALAR: u32 = 0x400;

/// I/O subsystem configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Bytes of transmit buffering on the device, per DSP.
    pub device_buffer_bytes: usize,
    /// Async events retained before the oldest is dropped.
    pub event_queue_depth: usize,
    /// Listener receive poll timeout in milliseconds.
    pub listener_poll_ms: u64,
    /// Stream id of transmit DSP 0's async reports.
    pub control_sid_base: u32,
    /// Stream id of receive DSP 0's samples.
    pub rx_sid_base: u32,
    /// Host socket buffering assumed for the receive alignment threshold.
    pub recv_buffer_budget: usize,
    /// Flow-control reports per second requested from each transmit DSP.
    pub updates_per_second: f64,
    /// Flow-control reports per full device buffer.
    pub updates_per_fifo: f64,
    /// Device tick rate at start-up, in Hz.
    pub tick_rate: f64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            device_buffer_bytes: DEFAULT_DEVICE_BUFFER_BYTES,
            event_queue_depth: DEFAULT_EVENT_QUEUE_DEPTH,
            listener_poll_ms: 100,
            control_sid_base: TX_ASYNC_SID_BASE,
            rx_sid_base: RX_SID_BASE,
            recv_buffer_budget: 50_000_000,
            updates_per_second: 20.0,
            updates_per_fifo: 8.0,
            tick_rate: 100e6,
        }
    }
}

impl IoConfig {
    pub fn listener_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.listener_poll_ms)
    }

    /// Consecutive misaligned receive packets tolerated before failing.
    pub fn alignment_threshold(&self, recv_frame_size: usize) -> usize {
        self.recv_buffer_budget
            .checked_div(recv_frame_size)
            .unwrap_or(0)
            .max(1)
    }

    /// Flow-control report cadence as (tick cycles, packets) per update.
    pub fn flow_control_cadence(&self, tick_rate: f64, send_frame_size: usize) -> (u64, u64) {
        let cycles = if self.updates_per_second > 0.0 {
            (tick_rate / self.updates_per_second) as u64
        } else {
            0
        };
        let packets = if self.updates_per_fifo > 0.0 && send_frame_size > 0 {
            (self.device_buffer_bytes as f64 / self.updates_per_fifo / send_frame_size as f64)
                as u64
        } else {
            0
        };
        (cycles, packets)
    }
}

/// Device behaviour when a transmit DSP runs out of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnderflowPolicy {
    NextPacket,
    NextBurst,
}

impl UnderflowPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            UnderflowPolicy::NextPacket => "next_packet",
            UnderflowPolicy::NextBurst => "next_burst",
        }
    }
}

impl fmt::Display for UnderflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnderflowPolicy {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "next_packet" => Ok(UnderflowPolicy::NextPacket),
            "next_burst" => Ok(UnderflowPolicy::NextBurst),
            other => Err(StreamError::InvalidArgs(format!(
                "unknown underflow_policy '{other}'"
            ))),
        }
    }
}

/// Stream construction request.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamArgs {
    /// `None` selects sc16.
    pub wire_format: Option<WireFormat>,
    pub host_format: HostFormat,
    /// Logical channels; empty selects channel 0.
    pub channels: Vec<usize>,
    /// Reset device queues and flow-control state on open.
    pub clear: bool,
    pub underflow_policy: Option<UnderflowPolicy>,
    pub sc8_scalar: u32,
}

impl Default for StreamArgs {
    fn default() -> Self {
        Self {
            wire_format: None,
            host_format: HostFormat::default(),
            channels: Vec::new(),
            clear: true,
            underflow_policy: None,
            sc8_scalar: DEFAULT_SC8_SCALAR,
        }
    }
}

impl StreamArgs {
    pub fn new(host_format: HostFormat) -> Self {
        Self {
            host_format,
            ..Self::default()
        }
    }

    pub fn with_channels(mut self, channels: impl Into<Vec<usize>>) -> Self {
        self.channels = channels.into();
        self
    }

    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = Some(format);
        self
    }

    /// Apply a `key=value,flag` device argument string.
    ///
    /// Recognised: `noclear`, `underflow_policy=`, `scalar=`, `otw=`.
    /// Other keys are ignored.
    pub fn apply_args(&mut self, args: &str) -> Result<()> {
        for item in args.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = match item.split_once('=') {
                Some((key, value)) => (key.trim(), Some(value.trim())),
                None => (item, None),
            };
            match (key, value) {
                ("noclear", _) => self.clear = false,
                ("underflow_policy", Some(value)) => self.underflow_policy = Some(value.parse()?),
                ("scalar", Some(value)) => {
                    let scalar: f64 = value
                        .parse()
                        .map_err(|_| StreamError::InvalidArgs(format!("bad scalar '{value}'")))?;
                    self.sc8_scalar = scalar as u32;
                }
                ("otw", Some("")) => self.wire_format = None,
                ("otw", Some(value)) => self.wire_format = Some(value.parse()?),
                (key @ ("underflow_policy" | "scalar" | "otw"), None) => {
                    return Err(StreamError::InvalidArgs(format!("'{key}' needs a value")));
                }
                (key, _) => debug!(key, "ignoring unrecognised stream arg"),
            }
        }
        Ok(())
    }

    /// Wire format after defaults.
    pub fn effective_wire_format(&self) -> WireFormat {
        self.wire_format.unwrap_or(WireFormat::Sc16)
    }

    /// Channel list after defaults.
    pub fn effective_channels(&self) -> Vec<usize> {
        if self.channels.is_empty() {
            vec![0]
        } else {
            self.channels.clone()
        }
    }
}

impl FromStr for StreamArgs {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        let mut args = Self::default();
        args.apply_args(s)?;
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_channel_and_format() {
        let args = StreamArgs::new(HostFormat::Sc16);
        assert_eq!(args.effective_channels(), vec![0]);
        assert_eq!(args.effective_wire_format(), WireFormat::Sc16);
        assert!(args.clear);
        assert_eq!(args.sc8_scalar, 0x400);
    }

    #[test]
    fn parses_device_arg_string() {
        let args: StreamArgs = "noclear, underflow_policy=next_burst,scalar=512.0,otw=sc8,spp=100"
            .parse()
            .unwrap();
        assert!(!args.clear);
        assert_eq!(args.underflow_policy, Some(UnderflowPolicy::NextBurst));
        assert_eq!(args.sc8_scalar, 512);
        assert_eq!(args.wire_format, Some(WireFormat::Sc8));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            "underflow_policy=never".parse::<StreamArgs>(),
            Err(StreamError::InvalidArgs(_))
        ));
        assert!(matches!(
            "otw=fc64".parse::<StreamArgs>(),
            Err(StreamError::Packet(_))
        ));
        assert!("scalar".parse::<StreamArgs>().is_err());
    }

    #[test]
    fn io_config_derived_values() {
        let config = IoConfig::default();
        assert_eq!(config.alignment_threshold(1472), 33967);
        assert_eq!(config.flow_control_cadence(100e6, 1472), (5_000_000, 89));
        assert_eq!(config.listener_poll_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn io_config_reads_partial_json() {
        let config: IoConfig =
            serde_json::from_str(r#"{"device_buffer_bytes": 4096, "tick_rate": 52e6}"#).unwrap();
        assert_eq!(config.device_buffer_bytes, 4096);
        assert_eq!(config.tick_rate, 52e6);
        assert_eq!(config.event_queue_depth, DEFAULT_EVENT_QUEUE_DEPTH);

        let json = serde_json::to_string(&UnderflowPolicy::NextPacket).unwrap();
        assert_eq!(json, "\"next_packet\"");
    }
}
