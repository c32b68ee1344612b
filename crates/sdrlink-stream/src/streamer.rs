//! Receive and transmit streamers.
//!
//! A streamer is built by [`IoSubsystem`](crate::io::IoSubsystem) over a set
//! of bound channels and owned by the application. The subsystem keeps only
//! a weak reference to each streamer's [`RateControl`] so it can push rate
//! changes without extending the streamer's life.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use sdrlink_transport::DatagramTransport;
use sdrlink_vrt::{
    host_to_wire, pack, unpack, wire_to_host, HostSample, PacketHeader, WireFormat,
    MAX_HEADER_BYTES, SEQUENCE_BYTES, TRAILER_BYTES,
};
use tracing::{debug, trace, warn};

use crate::error::{Result, StreamError};
use crate::events::TimeSpec;
use crate::flow_control::FlowControlMonitor;

/// Worst-case bytes per packet that are not samples.
pub const PACKET_OVERHEAD_BYTES: usize = MAX_HEADER_BYTES + SEQUENCE_BYTES + TRAILER_BYTES;

/// Samples that fit in one `frame_size` byte packet.
pub fn samples_per_packet(frame_size: usize, wire: WireFormat) -> Result<usize> {
    let spp = frame_size.saturating_sub(PACKET_OVERHEAD_BYTES) / wire.bytes_per_sample();
    if spp == 0 {
        return Err(StreamError::FrameTooSmall {
            frame_size,
            overhead: PACKET_OVERHEAD_BYTES,
        });
    }
    Ok(spp)
}

/// Rates currently applied to a streamer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub tick_rate: f64,
    pub samp_rate: f64,
    /// Multiplier applied on top of full-scale normalisation (receive only).
    pub scale: f32,
}

/// Rate settings shared between a streamer and the subsystem.
#[derive(Debug)]
pub struct RateControl {
    rates: Mutex<Rates>,
}

impl RateControl {
    pub fn new(tick_rate: f64) -> Self {
        Self {
            rates: Mutex::new(Rates {
                tick_rate,
                samp_rate: 0.0,
                scale: 1.0,
            }),
        }
    }

    pub fn rates(&self) -> Rates {
        *self.lock()
    }

    pub fn set_tick_rate(&self, rate: f64) {
        self.lock().tick_rate = rate;
    }

    pub fn set_samp_rate(&self, rate: f64) {
        self.lock().samp_rate = rate;
    }

    pub fn set_scale(&self, scale: f32) {
        self.lock().scale = scale;
    }

    fn lock(&self) -> MutexGuard<'_, Rates> {
        self.rates.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-send burst and timing flags.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TxMetadata {
    pub start_of_burst: bool,
    pub end_of_burst: bool,
    /// Device time at which the first sample is sent.
    pub time_spec: Option<TimeSpec>,
}

/// Result of a send call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    /// Samples per channel handed to the transport.
    pub samples: usize,
    /// A flow-control or frame acquisition wait expired before completion.
    pub timed_out: bool,
}

/// One bound transmit channel.
#[derive(Clone)]
pub(crate) struct TxChannel {
    pub transport: Arc<dyn DatagramTransport>,
    pub monitor: Arc<FlowControlMonitor>,
    pub sid: u32,
}

/// Flow-controlled multi-channel transmit streamer.
pub struct TxStreamer<T: HostSample> {
    channels: Vec<TxChannel>,
    packet_counts: Vec<u8>,
    spp: usize,
    rates: Arc<RateControl>,
    _sample: PhantomData<fn(&[T])>,
}

impl<T: HostSample> TxStreamer<T> {
    pub(crate) fn new(channels: Vec<TxChannel>, spp: usize, rates: Arc<RateControl>) -> Self {
        let packet_counts = vec![0; channels.len()];
        Self {
            channels,
            packet_counts,
            spp,
            rates,
            _sample: PhantomData,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Maximum samples per channel in one packet.
    pub fn max_samples_per_packet(&self) -> usize {
        self.spp
    }

    pub fn rates(&self) -> Rates {
        self.rates.rates()
    }

    /// Send `buffs[i]` on channel `i`, fragmenting into packets.
    ///
    /// Every packet waits up to `timeout` for flow-control admission and
    /// again for a send frame. An expired wait ends the call early with
    /// `timed_out` set; it is not an error. A zero-length send with
    /// `end_of_burst` emits one empty terminating packet.
    pub fn send(&mut self, buffs: &[&[T]], metadata: &TxMetadata, timeout: Duration) -> Result<SendOutcome> {
        if buffs.len() != self.channels.len() {
            return Err(StreamError::ChannelOutOfRange {
                index: buffs.len(),
                total: self.channels.len(),
            });
        }
        let total = buffs.iter().map(|b| b.len()).min().unwrap_or(0);
        if total == 0 && !metadata.end_of_burst {
            return Ok(SendOutcome {
                samples: 0,
                timed_out: false,
            });
        }

        let tick_rate = self.rates.rates().tick_rate;
        let time = metadata.time_spec.map(|ts| to_ticks(ts, tick_rate));

        let mut sent = 0;
        loop {
            let n = self.spp.min(total - sent);
            let first = sent == 0;
            let last = sent + n == total;
            for (chan, buff) in buffs.iter().enumerate() {
                let mut header = PacketHeader::data(self.channels[chan].sid, 1 + n);
                header.packet_count = self.packet_counts[chan];
                header.start_of_burst = first && metadata.start_of_burst;
                header.end_of_burst = last && metadata.end_of_burst;
                if first {
                    if let Some((seconds, ticks)) = time {
                        header = header.with_time(seconds, ticks);
                    }
                }
                if !self.send_packet(chan, &header, &buff[sent..sent + n], timeout)? {
                    return Ok(SendOutcome {
                        samples: sent,
                        timed_out: true,
                    });
                }
                self.packet_counts[chan] = self.packet_counts[chan].wrapping_add(1) & 0xf;
            }
            sent += n;
            if sent >= total {
                break;
            }
        }
        Ok(SendOutcome {
            samples: sent,
            timed_out: false,
        })
    }

    fn send_packet(&self, chan: usize, header: &PacketHeader, samples: &[T], timeout: Duration) -> Result<bool> {
        let channel = &self.channels[chan];
        if !channel.monitor.admit(timeout) {
            trace!(chan, "send timed out waiting for flow control");
            return Ok(false);
        }
        let Some(mut frame) = channel.transport.acquire_send_frame(timeout)? else {
            trace!(chan, "send timed out waiting for a frame");
            return Ok(false);
        };

        // Pack before issuing so a rejected header leaves no sequence gap.
        let offset = pack(header, 0, frame.as_mut())?;
        let seq = channel.monitor.issue_sequence();
        frame.as_mut()[offset - SEQUENCE_BYTES..offset].copy_from_slice(&seq.to_be_bytes());
        host_to_wire(samples, &mut frame.as_mut()[offset..]);
        frame.commit(header.packet_bytes())?;
        Ok(true)
    }

    /// Wait up to `timeout` until the device has acknowledged every packet
    /// sent on every channel.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.channels.iter().all(|channel| {
            channel
                .monitor
                .wait_drained(deadline.saturating_duration_since(Instant::now()))
        })
    }
}

impl<T: HostSample> std::fmt::Debug for TxStreamer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxStreamer")
            .field("channels", &self.channels.len())
            .field("spp", &self.spp)
            .field("host_format", &T::FORMAT)
            .finish()
    }
}

fn to_ticks(ts: TimeSpec, tick_rate: f64) -> (u32, u64) {
    let seconds = ts.full_secs.clamp(0, i64::from(u32::MAX)) as u32;
    let ticks = (ts.frac_secs * tick_rate).round().max(0.0) as u64;
    (seconds, ticks)
}

/// Outcome classification of a receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RxErrorCode {
    #[default]
    None,
    /// Nothing arrived before the timeout.
    Timeout,
}

/// Metadata describing the samples returned by one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RxMetadata {
    /// Samples written to each channel buffer.
    pub samples: usize,
    pub error_code: RxErrorCode,
    /// Device time of the first returned sample, when the packet carried one
    /// and these samples start the packet.
    pub time_spec: Option<TimeSpec>,
    pub start_of_burst: bool,
    pub end_of_burst: bool,
    /// Samples of the current packet were already returned by earlier calls.
    pub fragment_offset: usize,
    /// The current packet has samples left for the next call.
    pub more_fragments: bool,
}

#[derive(Debug, Clone)]
struct DataPacket {
    sequence: u32,
    time: Option<(u32, u64)>,
    start_of_burst: bool,
    end_of_burst: bool,
    body: Bytes,
}

impl DataPacket {
    /// Returns true when `self` is strictly earlier than `other`.
    fn is_behind(&self, other: &DataPacket) -> bool {
        match (self.time, other.time) {
            (Some(a), Some(b)) => a < b,
            _ => (other.sequence.wrapping_sub(self.sequence) as i32) > 0,
        }
    }

    fn aligned_with(&self, other: &DataPacket) -> bool {
        match (self.time, other.time) {
            (Some(a), Some(b)) => a == b,
            _ => self.sequence == other.sequence,
        }
    }
}

/// One bound receive channel.
pub(crate) struct RxChannel {
    pub transport: Arc<dyn DatagramTransport>,
    pub sid: u32,
    staged: Option<DataPacket>,
}

impl RxChannel {
    pub(crate) fn new(transport: Arc<dyn DatagramTransport>, sid: u32) -> Self {
        Self {
            transport,
            sid,
            staged: None,
        }
    }

    /// Next data packet for this channel, or `None` past `deadline`.
    fn next_packet(&self, chan: usize, deadline: Instant) -> Result<Option<DataPacket>> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(frame) = self.transport.recv_frame(remaining)? else {
                return Ok(None);
            };
            let packet = match unpack(&frame) {
                Ok(packet) => packet,
                Err(err) => {
                    warn!(chan, error = %err, "dropping malformed data packet");
                    continue;
                }
            };
            let header = &packet.header;
            if header.stream_id != self.sid || !header.packet_type.is_data() {
                trace!(chan, sid = header.stream_id, "dropping packet not for this stream");
                continue;
            }
            return Ok(Some(DataPacket {
                sequence: packet.sequence,
                time: header.integer_time.zip(header.fractional_time),
                start_of_burst: header.start_of_burst,
                end_of_burst: header.end_of_burst,
                body: frame.slice_ref(packet.body),
            }));
        }
    }
}

/// Multi-channel receive streamer with cross-channel alignment.
pub struct RxStreamer<T: HostSample> {
    channels: Vec<RxChannel>,
    wire: WireFormat,
    spp: usize,
    rates: Arc<RateControl>,
    alignment_threshold: usize,
    misaligned: usize,
    current: Vec<DataPacket>,
    consumed: usize,
    _sample: PhantomData<fn() -> T>,
}

impl<T: HostSample> RxStreamer<T> {
    pub(crate) fn new(
        channels: Vec<RxChannel>,
        wire: WireFormat,
        spp: usize,
        rates: Arc<RateControl>,
        alignment_threshold: usize,
    ) -> Self {
        Self {
            channels,
            wire,
            spp,
            rates,
            alignment_threshold,
            misaligned: 0,
            current: Vec::new(),
            consumed: 0,
            _sample: PhantomData,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn max_samples_per_packet(&self) -> usize {
        self.spp
    }

    pub fn wire_format(&self) -> WireFormat {
        self.wire
    }

    pub fn alignment_threshold(&self) -> usize {
        self.alignment_threshold
    }

    pub fn set_alignment_threshold(&mut self, threshold: usize) {
        self.alignment_threshold = threshold.max(1);
    }

    pub fn rates(&self) -> Rates {
        self.rates.rates()
    }

    /// Receive samples into `buffs[i]` for channel `i`.
    ///
    /// Returns at most one packet's worth of samples. Packets larger than
    /// the buffers are returned over several calls.
    pub fn recv(&mut self, buffs: &mut [&mut [T]], timeout: Duration) -> Result<RxMetadata> {
        if buffs.len() != self.channels.len() {
            return Err(StreamError::ChannelOutOfRange {
                index: buffs.len(),
                total: self.channels.len(),
            });
        }
        if self.current.is_empty() && !self.collect_aligned(Instant::now() + timeout)? {
            return Ok(RxMetadata {
                error_code: RxErrorCode::Timeout,
                ..RxMetadata::default()
            });
        }

        let bps = self.wire.bytes_per_sample();
        let available = self
            .current
            .iter()
            .map(|p| p.body.len() / bps)
            .min()
            .unwrap_or(0);
        let wanted = buffs.iter().map(|b| b.len()).min().unwrap_or(0);
        let n = available.saturating_sub(self.consumed).min(wanted);

        let rates = self.rates.rates();
        for (packet, buff) in self.current.iter().zip(buffs.iter_mut()) {
            let src = &packet.body[self.consumed * bps..(self.consumed + n) * bps];
            wire_to_host(self.wire, src, &mut buff[..n], rates.scale);
        }

        let lead = &self.current[0];
        let metadata = RxMetadata {
            samples: n,
            error_code: RxErrorCode::None,
            time_spec: lead
                .time
                .filter(|_| self.consumed == 0)
                .map(|(s, t)| TimeSpec::from_ticks(s, t, rates.tick_rate)),
            start_of_burst: lead.start_of_burst && self.consumed == 0,
            end_of_burst: lead.end_of_burst && self.consumed + n >= available,
            fragment_offset: self.consumed,
            more_fragments: self.consumed + n < available,
        };

        self.consumed += n;
        if !metadata.more_fragments {
            self.current.clear();
            self.consumed = 0;
        }
        Ok(metadata)
    }

    /// Gather one packet per channel with matching sequence or time.
    ///
    /// Returns false on timeout; packets already staged are kept for the
    /// next call.
    fn collect_aligned(&mut self, deadline: Instant) -> Result<bool> {
        loop {
            for (chan, channel) in self.channels.iter_mut().enumerate() {
                if channel.staged.is_none() {
                    match channel.next_packet(chan, deadline)? {
                        Some(packet) => channel.staged = Some(packet),
                        None => return Ok(false),
                    }
                }
            }

            let staged: Vec<&DataPacket> = self.channels.iter().filter_map(|c| c.staged.as_ref()).collect();
            let Some(leader) = staged
                .iter()
                .copied()
                .reduce(|a, b| if a.is_behind(b) { b } else { a })
                .cloned()
            else {
                return Ok(false);
            };
            if staged.iter().all(|p| p.aligned_with(&leader)) {
                self.current = self
                    .channels
                    .iter_mut()
                    .filter_map(|c| c.staged.take())
                    .collect();
                self.consumed = 0;
                self.misaligned = 0;
                return Ok(true);
            }

            self.misaligned += 1;
            if self.misaligned > self.alignment_threshold {
                let consecutive = self.misaligned;
                self.misaligned = 0;
                for channel in &mut self.channels {
                    channel.staged = None;
                }
                warn!(consecutive, "receive channels failed to align");
                return Err(StreamError::Alignment { consecutive });
            }
            for (chan, channel) in self.channels.iter_mut().enumerate() {
                if channel.staged.as_ref().is_some_and(|p| p.is_behind(&leader)) {
                    debug!(chan, "dropping packet behind alignment leader");
                    channel.staged = None;
                }
            }
        }
    }

    /// Drop every packet already received or queued on the transports.
    pub fn flush(&mut self) -> Result<usize> {
        let mut dropped = self.current.len();
        self.current.clear();
        self.consumed = 0;
        self.misaligned = 0;
        for channel in &mut self.channels {
            dropped += usize::from(channel.staged.take().is_some());
            while channel.transport.recv_frame(Duration::ZERO)?.is_some() {
                dropped += 1;
            }
        }
        Ok(dropped)
    }
}

impl<T: HostSample> std::fmt::Debug for RxStreamer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RxStreamer")
            .field("channels", &self.channels.len())
            .field("wire", &self.wire)
            .field("spp", &self.spp)
            .field("host_format", &T::FORMAT)
            .finish()
    }
}
