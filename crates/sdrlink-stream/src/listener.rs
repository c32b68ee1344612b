//! Background control-plane listener.
//!
//! One listener runs per transmit channel, draining the low-rate side
//! channel that carries flow-control acknowledgements and async device
//! events. A malformed packet is logged and dropped; it never stops the
//! loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sdrlink_transport::{DatagramTransport, TransportError};
use sdrlink_vrt::{unpack, PacketError};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::event_queue::EventQueue;
use crate::events::{AsyncEvent, EventCode, TimeSpec};
use crate::flow_control::FlowControlMonitor;

/// Cooperative cancellation flag shared with a background task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Tick rate readable from listener threads while the foreground updates it.
#[derive(Debug)]
pub struct TickRate(AtomicU64);

impl TickRate {
    pub fn new(rate: f64) -> Self {
        Self(AtomicU64::new(rate.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, rate: f64) {
        self.0.store(rate.to_bits(), Ordering::Relaxed);
    }
}

/// What a listener did with one control packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Flow-control acknowledgement applied to the monitor.
    Acknowledged(u32),
    /// Event pushed to the queue.
    Event(EventCode),
    /// Packet not meant for this listener.
    Dropped,
}

/// Everything a listener needs to route one channel's control traffic.
#[derive(Debug, Clone)]
pub struct ListenerContext {
    /// Logical transmit channel reported on events.
    pub channel: usize,
    /// Stream id of this channel's control packets.
    pub control_sid: u32,
    pub monitor: Arc<FlowControlMonitor>,
    pub events: Arc<EventQueue>,
    pub tick_rate: Arc<TickRate>,
}

impl ListenerContext {
    /// Process one received datagram.
    pub fn handle_packet(&self, buf: &[u8]) -> std::result::Result<ControlOutcome, PacketError> {
        let packet = unpack(buf)?;
        let header = &packet.header;

        if header.stream_id != self.control_sid {
            trace!(
                channel = self.channel,
                sid = header.stream_id,
                expected = self.control_sid,
                "dropping packet for foreign stream id"
            );
            return Ok(ControlOutcome::Dropped);
        }
        if header.packet_type.is_data() {
            trace!(channel = self.channel, "dropping data packet on control path");
            return Ok(ControlOutcome::Dropped);
        }

        let code = packet.context_code()?;
        if code == EventCode::FLOW_CONTROL_ACK {
            self.monitor.acknowledge(packet.sequence);
            trace!(channel = self.channel, seq = packet.sequence, "flow control ack");
            return Ok(ControlOutcome::Acknowledged(packet.sequence));
        }

        let code = EventCode::from_wire(code);
        let time_spec = match (header.integer_time, header.fractional_time) {
            (Some(seconds), Some(ticks)) => {
                Some(TimeSpec::from_ticks(seconds, ticks, self.tick_rate.get()))
            }
            _ => None,
        };
        match code.letter() {
            Some(letter) => debug!(channel = self.channel, code = code.bits(), "{letter}"),
            None => debug!(channel = self.channel, code = code.bits(), "async event"),
        }
        self.events.push(AsyncEvent {
            channel: self.channel,
            code,
            time_spec,
        });
        Ok(ControlOutcome::Event(code))
    }
}

/// A running control-plane listener thread.
///
/// Dropping the listener cancels and joins the thread, so the transport it
/// reads from outlives it.
pub struct ControlListener {
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
    channel: usize,
}

impl ControlListener {
    /// Start draining `transport` on a background thread.
    pub fn spawn(
        transport: Arc<dyn DatagramTransport>,
        context: ListenerContext,
        poll_timeout: Duration,
    ) -> Result<Self> {
        let cancel = CancelToken::new();
        let channel = context.channel;
        let token = cancel.clone();
        let handle = thread::Builder::new()
            .name(format!("sdrlink-ctrl-{channel}"))
            .spawn(move || run(transport.as_ref(), &context, poll_timeout, &token))
            .map_err(TransportError::from)?;
        debug!(channel, "control listener started");
        Ok(Self {
            cancel,
            handle: Some(handle),
            channel,
        })
    }

    /// Ask the loop to stop at its next iteration.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel and wait for the thread to exit.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(channel = self.channel, "control listener panicked");
            } else {
                debug!(channel = self.channel, "control listener stopped");
            }
        }
    }
}

impl Drop for ControlListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ControlListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlListener")
            .field("channel", &self.channel)
            .field("running", &self.is_running())
            .finish()
    }
}

fn run(
    transport: &dyn DatagramTransport,
    context: &ListenerContext,
    poll_timeout: Duration,
    cancel: &CancelToken,
) {
    while !cancel.is_cancelled() {
        match transport.recv_frame(poll_timeout) {
            Ok(None) => {}
            Ok(Some(buf)) => {
                if let Err(err) = context.handle_packet(&buf) {
                    warn!(channel = context.channel, error = %err, len = buf.len(), "dropping malformed control packet");
                }
            }
            Err(TransportError::Shutdown) => break,
            Err(err) => {
                warn!(channel = context.channel, error = %err, "control receive failed");
                thread::sleep(poll_timeout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use sdrlink_transport::LoopbackTransport;
    use sdrlink_vrt::{encode_packet, PacketHeader};

    use super::*;

    const SID: u32 = 2;

    fn context() -> ListenerContext {
        ListenerContext {
            channel: 0,
            control_sid: SID,
            monitor: Arc::new(FlowControlMonitor::new(4)),
            events: Arc::new(EventQueue::new(8)),
            tick_rate: Arc::new(TickRate::new(100e6)),
        }
    }

    fn control(sid: u32, seq: u32, code: u32) -> Vec<u8> {
        encode_packet(&PacketHeader::context(sid, 0, code), seq, &[])
            .unwrap()
            .to_vec()
    }

    #[test]
    fn ack_updates_monitor_without_event() {
        let ctx = context();
        for _ in 0..4 {
            ctx.monitor.issue_sequence();
        }
        assert!(!ctx.monitor.admit(Duration::ZERO));

        let outcome = ctx.handle_packet(&control(SID, 0, 0)).unwrap();
        assert_eq!(outcome, ControlOutcome::Acknowledged(0));
        assert!(ctx.monitor.admit(Duration::ZERO));
        assert!(ctx.events.is_empty());
    }

    #[test]
    fn event_is_queued_and_monitor_untouched() {
        let ctx = context();
        ctx.monitor.issue_sequence();

        let outcome = ctx.handle_packet(&control(SID, 0, 0x02)).unwrap();
        assert_eq!(outcome, ControlOutcome::Event(EventCode::UNDERFLOW));
        assert_eq!(ctx.monitor.in_flight(), 1);

        let event = ctx.events.pop(Duration::ZERO).unwrap();
        assert_eq!(event.code, EventCode::UNDERFLOW);
        assert_eq!(event.channel, 0);
        assert_eq!(event.time_spec, None);
        assert!(ctx.events.is_empty());
    }

    #[test]
    fn event_time_uses_current_tick_rate() {
        let ctx = context();
        ctx.tick_rate.set(1000.0);
        let header = PacketHeader::context(SID, 0, 0x08).with_time(3, 1500);
        let packet = encode_packet(&header, 0, &[]).unwrap();

        ctx.handle_packet(&packet).unwrap();
        let event = ctx.events.pop(Duration::ZERO).unwrap();
        let ts = event.time_spec.unwrap();
        assert_eq!(ts.full_secs, 4);
        assert!((ts.frac_secs - 0.5).abs() < 1e-12);
    }

    #[test]
    fn foreign_and_data_packets_are_dropped() {
        let ctx = context();
        assert_eq!(
            ctx.handle_packet(&control(SID + 1, 0, 0)).unwrap(),
            ControlOutcome::Dropped
        );
        let data = encode_packet(&PacketHeader::data(SID, 0), 0, &[]).unwrap();
        assert_eq!(ctx.handle_packet(&data).unwrap(), ControlOutcome::Dropped);
        assert!(ctx.events.is_empty());
    }

    #[test]
    fn context_without_trailer_is_an_error() {
        let ctx = context();
        let header = PacketHeader {
            packet_type: sdrlink_vrt::PacketType::Context,
            ..PacketHeader::data(SID, 0)
        };
        let packet = encode_packet(&header, 0, &[]).unwrap();
        assert_eq!(ctx.handle_packet(&packet), Err(PacketError::MissingTrailer));
    }

    #[test]
    fn listener_survives_malformed_packets() {
        let (host, device) = LoopbackTransport::pair(256);
        let ctx = context();
        let mut listener = ControlListener::spawn(
            Arc::new(host),
            ctx.clone(),
            Duration::from_millis(5),
        )
        .unwrap();

        device.send_raw(vec![0xffu8; 3]);
        device.send_raw(vec![0x70u8, 0, 0, 3, 0, 0, 0, 2, 0, 0, 0, 0]);
        device.send_raw(control(SID, 0, 0x04));

        let event = ctx.events.pop(Duration::from_secs(2)).unwrap();
        assert_eq!(event.code, EventCode::SEQ_ERROR);
        assert!(listener.is_running());

        listener.shutdown();
        assert!(!listener.is_running());
    }

    #[test]
    fn cancel_stops_idle_listener() {
        let (host, _device) = LoopbackTransport::pair(64);
        let mut listener =
            ControlListener::spawn(Arc::new(host), context(), Duration::from_millis(5)).unwrap();
        listener.cancel();
        listener.shutdown();
        assert!(!listener.is_running());
    }
}
