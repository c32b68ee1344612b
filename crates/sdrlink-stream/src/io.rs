//! The I/O subsystem: owner of every transport, monitor and listener.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use sdrlink_transport::DatagramTransport;
use sdrlink_vrt::sid::tx_data_sid;
use sdrlink_vrt::{HostSample, WireFormat};
use tracing::{debug, info, warn};

use crate::binder::{BoardOccupancy, ChannelBinder, ChannelBinding, DeviceLayout, Direction};
use crate::board::{BoardControl, DSPS_PER_BOARD};
use crate::config::{IoConfig, StreamArgs};
use crate::error::{Result, StreamError};
use crate::event_queue::EventQueue;
use crate::events::AsyncEvent;
use crate::flow_control::FlowControlMonitor;
use crate::listener::{ControlListener, ListenerContext, TickRate};
use crate::streamer::{
    samples_per_packet, RateControl, RxChannel, RxStreamer, TxChannel, TxStreamer,
};
use crate::subdev::{apply_rx_spec, apply_tx_spec, SubdevSpec};

/// One board's transports and register access.
///
/// Transport `i` in each list serves DSP `i`. Transmit transports also
/// carry that DSP's async reports back to the host.
pub struct BoardIo {
    pub control: Arc<dyn BoardControl>,
    pub rx_transports: Vec<Arc<dyn DatagramTransport>>,
    pub tx_transports: Vec<Arc<dyn DatagramTransport>>,
}

impl std::fmt::Debug for BoardIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardIo")
            .field("rx_transports", &self.rx_transports.len())
            .field("tx_transports", &self.tx_transports.len())
            .finish()
    }
}

/// Per-DSP record: rate shadows plus non-owning links to live streamers.
#[derive(Debug)]
struct DspRecord {
    rx_streamer: Weak<RateControl>,
    tx_streamer: Weak<RateControl>,
    rx_samp_rate: f64,
    rx_scale: f32,
    tx_samp_rate: f64,
}

impl Default for DspRecord {
    fn default() -> Self {
        Self {
            rx_streamer: Weak::new(),
            tx_streamer: Weak::new(),
            rx_samp_rate: 0.0,
            rx_scale: 1.0,
            tx_samp_rate: 0.0,
        }
    }
}

/// Streaming core for a set of boards.
///
/// Creating the subsystem starts one control listener per transmit DSP and
/// enables the device's flow-control reports. Dropping it (or calling
/// [`shutdown`](Self::shutdown)) cancels and joins every listener, then
/// disables the reports, before any transport is released.
pub struct IoSubsystem {
    config: IoConfig,
    boards: Vec<BoardIo>,
    binder: ChannelBinder,
    monitors: Vec<Vec<Arc<FlowControlMonitor>>>,
    listeners: Vec<ControlListener>,
    events: Arc<EventQueue>,
    tick_rate: Arc<TickRate>,
    records: Mutex<Vec<Vec<DspRecord>>>,
    stopped: bool,
}

impl IoSubsystem {
    /// Start streaming I/O over `boards`.
    pub fn new(config: IoConfig, boards: Vec<BoardIo>) -> Result<Self> {
        if boards.is_empty() {
            return Err(StreamError::NoBoards);
        }
        for (index, board) in boards.iter().enumerate() {
            if board.rx_transports.len() > DSPS_PER_BOARD || board.tx_transports.len() > DSPS_PER_BOARD {
                return Err(StreamError::Board(format!(
                    "board {index} has more transports than its {DSPS_PER_BOARD} DSPs"
                )));
            }
        }

        let layout = DeviceLayout::new(
            boards
                .iter()
                .map(|b| BoardOccupancy {
                    rx: b.rx_transports.len(),
                    tx: b.tx_transports.len(),
                })
                .collect(),
        );
        let records = boards
            .iter()
            .map(|_| (0..DSPS_PER_BOARD).map(|_| DspRecord::default()).collect())
            .collect();

        let mut io = Self {
            events: Arc::new(EventQueue::new(config.event_queue_depth)),
            tick_rate: Arc::new(TickRate::new(config.tick_rate)),
            binder: ChannelBinder::new(layout),
            monitors: Vec::with_capacity(boards.len()),
            listeners: Vec::new(),
            records: Mutex::new(records),
            stopped: false,
            config,
            boards,
        };
        // On error `io` is dropped here, which runs the full shutdown.
        io.start()?;
        Ok(io)
    }

    fn start(&mut self) -> Result<()> {
        let poll = self.config.listener_poll_timeout();
        let mut channel = 0;
        for (board_index, board) in self.boards.iter().enumerate() {
            let mut board_monitors = Vec::with_capacity(board.tx_transports.len());
            for (dsp, transport) in board.tx_transports.iter().enumerate() {
                let frame_size = transport.send_frame_size();
                let monitor = Arc::new(FlowControlMonitor::for_buffer(
                    self.config.device_buffer_bytes,
                    frame_size,
                )?);
                debug!(
                    board = board_index,
                    dsp,
                    window = monitor.max_in_flight(),
                    transport = transport.transport_name(),
                    "flow control window"
                );

                let context = ListenerContext {
                    channel,
                    control_sid: self.config.control_sid_base + dsp as u32,
                    monitor: Arc::clone(&monitor),
                    events: Arc::clone(&self.events),
                    tick_rate: Arc::clone(&self.tick_rate),
                };
                self.listeners
                    .push(ControlListener::spawn(Arc::clone(transport), context, poll)?);
                board_monitors.push(monitor);

                let (cycles, packets) = self
                    .config
                    .flow_control_cadence(self.tick_rate.get(), frame_size);
                board.control.set_flow_control_updates(dsp, cycles, packets)?;
                channel += 1;
            }
            self.monitors.push(board_monitors);
        }
        info!(
            boards = self.boards.len(),
            listeners = self.listeners.len(),
            "io subsystem started"
        );
        Ok(())
    }

    /// Stop listeners and disable flow-control reports.
    ///
    /// Every step runs even if an earlier one fails; failures are logged.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        for listener in &self.listeners {
            listener.cancel();
        }
        for listener in &mut self.listeners {
            listener.shutdown();
        }
        self.listeners.clear();

        for (board_index, board) in self.boards.iter().enumerate() {
            for dsp in 0..board.tx_transports.len() {
                if let Err(err) = board.control.set_flow_control_updates(dsp, 0, 0) {
                    warn!(board = board_index, dsp, error = %err, "failed to disable flow control updates");
                }
            }
        }
        info!("io subsystem stopped");
    }

    pub fn config(&self) -> &IoConfig {
        &self.config
    }

    /// Current channel layout.
    pub fn layout(&self) -> Arc<DeviceLayout> {
        self.binder.snapshot()
    }

    /// Flow-control monitor of transmit DSP `dsp` on `board`.
    pub fn monitor(&self, board: usize, dsp: usize) -> Option<Arc<FlowControlMonitor>> {
        self.monitors.get(board)?.get(dsp).cloned()
    }

    /// Number of running control listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.iter().filter(|l| l.is_running()).count()
    }

    /// Wait up to `timeout` for the next async device event.
    pub fn recv_async_msg(&self, timeout: Duration) -> Option<AsyncEvent> {
        self.events.pop(timeout)
    }

    /// Build a receive streamer for `args`.
    pub fn get_rx_stream<T: HostSample>(&self, args: &StreamArgs) -> Result<RxStreamer<T>> {
        check_host_format::<T>(args)?;
        let wire = args.effective_wire_format();
        let bindings = self.resolve_all(Direction::Rx, &args.effective_channels())?;

        let mut transports = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            transports.push(self.transport(Direction::Rx, *binding)?);
        }
        let frame_size = smallest_frame(&transports, |t| t.recv_frame_size());
        let spp = samples_per_packet(frame_size, wire)?;

        let rates = Arc::new(RateControl::new(self.tick_rate.get()));
        let mut channels = Vec::with_capacity(bindings.len());
        let mut records = self.records();
        for (binding, transport) in bindings.iter().zip(transports) {
            let control = &self.boards[binding.board].control;
            control.set_rx_nsamps_per_packet(binding.unit, spp)?;
            if args.clear {
                control.clear_dsp(Direction::Rx, binding.unit)?;
            }
            control.set_rx_format(binding.unit, wire, args.sc8_scalar)?;

            channels.push(RxChannel::new(transport, self.config.rx_sid_base + binding.unit as u32));
            let record = &mut records[binding.board][binding.unit];
            record.rx_streamer = Arc::downgrade(&rates);
            rates.set_samp_rate(record.rx_samp_rate);
            rates.set_scale(record.rx_scale);
        }
        drop(records);

        let threshold = self.config.alignment_threshold(frame_size);
        debug!(channels = channels.len(), spp, %wire, threshold, "rx streamer created");
        Ok(RxStreamer::new(channels, wire, spp, rates, threshold))
    }

    /// Build a flow-controlled transmit streamer for `args`.
    pub fn get_tx_stream<T: HostSample>(&self, args: &StreamArgs) -> Result<TxStreamer<T>> {
        check_host_format::<T>(args)?;
        let wire = args.effective_wire_format();
        if wire != WireFormat::Sc16 {
            return Err(StreamError::UnsupportedWireFormat {
                direction: "tx",
                format: wire.to_string(),
            });
        }
        let bindings = self.resolve_all(Direction::Tx, &args.effective_channels())?;

        let mut transports = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            transports.push(self.transport(Direction::Tx, *binding)?);
        }
        let spp = samples_per_packet(smallest_frame(&transports, |t| t.send_frame_size()), wire)?;

        let rates = Arc::new(RateControl::new(self.tick_rate.get()));
        let mut channels = Vec::with_capacity(bindings.len());
        let mut records = self.records();
        for (binding, transport) in bindings.iter().zip(transports) {
            let control = &self.boards[binding.board].control;
            let monitor = Arc::clone(&self.monitors[binding.board][binding.unit]);
            if args.clear {
                control.clear_dsp(Direction::Tx, binding.unit)?;
                monitor.reset();
            }
            if let Some(policy) = args.underflow_policy {
                control.set_tx_underflow_policy(binding.unit, policy)?;
            }

            channels.push(TxChannel {
                transport,
                monitor,
                sid: tx_data_sid(binding.unit),
            });
            let record = &mut records[binding.board][binding.unit];
            record.tx_streamer = Arc::downgrade(&rates);
            rates.set_samp_rate(record.tx_samp_rate);
        }
        drop(records);

        debug!(channels = channels.len(), spp, "tx streamer created");
        Ok(TxStreamer::new(channels, spp, rates))
    }

    /// Apply a receive subdevice spec to `board` and publish its occupancy.
    pub fn set_rx_subdev_spec(&self, board: usize, spec: &SubdevSpec) -> Result<()> {
        let io = self.board(board)?;
        if spec.len() > io.rx_transports.len() {
            return Err(StreamError::InvalidSubdevSpec(format!(
                "rx spec '{spec}' needs {} DSPs, board {board} has {} rx transports",
                spec.len(),
                io.rx_transports.len()
            )));
        }
        let occupancy = apply_rx_spec(io.control.as_ref(), spec)?;
        self.binder.set_occupancy(board, Direction::Rx, occupancy)
    }

    /// Apply a transmit subdevice spec to `board` and publish its occupancy.
    pub fn set_tx_subdev_spec(&self, board: usize, spec: &SubdevSpec) -> Result<()> {
        let io = self.board(board)?;
        if spec.len() > io.tx_transports.len() {
            return Err(StreamError::InvalidSubdevSpec(format!(
                "tx spec '{spec}' needs {} DSPs, board {board} has {} tx transports",
                spec.len(),
                io.tx_transports.len()
            )));
        }
        let occupancy = apply_tx_spec(io.control.as_ref(), spec)?;
        self.binder.set_occupancy(board, Direction::Tx, occupancy)
    }

    /// Propagate a new device tick rate to event decoding and every live
    /// streamer.
    pub fn update_tick_rate(&self, rate: f64) {
        self.tick_rate.set(rate);
        let records = self.records();
        for record in records.iter().flatten() {
            for rates in [record.rx_streamer.upgrade(), record.tx_streamer.upgrade()]
                .into_iter()
                .flatten()
            {
                rates.set_tick_rate(rate);
            }
        }
        debug!(rate, "tick rate updated");
    }

    /// Record a receive DSP's sample rate and push it to its live streamer.
    pub fn update_rx_samp_rate(&self, board: usize, dsp: usize, rate: f64, scale_adjustment: f32) -> Result<()> {
        let mut records = self.records();
        let record = record_mut(&mut records, board, dsp)?;
        record.rx_samp_rate = rate;
        record.rx_scale = scale_adjustment;
        if let Some(rates) = record.rx_streamer.upgrade() {
            rates.set_samp_rate(rate);
            rates.set_scale(scale_adjustment);
        }
        Ok(())
    }

    /// Record a transmit DSP's sample rate and push it to its live streamer.
    pub fn update_tx_samp_rate(&self, board: usize, dsp: usize, rate: f64) -> Result<()> {
        let mut records = self.records();
        let record = record_mut(&mut records, board, dsp)?;
        record.tx_samp_rate = rate;
        if let Some(rates) = record.tx_streamer.upgrade() {
            rates.set_samp_rate(rate);
        }
        Ok(())
    }

    fn resolve_all(&self, direction: Direction, channels: &[usize]) -> Result<Vec<ChannelBinding>> {
        let layout = self.binder.snapshot();
        channels
            .iter()
            .map(|&index| layout.resolve(direction, index))
            .collect()
    }

    fn transport(&self, direction: Direction, binding: ChannelBinding) -> Result<Arc<dyn DatagramTransport>> {
        let board = self.board(binding.board)?;
        let transports = match direction {
            Direction::Rx => &board.rx_transports,
            Direction::Tx => &board.tx_transports,
        };
        transports.get(binding.unit).cloned().ok_or_else(|| {
            StreamError::Board(format!(
                "board {} has no {direction} transport for dsp {}",
                binding.board, binding.unit
            ))
        })
    }

    fn board(&self, board: usize) -> Result<&BoardIo> {
        self.boards.get(board).ok_or(StreamError::BoardOutOfRange(board))
    }

    fn records(&self) -> MutexGuard<'_, Vec<Vec<DspRecord>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for IoSubsystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for IoSubsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoSubsystem")
            .field("boards", &self.boards.len())
            .field("listeners", &self.listeners.len())
            .field("layout", &self.binder.snapshot())
            .finish()
    }
}

fn check_host_format<T: HostSample>(args: &StreamArgs) -> Result<()> {
    if args.host_format != T::FORMAT {
        return Err(StreamError::HostFormatMismatch {
            requested: args.host_format.as_str(),
            actual: T::FORMAT.as_str(),
        });
    }
    Ok(())
}

/// Frame size every bound transport can carry, so one samples-per-packet
/// value holds for the whole stream.
fn smallest_frame(
    transports: &[Arc<dyn DatagramTransport>],
    frame_size: impl Fn(&dyn DatagramTransport) -> usize,
) -> usize {
    transports
        .iter()
        .map(|t| frame_size(t.as_ref()))
        .min()
        .unwrap_or(0)
}

fn record_mut(records: &mut [Vec<DspRecord>], board: usize, dsp: usize) -> Result<&mut DspRecord> {
    records
        .get_mut(board)
        .ok_or(StreamError::BoardOutOfRange(board))?
        .get_mut(dsp)
        .ok_or_else(|| StreamError::Board(format!("dsp {dsp} does not exist")))
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use num_complex::Complex;
    use sdrlink_transport::LoopbackTransport;
    use sdrlink_vrt::{encode_packet, HostFormat, PacketHeader, TX_ASYNC_SID_BASE};

    use super::*;
    use crate::board::{BoardCall, DetachedBoard};
    use crate::config::UnderflowPolicy;
    use crate::events::EventCode;
    use crate::streamer::TxMetadata;

    type Sc16 = Complex<i16>;

    struct Rig {
        io: IoSubsystem,
        boards: Vec<Arc<DetachedBoard>>,
        _devices: Vec<LoopbackTransport>,
    }

    fn rig(dsps: &[(usize, usize)]) -> Rig {
        let mut boards = Vec::new();
        let mut controls = Vec::new();
        let mut devices = Vec::new();
        for &(rx, tx) in dsps {
            let control = Arc::new(DetachedBoard::new());
            let mut pair = |n: usize| -> Vec<Arc<dyn DatagramTransport>> {
                (0..n)
                    .map(|_| {
                        let (host, device) = LoopbackTransport::pair(1472);
                        devices.push(device);
                        Arc::new(host) as Arc<dyn DatagramTransport>
                    })
                    .collect()
            };
            let rx_transports = pair(rx);
            let tx_transports = pair(tx);
            boards.push(BoardIo {
                control: control.clone(),
                rx_transports,
                tx_transports,
            });
            controls.push(control);
        }
        let config = IoConfig {
            listener_poll_ms: 5,
            ..IoConfig::default()
        };
        Rig {
            io: IoSubsystem::new(config, boards).unwrap(),
            boards: controls,
            _devices: devices,
        }
    }

    fn sc16_args() -> StreamArgs {
        StreamArgs::new(HostFormat::Sc16)
    }

    #[test]
    fn start_enables_and_drop_disables_flow_control_reports() {
        let rig = rig(&[(1, 2)]);
        assert_eq!(rig.io.listener_count(), 2);
        assert_eq!(rig.io.monitor(0, 1).unwrap().max_in_flight(), (1 << 20) / 1472);

        let board = Arc::clone(&rig.boards[0]);
        assert_eq!(
            board.take_calls(),
            vec![
                BoardCall::FlowControlUpdates { dsp: 0, cycles: 5_000_000, packets: 89 },
                BoardCall::FlowControlUpdates { dsp: 1, cycles: 5_000_000, packets: 89 },
            ]
        );

        drop(rig);
        assert_eq!(
            board.take_calls(),
            vec![
                BoardCall::FlowControlUpdates { dsp: 0, cycles: 0, packets: 0 },
                BoardCall::FlowControlUpdates { dsp: 1, cycles: 0, packets: 0 },
            ]
        );
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut rig = rig(&[(0, 1)]);
        rig.io.shutdown();
        assert_eq!(rig.io.listener_count(), 0);
        rig.boards[0].take_calls();
        rig.io.shutdown();
        assert!(rig.boards[0].calls().is_empty());
    }

    #[test]
    fn rejects_empty_board_list() {
        assert!(matches!(
            IoSubsystem::new(IoConfig::default(), Vec::new()),
            Err(StreamError::NoBoards)
        ));
    }

    #[test]
    fn tx_stream_rejects_sc8_and_wrong_host_type() {
        let rig = rig(&[(1, 1)]);
        let err = rig
            .io
            .get_tx_stream::<Sc16>(&sc16_args().with_wire_format(WireFormat::Sc8))
            .unwrap_err();
        assert!(matches!(err, StreamError::UnsupportedWireFormat { direction: "tx", .. }));

        let err = rig
            .io
            .get_tx_stream::<Complex<f32>>(&sc16_args())
            .unwrap_err();
        assert!(matches!(err, StreamError::HostFormatMismatch { .. }));
    }

    #[test]
    fn out_of_range_channel_produces_no_stream_and_no_side_effects() {
        let rig = rig(&[(1, 1), (1, 1)]);
        rig.boards[0].take_calls();
        let err = rig
            .io
            .get_rx_stream::<Sc16>(&sc16_args().with_channels(vec![0, 2]))
            .unwrap_err();
        assert!(matches!(err, StreamError::ChannelOutOfRange { index: 2, total: 2 }));
        assert!(rig.boards[0].calls().is_empty());
    }

    #[test]
    fn rx_stream_configures_dsps_across_boards() {
        let rig = rig(&[(1, 0), (2, 0)]);
        let mut args = sc16_args().with_channels(vec![2, 0]).with_wire_format(WireFormat::Sc8);
        args.sc8_scalar = 0x200;

        let rx = rig.io.get_rx_stream::<Sc16>(&args).unwrap();
        assert_eq!(rx.num_channels(), 2);
        assert_eq!(rx.max_samples_per_packet(), 722);
        assert_eq!(rx.alignment_threshold(), 50_000_000 / 1472);

        assert_eq!(
            rig.boards[1].calls(),
            vec![
                BoardCall::RxSamplesPerPacket { dsp: 1, samples: 722 },
                BoardCall::ClearDsp { direction: Direction::Rx, dsp: 1 },
                BoardCall::RxFormat { dsp: 1, format: WireFormat::Sc8, sc8_scalar: 0x200 },
            ]
        );
        assert_eq!(rig.boards[0].calls().len(), 3);
    }

    #[test]
    fn tx_stream_clear_resets_monitor_and_forwards_policy() {
        let rig = rig(&[(0, 2)]);
        let monitor = rig.io.monitor(0, 1).unwrap();
        monitor.issue_sequence();
        rig.boards[0].take_calls();

        let mut args = sc16_args().with_channels(vec![1]);
        args.underflow_policy = Some(UnderflowPolicy::NextBurst);
        let tx = rig.io.get_tx_stream::<Sc16>(&args).unwrap();
        assert_eq!(tx.max_samples_per_packet(), 361);
        assert_eq!(monitor.in_flight(), 0);
        assert_eq!(
            rig.boards[0].calls(),
            vec![
                BoardCall::ClearDsp { direction: Direction::Tx, dsp: 1 },
                BoardCall::TxUnderflowPolicy { dsp: 1, policy: UnderflowPolicy::NextBurst },
            ]
        );

        monitor.issue_sequence();
        args.clear = false;
        let _tx = rig.io.get_tx_stream::<Sc16>(&args).unwrap();
        assert_eq!(monitor.in_flight(), 1);
    }

    #[test]
    fn rate_updates_reach_only_live_streamers() {
        let rig = rig(&[(2, 1)]);
        rig.io.update_rx_samp_rate(0, 0, 1e6, 0.5).unwrap();

        let rx = rig
            .io
            .get_rx_stream::<Sc16>(&sc16_args().with_channels(vec![0]))
            .unwrap();
        assert_eq!(rx.rates().samp_rate, 1e6);
        assert_eq!(rx.rates().scale, 0.5);

        rig.io.update_rx_samp_rate(0, 0, 2e6, 1.0).unwrap();
        rig.io.update_rx_samp_rate(0, 1, 9e6, 1.0).unwrap();
        rig.io.update_tick_rate(52e6);
        assert_eq!(rx.rates().samp_rate, 2e6);
        assert_eq!(rx.rates().tick_rate, 52e6);

        let tx = rig.io.get_tx_stream::<Sc16>(&sc16_args()).unwrap();
        assert_eq!(tx.rates().tick_rate, 52e6);
        drop(tx);
        rig.io.update_tx_samp_rate(0, 0, 4e6).unwrap();

        assert!(rig.io.update_tx_samp_rate(3, 0, 1.0).is_err());
        assert!(rig.io.update_rx_samp_rate(0, 5, 1.0, 1.0).is_err());
    }

    #[test]
    fn subdev_spec_changes_channel_mapping() {
        let rig = rig(&[(2, 2), (2, 2)]);
        assert_eq!(rig.io.layout().total(Direction::Rx), 4);

        rig.io.set_rx_subdev_spec(0, &"B:0".parse().unwrap()).unwrap();
        assert_eq!(rig.io.layout().total(Direction::Rx), 3);
        assert_eq!(
            rig.io.layout().resolve(Direction::Rx, 1).unwrap(),
            ChannelBinding { board: 1, unit: 0 }
        );

        rig.io.set_tx_subdev_spec(1, &"A:0".parse().unwrap()).unwrap();
        assert_eq!(rig.io.layout().total(Direction::Tx), 3);

        assert!(rig.io.set_rx_subdev_spec(2, &"A:0".parse().unwrap()).is_err());
    }

    #[test]
    fn subdev_spec_larger_than_transports_is_rejected() {
        let rig = rig(&[(1, 1)]);
        let err = rig
            .io
            .set_rx_subdev_spec(0, &"A:0 B:0".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidSubdevSpec(_)));
        assert_eq!(rig.io.layout().total(Direction::Rx), 1);
    }

    #[test]
    fn control_reports_route_to_absolute_tx_channel_across_boards() {
        let rig = rig(&[(0, 2), (0, 2)]);
        // devices: board 0 dsp 0, board 0 dsp 1, board 1 dsp 0, board 1 dsp 1
        let device = &rig._devices[2];

        let underflow = PacketHeader::context(TX_ASYNC_SID_BASE, 0, 0x02);
        device.send_raw(encode_packet(&underflow, 0, &[]).unwrap());
        let event = rig.io.recv_async_msg(Duration::from_secs(2)).expect("event");
        assert_eq!(event.channel, 2);
        assert_eq!(event.code, EventCode::UNDERFLOW);

        let ours = rig.io.monitor(1, 0).unwrap();
        let other = rig.io.monitor(0, 0).unwrap();
        for _ in 0..3 {
            ours.issue_sequence();
            other.issue_sequence();
        }
        let ack = PacketHeader::context(TX_ASYNC_SID_BASE, 0, 0);
        device.send_raw(encode_packet(&ack, 1, &[]).unwrap());

        let deadline = Instant::now() + Duration::from_secs(2);
        while ours.in_flight() != 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(ours.in_flight(), 1);
        assert_eq!(other.in_flight(), 3);
        assert_eq!(rig.io.monitor(1, 1).unwrap().in_flight(), 0);
        assert!(rig.io.recv_async_msg(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn tx_packet_size_fits_every_bound_channel() {
        let (wide, wide_device) = LoopbackTransport::pair(1472);
        let (narrow, narrow_device) = LoopbackTransport::pair(512);
        let io = IoSubsystem::new(
            IoConfig {
                listener_poll_ms: 5,
                ..IoConfig::default()
            },
            vec![BoardIo {
                control: Arc::new(DetachedBoard::new()),
                rx_transports: Vec::new(),
                tx_transports: vec![Arc::new(wide), Arc::new(narrow)],
            }],
        )
        .unwrap();

        let mut tx = io
            .get_tx_stream::<Sc16>(&sc16_args().with_channels(vec![0, 1]))
            .unwrap();
        let spp = samples_per_packet(512, WireFormat::Sc16).unwrap();
        assert_eq!(tx.max_samples_per_packet(), spp);

        let samples = vec![Sc16::new(1, -1); spp];
        let outcome = tx
            .send(&[&samples, &samples], &TxMetadata::default(), Duration::from_millis(50))
            .unwrap();
        assert_eq!(outcome.samples, spp);
        assert!(!outcome.timed_out);
        assert_eq!(wide_device.pending(), 1);
        assert_eq!(narrow_device.pending(), 1);
        assert_eq!(io.monitor(0, 1).unwrap().in_flight(), 1);
    }
}
