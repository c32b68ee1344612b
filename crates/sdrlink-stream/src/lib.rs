//! Flow-controlled sample streaming for networked SDR boards.
//!
//! The pieces, leaves first:
//! - [`FlowControlMonitor`]: per transmit DSP sliding-window admission
//! - [`EventQueue`]: bounded drop-oldest queue of async device events
//! - [`ControlListener`]: background thread harvesting acks and events
//! - [`ChannelBinder`]: logical channel to (board, DSP) resolution
//! - [`RxStreamer`] / [`TxStreamer`]: the application's stream handles
//!
//! [`IoSubsystem`] owns all of them and enforces the teardown order:
//! listeners are cancelled and joined before transports are released.

pub mod binder;
pub mod board;
pub mod config;
pub mod error;
pub mod event_queue;
pub mod events;
pub mod flow_control;
pub mod io;
pub mod listener;
pub mod streamer;
pub mod subdev;

pub use binder::{BoardOccupancy, ChannelBinder, ChannelBinding, DeviceLayout, Direction};
pub use board::{BoardCall, BoardControl, DetachedBoard, DSPS_PER_BOARD};
pub use config::{IoConfig, StreamArgs, UnderflowPolicy};
pub use error::{Result, StreamError};
pub use event_queue::{EventQueue, DEFAULT_EVENT_QUEUE_DEPTH};
pub use events::{AsyncEvent, EventCode, TimeSpec};
pub use flow_control::FlowControlMonitor;
pub use io::{BoardIo, IoSubsystem};
pub use listener::{CancelToken, ControlListener, ControlOutcome, ListenerContext, TickRate};
pub use streamer::{
    samples_per_packet, RateControl, Rates, RxErrorCode, RxMetadata, RxStreamer, SendOutcome,
    TxMetadata, TxStreamer, PACKET_OVERHEAD_BYTES,
};
pub use subdev::{apply_rx_spec, apply_tx_spec, SubdevSpec, SubdevSpecPair};
