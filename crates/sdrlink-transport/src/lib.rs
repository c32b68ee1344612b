//! Datagram transport abstraction for SDR sample streaming.
//!
//! Every channel talks to the device through a transport that offers:
//! - bounded-timeout acquisition of fixed-size send frames, committed with
//!   the number of bytes actually used
//! - bounded-timeout reception of one datagram at a time
//!
//! Timeouts are never errors: they are reported as `Ok(None)`.
//!
//! This is the lowest layer of sdrlink. Everything else builds on top of
//! the [`DatagramTransport`] trait provided here.

pub mod error;
pub mod loopback;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use loopback::LoopbackTransport;
pub use traits::{DatagramTransport, FramePool, FrameSink, SendFrame};
pub use udp::{UdpConfig, UdpTransport, DEFAULT_FRAME_SIZE};
