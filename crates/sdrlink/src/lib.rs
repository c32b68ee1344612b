//! Host-side streaming core for networked SDR front-ends.
//!
//! sdrlink moves complex samples between a host and a radio board over
//! UDP while keeping the device's transmit buffer from overflowing.
//!
//! # Crate Structure
//!
//! - [`transport`]: datagram transports (UDP, in-memory loopback)
//! - [`vrt`]: packet header codec and sample wire conversion
//! - [`stream`]: flow control, async events, channel binding and streamers

/// Re-export transport types.
pub mod transport {
    pub use sdrlink_transport::*;
}

/// Re-export packet codec types.
pub mod vrt {
    pub use sdrlink_vrt::*;
}

/// Re-export streaming types.
pub mod stream {
    pub use sdrlink_stream::*;
}
