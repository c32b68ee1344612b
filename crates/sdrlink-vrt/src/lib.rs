//! VRT-style packet framing for SDR sample and control traffic.
//!
//! Every datagram exchanged with the device is one packet:
//! - a big-endian header word carrying packet type, flags and size
//! - a 32-bit stream id routing it to a DSP unit and packet class
//! - optional integer-seconds / fractional-tick timestamps
//! - a payload whose first word is the sequence / flow-control word
//! - an optional trailer word (event code on context packets)
//!
//! Sample payloads are converted between wire and host formats by
//! [`convert`].

pub mod codec;
pub mod convert;
pub mod error;
pub mod sid;

pub use codec::{
    encode_packet, pack, unpack, Packet, PacketHeader, PacketType, MAX_HEADER_BYTES,
    MAX_HEADER_WORDS, SEQUENCE_BYTES, TRAILER_BYTES, WORD_BYTES,
};
pub use convert::{host_to_wire, wire_to_host, HostFormat, HostSample, WireFormat};
pub use error::{PacketError, Result};
pub use sid::{RX_SID_BASE, TX_ASYNC_SID_BASE, TX_DATA_SID_BASE};
