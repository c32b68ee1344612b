/// Errors that can occur while packing or unpacking packets.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
    /// The buffer ends before the structure being read.
    #[error("truncated packet (need {needed} bytes, have {available})")]
    Truncated { needed: usize, available: usize },

    /// The buffer length is not a whole number of 32-bit words.
    #[error("packet length {0} is not a multiple of 4")]
    Misaligned(usize),

    /// The header's packet type nibble is not one this codec knows.
    #[error("unknown packet type {0:#x}")]
    UnknownPacketType(u8),

    /// The packet carries a class id, which this codec never produces.
    #[error("class id field is not supported")]
    ClassIdUnsupported,

    /// The declared packet size cannot hold its own header and trailer.
    #[error("declared packet size {declared} words is inconsistent with header ({required} words)")]
    InconsistentSize { declared: usize, required: usize },

    /// The payload lacks the leading sequence / flow-control word.
    #[error("packet has no sequence word")]
    MissingSequence,

    /// A context packet lacks the trailer that carries its event code.
    #[error("context packet has no trailer")]
    MissingTrailer,

    /// The destination buffer cannot hold the packet.
    #[error("buffer too small ({available} bytes, packet needs {needed})")]
    BufferTooSmall { needed: usize, available: usize },

    /// The packet would exceed the 16-bit word count.
    #[error("packet too large ({words} words)")]
    PacketTooLarge { words: usize },

    /// The packet counter does not fit its 4-bit wire field.
    #[error("packet count {0} out of range (0..=15)")]
    PacketCountOutOfRange(u8),

    /// A sample format name was not recognised.
    #[error("unknown sample format '{0}'")]
    UnknownFormat(String),
}

pub type Result<T> = std::result::Result<T, PacketError>;
