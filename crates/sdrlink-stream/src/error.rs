/// Errors that can occur while configuring or running streams.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] sdrlink_transport::TransportError),

    /// Packet-level error.
    #[error("packet error: {0}")]
    Packet(#[from] sdrlink_vrt::PacketError),

    /// The requested wire format cannot be used in this direction.
    #[error("unsupported {direction} wire format '{format}'")]
    UnsupportedWireFormat {
        direction: &'static str,
        format: String,
    },

    /// The streamer's sample type does not match the requested host format.
    #[error("host format mismatch (requested {requested}, streamer type is {actual})")]
    HostFormatMismatch {
        requested: &'static str,
        actual: &'static str,
    },

    /// A logical channel index beyond the total occupancy.
    #[error("channel {index} out of range ({total} channels configured)")]
    ChannelOutOfRange { index: usize, total: usize },

    /// A board index beyond the configured boards.
    #[error("board {0} out of range")]
    BoardOutOfRange(usize),

    /// The subdevice specification is malformed or does not fit the board.
    #[error("invalid subdevice spec: {0}")]
    InvalidSubdevSpec(String),

    /// A stream argument string could not be parsed.
    #[error("invalid stream args: {0}")]
    InvalidArgs(String),

    /// The subsystem was created without any board.
    #[error("no boards configured")]
    NoBoards,

    /// The transport frame cannot hold a header and at least one sample.
    #[error("frame size {frame_size} too small for packet overhead {overhead}")]
    FrameTooSmall { frame_size: usize, overhead: usize },

    /// Flow-control window would be empty.
    #[error("invalid flow-control window (buffer {buffer_bytes} bytes, frame {frame_size} bytes)")]
    InvalidWindow {
        buffer_bytes: usize,
        frame_size: usize,
    },

    /// Receive channels stayed misaligned past the tolerance threshold.
    #[error("receive channels misaligned for {consecutive} consecutive packets")]
    Alignment { consecutive: usize },

    /// Board register access failed.
    #[error("board control error: {0}")]
    Board(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;
