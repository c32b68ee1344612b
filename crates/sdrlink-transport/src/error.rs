use std::net::SocketAddr;

/// Errors that can occur in datagram transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the local socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to connect the socket to the device endpoint.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// An I/O error occurred on the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A committed frame is larger than the negotiated frame size.
    #[error("frame too large ({len} bytes, frame size {frame_size})")]
    FrameTooLarge { len: usize, frame_size: usize },

    /// The configured frame size cannot carry any payload.
    #[error("invalid frame size {0}")]
    InvalidFrameSize(usize),

    /// The transport has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
