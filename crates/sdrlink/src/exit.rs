use std::fmt;
use std::io;

use sdrlink_stream::StreamError;
use sdrlink_transport::TransportError;
use sdrlink_vrt::PacketError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidFrameSize(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn packet_error(context: &str, err: PacketError) -> CliError {
    match err {
        PacketError::UnknownFormat(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn stream_error(context: &str, err: StreamError) -> CliError {
    match err {
        StreamError::Transport(err) => transport_error(context, err),
        StreamError::Packet(err) => packet_error(context, err),
        StreamError::UnsupportedWireFormat { .. }
        | StreamError::HostFormatMismatch { .. }
        | StreamError::ChannelOutOfRange { .. }
        | StreamError::BoardOutOfRange(_)
        | StreamError::InvalidSubdevSpec(_)
        | StreamError::InvalidArgs(_)
        | StreamError::InvalidWindow { .. }
        | StreamError::FrameTooSmall { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        StreamError::Alignment { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_usage() {
        let err = stream_error(
            "stream",
            StreamError::ChannelOutOfRange { index: 3, total: 1 },
        );
        assert_eq!(err.code, USAGE);
        assert!(err.message.starts_with("stream: "));
    }

    #[test]
    fn nested_io_errors_keep_their_kind() {
        let io = io::Error::new(io::ErrorKind::TimedOut, "slow");
        let err = stream_error("recv", StreamError::Transport(TransportError::Io(io)));
        assert_eq!(err.code, TIMEOUT);

        let err = packet_error("decode", PacketError::Misaligned(3));
        assert_eq!(err.code, DATA_INVALID);
    }
}
