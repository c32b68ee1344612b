use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{DatagramTransport, FramePool, FrameSink, SendFrame};

/// Default frame size: the largest UDP payload that fits a 1500-byte
/// Ethernet MTU without fragmentation.
pub const DEFAULT_FRAME_SIZE: usize = 1472;

/// Header word the device treats as "not a packet".
const INVALID_VRT_HEADER: u32 = 0;

/// Smallest read timeout handed to the socket; a zero timeout is rejected
/// by the OS.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Configuration for a UDP transport.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Largest datagram accepted on receive.
    pub recv_frame_size: usize,
    /// Size of every send frame.
    pub send_frame_size: usize,
    /// Number of send frames that may be checked out at once.
    pub num_send_frames: usize,
    /// Requested kernel receive buffer size. `None` keeps the OS default.
    pub recv_buff_size: Option<usize>,
    /// Requested kernel send buffer size. `None` keeps the OS default.
    pub send_buff_size: Option<usize>,
    /// Send a priming datagram after connecting so the device learns the
    /// host source port before it starts sending.
    pub prime_device: bool,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            recv_frame_size: DEFAULT_FRAME_SIZE,
            send_frame_size: DEFAULT_FRAME_SIZE,
            num_send_frames: 32,
            recv_buff_size: None,
            send_buff_size: None,
            prime_device: true,
        }
    }
}

struct UdpSink {
    socket: UdpSocket,
}

impl FrameSink for UdpSink {
    fn send_datagram(&self, datagram: &[u8]) -> Result<()> {
        loop {
            match self.socket.send(datagram) {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }
}

/// Connected UDP transport to one device port.
pub struct UdpTransport {
    sink: Arc<UdpSink>,
    pool: Arc<FramePool>,
    config: UdpConfig,
    peer: SocketAddr,
    read_timeout: Mutex<Option<Duration>>,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect it to `peer`.
    pub fn connect(peer: SocketAddr) -> Result<Self> {
        Self::connect_with_config(peer, UdpConfig::default())
    }

    /// Bind an ephemeral local port and connect it to `peer` with explicit
    /// configuration.
    pub fn connect_with_config(peer: SocketAddr, config: UdpConfig) -> Result<Self> {
        let local: SocketAddr = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        Self::bind_and_connect(local, peer, config)
    }

    /// Bind `local` and connect it to `peer`.
    pub fn bind_and_connect(local: SocketAddr, peer: SocketAddr, config: UdpConfig) -> Result<Self> {
        validate_frame_size(config.recv_frame_size)?;
        validate_frame_size(config.send_frame_size)?;

        let socket = UdpSocket::bind(local).map_err(|source| TransportError::Bind {
            addr: local,
            source,
        })?;
        socket
            .connect(peer)
            .map_err(|source| TransportError::Connect { addr: peer, source })?;

        if let Some(size) = config.recv_buff_size {
            set_buffer_size(&socket, BufferKind::Recv, size);
        }
        if let Some(size) = config.send_buff_size {
            set_buffer_size(&socket, BufferKind::Send, size);
        }

        info!(%peer, local = ?socket.local_addr().ok(), "udp transport connected");

        let transport = Self {
            sink: Arc::new(UdpSink { socket }),
            pool: FramePool::new(config.num_send_frames.max(1)),
            config,
            peer,
            read_timeout: Mutex::new(None),
        };

        if transport.config.prime_device {
            transport.prime_device()?;
        }

        Ok(transport)
    }

    /// Send a two-word datagram (zero sequence, invalid header) so the
    /// device records the host source port.
    ///
    /// This must happen before async reports are enabled, or the device's
    /// reports would bounce off a closed port.
    pub fn prime_device(&self) -> Result<()> {
        let mut datagram = BytesMut::with_capacity(8);
        datagram.put_u32(0);
        datagram.put_u32(INVALID_VRT_HEADER);
        self.sink.send_datagram(&datagram)?;
        debug!(peer = %self.peer, "primed device source port");
        Ok(())
    }

    /// Remote device endpoint.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Local endpoint of the socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.sink.socket.local_addr().map_err(Into::into)
    }

    /// Transport configuration.
    pub fn config(&self) -> &UdpConfig {
        &self.config
    }

    fn apply_read_timeout(&self, timeout: Duration) -> Result<()> {
        let timeout = timeout.max(MIN_READ_TIMEOUT);
        let mut current = self
            .read_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *current != Some(timeout) {
            self.sink.socket.set_read_timeout(Some(timeout))?;
            *current = Some(timeout);
        }
        Ok(())
    }
}

impl DatagramTransport for UdpTransport {
    fn recv_frame(&self, timeout: Duration) -> Result<Option<Bytes>> {
        self.apply_read_timeout(timeout)?;

        let mut buf = BytesMut::zeroed(self.config.recv_frame_size);
        match self.sink.socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf.freeze()))
            }
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    fn acquire_send_frame(&self, timeout: Duration) -> Result<Option<SendFrame>> {
        let Some(permit) = self.pool.acquire(timeout) else {
            return Ok(None);
        };
        let sink: Arc<dyn FrameSink> = self.sink.clone();
        Ok(Some(SendFrame::new(self.config.send_frame_size, sink, permit)))
    }

    fn recv_frame_size(&self) -> usize {
        self.config.recv_frame_size
    }

    fn send_frame_size(&self) -> usize {
        self.config.send_frame_size
    }

    fn transport_name(&self) -> &'static str {
        "udp"
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("peer", &self.peer)
            .field("config", &self.config)
            .finish()
    }
}

fn validate_frame_size(size: usize) -> Result<()> {
    // Must at least hold one 32-bit word.
    if size < 4 || size > u16::MAX as usize * 4 {
        return Err(TransportError::InvalidFrameSize(size));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
enum BufferKind {
    Recv,
    Send,
}

#[cfg(unix)]
fn set_buffer_size(socket: &UdpSocket, kind: BufferKind, size: usize) {
    use std::os::fd::AsRawFd;

    let option = match kind {
        BufferKind::Recv => libc::SO_RCVBUF,
        BufferKind::Send => libc::SO_SNDBUF,
    };
    let value = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);

    // SAFETY: `value` is a valid readable c_int for the provided length, and
    // the descriptor belongs to a socket owned by this process.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            (&value as *const libc::c_int).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if rc != 0 {
        warn!(
            ?kind,
            size,
            error = %std::io::Error::last_os_error(),
            "failed to resize socket buffer"
        );
    } else {
        debug!(?kind, size, "resized socket buffer");
    }
}

#[cfg(not(unix))]
fn set_buffer_size(_socket: &UdpSocket, kind: BufferKind, size: usize) {
    debug!(?kind, size, "socket buffer resize not supported on this platform");
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn device_socket() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    fn quiet_config() -> UdpConfig {
        UdpConfig {
            prime_device: false,
            ..UdpConfig::default()
        }
    }

    #[test]
    fn primes_device_on_connect() {
        let device = device_socket();
        let transport = UdpTransport::connect(device.local_addr().unwrap()).unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = device.recv_from(&mut buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf[..8], &[0u8; 8]);
        assert_eq!(from, transport.local_addr().unwrap());
    }

    #[test]
    fn commit_sends_datagram_to_device() {
        let device = device_socket();
        let transport =
            UdpTransport::connect_with_config(device.local_addr().unwrap(), quiet_config())
                .unwrap();

        let mut frame = transport
            .acquire_send_frame(Duration::from_millis(10))
            .unwrap()
            .expect("frame available");
        assert_eq!(frame.len(), DEFAULT_FRAME_SIZE);
        frame.as_mut()[..3].copy_from_slice(b"abc");
        frame.commit(3).unwrap();

        let mut buf = [0u8; 64];
        let n = device.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");
    }

    #[test]
    fn recv_returns_datagram_from_device() {
        let device = device_socket();
        let transport =
            UdpTransport::connect_with_config(device.local_addr().unwrap(), quiet_config())
                .unwrap();

        device
            .send_to(b"hello", transport.local_addr().unwrap())
            .unwrap();
        let frame = transport
            .recv_frame(Duration::from_secs(2))
            .unwrap()
            .expect("datagram");
        assert_eq!(frame.as_ref(), b"hello");
    }

    #[test]
    fn recv_timeout_is_not_an_error() {
        let device = device_socket();
        let transport =
            UdpTransport::connect_with_config(device.local_addr().unwrap(), quiet_config())
                .unwrap();

        let start = Instant::now();
        let frame = transport.recv_frame(Duration::from_millis(30)).unwrap();
        assert!(frame.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn send_frames_are_bounded() {
        let device = device_socket();
        let config = UdpConfig {
            num_send_frames: 1,
            ..quiet_config()
        };
        let transport =
            UdpTransport::connect_with_config(device.local_addr().unwrap(), config).unwrap();

        let held = transport.acquire_send_frame(Duration::ZERO).unwrap();
        assert!(held.is_some());
        assert!(transport
            .acquire_send_frame(Duration::from_millis(10))
            .unwrap()
            .is_none());
        drop(held);
        assert!(transport
            .acquire_send_frame(Duration::ZERO)
            .unwrap()
            .is_some());
    }

    #[test]
    fn rejects_tiny_frame_size() {
        let config = UdpConfig {
            send_frame_size: 2,
            ..quiet_config()
        };
        let result = UdpTransport::connect_with_config("127.0.0.1:9".parse().unwrap(), config);
        assert!(matches!(result, Err(TransportError::InvalidFrameSize(2))));
    }
}
