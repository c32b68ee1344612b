use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::error::{Result, TransportError};

/// A bidirectional datagram transport bound to one device endpoint.
///
/// Implementations must be safe to share between the foreground streamer
/// and a background listener thread.
pub trait DatagramTransport: Send + Sync {
    /// Receive one datagram, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout expires with nothing received.
    fn recv_frame(&self, timeout: Duration) -> Result<Option<Bytes>>;

    /// Acquire a zeroed send frame of [`send_frame_size`] bytes, waiting at
    /// most `timeout` for one to become available.
    ///
    /// [`send_frame_size`]: DatagramTransport::send_frame_size
    fn acquire_send_frame(&self, timeout: Duration) -> Result<Option<SendFrame>>;

    /// Largest datagram this transport will deliver.
    fn recv_frame_size(&self) -> usize;

    /// Size of every send frame handed out by this transport.
    fn send_frame_size(&self) -> usize;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

/// The write half a [`SendFrame`] commits into.
pub trait FrameSink: Send + Sync {
    /// Put one complete datagram on the wire.
    fn send_datagram(&self, datagram: &[u8]) -> Result<()>;
}

/// Counting pool limiting the number of outstanding send frames.
///
/// Acquisition blocks (up to a timeout) while every frame is checked out;
/// frames return to the pool when committed or dropped.
pub struct FramePool {
    available: Mutex<usize>,
    returned: Condvar,
    capacity: usize,
}

impl FramePool {
    /// Create a pool with `capacity` frames.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            available: Mutex::new(capacity),
            returned: Condvar::new(),
            capacity,
        })
    }

    /// Total number of frames managed by the pool.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently available for acquisition.
    pub fn available(&self) -> usize {
        *self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one frame permit, waiting at most `timeout`.
    pub fn acquire(self: &Arc<Self>, timeout: Duration) -> Option<FramePermit> {
        let guard = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut guard, _) = self
            .returned
            .wait_timeout_while(guard, timeout, |available| *available == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if *guard == 0 {
            return None;
        }
        *guard -= 1;
        Some(FramePermit {
            pool: Arc::clone(self),
        })
    }

    fn release(&self) {
        let mut guard = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += 1;
        drop(guard);
        self.returned.notify_one();
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// Proof of one checked-out frame; returns it to the pool on drop.
pub struct FramePermit {
    pool: Arc<FramePool>,
}

impl Drop for FramePermit {
    fn drop(&mut self) {
        self.pool.release();
    }
}

/// A fixed-size send buffer checked out from a transport.
///
/// Fill it through [`as_mut`](SendFrame::as_mut) and hand it back with
/// [`commit`](SendFrame::commit). Dropping it without committing sends
/// nothing and releases the frame.
pub struct SendFrame {
    buf: BytesMut,
    sink: Arc<dyn FrameSink>,
    _permit: FramePermit,
}

impl SendFrame {
    /// Wrap a zeroed buffer of `frame_size` bytes.
    pub fn new(frame_size: usize, sink: Arc<dyn FrameSink>, permit: FramePermit) -> Self {
        Self {
            buf: BytesMut::zeroed(frame_size),
            sink,
            _permit: permit,
        }
    }

    /// Full frame size in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the frame has zero capacity.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Read access to the frame contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Write access to the whole frame.
    pub fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Send the first `len` bytes of the frame.
    pub fn commit(self, len: usize) -> Result<()> {
        if len > self.buf.len() {
            return Err(TransportError::FrameTooLarge {
                len,
                frame_size: self.buf.len(),
            });
        }
        self.sink.send_datagram(&self.buf[..len])
    }
}

impl fmt::Debug for SendFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendFrame")
            .field("frame_size", &self.buf.len())
            .finish()
    }
}
