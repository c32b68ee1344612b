use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;
use crate::traits::{DatagramTransport, FramePool, FrameSink, SendFrame};

#[derive(Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Bytes>>,
    ready: Condvar,
}

impl Mailbox {
    fn push(&self, datagram: Bytes) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.push_back(datagram);
        drop(queue);
        self.ready.notify_one();
    }

    fn pop(&self, timeout: Duration) -> Option<Bytes> {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut queue, _) = self
            .ready
            .wait_timeout_while(queue, timeout, |queue| queue.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl FrameSink for Mailbox {
    fn send_datagram(&self, datagram: &[u8]) -> Result<()> {
        self.push(Bytes::copy_from_slice(datagram));
        Ok(())
    }
}

/// In-process datagram transport.
///
/// [`LoopbackTransport::pair`] returns two connected endpoints: frames
/// committed on one are received on the other, in order. Useful for running
/// a host streamer against a simulated device without a network.
pub struct LoopbackTransport {
    inbound: Arc<Mailbox>,
    outbound: Arc<Mailbox>,
    pool: Arc<FramePool>,
    frame_size: usize,
}

impl LoopbackTransport {
    /// Create a connected pair with `frame_size` byte frames.
    pub fn pair(frame_size: usize) -> (Self, Self) {
        Self::pair_with_frames(frame_size, 32)
    }

    /// Create a connected pair limiting each side to `num_send_frames`
    /// outstanding send frames.
    pub fn pair_with_frames(frame_size: usize, num_send_frames: usize) -> (Self, Self) {
        let a = Arc::new(Mailbox::default());
        let b = Arc::new(Mailbox::default());
        let left = Self {
            inbound: Arc::clone(&a),
            outbound: Arc::clone(&b),
            pool: FramePool::new(num_send_frames.max(1)),
            frame_size,
        };
        let right = Self {
            inbound: b,
            outbound: a,
            pool: FramePool::new(num_send_frames.max(1)),
            frame_size,
        };
        (left, right)
    }

    /// Send a datagram to the other endpoint without acquiring a frame.
    pub fn send_raw(&self, datagram: impl Into<Bytes>) {
        self.outbound.push(datagram.into());
    }

    /// Number of datagrams waiting to be received on this endpoint.
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }
}

impl DatagramTransport for LoopbackTransport {
    fn recv_frame(&self, timeout: Duration) -> Result<Option<Bytes>> {
        Ok(self.inbound.pop(timeout))
    }

    fn acquire_send_frame(&self, timeout: Duration) -> Result<Option<SendFrame>> {
        let Some(permit) = self.pool.acquire(timeout) else {
            return Ok(None);
        };
        let sink: Arc<dyn FrameSink> = self.outbound.clone();
        Ok(Some(SendFrame::new(self.frame_size, sink, permit)))
    }

    fn recv_frame_size(&self) -> usize {
        self.frame_size
    }

    fn send_frame_size(&self) -> usize {
        self.frame_size
    }

    fn transport_name(&self) -> &'static str {
        "loopback"
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("frame_size", &self.frame_size)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn committed_frames_arrive_in_order() {
        let (host, device) = LoopbackTransport::pair(64);

        for byte in 0..3u8 {
            let mut frame = host
                .acquire_send_frame(Duration::ZERO)
                .unwrap()
                .expect("frame");
            frame.as_mut()[0] = byte;
            frame.commit(1).unwrap();
        }

        for byte in 0..3u8 {
            let got = device.recv_frame(Duration::ZERO).unwrap().unwrap();
            assert_eq!(got.as_ref(), &[byte]);
        }
        assert!(device.recv_frame(Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn recv_waits_for_raw_send() {
        let (host, device) = LoopbackTransport::pair(64);
        let device = Arc::new(device);

        let sender = {
            let device = Arc::clone(&device);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                device.send_raw(Bytes::from_static(b"ack"));
            })
        };

        let got = host.recv_frame(Duration::from_secs(2)).unwrap();
        assert_eq!(got.as_deref(), Some(&b"ack"[..]));
        sender.join().unwrap();
    }

    #[test]
    fn dropped_frame_sends_nothing() {
        let (host, device) = LoopbackTransport::pair_with_frames(16, 1);

        let frame = host.acquire_send_frame(Duration::ZERO).unwrap();
        assert!(host
            .acquire_send_frame(Duration::from_millis(5))
            .unwrap()
            .is_none());
        drop(frame);

        assert_eq!(device.pending(), 0);
        assert!(host.acquire_send_frame(Duration::ZERO).unwrap().is_some());
    }
}
