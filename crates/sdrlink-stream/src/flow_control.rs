use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::error::{Result, StreamError};

#[derive(Debug, Default)]
struct Window {
    /// Next sequence to issue.
    last_seq_out: u32,
    /// Last sequence the device confirmed.
    last_seq_ack: u32,
    /// Whether `last_seq_ack` holds a real acknowledgement since the last reset.
    has_ack: bool,
}

impl Window {
    fn in_flight(&self) -> u32 {
        if self.has_ack {
            self.last_seq_out
                .wrapping_sub(self.last_seq_ack.wrapping_add(1))
        } else {
            self.last_seq_out
        }
    }
}

/// Sliding-window admission control for one transmit channel.
///
/// The producer calls [`admit`](Self::admit) then
/// [`issue_sequence`](Self::issue_sequence) for every packet; the
/// control-plane listener calls [`acknowledge`](Self::acknowledge) as the
/// device reports progress. Sequence arithmetic wraps at 2^32.
#[derive(Debug)]
pub struct FlowControlMonitor {
    window: Mutex<Window>,
    acked: Condvar,
    max_in_flight: u32,
}

impl FlowControlMonitor {
    /// Monitor allowing `max_in_flight` unacknowledged packets.
    pub fn new(max_in_flight: u32) -> Self {
        Self {
            window: Mutex::new(Window::default()),
            acked: Condvar::new(),
            max_in_flight,
        }
    }

    /// Monitor sized to a device buffer of `buffer_bytes` receiving frames of
    /// `frame_size` bytes.
    pub fn for_buffer(buffer_bytes: usize, frame_size: usize) -> Result<Self> {
        let window = buffer_bytes.checked_div(frame_size).unwrap_or(0);
        if window == 0 {
            return Err(StreamError::InvalidWindow {
                buffer_bytes,
                frame_size,
            });
        }
        Ok(Self::new(u32::try_from(window).unwrap_or(u32::MAX)))
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight
    }

    /// Packets issued but not yet acknowledged.
    pub fn in_flight(&self) -> u32 {
        self.lock().in_flight()
    }

    /// Return the next sequence number and advance the counter.
    pub fn issue_sequence(&self) -> u32 {
        let mut window = self.lock();
        let seq = window.last_seq_out;
        window.last_seq_out = seq.wrapping_add(1);
        seq
    }

    /// Wait up to `timeout` for room in the window.
    pub fn admit(&self, timeout: Duration) -> bool {
        let window = self.lock();
        let (window, result) = self
            .acked
            .wait_timeout_while(window, timeout, |w| w.in_flight() >= self.max_in_flight)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && window.in_flight() >= self.max_in_flight {
            trace!(
                in_flight = window.in_flight(),
                max = self.max_in_flight,
                "flow control admission timed out"
            );
            return false;
        }
        true
    }

    /// Wait up to `timeout` until nothing is in flight.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let window = self.lock();
        let (window, _) = self
            .acked
            .wait_timeout_while(window, timeout, |w| w.in_flight() > 0)
            .unwrap_or_else(PoisonError::into_inner);
        window.in_flight() == 0
    }

    /// Record `seq` as the device's last acknowledged sequence.
    pub fn acknowledge(&self, seq: u32) {
        let mut window = self.lock();
        window.last_seq_ack = seq;
        window.has_ack = true;
        drop(window);
        self.acked.notify_all();
    }

    /// Zero both counters.
    pub fn reset(&self) {
        let mut window = self.lock();
        *window = Window::default();
        drop(window);
        self.acked.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
