use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::events::AsyncEvent;

/// Default number of events retained.
pub const DEFAULT_EVENT_QUEUE_DEPTH: usize = 100;

/// Bounded FIFO of async events.
///
/// `push` never blocks: when full, the oldest entry is evicted.
#[derive(Debug)]
pub struct EventQueue {
    entries: Mutex<VecDeque<AsyncEvent>>,
    ready: Condvar,
    capacity: usize,
}

impl EventQueue {
    /// Queue retaining at most `capacity` events (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, event: AsyncEvent) {
        let mut entries = self.lock();
        if entries.len() == self.capacity {
            if let Some(evicted) = entries.pop_front() {
                trace!(channel = evicted.channel, code = evicted.code.bits(), "event queue full, dropped oldest");
            }
        }
        entries.push_back(event);
        drop(entries);
        self.ready.notify_one();
    }

    /// Wait up to `timeout` for the oldest retained event.
    pub fn pop(&self, timeout: Duration) -> Option<AsyncEvent> {
        let entries = self.lock();
        let (mut entries, _) = self
            .ready
            .wait_timeout_while(entries, timeout, |entries| entries.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AsyncEvent>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_QUEUE_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::events::EventCode;

    fn event(channel: usize) -> AsyncEvent {
        AsyncEvent {
            channel,
            code: EventCode::UNDERFLOW,
            time_spec: None,
        }
    }

    #[test]
    fn overflow_keeps_most_recent_in_order() {
        let queue = EventQueue::new(DEFAULT_EVENT_QUEUE_DEPTH);
        for i in 0..DEFAULT_EVENT_QUEUE_DEPTH + 7 {
            queue.push(event(i));
        }
        assert_eq!(queue.len(), DEFAULT_EVENT_QUEUE_DEPTH);

        let drained: Vec<usize> = std::iter::from_fn(|| queue.pop(Duration::ZERO))
            .map(|e| e.channel)
            .collect();
        let expected: Vec<usize> = (7..DEFAULT_EVENT_QUEUE_DEPTH + 7).collect();
        assert_eq!(drained, expected);
    }

    #[test]
    fn pop_at_capacity_returns_oldest_retained() {
        let queue = EventQueue::new(3);
        for i in 0..3 {
            queue.push(event(i));
        }
        assert_eq!(queue.pop(Duration::ZERO).unwrap().channel, 0);

        let queue = EventQueue::new(3);
        for i in 0..4 {
            queue.push(event(i));
        }
        assert_eq!(queue.pop(Duration::ZERO).unwrap().channel, 1);
    }

    #[test]
    fn pop_times_out_when_empty() {
        let queue = EventQueue::new(4);
        let start = Instant::now();
        assert!(queue.pop(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn pop_wakes_on_push() {
        let queue = Arc::new(EventQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(event(9));

        assert_eq!(consumer.join().unwrap().unwrap().channel, 9);
        assert!(queue.is_empty());
    }
}
