//! Thread-safe FIFO of compressed packets for one stream.
//!
//! One producer (the demux stage) and one consumer (the audio pull or video
//! pace stage) share a queue. The aggregate byte size is a soft capacity
//! signal: producers stall on it through [`PacketQueue::wait_for_space`], the
//! queue itself never refuses or drops data while open.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::packet::Packet;

#[derive(Debug, Default)]
struct QueueState {
    packets: VecDeque<Packet>,
    size: usize,
    closed: bool,
}

/// Bounded-by-convention packet queue guarded by a mutex and two condvars.
#[derive(Debug)]
pub struct PacketQueue {
    name: &'static str,
    state: Mutex<QueueState>,
    readable: Condvar,
    writable: Condvar,
}

impl PacketQueue {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(QueueState::default()),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a packet at the tail and wake one waiting consumer.
    ///
    /// Returns `false` (and releases the packet) once the queue is closed.
    pub fn enqueue(&self, packet: Packet) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.size += packet.size();
        state.packets.push_back(packet);
        drop(state);
        self.readable.notify_one();
        true
    }

    /// Pop the head packet.
    ///
    /// With `block` set, waits until a packet arrives or the queue is closed.
    /// Without it, an empty queue yields `None` immediately.
    pub fn dequeue(&self, block: bool) -> Option<Packet> {
        let mut state = self.lock();
        loop {
            if let Some(packet) = state.packets.pop_front() {
                state.size -= packet.size();
                drop(state);
                self.writable.notify_one();
                return Some(packet);
            }
            if !block || state.closed {
                return None;
            }
            state = self
                .readable
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Release every held packet and zero the counters.
    ///
    /// Seeks use [`PacketQueue::flush_with_marker`] so the consumer is told
    /// in-band; this bare form is used on teardown, after [`PacketQueue::close`].
    pub fn flush(&self) {
        let mut state = self.lock();
        state.packets.clear();
        state.size = 0;
        drop(state);
        self.writable.notify_all();
    }

    /// Flush and enqueue a [`Packet::FlushMarker`] under a single lock.
    ///
    /// No packet enqueued before the call can be observed after the marker.
    pub fn flush_with_marker(&self) {
        let mut state = self.lock();
        state.packets.clear();
        state.size = 0;
        if !state.closed {
            state.packets.push_back(Packet::FlushMarker);
        }
        drop(state);
        self.writable.notify_all();
        self.readable.notify_one();
    }

    /// Number of queued items (flush markers included).
    pub fn len(&self) -> usize {
        self.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().packets.is_empty()
    }

    /// Aggregate byte size of queued packets.
    pub fn byte_size(&self) -> usize {
        self.lock().size
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Close the queue and wake every waiter on either side.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Wait until the aggregate size is at or below `high_watermark`.
    ///
    /// Returns `true` when there is room, `false` on timeout or close.
    pub fn wait_for_space(&self, high_watermark: usize, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .writable
            .wait_timeout_while(state, timeout, |state| {
                !state.closed && state.size > high_watermark
            })
            .unwrap_or_else(PoisonError::into_inner);
        !state.closed && state.size <= high_watermark
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MediaPacket;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn data(stream: usize, size: usize, pts: i64) -> Packet {
        Packet::Data(MediaPacket::new(stream, vec![0u8; size]).with_pts(pts))
    }

    fn held_sum(queue: &PacketQueue) -> usize {
        queue.lock().packets.iter().map(Packet::size).sum()
    }

    #[test]
    fn byte_size_tracks_sum_of_held_packets() {
        let queue = PacketQueue::new("test");
        let sizes = [13usize, 0, 4096, 7, 512, 1];
        for (i, size) in sizes.iter().enumerate() {
            queue.enqueue(data(0, *size, i as i64));
            assert_eq!(queue.byte_size(), held_sum(&queue));
            if i % 2 == 1 {
                queue.dequeue(false);
                assert_eq!(queue.byte_size(), held_sum(&queue));
            }
        }
        while queue.dequeue(false).is_some() {
            assert_eq!(queue.byte_size(), held_sum(&queue));
        }
        assert_eq!(queue.byte_size(), 0);
    }

    #[test]
    fn dequeue_is_fifo() {
        let queue = PacketQueue::new("test");
        for pts in 0..5 {
            queue.enqueue(data(0, 10, pts));
        }
        for pts in 0..5 {
            match queue.dequeue(false) {
                Some(Packet::Data(packet)) => assert_eq!(packet.pts, Some(pts)),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn non_blocking_dequeue_on_empty_returns_none() {
        let queue = PacketQueue::new("test");
        assert!(queue.dequeue(false).is_none());
    }

    #[test]
    fn flush_then_dequeue_is_empty() {
        let queue = PacketQueue::new("test");
        queue.enqueue(data(0, 100, 1));
        queue.enqueue(data(0, 200, 2));
        queue.flush();
        assert!(queue.dequeue(false).is_none());
        assert_eq!(queue.byte_size(), 0);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn flush_marker_precedes_everything_after_flush() {
        let queue = PacketQueue::new("test");
        queue.enqueue(data(0, 100, 1));
        queue.enqueue(data(0, 100, 2));
        queue.flush_with_marker();
        queue.enqueue(data(0, 100, 3));

        assert_eq!(queue.dequeue(false), Some(Packet::FlushMarker));
        match queue.dequeue(false) {
            Some(Packet::Data(packet)) => assert_eq!(packet.pts, Some(3)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(queue.dequeue(false).is_none());
    }

    #[test]
    fn blocking_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(PacketQueue::new("test"));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue(true))
        };
        thread::sleep(Duration::from_millis(20));
        queue.enqueue(data(0, 8, 42));
        let got = consumer.join().unwrap();
        assert_eq!(got.and_then(|p| p.stream_index()), Some(0));
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(PacketQueue::new("test"));
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue(true))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(consumer.join().unwrap().is_none());
        assert!(!queue.enqueue(data(0, 1, 0)));
    }

    #[test]
    fn wait_for_space_returns_once_consumer_drains() {
        let queue = Arc::new(PacketQueue::new("test"));
        for pts in 0..4 {
            queue.enqueue(data(0, 100, pts));
        }
        assert!(!queue.wait_for_space(250, Duration::from_millis(5)));

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.dequeue(false);
                queue.dequeue(false);
            })
        };
        let started = Instant::now();
        assert!(queue.wait_for_space(250, Duration::from_secs(2)));
        assert!(started.elapsed() < Duration::from_secs(2));
        consumer.join().unwrap();
        assert_eq!(queue.len(), 2);
    }
}
