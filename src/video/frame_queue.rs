//! Frame queue between the network context and the decoder.
//!
//! A bounded, latency-first buffer: when full, the oldest unit is evicted
//! instead of blocking the producer. The consumer peeks with
//! [`FrameQueue::wait_next`] and removes a unit only once it is done with it,
//! so a failed decode can retry the same unit.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::constants::{DEFAULT_FRAME_QUEUE_SIZE, MAX_FRAME_QUEUE_SIZE};
use crate::core::FrameSink;

/// One decodable access unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoUnit {
    /// Server-assigned frame sequence number.
    pub frame_index: u64,
    /// Presentation timestamp from the frame-start header.
    pub presentation_time: u64,
    /// Encoded bytes.
    pub payload: Vec<u8>,
    /// Arrival order, assigned on admission.
    sequence: u64,
}

impl VideoUnit {
    /// Create a unit.
    pub fn new(frame_index: u64, presentation_time: u64, payload: Vec<u8>) -> Self {
        Self {
            frame_index,
            presentation_time,
            payload,
            sequence: 0,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Arrival order within the queue's lifetime.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Unit handed to the consumer; shared with the queue until recycled.
pub type SharedUnit = Arc<VideoUnit>;

#[derive(Debug)]
struct Inner {
    units: VecDeque<SharedUnit>,
    capacity: usize,
    next_sequence: u64,
    /// Bumped on every flush so waiters can tell a flush from a timeout.
    flush_epoch: u64,
    pool: Vec<Vec<u8>>,
    dropped: u64,
}

impl Inner {
    fn evict_oldest(&mut self) -> Option<u64> {
        let oldest = self.units.pop_front()?;
        self.dropped += 1;
        let frame_index = oldest.frame_index;
        self.reclaim(oldest);
        Some(frame_index)
    }

    /// Return a unit's storage to the pool if nobody else holds it.
    fn reclaim(&mut self, unit: SharedUnit) {
        if let Ok(unit) = Arc::try_unwrap(unit) {
            let mut payload = unit.payload;
            if self.pool.len() < self.capacity {
                payload.clear();
                self.pool.push(payload);
            }
        }
    }

    fn clear(&mut self) {
        while let Some(unit) = self.units.pop_front() {
            self.reclaim(unit);
        }
    }
}

/// Thread-safe bounded queue of video units.
///
/// Shared between exactly one producer (the connection manager) and one
/// consumer (the decoder). Every operation is internally synchronized.
#[derive(Debug)]
pub struct FrameQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_QUEUE_SIZE)
    }
}

impl FrameQueue {
    /// Create a queue with the given capacity (clamped to `1..=256`).
    pub fn new(capacity: usize) -> Self {
        let capacity = clamp_capacity(capacity);
        Self {
            inner: Mutex::new(Inner {
                units: VecDeque::with_capacity(capacity),
                capacity,
                next_sequence: 0,
                flush_epoch: 0,
                pool: Vec::with_capacity(capacity),
                dropped: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Admit a unit, evicting the oldest one if the queue is full.
    ///
    /// Returns the frame index of the evicted unit.
    pub fn enqueue(&self, mut unit: VideoUnit) -> Option<u64> {
        let mut inner = self.inner.lock();

        let mut evicted = None;
        while inner.units.len() >= inner.capacity {
            evicted = inner.evict_oldest();
        }
        if let Some(frame_index) = evicted {
            tracing::debug!(
                frame_index,
                incoming = unit.frame_index,
                capacity = inner.capacity,
                "frame queue full, dropped oldest unit"
            );
        }

        unit.sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.units.push_back(Arc::new(unit));
        self.available.notify_all();
        evicted
    }

    /// Wait for the head unit without removing it.
    ///
    /// Returns `None` when the timeout elapses or the queue is flushed while
    /// waiting.
    pub fn wait_next(&self, timeout: Duration) -> Option<SharedUnit> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        let epoch = inner.flush_epoch;

        loop {
            if inner.flush_epoch != epoch {
                return None;
            }
            if let Some(head) = inner.units.front() {
                return Some(Arc::clone(head));
            }
            if self.available.wait_until(&mut inner, deadline).timed_out() {
                if inner.flush_epoch != epoch {
                    return None;
                }
                return inner.units.front().map(Arc::clone);
            }
        }
    }

    /// Peek at the head unit without waiting.
    pub fn peek(&self) -> Option<SharedUnit> {
        self.inner.lock().units.front().map(Arc::clone)
    }

    /// Remove and return the head unit.
    pub fn dequeue(&self) -> Option<SharedUnit> {
        self.inner.lock().units.pop_front()
    }

    /// Hand a finished unit back.
    ///
    /// Removes it from the queue if it is still queued and makes its storage
    /// available to [`FrameQueue::take_buffer`].
    pub fn recycle(&self, unit: SharedUnit) {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner
            .units
            .iter()
            .position(|queued| queued.sequence == unit.sequence && Arc::ptr_eq(queued, &unit))
        {
            inner.units.remove(pos);
        }
        inner.reclaim(unit);
    }

    /// Drop every unit and release waiting consumers with "no data".
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        let flushed = inner.units.len();
        inner.clear();
        inner.flush_epoch += 1;
        self.available.notify_all();
        tracing::trace!(flushed, "frame queue flushed");
    }

    /// Flush and adopt a new capacity.
    pub fn reset(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.clear();
        inner.capacity = clamp_capacity(capacity);
        inner.flush_epoch += 1;
        self.available.notify_all();
    }

    /// Change the capacity in place, evicting the oldest units if shrinking.
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = clamp_capacity(capacity);
        while inner.units.len() > inner.capacity {
            inner.evict_oldest();
        }
        let capacity = inner.capacity;
        inner.pool.truncate(capacity);
    }

    /// Storage for a new unit, taken from the recycle pool when available.
    pub fn take_buffer(&self, len: usize) -> Vec<u8> {
        let mut buffer = self.inner.lock().pool.pop().unwrap_or_default();
        buffer.clear();
        buffer.reserve(len);
        buffer
    }

    /// Number of queued units (advisory under concurrent use).
    pub fn len(&self) -> usize {
        self.inner.lock().units.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Total units evicted by overflow.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Number of buffers waiting in the recycle pool.
    pub fn pooled_buffers(&self) -> usize {
        self.inner.lock().pool.len()
    }

    /// Frame indices currently queued, oldest first.
    pub fn frame_indices(&self) -> Vec<u64> {
        self.inner
            .lock()
            .units
            .iter()
            .map(|unit| unit.frame_index)
            .collect()
    }
}

impl FrameSink for FrameQueue {
    fn enqueue(&self, unit: VideoUnit) -> Option<u64> {
        FrameQueue::enqueue(self, unit)
    }

    fn flush(&self) {
        FrameQueue::flush(self)
    }

    fn reset(&self, capacity: usize) {
        FrameQueue::reset(self, capacity)
    }

    fn set_capacity(&self, capacity: usize) {
        FrameQueue::set_capacity(self, capacity)
    }

    fn take_buffer(&self, len: usize) -> Vec<u8> {
        FrameQueue::take_buffer(self, len)
    }
}

fn clamp_capacity(capacity: usize) -> usize {
    capacity.clamp(1, MAX_FRAME_QUEUE_SIZE)
}
