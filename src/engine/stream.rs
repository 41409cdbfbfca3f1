use crate::core::{Packet, PacketType, Timestamp};
use crate::error::StreamError;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

/// Index of one consumer queue on a stream.
pub(crate) type ConsumerId = usize;

/// What a consumer can currently see of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PortView {
    pub head: Option<Timestamp>,
    /// No packet below this timestamp can still arrive.
    pub bound: Timestamp,
}

impl PortView {
    /// Whether the port is known to hold nothing at `ts`.
    pub fn is_empty_at(&self, ts: Timestamp) -> bool {
        match self.head {
            Some(head) => head > ts,
            None => self.bound > ts,
        }
    }
}

struct StreamInner {
    last: Timestamp,
    bound: Timestamp,
    closed: bool,
    halted: bool,
    queues: Vec<VecDeque<Packet>>,
    detached: Vec<bool>,
}

/// Timestamp-ordered channel from one producer to any number of consumers.
///
/// Every consumer (node input port or observer) reads its own FIFO queue;
/// a pushed packet is shared into all of them. The queues are only touched
/// under the stream's own lock.
pub struct Stream {
    name: String,
    packet_type: PacketType,
    max_queue_depth: Option<usize>,
    inner: Mutex<StreamInner>,
    space: Notify,
}

impl Stream {
    pub fn new(name: impl Into<String>, packet_type: PacketType, max_queue_depth: Option<usize>) -> Self {
        Self {
            name: name.into(),
            packet_type,
            max_queue_depth,
            inner: Mutex::new(StreamInner {
                last: Timestamp::UNSET,
                bound: Timestamp::MIN,
                closed: false,
                halted: false,
                queues: Vec::new(),
                detached: Vec::new(),
            }),
            space: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    fn lock(&self) -> MutexGuard<'_, StreamInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a consumer queue. Packets pushed before this call are not seen
    /// by the new consumer.
    pub(crate) fn add_consumer(&self) -> ConsumerId {
        let mut inner = self.lock();
        inner.queues.push(VecDeque::new());
        inner.detached.push(false);
        inner.queues.len() - 1
    }

    /// Stops delivering to `consumer` and returns what it had not read.
    pub(crate) fn detach(&self, consumer: ConsumerId) -> Vec<Packet> {
        let dropped: Vec<Packet> = {
            let mut inner = self.lock();
            inner.detached[consumer] = true;
            inner.queues[consumer].drain(..).collect()
        };
        self.space.notify_waiters();
        dropped
    }

    /// Appends a packet regardless of queue depth.
    pub fn push(&self, packet: Packet) -> Result<(), StreamError> {
        self.push_inner(packet, false)
    }

    /// Appends a packet, refusing with `QueueFull` when a consumer queue is
    /// at its limit.
    pub fn try_push(&self, packet: Packet) -> Result<(), StreamError> {
        self.push_inner(packet, true)
    }

    /// Appends a packet, waiting for queue space first.
    pub async fn push_waiting(&self, packet: Packet) -> Result<(), StreamError> {
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(packet.clone()) {
                Err(StreamError::QueueFull) => notified.await,
                other => return other,
            }
        }
    }

    fn push_inner(&self, packet: Packet, respect_depth: bool) -> Result<(), StreamError> {
        let mut inner = self.lock();
        if inner.halted {
            return Err(StreamError::NotRunning);
        }
        if inner.closed {
            return Err(StreamError::Closed);
        }

        let ts = packet.timestamp();
        if !ts.is_valid() {
            return Err(StreamError::InvalidTimestamp(ts));
        }
        if inner.last != Timestamp::UNSET && ts <= inner.last {
            return Err(StreamError::NonIncreasingTimestamp {
                last: inner.last,
                got: ts,
            });
        }
        if !self.packet_type.accepts(&packet) {
            return Err(StreamError::TypeMismatch {
                expected: self.packet_type.name(),
                got: packet.type_name(),
            });
        }
        if respect_depth && Self::full(&inner, self.max_queue_depth) {
            return Err(StreamError::QueueFull);
        }

        inner.last = ts;
        inner.bound = inner.bound.max(ts.next());
        let StreamInner { queues, detached, .. } = &mut *inner;
        for (queue, _) in queues.iter_mut().zip(detached.iter()).filter(|(_, d)| !**d) {
            queue.push_back(packet.clone());
        }
        Ok(())
    }

    fn full(inner: &StreamInner, depth: Option<usize>) -> bool {
        match depth {
            Some(depth) => inner.queues.iter().any(|q| q.len() >= depth),
            None => false,
        }
    }

    pub fn is_full(&self) -> bool {
        Self::full(&self.lock(), self.max_queue_depth)
    }

    /// Marks the stream closed. Returns false if it already was.
    pub fn close(&self) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        inner.closed = true;
        inner.bound = Timestamp::DONE;
        true
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Raises the timestamp bound without sending a packet.
    pub fn advance_bound(&self, bound: Timestamp) {
        let mut inner = self.lock();
        if !inner.closed {
            inner.bound = inner.bound.max(bound);
        }
    }

    pub fn bound(&self) -> Timestamp {
        self.lock().bound
    }

    /// Timestamp of the last accepted packet, `Timestamp::UNSET` if none.
    pub fn last_timestamp(&self) -> Timestamp {
        self.lock().last
    }

    /// Refuses all further pushes and wakes producers waiting for space.
    pub(crate) fn halt(&self) {
        self.lock().halted = true;
        self.space.notify_waiters();
    }

    pub(crate) fn view(&self, consumer: ConsumerId) -> PortView {
        let inner = self.lock();
        PortView {
            head: inner.queues[consumer].front().map(Packet::timestamp),
            bound: inner.bound,
        }
    }

    /// Pops the head packet if it carries `ts`.
    pub(crate) fn pop_at(&self, consumer: ConsumerId, ts: Timestamp) -> Option<Packet> {
        let popped = {
            let mut inner = self.lock();
            let queue = &mut inner.queues[consumer];
            match queue.front() {
                Some(head) if head.timestamp() == ts => queue.pop_front(),
                _ => None,
            }
        };
        if popped.is_some() {
            self.space.notify_waiters();
        }
        popped
    }

    pub(crate) fn drain(&self, consumer: ConsumerId) -> Vec<Packet> {
        let drained: Vec<Packet> = self.lock().queues[consumer].drain(..).collect();
        if !drained.is_empty() {
            self.space.notify_waiters();
        }
        drained
    }

    /// Closed and nothing left for this consumer.
    pub(crate) fn is_done(&self, consumer: ConsumerId) -> bool {
        let inner = self.lock();
        inner.closed && inner.queues[consumer].is_empty()
    }

    #[cfg(test)]
    pub(crate) fn queue_len(&self, consumer: ConsumerId) -> usize {
        self.lock().queues[consumer].len()
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("name", &self.name).finish()
    }
}
