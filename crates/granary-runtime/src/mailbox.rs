//! Per-activation turn queue
//!
//! TigerStyle: Bounded queues with explicit limits, no silent drops.

use std::collections::VecDeque;

use bytes::Bytes;
use granary_core::constants::TURN_QUEUE_DEPTH_MAX;
use granary_core::error::Result;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Error when a turn queue is full
#[derive(Debug, Clone)]
pub struct TurnQueueFullError {
    pub depth: usize,
    pub limit: usize,
}

impl std::fmt::Display for TurnQueueFullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "turn queue full: {} invocations (limit: {})",
            self.depth, self.limit
        )
    }
}

impl std::error::Error for TurnQueueFullError {}

/// One enqueued invocation
#[derive(Debug)]
pub struct Envelope {
    /// Identifier unique within the owning activation
    pub invocation_id: u64,
    /// The method selector
    pub method: String,
    /// The argument payload
    pub payload: Bytes,
    /// Channel to deliver the result
    pub reply_tx: oneshot::Sender<Result<Bytes>>,
    /// When the invocation was enqueued
    pub enqueued_at: Instant,
}

impl Envelope {
    /// Create a new envelope stamped with the current time
    pub fn new(
        invocation_id: u64,
        method: String,
        payload: Bytes,
        reply_tx: oneshot::Sender<Result<Bytes>>,
    ) -> Self {
        debug_assert!(!method.is_empty(), "method must not be empty");

        Self {
            invocation_id,
            method,
            payload,
            reply_tx,
            enqueued_at: Instant::now(),
        }
    }

    /// Whether the caller has stopped waiting for the result
    pub fn is_abandoned(&self) -> bool {
        self.reply_tx.is_closed()
    }

    /// Time spent waiting in the queue
    pub fn wait_time(&self) -> std::time::Duration {
        self.enqueued_at.elapsed()
    }
}

/// Bounded FIFO of pending invocations
///
/// # TigerStyle
/// - Explicit capacity limit
/// - FIFO ordering
/// - No silent drops (returns error when full)
#[derive(Debug)]
pub struct TurnQueue {
    queue: VecDeque<Envelope>,
    capacity: usize,
    /// Total envelopes accepted
    enqueued_count: u64,
}

impl TurnQueue {
    /// Create a queue with the given capacity
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        assert!(
            capacity <= TURN_QUEUE_DEPTH_MAX,
            "capacity exceeds TURN_QUEUE_DEPTH_MAX"
        );

        Self {
            queue: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            enqueued_count: 0,
        }
    }

    /// Append an envelope, failing when the queue is at capacity
    pub fn push(&mut self, envelope: Envelope) -> std::result::Result<(), TurnQueueFullError> {
        if self.queue.len() >= self.capacity {
            return Err(TurnQueueFullError {
                depth: self.queue.len(),
                limit: self.capacity,
            });
        }

        self.queue.push_back(envelope);
        self.enqueued_count = self.enqueued_count.wrapping_add(1);

        debug_assert!(self.queue.len() <= self.capacity);
        Ok(())
    }

    /// Take the oldest envelope
    pub fn pop(&mut self) -> Option<Envelope> {
        self.queue.pop_front()
    }

    /// Remove a specific envelope that has not been handed out yet
    pub fn remove(&mut self, invocation_id: u64) -> Option<Envelope> {
        let position = self
            .queue
            .iter()
            .position(|e| e.invocation_id == invocation_id)?;
        self.queue.remove(position)
    }

    /// Remove every pending envelope
    pub fn drain(&mut self) -> Vec<Envelope> {
        self.queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Total envelopes accepted over the queue's lifetime
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(invocation_id: u64, method: &str) -> (Envelope, oneshot::Receiver<Result<Bytes>>) {
        let (tx, rx) = oneshot::channel();
        (
            Envelope::new(invocation_id, method.to_string(), Bytes::new(), tx),
            rx,
        )
    }

    #[tokio::test]
    async fn test_queue_fifo_order() {
        let mut queue = TurnQueue::with_capacity(100);
        let mut receivers = Vec::new();

        for i in 0..10 {
            let (env, rx) = envelope(i, &format!("m{}", i));
            queue.push(env).unwrap();
            receivers.push(rx);
        }

        for i in 0..10 {
            let env = queue.pop().unwrap();
            assert_eq!(env.invocation_id, i);
            assert_eq!(env.method, format!("m{}", i));
        }
        assert!(queue.pop().is_none());
        assert_eq!(queue.enqueued_count(), 10);
    }

    #[tokio::test]
    async fn test_queue_full() {
        let mut queue = TurnQueue::with_capacity(2);
        let (a, _ra) = envelope(1, "a");
        let (b, _rb) = envelope(2, "b");
        let (c, _rc) = envelope(3, "c");

        queue.push(a).unwrap();
        queue.push(b).unwrap();
        let err = queue.push(c).unwrap_err();
        assert_eq!(err.depth, 2);
        assert_eq!(err.limit, 2);
    }

    #[tokio::test]
    async fn test_queue_remove_keeps_order() {
        let mut queue = TurnQueue::with_capacity(10);
        let mut receivers = Vec::new();
        for i in 1..=3 {
            let (env, rx) = envelope(i, "m");
            queue.push(env).unwrap();
            receivers.push(rx);
        }

        assert_eq!(queue.remove(2).unwrap().invocation_id, 2);
        assert!(queue.remove(2).is_none());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop().unwrap().invocation_id, 1);
        assert_eq!(queue.pop().unwrap().invocation_id, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_envelope_wait_time() {
        let (env, _rx) = envelope(1, "m");
        tokio::time::advance(std::time::Duration::from_millis(25)).await;
        assert_eq!(env.wait_time(), std::time::Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_abandoned_envelope() {
        let (env, rx) = envelope(1, "m");
        assert!(!env.is_abandoned());
        drop(rx);
        assert!(env.is_abandoned());
    }

    #[tokio::test]
    async fn test_queue_drain() {
        let mut queue = TurnQueue::with_capacity(10);
        let mut receivers = Vec::new();
        for i in 0..3 {
            let (env, rx) = envelope(i, "m");
            queue.push(env).unwrap();
            receivers.push(rx);
        }

        assert_eq!(queue.drain().len(), 3);
        assert!(queue.is_empty());
        assert_eq!(queue.enqueued_count(), 3);
    }
}
