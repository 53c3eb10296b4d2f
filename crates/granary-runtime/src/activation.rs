//! Grain activation and its turn loop
//!
//! TigerStyle: Explicit lifecycle states, one turn at a time.
//!
//! Every activation owns one tokio task. The task holds the live grain
//! instance exclusively, pops invocations from the turn queue in FIFO order
//! and runs them one at a time, so grain code never needs its own locking.
//!
//! ```text
//!   Idle <--> Running
//!     |          |
//!     v          v
//!   Draining ----+--> Deactivated
//! ```
//!
//! Draining stops new enqueues but still runs everything already queued.
//! A fatal turn (the body returns `ActivationFailed` or panics) skips
//! Draining, fails the rest of the queue and goes straight to Deactivated.

use crate::mailbox::{Envelope, TurnQueue};
use bytes::Bytes;
use futures::FutureExt;
use granary_core::config::ActivationConfig;
use granary_core::error::{Error, Result};
use granary_core::grain::LiveGrain;
use granary_core::identity::GrainId;
use granary_core::metrics;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Hook run once the activation has finished its last turn
///
/// The activation table uses it to drop its slot before the activation
/// reports itself as retired.
pub type RetireHook = Box<dyn FnOnce(&Activation) + Send>;

/// Activation lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationState {
    /// Waiting for work
    #[default]
    Idle,
    /// Executing a turn
    Running,
    /// Rejecting new invocations, finishing queued ones
    Draining,
    /// Released; the table no longer routes to it
    Deactivated,
}

impl ActivationState {
    /// Check if new invocations may be enqueued
    pub fn accepts_invocations(&self) -> bool {
        matches!(self, ActivationState::Idle | ActivationState::Running)
    }

    /// Check if the transition is part of the lifecycle
    pub fn can_transition_to(&self, next: ActivationState) -> bool {
        use ActivationState::*;
        match (self, next) {
            (Idle, Running) | (Running, Idle) => true,
            (Idle, Draining) | (Running, Draining) => true,
            // A fatal turn skips draining
            (Running, Deactivated) => true,
            (Draining, Deactivated) => true,
            _ if *self == next => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationState::Idle => write!(f, "idle"),
            ActivationState::Running => write!(f, "running"),
            ActivationState::Draining => write!(f, "draining"),
            ActivationState::Deactivated => write!(f, "deactivated"),
        }
    }
}

/// Why an activation left service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivationReason {
    /// No invocation arrived within the idle timeout
    Idle,
    /// Explicit deactivate call
    Requested,
    /// Runtime shutdown
    Shutdown,
    /// A turn failed fatally
    Failed,
}

impl DeactivationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeactivationReason::Idle => "idle",
            DeactivationReason::Requested => "requested",
            DeactivationReason::Shutdown => "shutdown",
            DeactivationReason::Failed => "failed",
        }
    }
}

/// Statistics for one activation
#[derive(Debug, Clone)]
pub struct ActivationStats {
    /// When the activation was created
    pub activated_at: Instant,
    /// When the last turn finished
    pub last_turn_at: Option<Instant>,
    /// Invocations accepted into the turn queue
    pub enqueued_count: u64,
    /// Turns executed
    pub turn_count: u64,
    /// Turns that returned an error
    pub error_count: u64,
    /// Invocations cancelled before their turn
    pub cancelled_count: u64,
    /// Invocations skipped because the caller stopped waiting
    pub abandoned_count: u64,
    /// Total time spent inside turns
    pub total_processing_time: Duration,
}

impl ActivationStats {
    fn new() -> Self {
        Self {
            activated_at: Instant::now(),
            last_turn_at: None,
            enqueued_count: 0,
            turn_count: 0,
            error_count: 0,
            cancelled_count: 0,
            abandoned_count: 0,
            total_processing_time: Duration::ZERO,
        }
    }

    fn record_turn(&mut self, duration: Duration, is_error: bool) {
        self.turn_count = self.turn_count.wrapping_add(1);
        if is_error {
            self.error_count = self.error_count.wrapping_add(1);
        }
        self.total_processing_time += duration;
        self.last_turn_at = Some(Instant::now());
    }

    /// Time since the last turn finished (or since activation)
    pub fn idle_time(&self) -> Duration {
        self.last_turn_at.unwrap_or(self.activated_at).elapsed()
    }

    /// Mean turn duration
    pub fn average_processing_time(&self) -> Duration {
        if self.turn_count == 0 {
            return Duration::ZERO;
        }
        let count = u32::try_from(self.turn_count).unwrap_or(u32::MAX);
        self.total_processing_time / count
    }
}

/// Outcome of an enqueue attempt
#[derive(Debug)]
pub enum Enqueued {
    /// Accepted; the receiver yields the result
    Accepted(Ticket),
    /// The activation is leaving service; resolve again once it has retired
    Retiring,
}

/// Receipt for an accepted invocation
#[derive(Debug)]
pub struct Ticket {
    pub invocation_id: u64,
    pub reply_rx: oneshot::Receiver<Result<Bytes>>,
}

struct ActivationInner {
    state: ActivationState,
    queue: TurnQueue,
    stats: ActivationStats,
    reason: Option<DeactivationReason>,
}

/// A live activation of one grain identity
pub struct Activation {
    id: GrainId,
    inner: Mutex<ActivationInner>,
    /// Wakes the worker when work arrives or draining begins
    work: Notify,
    retired_tx: watch::Sender<bool>,
    next_invocation_id: AtomicU64,
}

impl std::fmt::Debug for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activation")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Activation {
    /// Start serving `grain` on a dedicated task
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        id: GrainId,
        grain: Box<dyn LiveGrain>,
        config: &ActivationConfig,
        on_retire: RetireHook,
    ) -> Arc<Self> {
        let (retired_tx, _) = watch::channel(false);
        let activation = Arc::new(Self {
            id,
            inner: Mutex::new(ActivationInner {
                state: ActivationState::Idle,
                queue: TurnQueue::with_capacity(config.turn_queue_depth_max),
                stats: ActivationStats::new(),
                reason: None,
            }),
            work: Notify::new(),
            retired_tx,
            next_invocation_id: AtomicU64::new(1),
        });

        let worker = activation.clone();
        let idle_timeout = config.idle_timeout();
        tokio::spawn(async move {
            worker.run(grain, idle_timeout, on_retire).await;
        });

        activation
    }

    /// Get the grain identity
    pub fn id(&self) -> &GrainId {
        &self.id
    }

    /// Get the current lifecycle state
    pub fn state(&self) -> ActivationState {
        self.lock().state
    }

    /// Snapshot of the activation statistics
    pub fn stats(&self) -> ActivationStats {
        let inner = self.lock();
        let mut stats = inner.stats.clone();
        stats.enqueued_count = inner.queue.enqueued_count();
        stats
    }

    /// Number of invocations waiting for a turn
    pub fn pending_count(&self) -> usize {
        self.lock().queue.len()
    }

    /// Check if the activation has fully retired
    pub fn is_retired(&self) -> bool {
        *self.retired_tx.borrow()
    }

    /// Enqueue an invocation at the tail of the turn queue
    ///
    /// # Errors
    /// `TurnQueueFull` when the queue is at capacity.
    pub fn enqueue(&self, method: String, payload: Bytes) -> Result<Enqueued> {
        debug_assert!(!method.is_empty());

        let mut inner = self.lock();
        if !inner.state.accepts_invocations() {
            return Ok(Enqueued::Retiring);
        }

        let invocation_id = self.next_invocation_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope::new(invocation_id, method, payload, reply_tx);

        inner.queue.push(envelope).map_err(|e| Error::TurnQueueFull {
            id: self.id.to_string(),
            depth: e.depth,
            max: e.limit,
        })?;
        drop(inner);

        self.work.notify_one();
        Ok(Enqueued::Accepted(Ticket {
            invocation_id,
            reply_rx,
        }))
    }

    /// Remove a not-yet-started invocation and fail it with `Cancelled`
    ///
    /// Returns false when the invocation already started or finished.
    pub fn cancel(&self, invocation_id: u64) -> bool {
        let envelope = {
            let mut inner = self.lock();
            let envelope = inner.queue.remove(invocation_id);
            if envelope.is_some() {
                inner.stats.cancelled_count = inner.stats.cancelled_count.wrapping_add(1);
            }
            envelope
        };

        match envelope {
            Some(envelope) => {
                debug!(
                    grain_id = %self.id,
                    method = %envelope.method,
                    invocation_id,
                    "Invocation cancelled before its turn"
                );
                metrics::record_cancellation(&envelope.method);
                let _ = envelope.reply_tx.send(Err(Error::Cancelled {
                    id: self.id.to_string(),
                    method: envelope.method,
                }));
                true
            }
            None => false,
        }
    }

    /// Stop accepting invocations; queued ones still run
    ///
    /// Returns false if the activation was already leaving service.
    pub fn begin_draining(&self, reason: DeactivationReason) -> bool {
        let mut inner = self.lock();
        if !inner.state.accepts_invocations() {
            return false;
        }
        debug_assert!(inner.state.can_transition_to(ActivationState::Draining));
        inner.state = ActivationState::Draining;
        inner.reason = Some(reason);
        drop(inner);

        debug!(grain_id = %self.id, reason = reason.as_str(), "Draining activation");
        self.work.notify_one();
        true
    }

    /// Wait until the activation has run its last turn and left the table
    pub async fn wait_retired(&self) {
        let mut rx = self.retired_tx.subscribe();
        // The sender lives as long as self, so this cannot fail.
        let _ = rx.wait_for(|retired| *retired).await;
    }

    fn lock(&self) -> MutexGuard<'_, ActivationInner> {
        // Never held across an await.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(inner: &mut ActivationInner, next: ActivationState) {
        debug_assert!(
            inner.state.can_transition_to(next),
            "invalid transition {} -> {}",
            inner.state,
            next
        );
        inner.state = next;
    }

    // =========================================================================
    // Worker
    // =========================================================================

    #[instrument(skip_all, fields(grain_id = %self.id), level = "info")]
    async fn run(
        self: Arc<Self>,
        mut grain: Box<dyn LiveGrain>,
        idle_timeout: Option<Duration>,
        on_retire: RetireHook,
    ) {
        let reason = loop {
            let next = {
                let mut inner = self.lock();
                match inner.queue.pop() {
                    Some(envelope) => {
                        if inner.state == ActivationState::Idle {
                            Self::set_state(&mut inner, ActivationState::Running);
                        }
                        Some(envelope)
                    }
                    None if inner.state == ActivationState::Draining => {
                        break inner.reason.unwrap_or(DeactivationReason::Requested);
                    }
                    None => {
                        if inner.state == ActivationState::Running {
                            Self::set_state(&mut inner, ActivationState::Idle);
                        }
                        None
                    }
                }
            };

            match next {
                Some(envelope) => {
                    if let Err(fault) = self.run_turn(grain.as_mut(), envelope).await {
                        self.fail_pending(&fault);
                        break DeactivationReason::Failed;
                    }
                }
                None => {
                    let woken = match idle_timeout {
                        Some(timeout) => tokio::time::timeout(timeout, self.work.notified())
                            .await
                            .is_ok(),
                        None => {
                            self.work.notified().await;
                            true
                        }
                    };
                    if !woken {
                        let mut inner = self.lock();
                        if inner.state == ActivationState::Idle && inner.queue.is_empty() {
                            Self::set_state(&mut inner, ActivationState::Draining);
                            inner.reason = Some(DeactivationReason::Idle);
                        }
                    }
                }
            }
        };

        self.retire(grain, reason, on_retire).await;
    }

    /// Run one turn and deliver its result
    ///
    /// Returns the fault reason if the activation must not run further turns.
    async fn run_turn(
        &self,
        grain: &mut dyn LiveGrain,
        envelope: Envelope,
    ) -> std::result::Result<(), String> {
        if envelope.is_abandoned() {
            debug!(
                grain_id = %self.id,
                method = %envelope.method,
                invocation_id = envelope.invocation_id,
                "Skipping abandoned invocation"
            );
            let mut inner = self.lock();
            inner.stats.abandoned_count = inner.stats.abandoned_count.wrapping_add(1);
            return Ok(());
        }

        let queued = envelope.wait_time();
        let Envelope {
            invocation_id,
            method,
            payload,
            reply_tx,
            ..
        } = envelope;

        let started = Instant::now();
        let outcome = AssertUnwindSafe(grain.invoke(&method, payload))
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();

        let (result, fault) = match outcome {
            Ok(Ok(bytes)) => (Ok(bytes), None),
            Ok(Err(e)) if e.is_fatal_to_activation() => {
                let reason = e.to_string();
                (Err(e), Some(reason))
            }
            Ok(Err(e)) => (Err(e), None),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                (
                    Err(Error::activation_failed(
                        self.id.to_string(),
                        format!("{} panicked: {}", method, reason),
                    )),
                    Some(reason),
                )
            }
        };

        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        debug!(
            grain_id = %self.id,
            %method,
            invocation_id,
            status,
            queued_us = micros(queued),
            turn_us = micros(elapsed),
            "Turn completed"
        );
        metrics::record_invocation(&method, status, elapsed.as_secs_f64());

        {
            let mut inner = self.lock();
            inner.stats.record_turn(elapsed, result.is_err());
            if fault.is_some() {
                Self::set_state(&mut inner, ActivationState::Deactivated);
                inner.reason = Some(DeactivationReason::Failed);
            }
        }

        // The caller may have given up while the turn ran.
        let _ = reply_tx.send(result);

        match fault {
            Some(reason) => {
                error!(grain_id = %self.id, %method, %reason, "Activation failed during turn");
                Err(reason)
            }
            None => Ok(()),
        }
    }

    /// Fail every queued invocation after a fatal turn
    fn fail_pending(&self, reason: &str) {
        let pending = self.lock().queue.drain();
        if !pending.is_empty() {
            warn!(
                grain_id = %self.id,
                count = pending.len(),
                "Failing queued invocations of failed activation"
            );
        }
        for envelope in pending {
            let _ = envelope.reply_tx.send(Err(Error::activation_failed(
                self.id.to_string(),
                format!("activation failed before {} ran: {}", envelope.method, reason),
            )));
        }
    }

    #[instrument(skip_all, fields(grain_id = %self.id, reason = reason.as_str()), level = "info")]
    async fn retire(
        &self,
        mut grain: Box<dyn LiveGrain>,
        reason: DeactivationReason,
        on_retire: RetireHook,
    ) {
        if reason != DeactivationReason::Failed {
            debug_assert!(self.lock().queue.is_empty());
            match AssertUnwindSafe(grain.deactivate()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(grain_id = %self.id, error = %e, "on_deactivate failed"),
                Err(panic) => warn!(
                    grain_id = %self.id,
                    reason = %panic_message(panic.as_ref()),
                    "on_deactivate panicked"
                ),
            }
        }
        drop(grain);

        on_retire(self);

        {
            let mut inner = self.lock();
            if inner.state != ActivationState::Deactivated {
                Self::set_state(&mut inner, ActivationState::Deactivated);
            }
        }
        metrics::record_deactivation(self.id.grain_type().as_str(), reason.as_str());
        info!(grain_id = %self.id, reason = reason.as_str(), "Grain deactivated");

        self.retired_tx.send_replace(true);
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granary_core::grain::{Grain, GrainClass, MethodTable};
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct Tally {
        total: i64,
    }

    impl Grain for Tally {}

    fn tally_table() -> MethodTable<Tally> {
        MethodTable::<Tally>::builder_default()
            .method("Add", |grain: &mut Tally, _ctx, by: i64| {
                grain.total += by;
                Ok(grain.total)
            })
            .method("Fail", |_grain: &mut Tally, _ctx, _x: i64| -> Result<i64> {
                Err(Error::internal("ordinary failure"))
            })
            .method("Corrupt", |_grain: &mut Tally, ctx, _x: i64| -> Result<i64> {
                Err(Error::activation_failed(ctx.id.to_string(), "state lost"))
            })
            .method("Panic", |_grain: &mut Tally, _ctx, _x: i64| -> Result<i64> {
                panic!("boom")
            })
            .build()
            .unwrap()
    }

    async fn spawn_tally(config: &ActivationConfig) -> (Arc<Activation>, Arc<AtomicBool>) {
        let id = GrainId::new("tally", "t1").unwrap();
        let live = tally_table().activate(&id).await.unwrap();
        let retired = Arc::new(AtomicBool::new(false));
        let flag = retired.clone();
        let activation = Activation::spawn(
            id,
            live,
            config,
            Box::new(move |_: &Activation| flag.store(true, Ordering::SeqCst)),
        );
        (activation, retired)
    }

    async fn call(activation: &Activation, method: &str, arg: i64) -> Result<Bytes> {
        match activation
            .enqueue(method.to_string(), Bytes::from(arg.to_string()))
            .unwrap()
        {
            Enqueued::Accepted(ticket) => ticket.reply_rx.await.unwrap(),
            Enqueued::Retiring => panic!("activation unexpectedly retiring"),
        }
    }

    #[test]
    fn test_activation_state_transitions() {
        use ActivationState::*;
        assert!(Idle.can_transition_to(Running));
        assert!(Running.can_transition_to(Idle));
        assert!(Running.can_transition_to(Draining));
        assert!(Running.can_transition_to(Deactivated));
        assert!(Draining.can_transition_to(Deactivated));
        assert!(!Deactivated.can_transition_to(Idle));
        assert!(!Draining.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Deactivated));
    }

    #[test]
    fn test_activation_state_display() {
        assert_eq!(ActivationState::Idle.to_string(), "idle");
        assert_eq!(ActivationState::Draining.to_string(), "draining");
        assert_eq!(ActivationState::default(), ActivationState::Idle);
    }

    #[tokio::test]
    async fn test_turns_share_private_state() {
        let (activation, _) = spawn_tally(&ActivationConfig::default()).await;

        assert_eq!(call(&activation, "Add", 2).await.unwrap(), Bytes::from("2"));
        assert_eq!(call(&activation, "Add", 3).await.unwrap(), Bytes::from("5"));

        let stats = activation.stats();
        assert_eq!(stats.enqueued_count, 2);
        assert_eq!(stats.turn_count, 2);
        assert_eq!(stats.error_count, 0);
    }

    #[tokio::test]
    async fn test_turn_error_does_not_affect_siblings() {
        let (activation, _) = spawn_tally(&ActivationConfig::default()).await;

        assert!(call(&activation, "Fail", 0).await.is_err());
        assert_eq!(call(&activation, "Add", 1).await.unwrap(), Bytes::from("1"));
        assert_eq!(activation.stats().error_count, 1);
        assert!(activation.state().accepts_invocations());
    }

    #[tokio::test]
    async fn test_fatal_turn_fails_queue() {
        let (activation, retired) = spawn_tally(&ActivationConfig::default()).await;

        let mut tickets = Vec::new();
        for method in ["Corrupt", "Add", "Add"] {
            match activation
                .enqueue(method.to_string(), Bytes::from("1"))
                .unwrap()
            {
                Enqueued::Accepted(ticket) => tickets.push(ticket),
                Enqueued::Retiring => panic!("unexpected retiring"),
            }
        }

        for ticket in tickets {
            let result = ticket.reply_rx.await.unwrap();
            assert!(matches!(result, Err(Error::ActivationFailed { .. })));
        }

        activation.wait_retired().await;
        assert!(retired.load(Ordering::SeqCst));
        assert_eq!(activation.state(), ActivationState::Deactivated);
        assert!(matches!(
            activation.enqueue("Add".into(), Bytes::from("1")).unwrap(),
            Enqueued::Retiring
        ));
    }

    #[tokio::test]
    async fn test_panicking_turn_is_activation_failed() {
        let (activation, _) = spawn_tally(&ActivationConfig::default()).await;

        let result = call(&activation, "Panic", 0).await;
        assert!(matches!(result, Err(Error::ActivationFailed { .. })));
        activation.wait_retired().await;
        assert!(activation.is_retired());
    }

    #[tokio::test]
    async fn test_drain_runs_queued_turns() {
        let (activation, retired) = spawn_tally(&ActivationConfig::default()).await;

        let mut tickets = Vec::new();
        for _ in 0..5 {
            match activation.enqueue("Add".into(), Bytes::from("1")).unwrap() {
                Enqueued::Accepted(ticket) => tickets.push(ticket),
                Enqueued::Retiring => panic!("unexpected retiring"),
            }
        }
        assert!(activation.begin_draining(DeactivationReason::Requested));
        assert!(!activation.begin_draining(DeactivationReason::Requested));

        let mut results = Vec::new();
        for ticket in tickets {
            results.push(ticket.reply_rx.await.unwrap().unwrap());
        }
        assert_eq!(results.last().unwrap(), &Bytes::from("5"));

        activation.wait_retired().await;
        assert!(retired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_retires() {
        let config = ActivationConfig {
            idle_timeout_ms: 1_000,
            ..ActivationConfig::default()
        };
        let (activation, retired) = spawn_tally(&config).await;
        call(&activation, "Add", 1).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!activation.is_retired());

        activation.wait_retired().await;
        assert!(retired.load(Ordering::SeqCst));
        assert_eq!(activation.state(), ActivationState::Deactivated);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_noop() {
        let (activation, _) = spawn_tally(&ActivationConfig::default()).await;

        let ticket = match activation.enqueue("Add".into(), Bytes::from("1")).unwrap() {
            Enqueued::Accepted(ticket) => ticket,
            Enqueued::Retiring => panic!("unexpected retiring"),
        };
        let id = ticket.invocation_id;
        ticket.reply_rx.await.unwrap().unwrap();
        assert!(!activation.cancel(id));
        assert_eq!(activation.stats().cancelled_count, 0);
    }

    #[test]
    fn test_micros_saturates() {
        assert_eq!(micros(Duration::from_millis(3)), 3_000);
        assert_eq!(micros(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_average_processing_time() {
        let mut stats = ActivationStats::new();
        assert_eq!(stats.average_processing_time(), Duration::ZERO);
        stats.record_turn(Duration::from_millis(10), false);
        stats.record_turn(Duration::from_millis(30), true);
        assert_eq!(stats.average_processing_time(), Duration::from_millis(20));
        assert_eq!(stats.error_count, 1);
    }
}
