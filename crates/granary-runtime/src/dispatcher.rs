//! Invocation dispatcher
//!
//! TigerStyle: Reject bad invocations before they touch any activation.
//!
//! The dispatcher is the single entry point for invocations. It validates the
//! target type, method selector and argument contract up front, resolves the
//! activation through the table, enqueues the invocation and hands back a
//! [`PendingInvocation`] that resolves to the turn's result.

use crate::activation::{Activation, Enqueued};
use crate::table::{ActivationTable, ClassRegistry};
use bytes::Bytes;
use granary_core::config::GranaryConfig;
use granary_core::error::{Error, Result};
use granary_core::identity::{GrainId, GrainType};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

/// Attempts to enqueue while activations keep retiring under the caller
const ENQUEUE_ATTEMPTS_COUNT_MAX: usize = 16;

struct DispatcherInner {
    table: ActivationTable,
    config: GranaryConfig,
    shutdown: AtomicBool,
}

/// Routes invocations to activations
///
/// Cheap to clone; all clones share one activation table.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("active", &self.inner.table.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher over the registered grain types
    ///
    /// # Errors
    /// `InvalidConfiguration` if `config` fails validation.
    pub fn new(classes: ClassRegistry, config: GranaryConfig) -> Result<Self> {
        let table = ActivationTable::new(classes, config.clone())?;
        Ok(Self {
            inner: Arc::new(DispatcherInner {
                table,
                config,
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Invoke `method` on the grain `id` and wait for the result
    ///
    /// # Errors
    /// `UnknownGrainType`, `UnknownMethod` and `InvalidArgument` are detected
    /// before any activation exists. `ActivationFailed`, `Cancelled`,
    /// `TurnQueueFull` or the method's own error come from the turn.
    pub async fn invoke(&self, id: GrainId, method: &str, payload: Bytes) -> Result<Bytes> {
        self.submit(id, method, payload).await?.await
    }

    /// Enqueue an invocation and return a handle to its pending result
    ///
    /// The returned future may be cancelled while the invocation still waits
    /// for its turn.
    #[instrument(skip(self, payload), fields(grain_id = %id), level = "debug")]
    pub async fn submit(
        &self,
        id: GrainId,
        method: &str,
        payload: Bytes,
    ) -> Result<PendingInvocation> {
        if self.is_shutdown() {
            return Err(Error::RuntimeShutdown);
        }

        self.check(&id, method, &payload)?;

        for _ in 0..ENQUEUE_ATTEMPTS_COUNT_MAX {
            let activation = self.inner.table.resolve(&id).await?;
            match activation.enqueue(method.to_string(), payload.clone())? {
                Enqueued::Accepted(ticket) => {
                    debug!(
                        grain_id = %id,
                        method,
                        invocation_id = ticket.invocation_id,
                        "Invocation enqueued"
                    );
                    return Ok(PendingInvocation {
                        id,
                        method: method.to_string(),
                        cancel: CancelHandle {
                            activation: Arc::downgrade(&activation),
                            invocation_id: ticket.invocation_id,
                        },
                        reply_rx: ticket.reply_rx,
                    });
                }
                Enqueued::Retiring => {
                    debug!(grain_id = %id, "Activation retiring, waiting to re-resolve");
                    activation.wait_retired().await;
                    if self.is_shutdown() {
                        return Err(Error::RuntimeShutdown);
                    }
                }
            }
        }

        warn!(grain_id = %id, method, "Gave up enqueueing after repeated retirements");
        Err(Error::internal(format!(
            "{} kept retiring across {} enqueue attempts",
            id, ENQUEUE_ATTEMPTS_COUNT_MAX
        )))
    }

    /// Validate type, payload size, selector and argument contract
    fn check(&self, id: &GrainId, method: &str, payload: &Bytes) -> Result<()> {
        let class = self.inner.table.class_for(id)?;

        let limit = self.inner.config.dispatcher.payload_size_bytes_max;
        if payload.len() > limit {
            return Err(Error::invalid_argument(
                method,
                format!("payload of {} bytes exceeds limit {}", payload.len(), limit),
            ));
        }

        class.check(id, method, payload)
    }

    /// Drain and release the activation for `id`, if any
    ///
    /// Returns true if an activation was released.
    pub async fn deactivate(&self, id: &GrainId) -> bool {
        self.inner.table.deactivate(id).await
    }

    /// Number of live activations
    pub fn active_grain_count(&self) -> usize {
        self.inner.table.len()
    }

    /// Check whether `id` currently has a live activation
    pub fn is_active(&self, id: &GrainId) -> bool {
        self.inner.table.get(id).is_some()
    }

    /// Live activation for `id`, without creating one
    pub fn activation(&self, id: &GrainId) -> Option<Arc<Activation>> {
        self.inner.table.get(id)
    }

    /// Registered grain types, sorted
    pub fn grain_types(&self) -> Vec<GrainType> {
        self.inner.table.grain_types().into_iter().cloned().collect()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Reject new invocations, then drain and release every activation
    ///
    /// Idempotent: later calls return immediately.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(active = self.active_grain_count(), "Shutting down dispatcher");
        let retired = self.inner.table.deactivate_all().await;
        info!(retired, "Dispatcher shut down");
    }
}

// =============================================================================
// PendingInvocation
// =============================================================================

/// Cancels one invocation while it waits in its turn queue
#[derive(Debug, Clone)]
pub struct CancelHandle {
    activation: Weak<Activation>,
    invocation_id: u64,
}

impl CancelHandle {
    /// Remove the invocation from its queue and fail it with `Cancelled`
    ///
    /// Returns false if the turn already started or finished; a started
    /// turn always completes.
    pub fn cancel(&self) -> bool {
        self.activation
            .upgrade()
            .map(|activation| activation.cancel(self.invocation_id))
            .unwrap_or(false)
    }
}

/// Result of a submitted invocation
///
/// Dropping it before the turn starts makes the activation skip the turn.
#[derive(Debug)]
pub struct PendingInvocation {
    id: GrainId,
    method: String,
    cancel: CancelHandle,
    reply_rx: oneshot::Receiver<Result<Bytes>>,
}

impl PendingInvocation {
    /// Target identity
    pub fn id(&self) -> &GrainId {
        &self.id
    }

    /// Method selector
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Cancel if still queued; see [`CancelHandle::cancel`]
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    /// Handle that can cancel this invocation from elsewhere
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl Future for PendingInvocation {
    type Output = Result<Bytes>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        Pin::new(&mut this.reply_rx).poll(cx).map(|reply| {
            reply.unwrap_or_else(|_| {
                Err(Error::internal(format!(
                    "{} dropped invocation of {} without a result",
                    this.id, this.method
                )))
            })
        })
    }
}
