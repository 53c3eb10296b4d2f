//! Grain references for callers
//!
//! TigerStyle: Location-transparent references with explicit error handling.

use crate::dispatcher::{Dispatcher, PendingInvocation};
use bytes::Bytes;
use granary_core::error::{Error, Result};
use granary_core::grain::encode_argument;
use granary_core::identity::{GrainId, GrainKey};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Reference to a grain
///
/// Holding a reference never activates anything; the first invocation does.
/// References can be cloned and shared across tasks.
#[derive(Debug, Clone)]
pub struct GrainRef {
    id: GrainId,
    dispatcher: Dispatcher,
    default_timeout: Option<Duration>,
}

impl GrainRef {
    /// Create a reference routed through `dispatcher`
    pub fn new(id: GrainId, dispatcher: Dispatcher) -> Self {
        Self {
            id,
            dispatcher,
            default_timeout: None,
        }
    }

    /// Fail invocations that take longer than `timeout`
    ///
    /// The timeout is caller-side: an invocation still queued when it fires
    /// is cancelled, a running one completes but its result is discarded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        debug_assert!(!timeout.is_zero(), "timeout must be positive");
        self.default_timeout = Some(timeout);
        self
    }

    /// Get the grain's identity
    pub fn id(&self) -> &GrainId {
        &self.id
    }

    /// Invoke a method with a raw JSON payload
    pub async fn invoke(&self, method: &str, payload: Bytes) -> Result<Bytes> {
        let pending = self.submit(method, payload).await?;

        match self.default_timeout {
            Some(timeout) => {
                let cancel = pending.cancel_handle();
                match tokio::time::timeout(timeout, pending).await {
                    Ok(result) => result,
                    Err(_) => {
                        cancel.cancel();
                        Err(Error::InvocationTimedOut {
                            method: method.to_string(),
                            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        })
                    }
                }
            }
            None => pending.await,
        }
    }

    /// Enqueue an invocation without waiting for its result
    pub async fn submit(&self, method: &str, payload: Bytes) -> Result<PendingInvocation> {
        self.dispatcher.submit(self.id.clone(), method, payload).await
    }

    /// Invoke with a typed request and response
    ///
    /// Serializes the request to JSON, invokes the grain, and deserializes
    /// the response.
    pub async fn call<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = encode_argument(request)?;
        let response = self.invoke(method, payload).await?;

        serde_json::from_slice(&response).map_err(|e| Error::DeserializationFailed {
            reason: format!("{} response: {}", method, e),
        })
    }

    /// Drain and release the grain's activation
    ///
    /// The grain is reactivated by the next invocation.
    pub async fn deactivate(&self) -> bool {
        self.dispatcher.deactivate(&self.id).await
    }

    /// Check whether the grain currently has a live activation
    pub fn is_active(&self) -> bool {
        self.dispatcher.is_active(&self.id)
    }
}

/// Builder for grain references sharing one dispatcher
#[derive(Debug, Clone)]
pub struct GrainRefBuilder {
    dispatcher: Dispatcher,
    default_timeout: Option<Duration>,
}

impl GrainRefBuilder {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            default_timeout: None,
        }
    }

    /// Apply a caller-side timeout to every reference built
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Reference for an existing identity
    pub fn for_grain(&self, id: GrainId) -> GrainRef {
        let grain = GrainRef::new(id, self.dispatcher.clone());
        match self.default_timeout {
            Some(timeout) => grain.with_timeout(timeout),
            None => grain,
        }
    }

    /// Reference for a type tag and key
    ///
    /// # Errors
    /// `InvalidIdentity` for a malformed tag or a nil/empty key.
    pub fn for_parts(
        &self,
        grain_type: impl AsRef<str>,
        key: impl Into<GrainKey>,
    ) -> Result<GrainRef> {
        Ok(self.for_grain(GrainId::new(grain_type, key)?))
    }
}
