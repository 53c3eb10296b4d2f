//! Grain abstractions and the invocation contract
//!
//! TigerStyle: Behaviour is a registered method table, not a subclass.
//!
//! A grain type is described by a [`MethodTable`]: a constructor plus a map
//! from method selector to an argument contract and a body. The runtime only
//! sees the type-erased [`GrainClass`] / [`LiveGrain`] pair, so grains of
//! different Rust types can share one activation table.

use crate::constants::{METHOD_NAME_LENGTH_BYTES_MAX, METHOD_TABLE_COUNT_MAX};
use crate::error::{Error, Result};
use crate::identity::GrainId;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

// =============================================================================
// Grain
// =============================================================================

/// Grain trait - implement for the per-activation instance data
///
/// # TigerStyle
/// - Single-threaded execution guarantee (no concurrent turns per activation)
/// - Explicit lifecycle hooks (on_activate, on_deactivate)
#[async_trait]
pub trait Grain: Send + 'static {
    /// Called once after construction, before the first turn
    ///
    /// An error here fails the activation; nothing is registered.
    async fn on_activate(&mut self, _ctx: &GrainContext) -> Result<()> {
        Ok(())
    }

    /// Called once after the last turn, before the activation is released
    async fn on_deactivate(&mut self, _ctx: &GrainContext) -> Result<()> {
        Ok(())
    }
}

/// Context provided to a grain during a turn
#[derive(Debug, Clone)]
pub struct GrainContext {
    /// The grain's identity
    pub id: GrainId,
}

impl GrainContext {
    /// Create a new GrainContext
    pub fn new(id: GrainId) -> Self {
        Self { id }
    }
}

// =============================================================================
// Method bodies
// =============================================================================

/// An asynchronous method body operating on raw payloads
#[async_trait]
pub trait MethodHandler<G: Grain>: Send + Sync + 'static {
    /// Execute one turn against the grain instance
    async fn call(&self, grain: &mut G, ctx: &GrainContext, payload: Bytes) -> Result<Bytes>;
}

/// Synchronous typed method body (JSON in, JSON out)
struct TypedMethod<Req, Resp, F> {
    name: String,
    body: F,
    _types: PhantomData<fn(Req) -> Resp>,
}

#[async_trait]
impl<G, Req, Resp, F> MethodHandler<G> for TypedMethod<Req, Resp, F>
where
    G: Grain,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(&mut G, &GrainContext, Req) -> Result<Resp> + Send + Sync + 'static,
{
    async fn call(&self, grain: &mut G, ctx: &GrainContext, payload: Bytes) -> Result<Bytes> {
        let request: Req = decode_argument(&self.name, &payload)?;
        let response = (self.body)(grain, ctx, request)?;
        let bytes = serde_json::to_vec(&response).map_err(|e| Error::SerializationFailed {
            reason: format!("{} result: {}", self.name, e),
        })?;
        Ok(Bytes::from(bytes))
    }
}

/// Decode a JSON argument, mapping failures to `InvalidArgument`
pub fn decode_argument<T: DeserializeOwned>(method: &str, payload: &Bytes) -> Result<T> {
    serde_json::from_slice(payload)
        .map_err(|e| Error::invalid_argument(method, format!("malformed argument: {}", e)))
}

/// Encode a JSON argument for an invocation payload
pub fn encode_argument<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| Error::SerializationFailed {
            reason: e.to_string(),
        })
}

type ContractFn = dyn Fn(&Bytes) -> Result<()> + Send + Sync;
type FactoryFn<G> = dyn Fn(&GrainId) -> Result<G> + Send + Sync;

/// One registered method: argument contract plus body
struct MethodEntry<G: Grain> {
    contract: Option<Box<ContractFn>>,
    handler: Arc<dyn MethodHandler<G>>,
}

// =============================================================================
// MethodTable
// =============================================================================

/// Method registry for one grain type
///
/// Built once at startup and handed to the runtime's `register` call.
pub struct MethodTable<G: Grain> {
    factory: Box<FactoryFn<G>>,
    methods: Arc<HashMap<String, MethodEntry<G>>>,
}

impl<G: Grain> MethodTable<G> {
    /// Start a table whose instances are built by `factory`
    pub fn builder<F>(factory: F) -> MethodTableBuilder<G>
    where
        F: Fn(&GrainId) -> Result<G> + Send + Sync + 'static,
    {
        MethodTableBuilder {
            factory: Box::new(factory),
            entries: Vec::new(),
        }
    }

    /// Check if a selector is registered
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Registered selectors, sorted
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<G: Grain + Default> MethodTable<G> {
    /// Start a table whose instances are `G::default()`
    pub fn builder_default() -> MethodTableBuilder<G> {
        Self::builder(|_id| Ok(G::default()))
    }
}

impl<G: Grain> fmt::Debug for MethodTable<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.method_names())
            .finish()
    }
}

/// Builder for [`MethodTable`]
pub struct MethodTableBuilder<G: Grain> {
    factory: Box<FactoryFn<G>>,
    entries: Vec<(String, MethodEntry<G>)>,
}

impl<G: Grain> MethodTableBuilder<G> {
    /// Register a typed method with no argument contract beyond decoding
    pub fn method<Req, Resp, F>(self, name: impl Into<String>, body: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(&mut G, &GrainContext, Req) -> Result<Resp> + Send + Sync + 'static,
    {
        self.method_with_contract(name, |_req: &Req| Ok(()), body)
    }

    /// Register a typed method whose argument must satisfy `contract`
    ///
    /// The contract runs before the invocation is enqueued; a violation
    /// fails the caller immediately with `InvalidArgument`.
    pub fn method_with_contract<Req, Resp, C, F>(
        mut self,
        name: impl Into<String>,
        contract: C,
        body: F,
    ) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        C: Fn(&Req) -> Result<()> + Send + Sync + 'static,
        F: Fn(&mut G, &GrainContext, Req) -> Result<Resp> + Send + Sync + 'static,
    {
        let name = name.into();
        let contract_name = name.clone();
        let contract = move |payload: &Bytes| {
            let request: Req = decode_argument(&contract_name, payload)?;
            contract(&request)
        };
        let handler = TypedMethod {
            name: name.clone(),
            body,
            _types: PhantomData,
        };
        self.entries.push((
            name,
            MethodEntry {
                contract: Some(Box::new(contract)),
                handler: Arc::new(handler),
            },
        ));
        self
    }

    /// Register an asynchronous raw-payload method body
    pub fn handler<H>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: MethodHandler<G>,
    {
        self.entries.push((
            name.into(),
            MethodEntry {
                contract: None,
                handler: Arc::new(handler),
            },
        ));
        self
    }

    /// Validate selectors and build the table
    pub fn build(self) -> Result<MethodTable<G>> {
        if self.entries.len() > METHOD_TABLE_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "method_table".into(),
                reason: format!(
                    "{} methods exceeds limit {}",
                    self.entries.len(),
                    METHOD_TABLE_COUNT_MAX
                ),
            });
        }

        let mut methods = HashMap::with_capacity(self.entries.len());
        for (name, entry) in self.entries {
            if name.is_empty() || name.len() > METHOD_NAME_LENGTH_BYTES_MAX {
                return Err(Error::InvalidConfiguration {
                    field: "method_table".into(),
                    reason: format!("invalid method selector {:?}", name),
                });
            }
            if methods.contains_key(&name) {
                return Err(Error::InvalidConfiguration {
                    field: "method_table".into(),
                    reason: format!("duplicate method selector {}", name),
                });
            }
            methods.insert(name, entry);
        }

        Ok(MethodTable {
            factory: self.factory,
            methods: Arc::new(methods),
        })
    }
}

// =============================================================================
// Type-erased view used by the runtime
// =============================================================================

/// A registered grain type, independent of its Rust type
#[async_trait]
pub trait GrainClass: Send + Sync + 'static {
    /// Check selector and argument contract without touching any activation
    ///
    /// # Errors
    /// `UnknownMethod` or `InvalidArgument`.
    fn check(&self, id: &GrainId, method: &str, payload: &Bytes) -> Result<()>;

    /// Construct and activate a new instance for `id`
    ///
    /// # Errors
    /// `ActivationFailed` if construction or `on_activate` fails.
    async fn activate(&self, id: &GrainId) -> Result<Box<dyn LiveGrain>>;
}

/// A constructed, activated grain instance
#[async_trait]
pub trait LiveGrain: Send {
    /// Run one turn
    async fn invoke(&mut self, method: &str, payload: Bytes) -> Result<Bytes>;

    /// Run the deactivation hook
    async fn deactivate(&mut self) -> Result<()>;
}

#[async_trait]
impl<G: Grain> GrainClass for MethodTable<G> {
    fn check(&self, id: &GrainId, method: &str, payload: &Bytes) -> Result<()> {
        let entry = self.methods.get(method).ok_or_else(|| Error::UnknownMethod {
            grain_type: id.grain_type().to_string(),
            method: method.to_string(),
        })?;

        match &entry.contract {
            Some(contract) => contract(payload),
            None => Ok(()),
        }
    }

    async fn activate(&self, id: &GrainId) -> Result<Box<dyn LiveGrain>> {
        let mut grain = (self.factory)(id).map_err(|e| match e {
            Error::ActivationFailed { .. } => e,
            other => Error::activation_failed(id.to_string(), other.to_string()),
        })?;

        let ctx = GrainContext::new(id.clone());
        if let Err(e) = grain.on_activate(&ctx).await {
            return Err(Error::activation_failed(
                id.to_string(),
                format!("on_activate failed: {}", e),
            ));
        }

        Ok(Box::new(Instance {
            grain,
            ctx,
            methods: self.methods.clone(),
        }))
    }
}

/// Live instance of a typed grain
struct Instance<G: Grain> {
    grain: G,
    ctx: GrainContext,
    methods: Arc<HashMap<String, MethodEntry<G>>>,
}

#[async_trait]
impl<G: Grain> LiveGrain for Instance<G> {
    async fn invoke(&mut self, method: &str, payload: Bytes) -> Result<Bytes> {
        let handler = match self.methods.get(method) {
            Some(entry) => entry.handler.clone(),
            None => {
                return Err(Error::UnknownMethod {
                    grain_type: self.ctx.id.grain_type().to_string(),
                    method: method.to_string(),
                })
            }
        };
        handler.call(&mut self.grain, &self.ctx, payload).await
    }

    async fn deactivate(&mut self) -> Result<()> {
        self.grain.on_deactivate(&self.ctx).await
    }
}
