//! Runtime entry point
//!
//! TigerStyle: Single entry point, explicit configuration, clean shutdown.

use crate::dispatcher::{Dispatcher, PendingInvocation};
use crate::handle::{GrainRef, GrainRefBuilder};
use crate::table::ClassRegistry;
use bytes::Bytes;
use granary_core::config::GranaryConfig;
use granary_core::error::{Error, Result};
use granary_core::grain::{Grain, GrainClass, MethodTable};
use granary_core::identity::{GrainId, GrainKey, GrainType};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Builder for creating a runtime
///
/// Grain types are registered here, once, before any invocation.
pub struct RuntimeBuilder {
    classes: ClassRegistry,
    config: GranaryConfig,
}

impl RuntimeBuilder {
    /// Create a new runtime builder
    pub fn new() -> Self {
        Self {
            classes: HashMap::new(),
            config: GranaryConfig::default(),
        }
    }

    /// Register the method table for a grain type
    ///
    /// # Errors
    /// `InvalidIdentity` for a malformed tag, `GrainTypeAlreadyRegistered`
    /// if the tag is taken.
    pub fn register<G: Grain>(
        self,
        type_tag: impl AsRef<str>,
        table: MethodTable<G>,
    ) -> Result<Self> {
        self.register_class(type_tag, Arc::new(table))
    }

    /// Register an already type-erased grain class
    pub fn register_class(
        mut self,
        type_tag: impl AsRef<str>,
        class: Arc<dyn GrainClass>,
    ) -> Result<Self> {
        let grain_type = GrainType::new(type_tag.as_ref())?;
        if self.classes.contains_key(&grain_type) {
            return Err(Error::GrainTypeAlreadyRegistered {
                grain_type: grain_type.to_string(),
            });
        }
        self.classes.insert(grain_type, class);
        Ok(self)
    }

    /// Set the configuration
    pub fn with_config(mut self, config: GranaryConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the runtime
    ///
    /// # Errors
    /// `InvalidConfiguration` if the configuration fails validation.
    pub fn build(self) -> Result<Runtime> {
        let dispatcher = Dispatcher::new(self.classes, self.config)?;

        let types: Vec<GrainType> = dispatcher.grain_types();
        info!(grain_types = ?types, "Starting Granary runtime");

        Ok(Runtime { dispatcher })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The main Granary runtime
///
/// Owns the dispatcher and its activation table. Dropping the runtime does
/// not stop activations; call [`Runtime::shutdown`] for an orderly stop.
#[derive(Debug, Clone)]
pub struct Runtime {
    dispatcher: Dispatcher,
}

impl Runtime {
    /// Start building a runtime
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Get the dispatcher
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Get a grain reference builder
    pub fn grain_refs(&self) -> GrainRefBuilder {
        GrainRefBuilder::new(self.dispatcher.clone())
    }

    /// Get a reference to a specific grain
    pub fn grain(&self, id: GrainId) -> GrainRef {
        GrainRef::new(id, self.dispatcher.clone())
    }

    /// Get a reference by type tag and key
    pub fn grain_by_parts(
        &self,
        grain_type: impl AsRef<str>,
        key: impl Into<GrainKey>,
    ) -> Result<GrainRef> {
        Ok(self.grain(GrainId::new(grain_type, key)?))
    }

    /// Invoke `method` on `id` and wait for the result
    pub async fn invoke(&self, id: GrainId, method: &str, payload: Bytes) -> Result<Bytes> {
        self.dispatcher.invoke(id, method, payload).await
    }

    /// Enqueue an invocation and return its pending result
    pub async fn submit(
        &self,
        id: GrainId,
        method: &str,
        payload: Bytes,
    ) -> Result<PendingInvocation> {
        self.dispatcher.submit(id, method, payload).await
    }

    /// Number of live activations
    pub fn active_grain_count(&self) -> usize {
        self.dispatcher.active_grain_count()
    }

    /// Registered grain types, sorted
    pub fn grain_types(&self) -> Vec<GrainType> {
        self.dispatcher.grain_types()
    }

    /// Stop accepting invocations and drain every activation
    pub async fn shutdown(&self) {
        info!("Stopping Granary runtime");
        self.dispatcher.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Doubler;

    impl Grain for Doubler {}

    fn doubler_table() -> MethodTable<Doubler> {
        MethodTable::<Doubler>::builder_default()
            .method("Double", |_g: &mut Doubler, _ctx, x: i64| Ok(x * 2))
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let result = RuntimeBuilder::new()
            .register("doubler", doubler_table())
            .unwrap()
            .register("doubler", doubler_table());
        assert!(matches!(
            result,
            Err(Error::GrainTypeAlreadyRegistered { .. })
        ));
    }

    #[test]
    fn test_invalid_type_tag_rejected() {
        let result = RuntimeBuilder::new().register("two words", doubler_table());
        assert!(matches!(result, Err(Error::InvalidIdentity { .. })));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = GranaryConfig::default();
        config.activation.turn_queue_depth_max = 0;
        let result = RuntimeBuilder::new().with_config(config).build();
        assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    }

    #[tokio::test]
    async fn test_runtime_invoke_and_shutdown() {
        let runtime = Runtime::builder()
            .register("doubler", doubler_table())
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(runtime.grain_types(), vec![GrainType::new("doubler").unwrap()]);

        let grain = runtime.grain_by_parts("doubler", "d1").unwrap();
        let doubled: i64 = grain.call("Double", &21).await.unwrap();
        assert_eq!(doubled, 42);
        assert_eq!(runtime.active_grain_count(), 1);

        runtime.shutdown().await;
        assert_eq!(runtime.active_grain_count(), 0);
        assert!(matches!(
            grain.call::<i64, i64>("Double", &1).await,
            Err(Error::RuntimeShutdown)
        ));
    }
}
