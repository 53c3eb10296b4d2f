//! Activation table
//!
//! TigerStyle: One activation per identity, creation is single-flight.
//!
//! Each identity maps to a slot holding a `OnceCell`. The first resolver of a
//! slot runs the activation; concurrent resolvers await the same cell and
//! observe the same result. A failed activation leaves a failed cell that the
//! next resolver clears, so half-initialized activations are never routed to.
//! A slot whose resolvers all gave up before it was initialized is released,
//! so it never counts against the activation limit.
//!
//! Once `deactivate_all` closes the table, no slot is created and any
//! activation still initializing is drained as soon as it comes up.

use crate::activation::{Activation, DeactivationReason, RetireHook};
use futures::future::join_all;
use granary_core::config::GranaryConfig;
use granary_core::error::{Error, Result};
use granary_core::grain::GrainClass;
use granary_core::identity::{GrainId, GrainType};
use granary_core::metrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

/// Result stored in a slot; the failure reason is shared by all waiters
type SlotResult = std::result::Result<Arc<Activation>, String>;
type Slot = Arc<OnceCell<SlotResult>>;
type SlotMap = HashMap<GrainId, Slot>;

/// Registered grain types
pub type ClassRegistry = HashMap<GrainType, Arc<dyn GrainClass>>;

/// Maps grain identities to their live activation
pub struct ActivationTable {
    classes: ClassRegistry,
    slots: Arc<Mutex<SlotMap>>,
    /// Set under the slots lock; no slot is created afterwards
    closed: AtomicBool,
    config: GranaryConfig,
}

impl ActivationTable {
    /// Create a table over the given grain types
    ///
    /// # Errors
    /// `InvalidConfiguration` if `config` fails validation.
    pub fn new(classes: ClassRegistry, config: GranaryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            classes,
            slots: Arc::new(Mutex::new(HashMap::new())),
            closed: AtomicBool::new(false),
            config,
        })
    }

    /// Look up the registered class for an identity's type
    ///
    /// # Errors
    /// `UnknownGrainType` if the type was never registered.
    pub fn class_for(&self, id: &GrainId) -> Result<&Arc<dyn GrainClass>> {
        self.classes
            .get(id.grain_type())
            .ok_or_else(|| Error::UnknownGrainType {
                grain_type: id.grain_type().to_string(),
            })
    }

    /// Registered grain types, sorted
    pub fn grain_types(&self) -> Vec<&GrainType> {
        let mut types: Vec<&GrainType> = self.classes.keys().collect();
        types.sort();
        types
    }

    /// Return the live activation for `id`, creating it if necessary
    ///
    /// Concurrent calls for the same identity create at most one activation.
    /// A call racing a deactivation gets either the old activation (which
    /// then rejects the enqueue as retiring) or a fresh one created after
    /// the old one left the table.
    ///
    /// # Errors
    /// `UnknownGrainType`, `ActivationLimitReached`, `ActivationFailed`, or
    /// `RuntimeShutdown` once the table is closed.
    pub async fn resolve(&self, id: &GrainId) -> Result<Arc<Activation>> {
        let class = self.class_for(id)?.clone();

        let pending = {
            let mut slots = self.lock_slots();
            if self.is_closed() {
                return Err(Error::RuntimeShutdown);
            }
            let slot = match slots.get(id) {
                Some(slot) => slot.clone(),
                None => {
                    let limit = self.config.dispatcher.max_activations;
                    if slots.len() >= limit {
                        return Err(Error::ActivationLimitReached { limit });
                    }
                    let slot: Slot = Arc::new(OnceCell::new());
                    slots.insert(id.clone(), slot.clone());
                    slot
                }
            };
            PendingSlot {
                slots: self.slots.clone(),
                id: id.clone(),
                slot,
            }
        };

        let result = pending
            .slot
            .get_or_init(|| self.activate(id.clone(), class))
            .await
            .clone();

        match result {
            Ok(activation) => {
                if self.is_closed() {
                    // Came up after deactivate_all started; it waits for this one.
                    activation.begin_draining(DeactivationReason::Shutdown);
                    return Err(Error::RuntimeShutdown);
                }
                Ok(activation)
            }
            Err(reason) => {
                self.remove_slot_if(id, |current| Arc::ptr_eq(current, &pending.slot));
                if self.is_closed() {
                    return Err(Error::RuntimeShutdown);
                }
                Err(Error::activation_failed(id.to_string(), reason))
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[instrument(skip(self, class), fields(grain_id = %id), level = "info")]
    async fn activate(&self, id: GrainId, class: Arc<dyn GrainClass>) -> SlotResult {
        match class.activate(&id).await {
            Ok(live) => {
                let activation =
                    Activation::spawn(id.clone(), live, &self.config.activation, self.retire_hook());
                metrics::record_activation(id.grain_type().as_str());
                info!(grain_id = %id, "Grain activated");
                Ok(activation)
            }
            Err(e) => {
                warn!(grain_id = %id, error = %e, "Grain activation failed");
                Err(match e {
                    Error::ActivationFailed { reason, .. } => reason,
                    other => other.to_string(),
                })
            }
        }
    }

    /// Hook that clears the activation's slot when it retires
    fn retire_hook(&self) -> RetireHook {
        let slots: Weak<Mutex<SlotMap>> = Arc::downgrade(&self.slots);
        Box::new(move |activation: &Activation| {
            let Some(slots) = slots.upgrade() else {
                return;
            };
            let mut slots = lock_map(&slots);
            let owns_slot = slots
                .get(activation.id())
                .and_then(|slot| slot.get())
                .map(|result| match result {
                    Ok(current) => std::ptr::eq(Arc::as_ptr(current), activation),
                    Err(_) => false,
                })
                .unwrap_or(false);
            if owns_slot {
                slots.remove(activation.id());
                debug!(grain_id = %activation.id(), "Removed activation from table");
            }
        })
    }

    fn remove_slot_if(&self, id: &GrainId, predicate: impl FnOnce(&Slot) -> bool) {
        let mut slots = self.lock_slots();
        if slots.get(id).map(predicate).unwrap_or(false) {
            slots.remove(id);
        }
    }

    /// Get the live activation for `id` without creating one
    pub fn get(&self, id: &GrainId) -> Option<Arc<Activation>> {
        self.lock_slots()
            .get(id)
            .and_then(|slot| slot.get())
            .and_then(|result| result.as_ref().ok())
            .cloned()
    }

    /// Drain and release the activation for `id`
    ///
    /// Returns false if the identity had no live activation.
    #[instrument(skip(self), fields(grain_id = %id), level = "info")]
    pub async fn deactivate(&self, id: &GrainId) -> bool {
        match self.get(id) {
            Some(activation) => {
                activation.begin_draining(DeactivationReason::Requested);
                activation.wait_retired().await;
                true
            }
            None => false,
        }
    }

    /// Close the table, then drain and release every activation
    ///
    /// Activations still initializing are waited for and drained too.
    /// Waits at most the configured deactivation wait per activation.
    /// Returns the number of activations that retired in time.
    pub async fn deactivate_all(&self) -> usize {
        let slots: Vec<(GrainId, Slot)> = {
            let slots = self.lock_slots();
            self.closed.store(true, Ordering::Release);
            slots
                .iter()
                .map(|(id, slot)| (id.clone(), slot.clone()))
                .collect()
        };

        let wait = self.config.activation.deactivation_wait();
        let waits = slots.iter().map(|(id, slot)| async move {
            let retire = async {
                // Waits for an initializer in flight; fills an abandoned slot.
                let result = slot
                    .get_or_init(|| async { Err("runtime shut down".to_string()) })
                    .await;
                match result {
                    Ok(activation) => {
                        activation.begin_draining(DeactivationReason::Shutdown);
                        activation.wait_retired().await;
                        true
                    }
                    Err(_) => {
                        self.remove_slot_if(id, |current| Arc::ptr_eq(current, slot));
                        false
                    }
                }
            };
            match tokio::time::timeout(wait, retire).await {
                Ok(retired) => retired,
                Err(_) => {
                    warn!(grain_id = %id, "Activation did not drain in time");
                    false
                }
            }
        });

        let retired = join_all(waits).await.into_iter().filter(|ok| *ok).count();
        info!(total = slots.len(), retired, "Deactivated all activations");
        retired
    }

    /// Number of live activations
    pub fn len(&self) -> usize {
        self.lock_slots()
            .values()
            .filter(|slot| matches!(slot.get(), Some(Ok(_))))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identities with a live activation
    pub fn active_ids(&self) -> Vec<GrainId> {
        self.lock_slots()
            .iter()
            .filter(|(_, slot)| matches!(slot.get(), Some(Ok(_))))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn lock_slots(&self) -> MutexGuard<'_, SlotMap> {
        lock_map(&self.slots)
    }
}

fn lock_map(slots: &Mutex<SlotMap>) -> MutexGuard<'_, SlotMap> {
    // Never held across an await.
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

/// A resolver's claim on a slot
///
/// Dropping the last claim on a slot that never got initialized (every
/// resolver was cancelled mid-activation) removes the slot from the map.
struct PendingSlot {
    slots: Arc<Mutex<SlotMap>>,
    id: GrainId,
    slot: Slot,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if self.slot.initialized() {
            return;
        }
        let mut slots = lock_map(&self.slots);
        // Only the map and this claim hold the slot; clones happen under the lock.
        let abandoned = slots
            .get(&self.id)
            .map(|current| Arc::ptr_eq(current, &self.slot) && Arc::strong_count(&self.slot) == 2)
            .unwrap_or(false);
        if abandoned {
            slots.remove(&self.id);
            debug!(grain_id = %self.id, "Released slot abandoned during activation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use granary_core::grain::{Grain, GrainContext, MethodTable};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Slow;

    #[async_trait]
    impl Grain for Slow {
        async fn on_activate(&mut self, _ctx: &GrainContext) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(())
        }
    }

    fn table_with(
        constructed: Arc<AtomicUsize>,
        fail: bool,
        config: GranaryConfig,
    ) -> ActivationTable {
        let table = MethodTable::builder(move |_id| {
            constructed.fetch_add(1, Ordering::SeqCst);
            if fail {
                Err(Error::internal("constructor refused"))
            } else {
                Ok(Slow)
            }
        })
        .method("Ping", |_g: &mut Slow, _ctx, x: i64| Ok(x))
        .build()
        .unwrap();

        let mut classes: ClassRegistry = HashMap::new();
        classes.insert(GrainType::new("slow").unwrap(), Arc::new(table));
        ActivationTable::new(classes, config).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_resolve_is_single_flight() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let table = table_with(constructed.clone(), false, GranaryConfig::default());
        let id = GrainId::new("slow", "one").unwrap();

        let results = join_all((0..16).map(|_| table.resolve(&id))).await;
        let first = results[0].as_ref().unwrap().clone();
        for result in &results {
            assert!(Arc::ptr_eq(result.as_ref().unwrap(), &first));
        }
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_activation_is_not_registered() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let table = table_with(constructed.clone(), true, GranaryConfig::default());
        let id = GrainId::new("slow", "one").unwrap();

        let result = table.resolve(&id).await;
        assert!(matches!(result, Err(Error::ActivationFailed { .. })));
        assert!(table.is_empty());
        assert!(table.get(&id).is_none());

        // A later resolve tries again
        let _ = table.resolve(&id).await;
        assert_eq!(constructed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_grain_type() {
        let table = table_with(Arc::new(AtomicUsize::new(0)), false, GranaryConfig::default());
        let id = GrainId::new("missing", "one").unwrap();
        assert!(matches!(
            table.resolve(&id).await,
            Err(Error::UnknownGrainType { .. })
        ));
    }

    #[tokio::test]
    async fn test_activation_limit() {
        let mut config = GranaryConfig::default();
        config.dispatcher.max_activations = 1;
        let table = table_with(Arc::new(AtomicUsize::new(0)), false, config);

        table
            .resolve(&GrainId::new("slow", "a").unwrap())
            .await
            .unwrap();
        let result = table.resolve(&GrainId::new("slow", "b").unwrap()).await;
        assert!(matches!(
            result,
            Err(Error::ActivationLimitReached { limit: 1 })
        ));
    }

    #[tokio::test]
    async fn test_deactivate_then_resolve_creates_fresh_activation() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let table = table_with(constructed.clone(), false, GranaryConfig::default());
        let id = GrainId::new("slow", "one").unwrap();

        let first = table.resolve(&id).await.unwrap();
        assert!(table.deactivate(&id).await);
        assert!(first.is_retired());
        assert!(table.is_empty());
        assert!(!table.deactivate(&id).await);

        let second = table.resolve(&id).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(constructed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_deactivate_all() {
        let table = table_with(Arc::new(AtomicUsize::new(0)), false, GranaryConfig::default());
        for key in ["a", "b", "c"] {
            table
                .resolve(&GrainId::new("slow", key).unwrap())
                .await
                .unwrap();
        }
        assert_eq!(table.active_ids().len(), 3);

        assert_eq!(table.deactivate_all().await, 3);
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_resolve_releases_slot() {
        let mut config = GranaryConfig::default();
        config.dispatcher.max_activations = 1;
        let table = table_with(Arc::new(AtomicUsize::new(0)), false, config);

        // Slow activates in 20ms; give up halfway.
        let a = GrainId::new("slow", "a").unwrap();
        let result =
            tokio::time::timeout(std::time::Duration::from_millis(10), table.resolve(&a)).await;
        assert!(result.is_err());
        assert!(table.is_empty());

        let b = GrainId::new("slow", "b").unwrap();
        table.resolve(&b).await.unwrap();
        assert_eq!(table.active_ids(), vec![b]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_resolver_hands_off_to_waiter() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let table = Arc::new(table_with(constructed.clone(), false, GranaryConfig::default()));
        let id = GrainId::new("slow", "shared").unwrap();

        let waiter = {
            let table = table.clone();
            let id = id.clone();
            tokio::spawn(async move { table.resolve(&id).await })
        };
        let abandoned =
            tokio::time::timeout(std::time::Duration::from_millis(10), table.resolve(&id)).await;
        assert!(abandoned.is_err());

        let activation = waiter.await.unwrap().unwrap();
        let again = table.resolve(&id).await.unwrap();
        assert!(Arc::ptr_eq(&activation, &again));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_all_waits_for_activation_in_progress() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let table = Arc::new(table_with(constructed.clone(), false, GranaryConfig::default()));
        let id = GrainId::new("slow", "late").unwrap();

        let resolving = {
            let table = table.clone();
            let id = id.clone();
            tokio::spawn(async move { table.resolve(&id).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert_eq!(table.deactivate_all().await, 1);
        assert!(table.is_empty());
        assert!(matches!(
            resolving.await.unwrap(),
            Err(Error::RuntimeShutdown)
        ));
        assert_eq!(constructed.load(Ordering::SeqCst), 1);

        assert!(matches!(
            table.resolve(&id).await,
            Err(Error::RuntimeShutdown)
        ));
        assert!(table.is_empty());
    }
}
