//! Step descriptor registry.
//!
//! UI elements register the step they anchor when they mount and unregister
//! when they unmount. The registry is a plain key → capability map shared by
//! producers and the measurement coordinator; neither side holds a reference
//! to the other.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace};

use super::types::{StepDescriptor, StepKey, StepLayout};

/// Measurement capability exposed by a mounted element.
///
/// Returns `None` (or an all-zero layout) while the element has not been laid out yet.
pub trait Measure: Send + Sync {
    fn measure(&self) -> Option<StepLayout>;
}

impl<F> Measure for F
where
    F: Fn() -> Option<StepLayout> + Send + Sync,
{
    fn measure(&self) -> Option<StepLayout> {
        self()
    }
}

/// Proof of one particular registration.
///
/// Two registrations of the same step get distinct tokens, so an unmount that
/// races a remount can only remove its own entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistrationToken {
    key: StepKey,
    id: u64,
}

impl RegistrationToken {
    pub fn key(&self) -> &StepKey {
        &self.key
    }
}

/// A registered step as seen by the coordinator.
#[derive(Clone)]
pub struct RegisteredStep {
    pub descriptor: StepDescriptor,
    pub capability: Arc<dyn Measure>,
}

impl fmt::Debug for RegisteredStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredStep")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

struct Entry {
    id: u64,
    step: RegisteredStep,
}

/// Shared registry of mounted step anchors. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct StepRegistry {
    entries: Arc<RwLock<HashMap<StepKey, Entry>>>,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<StepKey, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<StepKey, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a step anchor, replacing any earlier registration of the same step.
    pub fn register(
        &self,
        descriptor: StepDescriptor,
        capability: impl Measure + 'static,
    ) -> RegistrationToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let key = descriptor.key();
        debug!(step = %key, order = descriptor.order, token = id, "step registered");

        let entry = Entry {
            id,
            step: RegisteredStep {
                descriptor,
                capability: Arc::new(capability),
            },
        };
        self.write().insert(key.clone(), entry);

        RegistrationToken { key, id }
    }

    /// Remove the registration the token was issued for.
    ///
    /// Returns false if that registration was already removed or has been
    /// replaced by a newer one, which is left in place.
    pub fn unregister(&self, token: &RegistrationToken) -> bool {
        let mut entries = self.write();
        match entries.get(&token.key) {
            Some(entry) if entry.id == token.id => {
                entries.remove(&token.key);
                debug!(step = %token.key, token = token.id, "step unregistered");
                true
            }
            Some(entry) => {
                trace!(
                    step = %token.key,
                    token = token.id,
                    current = entry.id,
                    "ignoring unregister of superseded registration"
                );
                false
            }
            None => false,
        }
    }

    pub fn lookup(&self, tour_id: &str, step_id: &str) -> Option<RegisteredStep> {
        self.read()
            .get(&StepKey::new(tour_id, step_id))
            .map(|entry| entry.step.clone())
    }

    /// Register and return a guard that unregisters when dropped.
    pub fn mount(
        &self,
        descriptor: StepDescriptor,
        capability: impl Measure + 'static,
    ) -> StepHandle {
        let token = self.register(descriptor, capability);
        StepHandle {
            registry: self.clone(),
            token: Some(token),
        }
    }

    /// Descriptors currently registered for a tour, sorted by order.
    pub fn descriptors(&self, tour_id: &str) -> Vec<StepDescriptor> {
        let mut steps: Vec<StepDescriptor> = self
            .read()
            .values()
            .filter(|entry| entry.step.descriptor.tour_id == tour_id)
            .map(|entry| entry.step.descriptor.clone())
            .collect();
        steps.sort_by_key(|d| d.order);
        steps
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// Registration owned by a mounted UI element.
///
/// Dropping the handle is the unmount.
#[derive(Debug)]
pub struct StepHandle {
    registry: StepRegistry,
    token: Option<RegistrationToken>,
}

impl StepHandle {
    /// Unregister now instead of at drop.
    pub fn unmount(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        match self.token.take() {
            Some(token) => self.registry.unregister(&token),
            None => false,
        }
    }
}

impl Drop for StepHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(layout: StepLayout) -> impl Measure {
        move || Some(layout)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = StepRegistry::new();
        let layout = StepLayout::new(1.0, 2.0, 3.0, 4.0);
        registry.register(StepDescriptor::new("home", "a", 1, "A"), fixed(layout));

        let step = registry.lookup("home", "a").unwrap();
        assert_eq!(step.descriptor.step_id, "a");
        assert_eq!(step.capability.measure(), Some(layout));
        assert!(registry.lookup("home", "b").is_none());
        assert!(registry.lookup("other", "a").is_none());
    }

    #[test]
    fn test_unregister_removes_entry() {
        let registry = StepRegistry::new();
        let token = registry.register(StepDescriptor::new("home", "a", 1, "A"), || None::<StepLayout>);

        assert!(registry.unregister(&token));
        assert!(registry.lookup("home", "a").is_none());
        assert!(!registry.unregister(&token));
    }

    #[test]
    fn test_stale_unregister_keeps_newer_registration() {
        let registry = StepRegistry::new();
        let old = registry.register(StepDescriptor::new("home", "a", 1, "old"), || None::<StepLayout>);
        let new = registry.register(StepDescriptor::new("home", "a", 1, "new"), || None::<StepLayout>);
        assert_ne!(old, new);

        assert!(!registry.unregister(&old));
        let step = registry.lookup("home", "a").unwrap();
        assert_eq!(step.descriptor.text, "new");

        assert!(registry.unregister(&new));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_step_handle_unregisters_on_drop() {
        let registry = StepRegistry::new();
        {
            let _handle = registry.mount(StepDescriptor::new("home", "a", 1, "A"), || None::<StepLayout>);
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remount_before_old_handle_drops() {
        let registry = StepRegistry::new();
        let first = registry.mount(StepDescriptor::new("home", "a", 1, "first"), || None::<StepLayout>);
        let second = registry.mount(StepDescriptor::new("home", "a", 1, "second"), || None::<StepLayout>);

        drop(first);
        assert_eq!(registry.lookup("home", "a").unwrap().descriptor.text, "second");

        assert!(second.unmount());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_descriptors_sorted_by_order() {
        let registry = StepRegistry::new();
        registry.register(StepDescriptor::new("home", "c", 3, "C"), || None::<StepLayout>);
        registry.register(StepDescriptor::new("home", "a", 1, "A"), || None::<StepLayout>);
        registry.register(StepDescriptor::new("profile", "x", 1, "X"), || None::<StepLayout>);
        registry.register(StepDescriptor::new("home", "b", 2, "B"), || None::<StepLayout>);

        let ids: Vec<String> = registry
            .descriptors("home")
            .into_iter()
            .map(|d| d.step_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
