// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Policy set registry and hot-swap machinery
//!
//! Pluggable behaviors (forwarding, scheduling, congestion feedback)
//! are published here under unique names. A component that consumes a
//! policy keeps it in an [`ActivePolicy`] slot; selecting a different
//! policy set instantiates and validates the candidate first and only
//! then publishes it, so the data path always observes a complete
//! policy. Readers never block: the slot is an [`ArcSwap`] and old
//! instances are reclaimed when the last in-flight reader drops its
//! guard.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::RegistryError;

/// Operations a policy set can advertise.
///
/// Components validate a candidate against their required set before
/// publishing it, so a policy missing a mandatory operation is rejected
/// at selection time rather than failing on the data path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Add,
    Remove,
    Flush,
    IsEmpty,
    NextHop,
    Dump,
    Modify,
    PortStateChange,
    CreateQueueSet,
    DestroyQueueSet,
    Enqueue,
    Dequeue,
    Requeue,
    FlowControl,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Add => "add",
            Capability::Remove => "remove",
            Capability::Flush => "flush",
            Capability::IsEmpty => "is-empty",
            Capability::NextHop => "next-hop",
            Capability::Dump => "dump",
            Capability::Modify => "modify",
            Capability::PortStateChange => "port-state-change",
            Capability::CreateQueueSet => "create-queue-set",
            Capability::DestroyQueueSet => "destroy-queue-set",
            Capability::Enqueue => "enqueue",
            Capability::Dequeue => "dequeue",
            Capability::Requeue => "requeue",
            Capability::FlowControl => "flow-control",
        };
        write!(f, "{}", s)
    }
}

/// Base trait shared by every pluggable policy set.
pub trait PolicySet: Send + Sync {
    /// Name this policy set was published under
    fn name(&self) -> &'static str;

    /// Operations this policy set implements
    fn capabilities(&self) -> &'static [Capability];
}

type BuildFn<P> = dyn Fn() -> Result<Box<P>, RegistryError> + Send + Sync;

struct FactoryEntry<P: ?Sized> {
    build: Arc<BuildFn<P>>,
    // Cloned into every instance; strong count > 1 means attached
    attachments: Arc<()>,
}

/// A freshly built policy instance, not yet published anywhere.
///
/// Holding it keeps the originating factory busy, so the policy set
/// cannot be unpublished while the instance is alive.
pub struct PolicyInstance<P: ?Sized> {
    name: String,
    policy: Box<P>,
    attachment: Arc<()>,
}

impl<P: ?Sized> PolicyInstance<P> {
    /// Name the instance was built under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The policy itself
    pub fn policy(&self) -> &P {
        &self.policy
    }
}

/// Name-indexed factory table for one policy family.
pub struct PolicyRegistry<P: PolicySet + ?Sized> {
    factories: Mutex<HashMap<String, FactoryEntry<P>>>,
}

impl<P: PolicySet + ?Sized> Default for PolicyRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PolicySet + ?Sized> PolicyRegistry<P> {
    pub fn new() -> Self {
        Self {
            factories: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes a factory under `name`.
    ///
    /// Fails with [`RegistryError::DuplicateName`] if the name is taken.
    pub fn publish<F>(&self, name: impl Into<String>, build: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Result<Box<P>, RegistryError> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut factories = self.factories.lock();
        if factories.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        debug!(policy = %name, "publishing policy set");
        factories.insert(
            name,
            FactoryEntry {
                build: Arc::new(build),
                attachments: Arc::new(()),
            },
        );
        Ok(())
    }

    /// Removes the factory published under `name`.
    ///
    /// Fails with [`RegistryError::Busy`] while any instance built from
    /// it is still alive, including one currently selected as active.
    pub fn unpublish(&self, name: &str) -> Result<(), RegistryError> {
        let mut factories = self.factories.lock();
        let entry = factories
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if Arc::strong_count(&entry.attachments) > 1 {
            return Err(RegistryError::Busy(name.to_string()));
        }
        factories.remove(name);
        debug!(policy = %name, "unpublished policy set");
        Ok(())
    }

    /// Builds a fresh instance of the policy set published under `name`.
    pub fn instantiate(&self, name: &str) -> Result<PolicyInstance<P>, RegistryError> {
        let (build, attachment) = {
            let factories = self.factories.lock();
            let entry = factories
                .get(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            (entry.build.clone(), entry.attachments.clone())
        };
        let policy = build()?;
        Ok(PolicyInstance {
            name: name.to_string(),
            policy,
            attachment,
        })
    }

    /// Names of all published policy sets, unordered
    pub fn names(&self) -> Vec<String> {
        self.factories.lock().keys().cloned().collect()
    }
}

/// The published policy an [`ActivePolicy`] slot currently points at.
pub struct PolicyCell<P: ?Sized> {
    name: String,
    policy: Box<P>,
    _attachment: Arc<()>,
}

impl<P: ?Sized> PolicyCell<P> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }
}

impl<P: ?Sized> From<PolicyInstance<P>> for PolicyCell<P> {
    fn from(instance: PolicyInstance<P>) -> Self {
        Self {
            name: instance.name,
            policy: instance.policy,
            _attachment: instance.attachment,
        }
    }
}

/// Atomically replaceable policy slot with capability validation.
///
/// `load()` is the data-path entry point and never takes a lock; the
/// returned guard pins the current instance for the duration of one
/// operation. Selection goes through two phases: instantiate and
/// validate the candidate, then publish it with a single atomic swap.
/// A failure in the first phase leaves the active policy untouched.
pub struct ActivePolicy<P: PolicySet + ?Sized> {
    slot: ArcSwap<PolicyCell<P>>,
    generation: AtomicU64,
    required: &'static [Capability],
    // Serializes selections; readers are unaffected
    swap: Mutex<()>,
}

impl<P: PolicySet + ?Sized> ActivePolicy<P> {
    /// Creates a slot holding `initial`, validated against `required`.
    pub fn new(
        required: &'static [Capability],
        initial: PolicyInstance<P>,
    ) -> Result<Self, RegistryError> {
        validate_capabilities(initial.name(), initial.policy.capabilities(), required)?;
        Ok(Self {
            slot: ArcSwap::from_pointee(PolicyCell::from(initial)),
            generation: AtomicU64::new(0),
            required,
            swap: Mutex::new(()),
        })
    }

    /// Pins the current policy for one data-path operation
    pub fn load(&self) -> arc_swap::Guard<Arc<PolicyCell<P>>> {
        self.slot.load()
    }

    /// Monotonic counter, incremented on every successful selection
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Name of the currently active policy set
    pub fn active_name(&self) -> String {
        self.slot.load().name.clone()
    }

    /// Selects the policy set published under `name` as active.
    pub fn select(
        &self,
        registry: &PolicyRegistry<P>,
        name: &str,
    ) -> Result<(), RegistryError> {
        self.select_with(registry, name, |_| Ok(()))
    }

    /// Selects with an initialization hook run between validation and
    /// publication, typically to apply configured parameters. A hook
    /// failure aborts the selection and the candidate is discarded.
    pub fn select_with<F>(
        &self,
        registry: &PolicyRegistry<P>,
        name: &str,
        init: F,
    ) -> Result<(), RegistryError>
    where
        F: FnOnce(&P) -> Result<(), RegistryError>,
    {
        let _swap = self.swap.lock();
        let candidate = registry.instantiate(name)?;
        validate_capabilities(name, candidate.policy.capabilities(), self.required)?;
        init(&candidate.policy)?;
        self.slot.store(Arc::new(PolicyCell::from(candidate)));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(policy = %name, generation, "policy set selected");
        Ok(())
    }
}

fn validate_capabilities(
    name: &str,
    provided: &[Capability],
    required: &[Capability],
) -> Result<(), RegistryError> {
    for capability in required {
        if !provided.contains(capability) {
            return Err(RegistryError::ValidationFailed {
                policy: name.to_string(),
                operation: capability.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Counter: PolicySet {
        fn value(&self) -> u32;
    }

    struct Full(u32);

    impl PolicySet for Full {
        fn name(&self) -> &'static str {
            "full"
        }
        fn capabilities(&self) -> &'static [Capability] {
            &[Capability::Add, Capability::Remove, Capability::Dump]
        }
    }

    impl Counter for Full {
        fn value(&self) -> u32 {
            self.0
        }
    }

    struct Limited;

    impl PolicySet for Limited {
        fn name(&self) -> &'static str {
            "limited"
        }
        fn capabilities(&self) -> &'static [Capability] {
            &[Capability::Add]
        }
    }

    impl Counter for Limited {
        fn value(&self) -> u32 {
            0
        }
    }

    fn registry() -> PolicyRegistry<dyn Counter> {
        let registry = PolicyRegistry::new();
        registry
            .publish("full", || Ok(Box::new(Full(7)) as Box<dyn Counter>))
            .unwrap();
        registry
            .publish("limited", || Ok(Box::new(Limited) as Box<dyn Counter>))
            .unwrap();
        registry
    }

    #[test]
    fn test_publish_duplicate_rejected() {
        let registry = registry();
        let result = registry.publish("full", || Ok(Box::new(Full(0)) as Box<dyn Counter>));
        assert!(matches!(result, Err(RegistryError::DuplicateName(_))));
    }

    #[test]
    fn test_instantiate_unknown() {
        let registry = registry();
        assert!(matches!(
            registry.instantiate("missing").err(),
            Some(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_unpublish_busy_until_instances_drop() {
        let registry = registry();
        let instance = registry.instantiate("full").unwrap();
        assert!(matches!(
            registry.unpublish("full"),
            Err(RegistryError::Busy(_))
        ));
        drop(instance);
        registry.unpublish("full").unwrap();
        assert!(matches!(
            registry.instantiate("full").err(),
            Some(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_select_swaps_and_bumps_generation() {
        let registry = registry();
        let initial = registry.instantiate("limited").unwrap();
        let active = ActivePolicy::new(&[Capability::Add], initial).unwrap();
        assert_eq!(active.generation(), 0);
        assert_eq!(active.active_name(), "limited");

        active.select(&registry, "full").unwrap();
        assert_eq!(active.generation(), 1);
        assert_eq!(active.active_name(), "full");
        assert_eq!(active.load().policy().value(), 7);
    }

    #[test]
    fn test_select_missing_capability_aborts() {
        let registry = registry();
        let initial = registry.instantiate("full").unwrap();
        let active =
            ActivePolicy::new(&[Capability::Add, Capability::Remove], initial).unwrap();

        let err = active.select(&registry, "limited").unwrap_err();
        assert!(matches!(err, RegistryError::ValidationFailed { .. }));
        // Active policy and generation are untouched by the failed selection
        assert_eq!(active.active_name(), "full");
        assert_eq!(active.generation(), 0);
    }

    #[test]
    fn test_select_unknown_policy() {
        let registry = registry();
        let initial = registry.instantiate("full").unwrap();
        let active = ActivePolicy::new(&[Capability::Add], initial).unwrap();
        assert!(matches!(
            active.select(&registry, "missing"),
            Err(RegistryError::NotFound(_))
        ));
        assert_eq!(active.active_name(), "full");
    }

    #[test]
    fn test_init_hook_failure_aborts() {
        let registry = registry();
        let initial = registry.instantiate("limited").unwrap();
        let active = ActivePolicy::new(&[Capability::Add], initial).unwrap();

        let result = active.select_with(&registry, "full", |_| {
            Err(RegistryError::InstantiationFailed {
                policy: "full".to_string(),
                reason: "bad parameter".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(active.active_name(), "limited");
        assert_eq!(active.generation(), 0);
    }

    #[test]
    fn test_active_policy_keeps_factory_busy() {
        let registry = registry();
        let initial = registry.instantiate("full").unwrap();
        let active = ActivePolicy::new(&[Capability::Add], initial).unwrap();

        assert!(matches!(
            registry.unpublish("full"),
            Err(RegistryError::Busy(_))
        ));

        // Replacing the active policy releases the old attachment
        active.select(&registry, "limited").unwrap();
        registry.unpublish("full").unwrap();
    }

    #[test]
    fn test_validation_lists_missing_operation() {
        let registry = registry();
        let initial = registry.instantiate("full").unwrap();
        let active = ActivePolicy::new(&[Capability::Dump], initial).unwrap();
        match active.select(&registry, "limited") {
            Err(RegistryError::ValidationFailed { policy, operation }) => {
                assert_eq!(policy, "limited");
                assert_eq!(operation, "dump");
            }
            other => panic!("expected validation failure, got {:?}", other.err()),
        }
    }
}
