//! Per-registry index from exposed type to descriptors
//!
//! Each registration is filed under every type it exposes plus the root
//! bucket. Factory-capable registrations are also filed under one shared
//! factory bucket and narrowed by element type at lookup time.

use crate::composite::Provider;
use crate::descriptor::{ServiceDescriptor, ServiceHandle};
use crate::error::{RegistryError, Result};
use crate::registry::RegistryInner;
use crate::request::TypeKey;
use ahash::RandomState;
use std::any::TypeId;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

/// Bucket holding every factory-capable descriptor
struct FactoryBucket;

#[derive(Default)]
pub(crate) struct OwnServices {
    by_type: HashMap<TypeId, Vec<Arc<ServiceDescriptor>>, RandomState>,
    /// Registration order, used for shutdown
    services: Vec<Arc<ServiceDescriptor>>,
    frozen: bool,
}

impl OwnServices {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// File `descriptor` under everything it exposes.
    ///
    /// `registry` names the owner in the error raised once frozen.
    pub(crate) fn add(&mut self, descriptor: Arc<ServiceDescriptor>, registry: &str) -> Result<()> {
        if self.frozen {
            return Err(RegistryError::illegal_state(format!(
                "Cannot add provider to service registry {registry} as it is no longer mutable."
            )));
        }

        let mut visited = HashSet::with_hasher(RandomState::new());
        let keys = descriptor
            .exposed_keys()
            .chain(descriptor.is_factory().then(TypeKey::of::<FactoryBucket>))
            .chain(std::iter::once(TypeKey::root()));
        for key in keys {
            if visited.insert(key.id()) {
                self.by_type
                    .entry(key.id())
                    .or_default()
                    .push(Arc::clone(&descriptor));
            }
        }

        self.services.push(descriptor);
        Ok(())
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn len(&self) -> usize {
        self.services.len()
    }

    /// Descriptors filed under `key`, in registration order
    pub(crate) fn candidates(&self, key: TypeKey) -> Vec<Arc<ServiceDescriptor>> {
        self.by_type.get(&key.id()).cloned().unwrap_or_default()
    }

    pub(crate) fn factory_candidates(&self) -> Vec<Arc<ServiceDescriptor>> {
        self.candidates(TypeKey::of::<FactoryBucket>())
    }

    /// Every descriptor, in registration order
    pub(crate) fn services(&self) -> Vec<Arc<ServiceDescriptor>> {
        self.services.clone()
    }
}

// =============================================================================
// Lookups
// =============================================================================

/// Lookups against one registry's own services.
///
/// The index guard is released before any descriptor is bound, since binding
/// re-enters lookups on the same registry.
pub(crate) struct OwnProvider<'a> {
    owner: &'a Arc<RegistryInner>,
}

impl<'a> OwnProvider<'a> {
    pub(crate) fn new(owner: &'a Arc<RegistryInner>) -> Self {
        Self { owner }
    }

    fn own_handle(&self, descriptor: Arc<ServiceDescriptor>, view: TypeKey) -> Result<ServiceHandle> {
        descriptor.prepare(self.owner)?;
        Ok(ServiceHandle::Own { descriptor, view })
    }

    fn ambiguity(&self, heading: String, matches: &[Arc<ServiceDescriptor>]) -> RegistryError {
        let names: BTreeSet<&str> = matches.iter().map(|d| d.display_name()).collect();
        let mut message = heading;
        for name in names {
            let _ = write!(message, "\n   - {name}");
        }
        RegistryError::lookup(message)
    }
}

impl Provider for OwnProvider<'_> {
    fn get_service(&self, service: TypeKey) -> Result<Option<ServiceHandle>> {
        let candidates = self.owner.own().read().candidates(service);
        let mut matches: Vec<_> = match candidates.len() {
            0 => return Ok(None),
            1 => candidates,
            _ => candidates.into_iter().filter(|d| d.exposes(service)).collect(),
        };

        match matches.len() {
            0 => Ok(None),
            1 => self.own_handle(matches.remove(0), service).map(Some),
            _ => Err(self.ambiguity(
                format!(
                    "Multiple services of type {} available in {}:",
                    service,
                    self.owner.display_name()
                ),
                &matches,
            )),
        }
    }

    fn get_factory(&self, element: TypeKey) -> Result<Option<ServiceHandle>> {
        let candidates = self.owner.own().read().factory_candidates();
        let mut matches: Vec<_> = candidates
            .into_iter()
            .filter(|d| d.is_factory_of(element))
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => {
                let descriptor = matches.remove(0);
                let Some(view) = descriptor.factory_view(element) else {
                    return Ok(None);
                };
                self.own_handle(descriptor, view).map(Some)
            }
            _ => Err(self.ambiguity(
                format!(
                    "Multiple factories for objects of type {} available in {}:",
                    element,
                    self.owner.display_name()
                ),
                &matches,
            )),
        }
    }

    fn collect(&self, service: TypeKey, out: &mut Vec<ServiceHandle>) -> Result<()> {
        let candidates = self.owner.own().read().candidates(service);
        for descriptor in candidates.into_iter().filter(|d| d.exposes(service)) {
            out.push(self.own_handle(descriptor, service)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Exposes;
    use crate::factory::Factory;
    use crate::request::erase;

    trait Greeter: Send + Sync {}

    struct English;
    impl Greeter for English {}

    struct Widget;

    struct Widgets;

    impl Factory<Widget> for Widgets {
        fn create(&self) -> Arc<Widget> {
            Arc::new(Widget)
        }
    }

    fn english() -> Arc<ServiceDescriptor> {
        ServiceDescriptor::fixed(
            TypeKey::of::<English>(),
            Exposes::<English>::new()
                .service::<dyn Greeter>(|e| e)
                .into_exposures(),
            erase(Arc::new(English)),
        )
    }

    #[test]
    fn test_add_indexes_every_exposure_once() {
        let mut own = OwnServices::new();
        own.add(english(), "test").unwrap();

        assert_eq!(own.candidates(TypeKey::of::<English>()).len(), 1);
        assert_eq!(own.candidates(TypeKey::of::<dyn Greeter>()).len(), 1);
        assert_eq!(own.candidates(TypeKey::root()).len(), 1);
        assert!(own.candidates(TypeKey::of::<Widget>()).is_empty());
        assert!(own.factory_candidates().is_empty());
    }

    #[test]
    fn test_factories_share_a_bucket() {
        let mut own = OwnServices::new();
        own.add(
            ServiceDescriptor::fixed(
                TypeKey::of::<Widgets>(),
                Exposes::<Widgets>::new().factory_of::<Widget>().into_exposures(),
                erase(Arc::new(Widgets)),
            ),
            "test",
        )
        .unwrap();
        own.add(english(), "test").unwrap();

        let factories = own.factory_candidates();
        assert_eq!(factories.len(), 1);
        assert!(factories[0].is_factory_of(TypeKey::of::<Widget>()));
    }

    #[test]
    fn test_frozen_index_rejects_additions() {
        let mut own = OwnServices::new();
        own.freeze();

        let err = own.add(english(), "build services").unwrap_err();
        assert!(own.is_frozen());
        assert_eq!(own.len(), 0);
        assert_eq!(
            err.to_string(),
            "Cannot add provider to service registry build services as it is no longer mutable."
        );
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut own = OwnServices::new();
        let first = english();
        let second = english();
        own.add(Arc::clone(&first), "test").unwrap();
        own.add(Arc::clone(&second), "test").unwrap();

        let greeters = own.candidates(TypeKey::of::<dyn Greeter>());
        assert!(Arc::ptr_eq(&greeters[0], &first));
        assert!(Arc::ptr_eq(&greeters[1], &second));
        assert_eq!(own.services().len(), 2);
    }
}
