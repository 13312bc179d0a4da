//! Combining a registry's own services with its parents
//!
//! A registry always answers from its own index first. Anything it does not
//! provide is looked up in its parents in declaration order, and the first
//! parent that answers wins. Parents are never checked against each other
//! for ambiguity.

use crate::descriptor::ServiceHandle;
use crate::error::{RegistryError, Result};
use crate::id::RegistryId;
use crate::index::OwnProvider;
use crate::registry::{RegistryInner, ServiceRegistry};
use crate::request::{AnyService, ServiceRequest, TypeKey};
use std::cell::RefCell;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Anything that can answer single, factory and collection lookups
pub(crate) trait Provider {
    /// One service assignable to `service`, or `None`
    fn get_service(&self, service: TypeKey) -> Result<Option<ServiceHandle>>;

    /// One factory producing `element`, or `None`
    fn get_factory(&self, element: TypeKey) -> Result<Option<ServiceHandle>>;

    /// Append every service assignable to `service`
    fn collect(&self, service: TypeKey, out: &mut Vec<ServiceHandle>) -> Result<()>;
}

// =============================================================================
// ServiceLookup - the minimal capability a parent must offer
// =============================================================================

/// The minimal lookup capability a parent source must provide.
///
/// Values are type-erased: `get_any(key)` returns an [`AnyService`] wrapping
/// an `Arc<K>` and `get_factory_any(element)` one wrapping an
/// `Arc<dyn Factory<E>>`. A missing service must be reported as
/// [`RegistryError::UnknownService`] for the requested key, which the child
/// turns into a local miss.
pub trait ServiceLookup: Send + Sync {
    fn display_name(&self) -> String;

    fn get_any(&self, service: TypeKey) -> Result<AnyService>;

    fn get_all_any(&self, service: TypeKey) -> Result<Vec<AnyService>>;

    fn get_factory_any(&self, element: TypeKey) -> Result<AnyService>;

    /// The concrete registry behind this lookup, enabling direct delegation
    fn as_registry(&self) -> Option<&ServiceRegistry> {
        None
    }
}

// =============================================================================
// Parent sources
// =============================================================================

#[derive(Clone)]
pub(crate) enum ParentSource {
    /// Direct delegation into another registry of this crate
    Registry(ServiceRegistry),
    /// Wrapped delegation into an arbitrary lookup
    External(Arc<dyn ServiceLookup>),
}

impl ParentSource {
    pub(crate) fn from_lookup(lookup: Arc<dyn ServiceLookup>) -> Self {
        match lookup.as_registry() {
            Some(registry) => Self::Registry(registry.clone()),
            None => Self::External(lookup),
        }
    }

    fn display_name(&self) -> String {
        match self {
            Self::Registry(registry) => registry.display_name().to_string(),
            Self::External(lookup) => lookup.display_name(),
        }
    }

    fn instance(&self, service: AnyService) -> ServiceHandle {
        ServiceHandle::Instance {
            service,
            source: Arc::from(self.display_name()),
        }
    }

    /// Treat an unknown-service error for exactly `requested` as a miss
    fn missing_as_none(requested: TypeKey, result: Result<AnyService>) -> Result<Option<AnyService>> {
        match result {
            Ok(service) => Ok(Some(service)),
            Err(e) if e.is_unknown_service_for(requested) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Provider for ParentSource {
    fn get_service(&self, service: TypeKey) -> Result<Option<ServiceHandle>> {
        let found = match self {
            Self::Registry(registry) => registry.inner().do_get(ServiceRequest::Plain(service))?,
            Self::External(lookup) => Self::missing_as_none(service, lookup.get_any(service))?,
        };
        Ok(found.map(|instance| self.instance(instance)))
    }

    fn get_factory(&self, element: TypeKey) -> Result<Option<ServiceHandle>> {
        let found = match self {
            Self::Registry(registry) => registry.inner().do_get(ServiceRequest::FactoryOf(element))?,
            Self::External(lookup) => Self::missing_as_none(element, lookup.get_factory_any(element))?,
        };
        Ok(found.map(|instance| self.instance(instance)))
    }

    fn collect(&self, service: TypeKey, out: &mut Vec<ServiceHandle>) -> Result<()> {
        let services = match self {
            Self::Registry(registry) => registry.inner().collect_into(service)?,
            Self::External(lookup) => lookup.get_all_any(service)?,
        };
        out.extend(services.into_iter().map(|instance| self.instance(instance)));
        Ok(())
    }
}

/// The parents of one registry, tried in declaration order
pub(crate) struct Parents {
    owner: RegistryId,
    owner_name: String,
    sources: Vec<ParentSource>,
}

impl Parents {
    pub(crate) fn new(owner: RegistryId, owner_name: String, sources: Vec<ParentSource>) -> Option<Self> {
        if sources.is_empty() {
            return None;
        }
        Some(Self {
            owner,
            owner_name,
            sources,
        })
    }

    fn first_match(
        &self,
        mut lookup: impl FnMut(&ParentSource) -> Result<Option<ServiceHandle>>,
    ) -> Result<Option<ServiceHandle>> {
        let _guard = DelegationGuard::enter(self.owner, &self.owner_name)?;
        for source in &self.sources {
            if let Some(found) = lookup(source)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

impl Provider for Parents {
    fn get_service(&self, service: TypeKey) -> Result<Option<ServiceHandle>> {
        #[cfg(feature = "logging")]
        trace!(
            target: crate::logging::TARGET,
            registry = %self.owner_name,
            service = %service,
            parents = self.sources.len(),
            "Delegating service lookup to parents"
        );

        self.first_match(|source| source.get_service(service))
    }

    fn get_factory(&self, element: TypeKey) -> Result<Option<ServiceHandle>> {
        self.first_match(|source| source.get_factory(element))
    }

    fn collect(&self, service: TypeKey, out: &mut Vec<ServiceHandle>) -> Result<()> {
        let _guard = DelegationGuard::enter(self.owner, &self.owner_name)?;
        for source in &self.sources {
            source.collect(service, out)?;
        }
        Ok(())
    }
}

// =============================================================================
// AllServices - own first, then parents
// =============================================================================

pub(crate) struct AllServices<'a> {
    owner: &'a Arc<RegistryInner>,
}

impl<'a> AllServices<'a> {
    pub(crate) fn new(owner: &'a Arc<RegistryInner>) -> Self {
        Self { owner }
    }
}

impl Provider for AllServices<'_> {
    fn get_service(&self, service: TypeKey) -> Result<Option<ServiceHandle>> {
        if let Some(found) = OwnProvider::new(self.owner).get_service(service)? {
            return Ok(Some(found));
        }
        match self.owner.parents() {
            Some(parents) => parents.get_service(service),
            None => Ok(None),
        }
    }

    fn get_factory(&self, element: TypeKey) -> Result<Option<ServiceHandle>> {
        if let Some(found) = OwnProvider::new(self.owner).get_factory(element)? {
            return Ok(Some(found));
        }
        match self.owner.parents() {
            Some(parents) => parents.get_factory(element),
            None => Ok(None),
        }
    }

    fn collect(&self, service: TypeKey, out: &mut Vec<ServiceHandle>) -> Result<()> {
        OwnProvider::new(self.owner).collect(service, out)?;
        if let Some(parents) = self.owner.parents() {
            parents.collect(service, out)?;
        }
        Ok(())
    }
}

// =============================================================================
// Cycle protection
// =============================================================================

thread_local! {
    /// Registries currently delegating to their parents on this thread
    static DELEGATING: RefCell<Vec<RegistryId>> = const { RefCell::new(Vec::new()) };
}

/// Marks a registry as delegating for the lifetime of the guard.
///
/// Re-entering the same registry's parent delegation on one thread can only
/// happen through a cyclic hierarchy, which is reported instead of recursing.
struct DelegationGuard {
    id: RegistryId,
}

impl DelegationGuard {
    fn enter(id: RegistryId, name: &str) -> Result<Self> {
        DELEGATING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&id) {
                return Err(RegistryError::lookup(format!(
                    "Cycle detected in the parent hierarchy of {name}."
                )));
            }
            stack.push(id);
            Ok(Self { id })
        })
    }
}

impl Drop for DelegationGuard {
    fn drop(&mut self) {
        DELEGATING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|id| *id == self.id) {
                stack.remove(pos);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{downcast, erase};

    struct Settings(&'static str);

    /// A parent that is not a registry of this crate
    struct MapLookup {
        settings: Arc<Settings>,
        fail_with: Option<RegistryError>,
    }

    impl ServiceLookup for MapLookup {
        fn display_name(&self) -> String {
            "map lookup".into()
        }

        fn get_any(&self, service: TypeKey) -> Result<AnyService> {
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            if service == TypeKey::of::<Settings>() {
                Ok(erase(Arc::clone(&self.settings)))
            } else {
                Err(RegistryError::unknown_service(service, format!("No service of type {service}.")))
            }
        }

        fn get_all_any(&self, service: TypeKey) -> Result<Vec<AnyService>> {
            Ok(self.get_any(service).into_iter().collect())
        }

        fn get_factory_any(&self, element: TypeKey) -> Result<AnyService> {
            Err(RegistryError::unknown_service(element, "no factories"))
        }
    }

    fn external(fail_with: Option<RegistryError>) -> ParentSource {
        ParentSource::from_lookup(Arc::new(MapLookup {
            settings: Arc::new(Settings("external")),
            fail_with,
        }))
    }

    #[test]
    fn test_external_unknown_service_is_a_miss() {
        let source = external(None);

        let found = source.get_service(TypeKey::of::<Settings>()).unwrap().unwrap();
        let service = found.resolve_service().unwrap();
        assert_eq!(downcast::<Settings>(&service).unwrap().0, "external");

        assert!(source.get_service(TypeKey::of::<u64>()).unwrap().is_none());
        assert!(source.get_factory(TypeKey::of::<u64>()).unwrap().is_none());
    }

    #[test]
    fn test_external_failures_propagate() {
        let source = external(Some(RegistryError::lookup("backend unavailable")));

        let err = source.get_service(TypeKey::of::<Settings>()).err().unwrap();
        assert_eq!(err.to_string(), "backend unavailable");
    }

    #[test]
    fn test_unknown_service_for_another_type_propagates() {
        let source = external(Some(RegistryError::unknown_service(
            TypeKey::of::<String>(),
            "No service of type String available.",
        )));

        assert!(source.get_service(TypeKey::of::<Settings>()).is_err());
    }

    #[test]
    fn test_registry_lookup_uses_direct_delegation() {
        let registry = ServiceRegistry::named("parent");
        let lookup: Arc<dyn ServiceLookup> = Arc::new(registry.clone());

        match ParentSource::from_lookup(lookup) {
            ParentSource::Registry(parent) => assert_eq!(parent.id(), registry.id()),
            ParentSource::External(_) => panic!("expected direct delegation"),
        }
    }

    #[test]
    fn test_delegation_guard_rejects_reentry() {
        let id = RegistryId::new();

        let outer = DelegationGuard::enter(id, "outer").unwrap();
        let err = DelegationGuard::enter(id, "outer").err().unwrap();
        assert!(err.to_string().contains("Cycle detected"));

        drop(outer);
        assert!(DelegationGuard::enter(id, "outer").is_ok());
    }
}
