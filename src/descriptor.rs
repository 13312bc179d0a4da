//! Service descriptors: one lazily created service and its lifecycle
//!
//! A descriptor moves through `Unbound -> Binding -> Bound` while its
//! dependencies are located, creates its instance at most once, and records
//! the descriptors that depend on it so that `close()` can stop dependents
//! before the services they use.

use crate::composite::AllServices;
use crate::dependency::{Resolved, ResolvedArgs};
use crate::error::{BoxError, RegistryError, Result};
use crate::factory::Factory;
use crate::lifecycle::{StopFailure, Stoppable};
use crate::registry::{RegistryInner, ServiceRegistry};
use crate::request::{downcast, erase, AnyService, ServiceRequest, TypeKey};
use crate::shape;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Type-erased construction operation
pub(crate) type CreateFn =
    Arc<dyn Fn(&mut ResolvedArgs) -> std::result::Result<AnyService, BoxError> + Send + Sync>;

type CastFn = Arc<dyn Fn(&AnyService) -> Option<AnyService> + Send + Sync>;

// =============================================================================
// Exposures
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ExposureRole {
    Service,
    Factory(TypeKey),
    Stop,
}

/// One view a registration can be located as
#[derive(Clone)]
pub(crate) struct Exposure {
    key: TypeKey,
    role: ExposureRole,
    cast: CastFn,
}

impl Exposure {
    pub(crate) fn key(&self) -> TypeKey {
        self.key
    }
}

/// The set of types a registration of `T` can be located as.
///
/// `T` itself is always exposed. Anything else, such as a trait object the
/// service implements, must be listed explicitly:
///
/// ```rust
/// use service_registry::{BoxError, Exposes, ServiceRegistry, Stoppable};
/// use std::sync::Arc;
///
/// trait Cache: Send + Sync {}
///
/// struct MemoryCache;
/// impl Cache for MemoryCache {}
/// impl Stoppable for MemoryCache {
///     fn stop(&self) -> Result<(), BoxError> {
///         Ok(())
///     }
/// }
///
/// let registry = ServiceRegistry::named("caches");
/// registry
///     .add_exposing(
///         MemoryCache,
///         Exposes::<MemoryCache>::new().service::<dyn Cache>(|cache| cache).stoppable(),
///     )
///     .unwrap();
///
/// let _cache: Arc<dyn Cache> = registry.get::<dyn Cache>().unwrap();
/// ```
pub struct Exposes<T: ?Sized> {
    exposures: Vec<Exposure>,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Exposes<T> {
    pub fn new() -> Self {
        let identity: CastFn = Arc::new(|service: &AnyService| Some(Arc::clone(service)));
        Self {
            exposures: vec![Exposure {
                key: TypeKey::of::<T>(),
                role: ExposureRole::Service,
                cast: identity,
            }],
            _marker: PhantomData,
        }
    }

    /// Also expose the service as `U`, usually a trait object it implements
    pub fn service<U: ?Sized + Send + Sync + 'static>(mut self, cast: fn(Arc<T>) -> Arc<U>) -> Self {
        self.push(Exposure {
            key: TypeKey::of::<U>(),
            role: ExposureRole::Service,
            cast: Arc::new(move |service: &AnyService| {
                downcast::<T>(service).map(|typed| erase(cast(typed)))
            }),
        });
        self
    }

    /// Expose the service as a factory of `E`
    pub fn factory_of<E: ?Sized + 'static>(mut self) -> Self
    where
        T: Factory<E> + Sized,
    {
        self.push(Exposure {
            key: TypeKey::of::<dyn Factory<E>>(),
            role: ExposureRole::Factory(TypeKey::of::<E>()),
            cast: Arc::new(|service: &AnyService| {
                downcast::<T>(service).map(|typed| erase::<dyn Factory<E>>(typed))
            }),
        });
        self
    }

    /// Stop the service when the owning registry closes
    pub fn stoppable(mut self) -> Self
    where
        T: Stoppable + Sized,
    {
        self.push(Exposure {
            key: TypeKey::of::<dyn Stoppable>(),
            role: ExposureRole::Stop,
            cast: Arc::new(|service: &AnyService| {
                downcast::<T>(service).map(|typed| erase::<dyn Stoppable>(typed))
            }),
        });
        self
    }

    fn push(&mut self, exposure: Exposure) {
        if self.exposures.iter().all(|existing| existing.key != exposure.key) {
            self.exposures.push(exposure);
        }
    }

    pub(crate) fn into_exposures(self) -> Vec<Exposure> {
        self.exposures
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for Exposes<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Handles
// =============================================================================

/// A located service that can produce its value on demand
#[derive(Clone)]
pub(crate) enum ServiceHandle {
    /// A descriptor owned by the registry doing the lookup
    Own {
        descriptor: Arc<ServiceDescriptor>,
        view: TypeKey,
    },
    /// An instance obtained from a parent; never stopped by the child
    Instance { service: AnyService, source: Arc<str> },
    /// The registry that owns the declaring descriptor
    Registry(Weak<RegistryInner>),
    /// Synthetic result of a collection lookup
    Collection(Vec<ServiceHandle>),
}

impl ServiceHandle {
    pub(crate) fn resolve(&self) -> Result<Resolved> {
        match self {
            Self::Own { descriptor, view } => descriptor.view_of(*view).map(Resolved::Service),
            Self::Instance { service, .. } => Ok(Resolved::Service(Arc::clone(service))),
            Self::Registry(owner) => owner
                .upgrade()
                .map(|inner| Resolved::Registry(ServiceRegistry::from_inner(inner)))
                .ok_or_else(|| {
                    RegistryError::illegal_state("The owning service registry has been dropped.")
                }),
            Self::Collection(members) => members
                .iter()
                .map(ServiceHandle::resolve_service)
                .collect::<Result<Vec<_>>>()
                .map(Resolved::Services),
        }
    }

    /// Resolve to a single erased service
    pub(crate) fn resolve_service(&self) -> Result<AnyService> {
        match self.resolve()? {
            Resolved::Service(service) => Ok(service),
            Resolved::Registry(registry) => Ok(erase(Arc::new(registry))),
            Resolved::Services(_) => Err(RegistryError::illegal_state(
                "A collection lookup cannot be resolved to a single service.",
            )),
        }
    }

    /// Record `dependent` for shutdown ordering. Parent instances ignore it.
    pub(crate) fn required_by(&self, dependent: &Arc<ServiceDescriptor>) {
        match self {
            Self::Own { descriptor, .. } => descriptor.required_by(dependent),
            Self::Collection(members) => {
                for member in members {
                    member.required_by(dependent);
                }
            }
            Self::Instance { .. } | Self::Registry(_) => {}
        }
    }
}

// =============================================================================
// Descriptor
// =============================================================================

/// How a descriptor obtains its instance
pub(crate) enum Recipe {
    Fixed,
    Constructor(Construction),
    FactoryMethod(Construction),
    Decorator(Construction),
}

pub(crate) struct Construction {
    /// `Type::create` or `Bean.operation`, used in diagnostics
    pub(crate) origin: String,
    pub(crate) requests: Vec<ServiceRequest>,
    pub(crate) create: CreateFn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BindState {
    Unbound,
    Binding,
    Bound,
}

struct DescriptorState {
    bind: BindState,
    instance: Option<AnyService>,
    /// Bound parameter handles, discarded once the instance exists
    params: Option<Vec<ServiceHandle>>,
    dependents: Vec<Weak<ServiceDescriptor>>,
}

pub(crate) struct ServiceDescriptor {
    declared: TypeKey,
    display_name: String,
    exposures: Vec<Exposure>,
    /// Element types of every factory exposure, computed once
    factory_elements: Vec<TypeKey>,
    recipe: Recipe,
    state: Mutex<DescriptorState>,
}

impl ServiceDescriptor {
    fn new(
        declared: TypeKey,
        display_name: String,
        exposures: Vec<Exposure>,
        recipe: Recipe,
        instance: Option<AnyService>,
    ) -> Arc<Self> {
        let factory_elements = exposures
            .iter()
            .filter_map(|exposure| match exposure.role {
                ExposureRole::Factory(element) => Some(element),
                _ => None,
            })
            .collect();

        Arc::new(Self {
            declared,
            display_name,
            exposures,
            factory_elements,
            recipe,
            state: Mutex::new(DescriptorState {
                bind: BindState::Unbound,
                instance,
                params: None,
                dependents: Vec::new(),
            }),
        })
    }

    /// A service instance supplied at registration
    pub(crate) fn fixed(
        declared: TypeKey,
        exposures: Vec<Exposure>,
        instance: AnyService,
    ) -> Arc<Self> {
        let display_name = format!("Service {declared}");
        Self::new(declared, display_name, exposures, Recipe::Fixed, Some(instance))
    }

    /// A service built by its `Service::create` constructor
    pub(crate) fn constructor(
        declared: TypeKey,
        exposures: Vec<Exposure>,
        requests: Vec<ServiceRequest>,
        create: CreateFn,
    ) -> Arc<Self> {
        let construction = Construction {
            origin: format!("{declared}::create"),
            requests,
            create,
        };
        let display_name = format!("Service {declared}");
        Self::new(declared, display_name, exposures, Recipe::Constructor(construction), None)
    }

    /// A service built by a provider bean operation
    pub(crate) fn factory_method(
        declared: TypeKey,
        exposures: Vec<Exposure>,
        origin: String,
        requests: Vec<ServiceRequest>,
        create: CreateFn,
    ) -> Arc<Self> {
        let display_name = format!("Service {declared} at {origin}()");
        let construction = Construction { origin, requests, create };
        Self::new(declared, display_name, exposures, Recipe::FactoryMethod(construction), None)
    }

    /// A service built by decorating the same type obtained from a parent
    pub(crate) fn decorator(
        declared: TypeKey,
        exposures: Vec<Exposure>,
        origin: String,
        create: CreateFn,
    ) -> Arc<Self> {
        let display_name = format!("Service {declared} at {origin}()");
        let construction = Construction {
            origin,
            requests: vec![ServiceRequest::Plain(declared)],
            create,
        };
        Self::new(declared, display_name, exposures, Recipe::Decorator(construction), None)
    }

    pub(crate) fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Every key this descriptor is indexed under, declared type first
    pub(crate) fn exposed_keys(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.exposures.iter().map(Exposure::key)
    }

    pub(crate) fn exposes(&self, key: TypeKey) -> bool {
        key == TypeKey::root() || self.exposures.iter().any(|exposure| exposure.key == key)
    }

    pub(crate) fn is_factory(&self) -> bool {
        !self.factory_elements.is_empty()
    }

    pub(crate) fn is_factory_of(&self, element: TypeKey) -> bool {
        self.factory_elements.contains(&element)
    }

    /// The `dyn Factory<E>` view for `element`
    pub(crate) fn factory_view(&self, element: TypeKey) -> Option<TypeKey> {
        self.exposures
            .iter()
            .find(|exposure| exposure.role == ExposureRole::Factory(element))
            .map(Exposure::key)
    }

    // -------------------------------------------------------------------------
    // Binding
    // -------------------------------------------------------------------------

    /// Bind dependencies without creating anything.
    ///
    /// Observing `Binding` means this descriptor is already being bound
    /// further up the current call chain.
    pub(crate) fn prepare(self: &Arc<Self>, owner: &Arc<RegistryInner>) -> Result<()> {
        {
            let mut state = self.state.lock();
            match state.bind {
                BindState::Bound => return Ok(()),
                BindState::Binding => {
                    return Err(RegistryError::lookup(format!(
                        "{} in {} depends on itself.",
                        self.display_name,
                        owner.display_name()
                    )));
                }
                BindState::Unbound => state.bind = BindState::Binding,
            }
        }

        let bound = self.bind(owner);

        let mut state = self.state.lock();
        match bound {
            Ok(params) => {
                state.bind = BindState::Bound;
                if state.instance.is_none() {
                    state.params = Some(params);
                }
                Ok(())
            }
            Err(e) => {
                state.bind = BindState::Unbound;
                Err(e)
            }
        }
    }

    fn bind(self: &Arc<Self>, owner: &Arc<RegistryInner>) -> Result<Vec<ServiceHandle>> {
        match &self.recipe {
            Recipe::Fixed => Ok(Vec::new()),
            Recipe::Constructor(construction) | Recipe::FactoryMethod(construction) => construction
                .requests
                .iter()
                .enumerate()
                .map(|(index, request)| self.bind_parameter(owner, construction, index, *request))
                .collect(),
            Recipe::Decorator(construction) => self.bind_decorated(owner, construction),
        }
    }

    fn bind_parameter(
        self: &Arc<Self>,
        owner: &Arc<RegistryInner>,
        construction: &Construction,
        index: usize,
        request: ServiceRequest,
    ) -> Result<ServiceHandle> {
        if request == ServiceRequest::plain::<ServiceRegistry>() {
            return Ok(ServiceHandle::Registry(Arc::downgrade(owner)));
        }

        let found = shape::strategy_for(request).and_then(|strategy| strategy.find(&AllServices::new(owner)));
        match found {
            Ok(Some(handle)) => {
                handle.required_by(self);
                Ok(handle)
            }
            Ok(None) => Err(RegistryError::creation(format!(
                "Cannot create service of type {} using {}() as required service of type {} is not available.",
                self.declared, construction.origin, request
            ))),
            Err(e) => Err(RegistryError::creation_caused_by(
                format!(
                    "Cannot create service of type {} using {}() as there is a problem with parameter #{} of type {}.",
                    self.declared,
                    construction.origin,
                    index + 1,
                    request
                ),
                e,
            )),
        }
    }

    /// The decorated value comes from the parent chain only
    fn bind_decorated(
        self: &Arc<Self>,
        owner: &Arc<RegistryInner>,
        construction: &Construction,
    ) -> Result<Vec<ServiceHandle>> {
        let request = ServiceRequest::Plain(self.declared);
        let Some(parents) = owner.parents() else {
            return Err(RegistryError::validation(format!(
                "Cannot use decorator method {}() when no parent registry is provided.",
                construction.origin
            )));
        };

        let found = shape::strategy_for(request).and_then(|strategy| strategy.find(parents));
        match found {
            Ok(Some(handle)) => {
                handle.required_by(self);
                Ok(vec![handle])
            }
            Ok(None) => Err(RegistryError::creation(format!(
                "Cannot create service of type {} using {}() as required service of type {} is not available in parent registries.",
                self.declared, construction.origin, request
            ))),
            Err(e) => Err(RegistryError::creation_caused_by(
                format!(
                    "Cannot create service of type {} using {}() as there is a problem with parameter #1 of type {}.",
                    self.declared, construction.origin, request
                ),
                e,
            )),
        }
    }

    // -------------------------------------------------------------------------
    // Instances
    // -------------------------------------------------------------------------

    /// The instance, created on first call.
    ///
    /// Must only be called on a bound descriptor. The state lock is not held
    /// while dependencies are resolved or the operation runs.
    pub(crate) fn instance(&self) -> Result<AnyService> {
        let params = {
            let state = self.state.lock();
            if let Some(instance) = &state.instance {
                return Ok(Arc::clone(instance));
            }
            state.params.clone()
        };

        let construction = match &self.recipe {
            Recipe::Fixed => {
                return Err(RegistryError::illegal_state(format!(
                    "{} has already been stopped.",
                    self.display_name
                )));
            }
            Recipe::Constructor(c) | Recipe::FactoryMethod(c) | Recipe::Decorator(c) => c,
        };
        let params = params.ok_or_else(|| {
            RegistryError::illegal_state(format!(
                "{} has not been bound to its dependencies.",
                self.display_name
            ))
        })?;

        let values = params
            .iter()
            .map(ServiceHandle::resolve)
            .collect::<Result<Vec<_>>>()?;
        let mut args = ResolvedArgs::new(values);

        let created = (construction.create)(&mut args).map_err(|cause| {
            let message = match &self.recipe {
                Recipe::Constructor(_) => {
                    format!("Could not create service of type {}.", self.declared)
                }
                _ => format!(
                    "Could not create service of type {} using {}().",
                    self.declared, construction.origin
                ),
            };
            RegistryError::creation_caused_by(message, cause)
        })?;

        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            service = %self.display_name,
            "Created service instance"
        );

        let mut state = self.state.lock();
        state.params = None;
        Ok(Arc::clone(state.instance.get_or_insert(created)))
    }

    /// The instance cast to one of its exposed views
    pub(crate) fn view_of(&self, view: TypeKey) -> Result<AnyService> {
        let instance = self.instance()?;
        self.cast(&instance, view).ok_or_else(|| {
            RegistryError::illegal_state(format!(
                "{} is not exposed as type {}.",
                self.display_name, view
            ))
        })
    }

    fn cast(&self, instance: &AnyService, view: TypeKey) -> Option<AnyService> {
        match self.exposures.iter().find(|exposure| exposure.key == view) {
            Some(exposure) => (exposure.cast)(instance),
            // The root view is the erased instance itself
            None if view == TypeKey::root() => Some(erase(Arc::clone(instance))),
            None => None,
        }
    }

    pub(crate) fn required_by(&self, dependent: &Arc<ServiceDescriptor>) {
        self.state.lock().dependents.push(Arc::downgrade(dependent));
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Stop every dependent, then this service. Each instance is stopped at
    /// most once; failures are appended rather than returned.
    pub(crate) fn stop(&self, failures: &mut Vec<StopFailure>) {
        let (instance, dependents) = {
            let mut state = self.state.lock();
            state.params = None;
            (state.instance.take(), std::mem::take(&mut state.dependents))
        };

        let Some(instance) = instance else {
            return;
        };

        for dependent in dependents.iter().filter_map(Weak::upgrade) {
            dependent.stop(failures);
        }

        let stoppable = self
            .cast(&instance, TypeKey::of::<dyn Stoppable>())
            .and_then(|view| downcast::<dyn Stoppable>(&view));
        if let Some(stoppable) = stoppable {
            #[cfg(feature = "logging")]
            trace!(
                target: crate::logging::TARGET,
                service = %self.display_name,
                "Stopping service"
            );

            if let Err(cause) = stoppable.stop() {
                failures.push(StopFailure::new(self.display_name.clone(), cause));
            }
        }
    }
}
