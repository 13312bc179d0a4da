//! The service registry
//!
//! `ServiceRegistry` is the public surface of the crate. It accepts
//! registrations while mutable, freezes permanently on the first lookup,
//! resolves services lazily through its own index and its parents, and
//! stops what it created when closed.

use crate::composite::{AllServices, ParentSource, Parents, ServiceLookup};
use crate::dependency::{Dependencies, ResolvedArgs, Service};
use crate::descriptor::{CreateFn, Exposes, ServiceDescriptor, ServiceHandle};
use crate::error::{RegistryError, Result};
use crate::factory::Factory;
use crate::id::RegistryId;
use crate::index::OwnServices;
use crate::provider::{self, ProviderBean};
use crate::request::{downcast, erase, AnyService, ServiceRequest, TypeKey};
use crate::shape;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

const DEFAULT_DISPLAY_NAME: &str = "ServiceRegistry";

// =============================================================================
// RegistryInner
// =============================================================================

pub(crate) struct RegistryInner {
    id: RegistryId,
    display_name: String,
    /// Serializes every registration, resolution and close on this registry.
    /// Reentrant so that binding can resolve dependencies on the same thread.
    lock: ReentrantMutex<()>,
    mutable: AtomicBool,
    closed: AtomicBool,
    own: RwLock<OwnServices>,
    parents: Option<Parents>,
    /// Located handles per request, misses included. Collections and errors
    /// are never cached.
    cache: DashMap<ServiceRequest, Option<ServiceHandle>, RandomState>,
}

impl RegistryInner {
    fn new(id: RegistryId, display_name: String, parents: Vec<ParentSource>) -> Self {
        let parents = Parents::new(id, display_name.clone(), parents);
        Self {
            id,
            display_name,
            lock: ReentrantMutex::new(()),
            mutable: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            own: RwLock::new(OwnServices::new()),
            parents,
            cache: DashMap::with_capacity_and_hasher_and_shard_amount(16, RandomState::new(), 8),
        }
    }

    pub(crate) fn display_name(&self) -> &str {
        &self.display_name
    }

    pub(crate) fn own(&self) -> &RwLock<OwnServices> {
        &self.own
    }

    pub(crate) fn parents(&self) -> Option<&Parents> {
        self.parents.as_ref()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// One-way latch to immutable
    fn freeze(&self) {
        if self.mutable.swap(false, Ordering::AcqRel) {
            let mut own = self.own.write();
            debug_assert!(!own.is_frozen());
            own.freeze();
            drop(own);

            #[cfg(feature = "logging")]
            debug!(
                target: crate::logging::TARGET,
                registry = %self.display_name,
                services = self.own.read().len(),
                "Registry is no longer mutable"
            );
        }
    }

    /// Take the registry lock for a registration, failing once frozen or closed
    pub(crate) fn begin_registration(&self) -> Result<ReentrantMutexGuard<'_, ()>> {
        let guard = self.lock.lock();
        self.assert_mutable()?;
        Ok(guard)
    }

    fn assert_mutable(&self) -> Result<()> {
        if self.is_closed() {
            return Err(RegistryError::illegal_state(format!(
                "Cannot add provider to service registry {} as it has been closed.",
                self.display_name
            )));
        }
        if !self.mutable.load(Ordering::Acquire) {
            return Err(RegistryError::illegal_state(format!(
                "Cannot add provider to service registry {} as it is no longer mutable.",
                self.display_name
            )));
        }
        Ok(())
    }

    fn assert_open(&self, request: ServiceRequest) -> Result<()> {
        if !self.is_closed() {
            return Ok(());
        }
        let message = match request {
            ServiceRequest::FactoryOf(element) => format!(
                "Cannot locate factory for objects of type {}, as {} has been closed.",
                element, self.display_name
            ),
            _ => format!(
                "Cannot locate service of type {}, as {} has been closed.",
                request.key(),
                self.display_name
            ),
        };
        Err(RegistryError::lookup(message))
    }

    pub(crate) fn add_descriptor(&self, descriptor: Arc<ServiceDescriptor>) -> Result<()> {
        let _guard = self.begin_registration()?;

        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            registry = %self.display_name,
            service = %descriptor.display_name(),
            "Registering service"
        );

        self.own.write().add(descriptor, &self.display_name)
    }

    /// Locate a handle for `request`; the caller holds the lock
    fn lookup(self: &Arc<Self>, request: ServiceRequest) -> Result<Option<ServiceHandle>> {
        let strategy = shape::strategy_for(request)?;
        if !strategy.is_cacheable() {
            return strategy.find(&AllServices::new(self));
        }

        if let Some(hit) = self.cache.get(&request).map(|entry| entry.value().clone()) {
            #[cfg(feature = "logging")]
            trace!(
                target: crate::logging::TARGET,
                registry = %self.display_name,
                request = %request,
                found = hit.is_some(),
                "Resolution cache hit"
            );
            return Ok(hit);
        }

        let found = strategy.find(&AllServices::new(self))?;
        // A miss may turn into a hit while registrations are still accepted
        if !self.mutable.load(Ordering::Acquire) {
            self.cache.insert(request, found.clone());
        }
        Ok(found)
    }

    /// Entry point for public lookups: freezes, then resolves
    fn resolve(self: &Arc<Self>, request: ServiceRequest) -> Result<Option<AnyService>> {
        let _guard = self.lock.lock();
        self.freeze();
        self.assert_open(request)?;
        self.lookup(request)?
            .map(|handle| handle.resolve_service())
            .transpose()
    }

    fn resolve_all(self: &Arc<Self>, service: TypeKey) -> Result<Vec<AnyService>> {
        let _guard = self.lock.lock();
        self.freeze();
        self.collect_into(service)
    }

    /// Direct delegation from a child. Does not freeze this registry.
    pub(crate) fn do_get(self: &Arc<Self>, request: ServiceRequest) -> Result<Option<AnyService>> {
        let _guard = self.lock.lock();
        self.assert_open(request)?;
        self.lookup(request)?
            .map(|handle| handle.resolve_service())
            .transpose()
    }

    /// Every service assignable to `service`, own first, then each parent's
    pub(crate) fn collect_into(self: &Arc<Self>, service: TypeKey) -> Result<Vec<AnyService>> {
        let _guard = self.lock.lock();
        let request = ServiceRequest::CollectionOf(service);
        self.assert_open(request)?;
        match self.lookup(request)? {
            Some(ServiceHandle::Collection(members)) => {
                members.iter().map(ServiceHandle::resolve_service).collect()
            }
            Some(other) => other.resolve_service().map(|service| vec![service]),
            None => Ok(Vec::new()),
        }
    }

    fn close(&self) -> Result<()> {
        let _guard = self.lock.lock();
        if self.is_closed() {
            return Ok(());
        }

        let services = self.own.read().services();

        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            registry = %self.display_name,
            services = services.len(),
            "Closing registry"
        );

        let mut failures = Vec::new();
        for descriptor in &services {
            descriptor.stop(&mut failures);
        }

        self.closed.store(true, Ordering::Release);
        self.cache.clear();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Stop {
                registry: self.display_name.clone(),
                failures,
            })
        }
    }
}

// =============================================================================
// ServiceRegistry
// =============================================================================

/// A hierarchical, type-directed service registry.
///
/// Cloning is cheap and yields another handle to the same registry.
///
/// A service that keeps an injected `ServiceRegistry` holds the registry
/// strongly, and the registry holds the service. Such a registry is only
/// released by [`close()`](Self::close); dropping the last outside handle
/// leaks it. Services that only need to reach back into their registry
/// should depend on [`WeakRegistry`] instead.
///
/// # Examples
///
/// ```rust
/// use service_registry::{Exposes, ServiceRegistry};
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// struct English;
///
/// impl Greeter for English {
///     fn greet(&self) -> String {
///         "hello".into()
///     }
/// }
///
/// let parent = ServiceRegistry::named("parent");
/// parent
///     .add_exposing(English, Exposes::new().service::<dyn Greeter>(|e| e))
///     .unwrap();
///
/// let child = parent.child("child");
/// let greeter = child.get::<dyn Greeter>().unwrap();
/// assert_eq!(greeter.greet(), "hello");
/// ```
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl ServiceRegistry {
    /// Create an empty registry without parents
    pub fn new() -> Self {
        Self::named(DEFAULT_DISPLAY_NAME)
    }

    /// Create an empty registry with a display name used in diagnostics
    pub fn named(display_name: impl Into<String>) -> Self {
        Self::create(RegistryId::new(), display_name.into(), Vec::new())
    }

    /// Create a child registry whose only parent is this registry
    pub fn child(&self, display_name: impl Into<String>) -> Self {
        let parents = vec![ParentSource::Registry(self.clone())];
        Self::create(RegistryId::new(), display_name.into(), parents)
    }

    /// Start building a registry with several parents or provider beans
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    fn create(id: RegistryId, display_name: String, parents: Vec<ParentSource>) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: crate::logging::TARGET,
            registry = %display_name,
            id = id.get(),
            parents = parents.len(),
            "Creating service registry"
        );

        Self {
            inner: Arc::new(RegistryInner::new(id, display_name, parents)),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<RegistryInner> {
        &self.inner
    }

    #[inline]
    pub fn id(&self) -> RegistryId {
        self.inner.id
    }

    #[inline]
    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    /// True until the first `get`, `get_all` or `get_factory` call
    #[inline]
    pub fn is_mutable(&self) -> bool {
        self.inner.mutable.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// A handle that does not keep this registry alive
    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Add a fixed instance, located as `T`. It is stopped with this registry
    /// if registered through [`add_exposing`](Self::add_exposing) with
    /// `stoppable()`.
    pub fn add<T: Send + Sync + 'static>(&self, service: T) -> Result<()> {
        self.add_arc(Arc::new(service))
    }

    /// Add a shared instance, located as `T` (which may be a trait object)
    pub fn add_arc<T: ?Sized + Send + Sync + 'static>(&self, service: Arc<T>) -> Result<()> {
        self.add_arc_exposing(service, Exposes::new())
    }

    /// Add a fixed instance with an explicit set of exposed types
    pub fn add_exposing<T: Send + Sync + 'static>(&self, service: T, exposes: Exposes<T>) -> Result<()> {
        self.add_arc_exposing(Arc::new(service), exposes)
    }

    pub fn add_arc_exposing<T: ?Sized + Send + Sync + 'static>(
        &self,
        service: Arc<T>,
        exposes: Exposes<T>,
    ) -> Result<()> {
        let descriptor =
            ServiceDescriptor::fixed(TypeKey::of::<T>(), exposes.into_exposures(), erase(service));
        self.inner.add_descriptor(descriptor)
    }

    /// Add a factory of `E`, located through [`get_factory`](Self::get_factory)
    pub fn add_factory<E, F>(&self, factory: F) -> Result<()>
    where
        E: ?Sized + 'static,
        F: Factory<E> + 'static,
    {
        self.add_exposing(factory, Exposes::new().factory_of::<E>())
    }

    /// Add a constructor-backed service, created lazily on first lookup
    pub fn add_type<T: Service>(&self) -> Result<()> {
        self.add_type_exposing(Exposes::<T>::new())
    }

    pub fn add_type_exposing<T: Service>(&self, exposes: Exposes<T>) -> Result<()> {
        let requests = <T::Dependencies as Dependencies>::requests();
        for request in &requests {
            shape::strategy_for(*request)?;
        }

        let create: CreateFn = Arc::new(|args: &mut ResolvedArgs| {
            let deps = <T::Dependencies as Dependencies>::assemble(args)?;
            Ok(erase(Arc::new(T::create(deps)?)))
        });
        let descriptor = ServiceDescriptor::constructor(
            TypeKey::of::<T>(),
            exposes.into_exposures(),
            requests,
            create,
        );
        self.inner.add_descriptor(descriptor)
    }

    /// Add the factory, decorator and configure operations of a provider bean
    pub fn add_provider<B: ProviderBean>(&self, bean: B) -> Result<()> {
        provider::bind_bean(self, bean)
    }

    /// Register services imperatively
    ///
    /// ```rust
    /// use service_registry::ServiceRegistry;
    ///
    /// struct Port(u16);
    ///
    /// let registry = ServiceRegistry::named("server");
    /// registry
    ///     .register(|registration| registration.add(Port(8080)))
    ///     .unwrap();
    /// assert_eq!(registry.get::<Port>().unwrap().0, 8080);
    /// ```
    pub fn register<F>(&self, configure: F) -> Result<()>
    where
        F: FnOnce(&mut ServiceRegistration) -> Result<()>,
    {
        let _guard = self.inner.begin_registration()?;
        configure(&mut ServiceRegistration::new(self.clone()))
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Locate the single service assignable to `T`
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let request = ServiceRequest::plain::<T>();
        let service = self.inner.resolve(request)?.ok_or_else(|| {
            RegistryError::unknown_service(
                request.key(),
                format!(
                    "No service of type {} available in {}.",
                    request.key(),
                    self.display_name()
                ),
            )
        })?;
        cast::<T>(&service)
    }

    /// Locate every service assignable to `T`: own registrations first in
    /// registration order, then each parent's. Never cached.
    pub fn get_all<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>> {
        self.inner
            .resolve_all(TypeKey::of::<T>())?
            .iter()
            .map(cast::<T>)
            .collect()
    }

    /// Locate the factory producing `T`
    pub fn get_factory<T: ?Sized + 'static>(&self) -> Result<Arc<dyn Factory<T>>> {
        let request = ServiceRequest::factory_of::<T>();
        let service = self.inner.resolve(request)?.ok_or_else(|| {
            RegistryError::unknown_service(
                request.key(),
                format!(
                    "No factory for objects of type {} available in {}.",
                    request.key(),
                    self.display_name()
                ),
            )
        })?;
        cast::<dyn Factory<T>>(&service)
    }

    /// Create a new `T` through its factory
    pub fn new_instance<T: ?Sized + 'static>(&self) -> Result<Arc<T>> {
        Ok(self.get_factory::<T>()?.create())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop every service this registry created or was given, dependents
    /// before their dependencies, then mark the registry closed.
    ///
    /// Every stoppable gets an attempt; failures are reported together. A
    /// second call does nothing.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

fn cast<T: ?Sized + Send + Sync + 'static>(service: &AnyService) -> Result<Arc<T>> {
    downcast::<T>(service).ok_or_else(|| {
        RegistryError::illegal_state(format!(
            "Located service is not of type {}.",
            TypeKey::of::<T>()
        ))
    })
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("id", &self.inner.id)
            .field("display_name", &self.inner.display_name)
            .field("mutable", &self.is_mutable())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl fmt::Display for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.display_name)
    }
}

impl ServiceLookup for ServiceRegistry {
    fn display_name(&self) -> String {
        self.inner.display_name.clone()
    }

    fn get_any(&self, service: TypeKey) -> Result<AnyService> {
        self.inner.resolve(ServiceRequest::Plain(service))?.ok_or_else(|| {
            RegistryError::unknown_service(
                service,
                format!(
                    "No service of type {} available in {}.",
                    service, self.inner.display_name
                ),
            )
        })
    }

    fn get_all_any(&self, service: TypeKey) -> Result<Vec<AnyService>> {
        self.inner.resolve_all(service)
    }

    fn get_factory_any(&self, element: TypeKey) -> Result<AnyService> {
        self.inner.resolve(ServiceRequest::FactoryOf(element))?.ok_or_else(|| {
            RegistryError::unknown_service(
                element,
                format!(
                    "No factory for objects of type {} available in {}.",
                    element, self.inner.display_name
                ),
            )
        })
    }

    fn as_registry(&self) -> Option<&ServiceRegistry> {
        Some(self)
    }
}

// =============================================================================
// WeakRegistry
// =============================================================================

/// A non-owning registry handle, injectable in place of [`ServiceRegistry`]
#[derive(Clone)]
pub struct WeakRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakRegistry {
    /// The registry, unless every strong handle has been dropped
    pub fn upgrade(&self) -> Option<ServiceRegistry> {
        self.inner.upgrade().map(ServiceRegistry::from_inner)
    }
}

impl fmt::Debug for WeakRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRegistry")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

// =============================================================================
// ServiceRegistration
// =============================================================================

/// Registration handle passed to [`ServiceRegistry::register`] callbacks and
/// provider bean configure operations
pub struct ServiceRegistration {
    registry: ServiceRegistry,
}

impl ServiceRegistration {
    pub(crate) fn new(registry: ServiceRegistry) -> Self {
        Self { registry }
    }

    /// Display name of the registry being configured
    pub fn registry_name(&self) -> &str {
        self.registry.display_name()
    }

    pub fn add<T: Send + Sync + 'static>(&mut self, service: T) -> Result<()> {
        self.registry.add(service)
    }

    pub fn add_arc<T: ?Sized + Send + Sync + 'static>(&mut self, service: Arc<T>) -> Result<()> {
        self.registry.add_arc(service)
    }

    pub fn add_exposing<T: Send + Sync + 'static>(&mut self, service: T, exposes: Exposes<T>) -> Result<()> {
        self.registry.add_exposing(service, exposes)
    }

    pub fn add_factory<E, F>(&mut self, factory: F) -> Result<()>
    where
        E: ?Sized + 'static,
        F: Factory<E> + 'static,
    {
        self.registry.add_factory::<E, F>(factory)
    }

    pub fn add_type<T: Service>(&mut self) -> Result<()> {
        self.registry.add_type::<T>()
    }

    pub fn add_type_exposing<T: Service>(&mut self, exposes: Exposes<T>) -> Result<()> {
        self.registry.add_type_exposing(exposes)
    }

    pub fn add_provider<B: ProviderBean>(&mut self, bean: B) -> Result<()> {
        self.registry.add_provider(bean)
    }
}

impl fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("registry", &self.registry.display_name())
            .finish()
    }
}

// =============================================================================
// RegistryBuilder
// =============================================================================

type PendingProvider = Box<dyn FnOnce(&ServiceRegistry) -> Result<()>>;

/// Builder for registries with several parents or initial provider beans
///
/// ```rust
/// use service_registry::ServiceRegistry;
///
/// struct Global(u8);
/// struct Session(u8);
///
/// let global = ServiceRegistry::named("global");
/// global.add(Global(1)).unwrap();
/// let session = ServiceRegistry::named("session");
/// session.add(Session(2)).unwrap();
///
/// let request = ServiceRegistry::builder()
///     .display_name("request")
///     .parent(&session)
///     .parent(&global)
///     .build()
///     .unwrap();
///
/// assert_eq!(request.get::<Global>().unwrap().0, 1);
/// assert_eq!(request.get::<Session>().unwrap().0, 2);
/// ```
#[derive(Default)]
pub struct RegistryBuilder {
    display_name: Option<String>,
    parents: Vec<ParentSource>,
    providers: Vec<PendingProvider>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Add a parent registry; parents are consulted in the order added
    pub fn parent(mut self, parent: &ServiceRegistry) -> Self {
        self.parents.push(ParentSource::Registry(parent.clone()));
        self
    }

    /// Add any lookup as a parent. A lookup that is itself a
    /// [`ServiceRegistry`] is delegated to directly.
    pub fn parent_lookup(mut self, parent: Arc<dyn ServiceLookup>) -> Self {
        self.parents.push(ParentSource::from_lookup(parent));
        self
    }

    /// Add a provider bean once the registry exists
    pub fn provider<B: ProviderBean>(mut self, bean: B) -> Self {
        self.providers
            .push(Box::new(move |registry: &ServiceRegistry| registry.add_provider(bean)));
        self
    }

    /// Build the registry.
    ///
    /// Parents must exist before the registry is built and are fixed from then
    /// on, so registry parents alone can never form a cycle. Cycles through a
    /// late-bound [`ServiceLookup`] are reported when a lookup re-enters them.
    pub fn build(self) -> Result<ServiceRegistry> {
        let id = RegistryId::new();
        let display_name = self
            .display_name
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());

        let registry = ServiceRegistry::create(id, display_name, self.parents);
        for provider in self.providers {
            provider(&registry)?;
        }
        Ok(registry)
    }
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("display_name", &self.display_name)
            .field("parents", &self.parents.len())
            .field("providers", &self.providers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::lifecycle::Stoppable;
    use crate::{All, Producer};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    struct French;

    impl Greeter for French {
        fn greet(&self) -> String {
            "bonjour".into()
        }
    }

    fn greeters() -> (Exposes<English>, Exposes<French>) {
        (
            Exposes::new().service::<dyn Greeter>(|e| e),
            Exposes::new().service::<dyn Greeter>(|f| f),
        )
    }

    fn full_message(err: &RegistryError) -> String {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            message.push_str(" / ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }

    #[derive(Debug)]
    struct Config {
        url: String,
    }

    #[test]
    fn test_fixed_instance_is_identical() {
        let registry = ServiceRegistry::named("test");
        registry
            .add(Config {
                url: "postgres://localhost".into(),
            })
            .unwrap();

        let a = registry.get::<Config>().unwrap();
        let b = registry.get::<Config>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.url, "postgres://localhost");
    }

    #[test]
    fn test_add_arc_trait_object() {
        let registry = ServiceRegistry::named("test");
        let greeter: Arc<dyn Greeter> = Arc::new(English);
        registry.add_arc(Arc::clone(&greeter)).unwrap();

        let found = registry.get::<dyn Greeter>().unwrap();
        assert!(Arc::ptr_eq(&found, &greeter));
    }

    #[test]
    fn test_constructor_runs_once() {
        static CREATED: AtomicU32 = AtomicU32::new(0);

        struct Repository {
            config: Arc<Config>,
        }

        impl Service for Repository {
            type Dependencies = Arc<Config>;

            fn create(config: Arc<Config>) -> std::result::Result<Self, BoxError> {
                CREATED.fetch_add(1, Ordering::SeqCst);
                Ok(Repository { config })
            }
        }

        let registry = ServiceRegistry::named("test");
        registry.add(Config { url: "mem".into() }).unwrap();
        registry.add_type::<Repository>().unwrap();
        assert_eq!(CREATED.load(Ordering::SeqCst), 0);

        for _ in 0..5 {
            assert_eq!(registry.get::<Repository>().unwrap().config.url, "mem");
        }
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_collection_sizes_follow_registrations() {
        struct Plugin(u8);

        for count in [0_u8, 1, 3] {
            let registry = ServiceRegistry::named("plugins");
            for i in 0..count {
                registry.add_arc(Arc::new(Plugin(i))).unwrap();
            }

            let all = registry.get_all::<Plugin>().unwrap();
            assert_eq!(all.len(), usize::from(count));
            let order: Vec<u8> = all.iter().map(|p| p.0).collect();
            assert_eq!(order, (0..count).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_get_all_includes_parents_after_own() {
        let (english, french) = greeters();
        let parent = ServiceRegistry::named("parent");
        parent.add_exposing(English, english).unwrap();
        let child = parent.child("child");
        child.add_exposing(French, french).unwrap();

        let all = child.get_all::<dyn Greeter>().unwrap();
        let words: Vec<String> = all.iter().map(|g| g.greet()).collect();
        assert_eq!(words, vec!["bonjour", "hello"]);
    }

    #[test]
    fn test_ambiguity_names_both_services() {
        let (english, french) = greeters();
        let registry = ServiceRegistry::named("greetings");
        registry.add_exposing(French, french).unwrap();
        registry.add_exposing(English, english).unwrap();

        let err = registry.get::<dyn Greeter>().err().unwrap();
        assert!(matches!(err, RegistryError::Lookup { .. }));
        assert_eq!(
            err.to_string(),
            "Multiple services of type dyn Greeter available in greetings:\n   - Service English\n   - Service French"
        );

        // Each concrete type is still unambiguous
        assert_eq!(registry.get::<English>().unwrap().greet(), "hello");
    }

    #[test]
    fn test_own_registration_shadows_parent() {
        let parent = ServiceRegistry::named("parent");
        parent.add(Config { url: "parent".into() }).unwrap();
        let child = parent.child("child");
        child.add(Config { url: "child".into() }).unwrap();

        assert_eq!(child.get::<Config>().unwrap().url, "child");
        assert_eq!(parent.get::<Config>().unwrap().url, "parent");
    }

    #[test]
    fn test_first_parent_wins() {
        let first = ServiceRegistry::named("first");
        first.add(Config { url: "first".into() }).unwrap();
        let second = ServiceRegistry::named("second");
        second.add(Config { url: "second".into() }).unwrap();

        let child = ServiceRegistry::builder()
            .display_name("child")
            .parent(&first)
            .parent(&second)
            .build()
            .unwrap();

        for _ in 0..3 {
            assert_eq!(child.get::<Config>().unwrap().url, "first");
        }
    }

    #[test]
    fn test_unknown_service() {
        let registry = ServiceRegistry::named("empty");

        let err = registry.get::<Config>().err().unwrap();
        assert!(err.is_unknown_service_for(TypeKey::of::<Config>()));
        assert_eq!(err.to_string(), "No service of type Config available in empty.");

        let err = registry.get_factory::<Config>().err().unwrap();
        assert_eq!(
            err.to_string(),
            "No factory for objects of type Config available in empty."
        );
        assert!(registry.get_all::<Config>().unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_request_shapes() {
        let registry = ServiceRegistry::named("test");

        let err = registry.get::<[u8; 2]>().unwrap_err();
        assert!(matches!(err, RegistryError::Validation { .. }));
        assert!(registry.get_all::<[Config]>().is_err());
        assert!(registry.get::<()>().is_err());
    }

    #[test]
    fn test_freeze_on_first_lookup_even_on_failure() {
        let registry = ServiceRegistry::named("test");
        assert!(registry.is_mutable());

        assert!(registry.get::<Config>().is_err());
        assert!(!registry.is_mutable());

        let err = registry.add(Config { url: "late".into() }).unwrap_err();
        assert!(matches!(err, RegistryError::IllegalState { .. }));
        assert_eq!(
            err.to_string(),
            "Cannot add provider to service registry test as it is no longer mutable."
        );
        assert!(registry.register(|_| Ok(())).is_err());
    }

    #[test]
    fn test_every_lookup_kind_freezes_even_when_rejected() {
        let lookups: [(&str, fn(&ServiceRegistry) -> bool); 6] = [
            ("get_all", |r| r.get_all::<[u8; 2]>().is_err()),
            ("get_factory", |r| r.get_factory::<Config>().is_err()),
            ("new_instance", |r| r.new_instance::<()>().is_err()),
            ("get_any", |r| r.get_any(TypeKey::of::<[u8; 2]>()).is_err()),
            ("get_all_any", |r| r.get_all_any(TypeKey::of::<()>()).is_err()),
            ("get_factory_any", |r| r.get_factory_any(TypeKey::of::<Config>()).is_err()),
        ];

        for (name, lookup) in lookups {
            let registry = ServiceRegistry::named("test");
            assert!(lookup(&registry), "{name} should fail");
            assert!(!registry.is_mutable(), "{name} left the registry mutable");
            assert!(registry.add(7_u32).is_err(), "{name} still accepts registrations");
        }
    }

    #[test]
    fn test_collection_lookup_freezes_without_candidates() {
        let registry = ServiceRegistry::named("test");
        assert!(registry.get_all::<Config>().unwrap().is_empty());
        assert!(!registry.is_mutable());
    }

    #[test]
    fn test_closed_registry_is_reported_before_unsupported_shapes() {
        let registry = ServiceRegistry::named("app");
        registry.close().unwrap();

        let closed = |err: RegistryError| {
            matches!(err, RegistryError::Lookup { .. })
                && err.to_string().ends_with("as app has been closed.")
        };
        assert!(closed(registry.get_all::<[u8; 2]>().err().unwrap()));
        assert!(closed(registry.get::<()>().err().unwrap()));
        assert!(closed(registry.get_factory::<[u8; 2]>().err().unwrap()));
        assert!(closed(registry.get_any(TypeKey::of::<[u8; 2]>()).err().unwrap()));
        assert!(closed(registry.get_all_any(TypeKey::of::<()>()).err().unwrap()));
    }

    #[test]
    fn test_factories() {
        static MADE: AtomicU32 = AtomicU32::new(0);

        struct Ticket(u32);

        let registry = ServiceRegistry::named("tickets");
        registry
            .add_factory::<Ticket, _>(|| Arc::new(Ticket(MADE.fetch_add(1, Ordering::SeqCst))))
            .unwrap();

        let a = registry.new_instance::<Ticket>().unwrap();
        let b = registry.new_instance::<Ticket>().unwrap();
        assert_ne!(a.0, b.0);

        let factory = registry.get_factory::<Ticket>().unwrap();
        let again = registry.get_factory::<Ticket>().unwrap();
        assert!(Arc::ptr_eq(&factory, &again));
    }

    #[test]
    fn test_factory_ambiguity() {
        struct Ticket;

        let registry = ServiceRegistry::named("tickets");
        registry.add_factory::<Ticket, _>(|| Arc::new(Ticket)).unwrap();
        registry.add_factory::<Ticket, _>(|| Arc::new(Ticket)).unwrap();
        registry.add_factory::<Config, _>(|| Arc::new(Config { url: "x".into() })).unwrap();

        let err = registry.get_factory::<Ticket>().err().unwrap();
        assert!(err
            .to_string()
            .starts_with("Multiple factories for objects of type Ticket available in tickets:"));
        assert!(registry.get_factory::<Config>().is_ok());
    }

    #[test]
    fn test_producer_dependency_from_parent_factory() {
        struct Connection(u32);

        struct Pool {
            connections: Producer<Connection>,
        }

        impl Service for Pool {
            type Dependencies = Producer<Connection>;

            fn create(connections: Producer<Connection>) -> std::result::Result<Self, BoxError> {
                Ok(Pool { connections })
            }
        }

        let parent = ServiceRegistry::named("parent");
        parent.add_factory::<Connection, _>(|| Arc::new(Connection(5))).unwrap();
        let child = parent.child("child");
        child.add_type::<Pool>().unwrap();

        let pool = child.get::<Pool>().unwrap();
        assert_eq!(pool.connections.create().0, 5);
    }

    #[test]
    fn test_self_dependency_is_reported() {
        struct Node {
            _next: Arc<Node>,
        }

        impl Service for Node {
            type Dependencies = Arc<Node>;

            fn create(next: Arc<Node>) -> std::result::Result<Self, BoxError> {
                Ok(Node { _next: next })
            }
        }

        let registry = ServiceRegistry::named("graph");
        registry.add_type::<Node>().unwrap();

        let err = registry.get::<Node>().err().unwrap();
        assert!(matches!(err, RegistryError::Creation { .. }));
        let message = full_message(&err);
        assert!(message.contains("parameter #1 of type Node"), "{message}");
        assert!(message.contains("depends on itself"), "{message}");

        // The failed bind is not cached and reverts cleanly
        assert!(registry.get::<Node>().is_err());
    }

    #[test]
    fn test_transitive_self_dependency_is_reported() {
        struct Left(#[allow(dead_code)] Arc<Right>);
        struct Right(#[allow(dead_code)] Arc<Left>);

        impl Service for Left {
            type Dependencies = Arc<Right>;
            fn create(right: Arc<Right>) -> std::result::Result<Self, BoxError> {
                Ok(Left(right))
            }
        }

        impl Service for Right {
            type Dependencies = Arc<Left>;
            fn create(left: Arc<Left>) -> std::result::Result<Self, BoxError> {
                Ok(Right(left))
            }
        }

        let registry = ServiceRegistry::named("graph");
        registry.add_type::<Left>().unwrap();
        registry.add_type::<Right>().unwrap();

        let err = registry.get::<Left>().err().unwrap();
        assert!(full_message(&err).contains("depends on itself"));
    }

    #[test]
    fn test_missing_parameter() {
        struct Needy;

        impl Service for Needy {
            type Dependencies = (Arc<Config>, Arc<String>);
            fn create(_: Self::Dependencies) -> std::result::Result<Self, BoxError> {
                Ok(Needy)
            }
        }

        let registry = ServiceRegistry::named("test");
        registry.add(Config { url: "x".into() }).unwrap();
        registry.add_type::<Needy>().unwrap();

        let err = registry.get::<Needy>().err().unwrap();
        assert_eq!(
            err.to_string(),
            "Cannot create service of type Needy using Needy::create() as required service of type String is not available."
        );
    }

    #[test]
    fn test_failed_creation_is_retried() {
        static ATTEMPTS: AtomicU32 = AtomicU32::new(0);

        struct Flaky;

        impl Service for Flaky {
            type Dependencies = ();
            fn create(_: ()) -> std::result::Result<Self, BoxError> {
                if ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("warming up".into())
                } else {
                    Ok(Flaky)
                }
            }
        }

        let registry = ServiceRegistry::named("test");
        registry.add_type::<Flaky>().unwrap();

        let err = registry.get::<Flaky>().err().unwrap();
        assert_eq!(err.to_string(), "Could not create service of type Flaky.");
        assert!(registry.get::<Flaky>().is_ok());
        assert_eq!(ATTEMPTS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_registry_injection() {
        struct Locator {
            registry: ServiceRegistry,
        }

        impl Service for Locator {
            type Dependencies = ServiceRegistry;
            fn create(registry: ServiceRegistry) -> std::result::Result<Self, BoxError> {
                Ok(Locator { registry })
            }
        }

        let registry = ServiceRegistry::named("test");
        registry.add_type::<Locator>().unwrap();

        let locator = registry.get::<Locator>().unwrap();
        assert_eq!(locator.registry.id(), registry.id());
        registry.close().unwrap();
    }

    #[test]
    fn test_weak_registry_injection_does_not_keep_registry_alive() {
        static DROPPED: AtomicU32 = AtomicU32::new(0);

        struct Locator {
            registry: WeakRegistry,
        }

        impl Service for Locator {
            type Dependencies = WeakRegistry;
            fn create(registry: WeakRegistry) -> std::result::Result<Self, BoxError> {
                Ok(Locator { registry })
            }
        }

        impl Drop for Locator {
            fn drop(&mut self) {
                DROPPED.fetch_add(1, Ordering::SeqCst);
            }
        }

        let registry = ServiceRegistry::named("test");
        registry.add_type::<Locator>().unwrap();

        let locator = registry.get::<Locator>().unwrap();
        let upgraded = locator.registry.upgrade().unwrap();
        assert_eq!(upgraded.id(), registry.id());
        drop(upgraded);

        let weak = locator.registry.clone();
        drop(locator);
        drop(registry);

        assert!(weak.upgrade().is_none());
        assert_eq!(DROPPED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_collection_dependency() {
        struct Chorus {
            voices: All<dyn Greeter>,
        }

        impl Service for Chorus {
            type Dependencies = All<dyn Greeter>;
            fn create(voices: All<dyn Greeter>) -> std::result::Result<Self, BoxError> {
                Ok(Chorus { voices })
            }
        }

        let (english, french) = greeters();
        let registry = ServiceRegistry::named("test");
        registry.add_exposing(English, english).unwrap();
        registry.add_exposing(French, french).unwrap();
        registry.add_type::<Chorus>().unwrap();

        let chorus = registry.get::<Chorus>().unwrap();
        let words: Vec<String> = chorus.voices.iter().map(|g| g.greet()).collect();
        assert_eq!(words, vec!["hello", "bonjour"]);
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Stoppable for Recorder {
        fn stop(&self) -> std::result::Result<(), BoxError> {
            self.log.lock().push(self.name);
            Ok(())
        }
    }

    #[test]
    fn test_close_stops_dependents_first() {
        struct Database(Recorder);
        struct Repository(Recorder, #[allow(dead_code)] Arc<Database>);

        impl Stoppable for Database {
            fn stop(&self) -> std::result::Result<(), BoxError> {
                self.0.stop()
            }
        }

        impl Stoppable for Repository {
            fn stop(&self) -> std::result::Result<(), BoxError> {
                self.0.stop()
            }
        }

        struct Beans {
            log: Arc<Mutex<Vec<&'static str>>>,
        }

        impl ProviderBean for Beans {
            fn provide(methods: &mut crate::ProviderMethods<Self>) {
                methods.operation_exposing(
                    "create_database",
                    Exposes::<Database>::new().stoppable(),
                    |beans: &Beans, ()| {
                        Ok(Arc::new(Database(Recorder {
                            name: "database",
                            log: Arc::clone(&beans.log),
                        })))
                    },
                );
                methods.operation_exposing(
                    "create_repository",
                    Exposes::<Repository>::new().stoppable(),
                    |beans: &Beans, database: Arc<Database>| {
                        Ok(Arc::new(Repository(
                            Recorder {
                                name: "repository",
                                log: Arc::clone(&beans.log),
                            },
                            database,
                        )))
                    },
                );
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ServiceRegistry::named("app");
        registry
            .add_provider(Beans {
                log: Arc::clone(&log),
            })
            .unwrap();

        registry.get::<Repository>().unwrap();
        registry.close().unwrap();

        assert_eq!(*log.lock(), vec!["repository", "database"]);
    }

    #[test]
    fn test_close_aggregates_failures_and_is_idempotent() {
        struct Failing(&'static str, Arc<AtomicU32>);

        impl Stoppable for Failing {
            fn stop(&self) -> std::result::Result<(), BoxError> {
                self.1.fetch_add(1, Ordering::SeqCst);
                Err(format!("{} refused to stop", self.0).into())
            }
        }

        let stops = Arc::new(AtomicU32::new(0));
        let registry = ServiceRegistry::named("app");
        registry
            .add_arc_exposing(
                Arc::new(Failing("first", Arc::clone(&stops))),
                Exposes::new().stoppable(),
            )
            .unwrap();
        registry
            .add_arc_exposing(
                Arc::new(Failing("second", Arc::clone(&stops))),
                Exposes::new().stoppable(),
            )
            .unwrap();

        let err = registry.close().unwrap_err();
        assert_eq!(err.stop_failures().len(), 2);
        assert_eq!(stops.load(Ordering::SeqCst), 2);
        assert!(registry.is_closed());

        registry.close().unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_closed_registry_rejects_everything() {
        let registry = ServiceRegistry::named("app");
        registry.add(Config { url: "x".into() }).unwrap();
        registry.close().unwrap();

        let err = registry.get::<Config>().err().unwrap();
        assert!(matches!(err, RegistryError::Lookup { .. }));
        assert_eq!(
            err.to_string(),
            "Cannot locate service of type Config, as app has been closed."
        );
        assert!(registry.get_all::<Config>().is_err());
        assert!(registry.get_factory::<Config>().is_err());
        assert!(registry.register(|_| Ok(())).is_err());
        assert!(registry.add(Config { url: "y".into() }).is_err());
    }

    #[test]
    fn test_child_never_stops_parent_services() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let parent = ServiceRegistry::named("parent");
        parent
            .add_exposing(
                Recorder {
                    name: "shared",
                    log: Arc::clone(&log),
                },
                Exposes::new().stoppable(),
            )
            .unwrap();

        let child = parent.child("child");
        child.get::<Recorder>().unwrap();
        child.close().unwrap();
        assert!(log.lock().is_empty());

        parent.close().unwrap();
        assert_eq!(*log.lock(), vec!["shared"]);
    }

    #[test]
    fn test_closed_parent_fails_child_lookup() {
        let parent = ServiceRegistry::named("parent");
        parent.add(Config { url: "x".into() }).unwrap();
        let child = parent.child("child");
        parent.close().unwrap();

        let err = child.get::<Config>().err().unwrap();
        assert!(err.to_string().contains("parent has been closed"));
    }

    #[test]
    fn test_external_parent() {
        let backing = ServiceRegistry::named("backing");
        backing.add(Config { url: "external".into() }).unwrap();

        struct Wrapper(ServiceRegistry);

        impl ServiceLookup for Wrapper {
            fn display_name(&self) -> String {
                "wrapper".into()
            }
            fn get_any(&self, service: TypeKey) -> Result<AnyService> {
                self.0.get_any(service)
            }
            fn get_all_any(&self, service: TypeKey) -> Result<Vec<AnyService>> {
                self.0.get_all_any(service)
            }
            fn get_factory_any(&self, element: TypeKey) -> Result<AnyService> {
                self.0.get_factory_any(element)
            }
        }

        let child = ServiceRegistry::builder()
            .display_name("child")
            .parent_lookup(Arc::new(Wrapper(backing)))
            .build()
            .unwrap();

        assert_eq!(child.get::<Config>().unwrap().url, "external");
        assert!(child.get::<String>().err().unwrap().is_unknown_service_for(TypeKey::of::<String>()));
        assert_eq!(child.get_all::<Config>().unwrap().len(), 1);
    }

    #[test]
    fn test_late_bound_cycle_is_reported() {
        use once_cell::sync::OnceCell;

        struct LateBound(Arc<OnceCell<ServiceRegistry>>);

        impl ServiceLookup for LateBound {
            fn display_name(&self) -> String {
                "late bound".into()
            }
            fn get_any(&self, service: TypeKey) -> Result<AnyService> {
                match self.0.get() {
                    Some(registry) => registry.get_any(service),
                    None => Err(RegistryError::unknown_service(service, "unbound")),
                }
            }
            fn get_all_any(&self, service: TypeKey) -> Result<Vec<AnyService>> {
                match self.0.get() {
                    Some(registry) => registry.get_all_any(service),
                    None => Ok(Vec::new()),
                }
            }
            fn get_factory_any(&self, element: TypeKey) -> Result<AnyService> {
                Err(RegistryError::unknown_service(element, "unbound"))
            }
        }

        let slot = Arc::new(OnceCell::new());
        let registry = ServiceRegistry::builder()
            .display_name("loop")
            .parent_lookup(Arc::new(LateBound(Arc::clone(&slot))))
            .build()
            .unwrap();
        let _ = slot.set(registry.clone());

        let err = registry.get::<Config>().err().unwrap();
        assert!(full_message(&err).contains("Cycle detected"), "{}", full_message(&err));
    }

    #[test]
    fn test_concurrent_resolution_creates_once() {
        static CREATED: AtomicU32 = AtomicU32::new(0);

        struct Expensive;

        impl Service for Expensive {
            type Dependencies = ();
            fn create(_: ()) -> std::result::Result<Self, BoxError> {
                CREATED.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(5));
                Ok(Expensive)
            }
        }

        let registry = ServiceRegistry::named("shared");
        registry.add_type::<Expensive>().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get::<Expensive>().unwrap())
            })
            .collect();
        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(CREATED.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_root_view_lists_everything() {
        let registry = ServiceRegistry::named("test");
        registry.add(Config { url: "x".into() }).unwrap();
        registry.add(7_u32).unwrap();

        let all = registry.get_all::<dyn std::any::Any + Send + Sync>().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].downcast_ref::<Arc<Config>>().is_some());
        assert!(all[1].downcast_ref::<Arc<u32>>().is_some());
    }
}
