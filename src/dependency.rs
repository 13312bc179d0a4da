//! Typed dependency declarations
//!
//! Constructors and provider operations declare what they need as a type:
//! `()` for nothing, a single [`Dependency`], or a tuple of them. The
//! declaration yields the ordered [`ServiceRequest`] list the registry binds
//! against, and later assembles the resolved values back into that type.
//!
//! # Supported Dependency Types
//!
//! - `Arc<T>` - a single service assignable to `T`
//! - [`All<T>`] - every service assignable to `T`, in registration order
//! - [`Producer<T>`] - a factory of `T`
//! - [`ServiceRegistry`] - the registry that owns the declaring service. A
//!   service holding it keeps the registry alive until `close()`.
//! - [`WeakRegistry`] - the owning registry without keeping it alive
//!
//! # Example
//!
//! ```rust
//! use service_registry::{All, BoxError, Service, ServiceRegistry};
//! use std::sync::Arc;
//!
//! trait Plugin: Send + Sync {}
//!
//! struct Config;
//!
//! struct Host {
//!     config: Arc<Config>,
//!     plugins: All<dyn Plugin>,
//! }
//!
//! impl Service for Host {
//!     type Dependencies = (Arc<Config>, All<dyn Plugin>);
//!
//!     fn create((config, plugins): Self::Dependencies) -> Result<Self, BoxError> {
//!         Ok(Host { config, plugins })
//!     }
//! }
//!
//! let registry = ServiceRegistry::named("host");
//! registry.add(Config).unwrap();
//! registry.add_type::<Host>().unwrap();
//! assert!(registry.get::<Host>().unwrap().plugins.is_empty());
//! ```

use crate::error::BoxError;
use crate::factory::{Factory, Producer};
use crate::registry::{ServiceRegistry, WeakRegistry};
use crate::request::{downcast, erase, AnyService, ServiceRequest};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

// =============================================================================
// Resolved values
// =============================================================================

/// A value produced by resolving one request
pub(crate) enum Resolved {
    Service(AnyService),
    Services(Vec<AnyService>),
    Registry(ServiceRegistry),
}

/// Resolved dependency values, consumed in declaration order
pub struct ResolvedArgs {
    values: std::vec::IntoIter<Resolved>,
}

impl ResolvedArgs {
    pub(crate) fn new(values: Vec<Resolved>) -> Self {
        Self {
            values: values.into_iter(),
        }
    }

    fn next_value(&mut self) -> Result<Resolved, BoxError> {
        self.values
            .next()
            .ok_or_else(|| BoxError::from("fewer resolved values than declared dependencies"))
    }
}

impl fmt::Debug for ResolvedArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedArgs")
            .field("remaining", &self.values.len())
            .finish()
    }
}

fn mismatch<T: ?Sized>(shape: &str) -> BoxError {
    format!(
        "resolved value does not match dependency {}<{}>",
        shape,
        std::any::type_name::<T>()
    )
    .into()
}

// =============================================================================
// Dependency - a single parameter
// =============================================================================

/// A single injectable parameter
pub trait Dependency: Sized + 'static {
    /// The request this parameter binds to
    fn request() -> ServiceRequest;

    /// Take this parameter's value from the resolved arguments
    fn take(args: &mut ResolvedArgs) -> Result<Self, BoxError>;
}

impl<T: ?Sized + Send + Sync + 'static> Dependency for Arc<T> {
    fn request() -> ServiceRequest {
        ServiceRequest::plain::<T>()
    }

    fn take(args: &mut ResolvedArgs) -> Result<Self, BoxError> {
        let service = match args.next_value()? {
            Resolved::Service(service) => downcast::<T>(&service),
            // `Arc<ServiceRegistry>` binds to the owning registry as well
            Resolved::Registry(registry) => downcast::<T>(&erase(Arc::new(registry))),
            Resolved::Services(_) => None,
        };
        service.ok_or_else(|| mismatch::<T>("Arc"))
    }
}

/// Every service assignable to `T`, in registration order (own services
/// first, then each parent's)
pub struct All<T: ?Sized> {
    services: Vec<Arc<T>>,
}

impl<T: ?Sized> All<T> {
    pub fn new(services: Vec<Arc<T>>) -> Self {
        Self { services }
    }

    pub fn into_vec(self) -> Vec<Arc<T>> {
        self.services
    }
}

impl<T: ?Sized> Deref for All<T> {
    type Target = [Arc<T>];

    fn deref(&self) -> &Self::Target {
        &self.services
    }
}

impl<T: ?Sized> IntoIterator for All<T> {
    type Item = Arc<T>;
    type IntoIter = std::vec::IntoIter<Arc<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.services.into_iter()
    }
}

impl<T: ?Sized> Clone for All<T> {
    fn clone(&self) -> Self {
        Self {
            services: self.services.clone(),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> Dependency for All<T> {
    fn request() -> ServiceRequest {
        ServiceRequest::collection_of::<T>()
    }

    fn take(args: &mut ResolvedArgs) -> Result<Self, BoxError> {
        match args.next_value()? {
            Resolved::Services(services) => services
                .iter()
                .map(downcast::<T>)
                .collect::<Option<Vec<_>>>()
                .map(All::new)
                .ok_or_else(|| mismatch::<T>("All")),
            _ => Err(mismatch::<T>("All")),
        }
    }
}

impl<T: ?Sized + 'static> Dependency for Producer<T> {
    fn request() -> ServiceRequest {
        ServiceRequest::factory_of::<T>()
    }

    fn take(args: &mut ResolvedArgs) -> Result<Self, BoxError> {
        match args.next_value()? {
            Resolved::Service(service) => downcast::<dyn Factory<T>>(&service)
                .map(Producer::new)
                .ok_or_else(|| mismatch::<T>("Producer")),
            _ => Err(mismatch::<T>("Producer")),
        }
    }
}

impl Dependency for ServiceRegistry {
    fn request() -> ServiceRequest {
        ServiceRequest::plain::<ServiceRegistry>()
    }

    fn take(args: &mut ResolvedArgs) -> Result<Self, BoxError> {
        match args.next_value()? {
            Resolved::Registry(registry) => Ok(registry),
            _ => Err(mismatch::<ServiceRegistry>("Registry")),
        }
    }
}

impl Dependency for WeakRegistry {
    fn request() -> ServiceRequest {
        ServiceRequest::plain::<ServiceRegistry>()
    }

    fn take(args: &mut ResolvedArgs) -> Result<Self, BoxError> {
        match args.next_value()? {
            Resolved::Registry(registry) => Ok(registry.downgrade()),
            _ => Err(mismatch::<ServiceRegistry>("WeakRegistry")),
        }
    }
}

// =============================================================================
// Dependencies - a full parameter list
// =============================================================================

/// An ordered parameter list: `()`, a single [`Dependency`], or a tuple of them
pub trait Dependencies: Sized + 'static {
    /// Requests in declaration order
    fn requests() -> Vec<ServiceRequest>;

    /// Assemble the parameter list from resolved values
    fn assemble(args: &mut ResolvedArgs) -> Result<Self, BoxError>;
}

impl Dependencies for () {
    #[inline]
    fn requests() -> Vec<ServiceRequest> {
        Vec::new()
    }

    #[inline]
    fn assemble(_args: &mut ResolvedArgs) -> Result<Self, BoxError> {
        Ok(())
    }
}

macro_rules! impl_dependencies_single {
    ($([$($generics:tt)*] $ty:ty),+ $(,)?) => {
        $(
            impl<$($generics)*> Dependencies for $ty {
                #[inline]
                fn requests() -> Vec<ServiceRequest> {
                    vec![<$ty as Dependency>::request()]
                }

                #[inline]
                fn assemble(args: &mut ResolvedArgs) -> Result<Self, BoxError> {
                    <$ty as Dependency>::take(args)
                }
            }
        )+
    };
}

impl_dependencies_single!(
    [T: ?Sized + Send + Sync + 'static] Arc<T>,
    [T: ?Sized + Send + Sync + 'static] All<T>,
    [T: ?Sized + 'static] Producer<T>,
    [] ServiceRegistry,
    [] WeakRegistry,
);

// Tuple implementations (1-8 elements)
macro_rules! impl_dependencies_tuple {
    ($($T:ident),+) => {
        impl<$($T: Dependency),+> Dependencies for ($($T,)+) {
            #[inline]
            fn requests() -> Vec<ServiceRequest> {
                vec![$($T::request()),+]
            }

            #[inline]
            fn assemble(args: &mut ResolvedArgs) -> Result<Self, BoxError> {
                Ok(($($T::take(args)?,)+))
            }
        }
    };
}

impl_dependencies_tuple!(A);
impl_dependencies_tuple!(A, B);
impl_dependencies_tuple!(A, B, C);
impl_dependencies_tuple!(A, B, C, D);
impl_dependencies_tuple!(A, B, C, D, E);
impl_dependencies_tuple!(A, B, C, D, E, F);
impl_dependencies_tuple!(A, B, C, D, E, F, G);
impl_dependencies_tuple!(A, B, C, D, E, F, G, H);

// =============================================================================
// Service - constructor-backed registrations
// =============================================================================

/// A service built by its own constructor from declared dependencies.
///
/// Each type has exactly one `Service` impl, so there is never a choice of
/// constructor to make. Register with
/// [`ServiceRegistry::add_type`](crate::ServiceRegistry::add_type); the
/// instance is created lazily on first resolution.
pub trait Service: Send + Sync + Sized + 'static {
    /// The dependencies required to create this service.
    ///
    /// Use `()` for no dependencies, a single dependency, or a tuple.
    type Dependencies: Dependencies;

    /// Create a new instance given the resolved dependencies.
    fn create(deps: Self::Dependencies) -> Result<Self, BoxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Plugin: Send + Sync {
        fn id(&self) -> u8;
    }

    struct Numbered(u8);

    impl Plugin for Numbered {
        fn id(&self) -> u8 {
            self.0
        }
    }

    fn plugin(id: u8) -> AnyService {
        erase::<dyn Plugin>(Arc::new(Numbered(id)))
    }

    #[test]
    fn test_tuple_requests_in_declaration_order() {
        let requests = <(Arc<String>, All<dyn Plugin>, Producer<u32>)>::requests();

        assert_eq!(
            requests,
            vec![
                ServiceRequest::plain::<String>(),
                ServiceRequest::collection_of::<dyn Plugin>(),
                ServiceRequest::factory_of::<u32>(),
            ]
        );
        assert!(<()>::requests().is_empty());
    }

    #[test]
    fn test_assemble_tuple() {
        let factory: Arc<dyn Factory<u32>> = Arc::new(|| Arc::new(42_u32));
        let mut args = ResolvedArgs::new(vec![
            Resolved::Service(erase(Arc::new(String::from("config")))),
            Resolved::Services(vec![plugin(1), plugin(2)]),
            Resolved::Service(erase(factory)),
        ]);

        let (config, plugins, producer) =
            <(Arc<String>, All<dyn Plugin>, Producer<u32>)>::assemble(&mut args).unwrap();

        assert_eq!(*config, "config");
        assert_eq!(plugins.iter().map(|p| p.id()).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(*producer.create(), 42);
    }

    #[test]
    fn test_assemble_rejects_wrong_shape() {
        let mut args = ResolvedArgs::new(vec![Resolved::Services(vec![])]);
        assert!(<Arc<String>>::assemble(&mut args).is_err());

        let mut empty = ResolvedArgs::new(vec![]);
        assert!(<(Arc<String>,)>::assemble(&mut empty).is_err());
    }

    #[test]
    fn test_registry_dependency_request() {
        assert_eq!(
            <ServiceRegistry as Dependency>::request(),
            ServiceRequest::plain::<ServiceRegistry>()
        );
    }
}
