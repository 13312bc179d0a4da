//! Provider beans: factory, decorator and configure operations
//!
//! A provider bean declares its operations explicitly through
//! [`ProviderMethods`]. Each operation is classified by name and shape:
//!
//! - `configure` callbacks run once, eagerly, while the bean is added
//! - `decorate*` and `create*` operations whose only dependency is the type
//!   they return are decorators, and receive that type from the parent chain
//! - any other `create*` operation is a factory, bound and invoked lazily
//!
//! Any other name is rejected before anything is registered.

use crate::composite::AllServices;
use crate::dependency::{Dependencies, Resolved, ResolvedArgs};
use crate::descriptor::{CreateFn, Exposes, Exposure, ServiceDescriptor};
use crate::error::{BoxError, RegistryError, Result};
use crate::registry::{ServiceRegistration, ServiceRegistry};
use crate::request::{erase, AnyService, ServiceRequest, TypeKey};
use crate::shape;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::debug;

type BeanOp<B> = Arc<dyn Fn(&B, &mut ResolvedArgs) -> std::result::Result<AnyService, BoxError> + Send + Sync>;

type ConfigureOp<B> =
    Box<dyn Fn(&B, &mut ServiceRegistration, &mut ResolvedArgs) -> std::result::Result<(), BoxError>>;

/// An object whose operations contribute services to a registry
///
/// ```rust
/// use service_registry::{ProviderBean, ProviderMethods, ServiceRegistry};
/// use std::sync::Arc;
///
/// struct Settings {
///     workers: usize,
/// }
///
/// struct WorkerPool {
///     size: usize,
/// }
///
/// struct PoolServices;
///
/// impl ProviderBean for PoolServices {
///     fn provide(methods: &mut ProviderMethods<Self>) {
///         methods.operation("create_pool", |_bean, settings: Arc<Settings>| {
///             Ok(Arc::new(WorkerPool { size: settings.workers }))
///         });
///     }
/// }
///
/// let registry = ServiceRegistry::named("workers");
/// registry.add(Settings { workers: 4 }).unwrap();
/// registry.add_provider(PoolServices).unwrap();
/// assert_eq!(registry.get::<WorkerPool>().unwrap().size, 4);
/// ```
pub trait ProviderBean: Send + Sync + Sized + 'static {
    /// Declare this bean's operations
    fn provide(methods: &mut ProviderMethods<Self>);
}

enum Operation<B> {
    Produce {
        name: &'static str,
        declared: TypeKey,
        exposures: Vec<Exposure>,
        requests: Vec<ServiceRequest>,
        invoke: BeanOp<B>,
    },
    Configure {
        requests: Vec<ServiceRequest>,
        invoke: ConfigureOp<B>,
    },
}

/// The operations declared by one provider bean
pub struct ProviderMethods<B> {
    operations: Vec<Operation<B>>,
}

impl<B: ProviderBean> ProviderMethods<B> {
    fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    /// Declare an operation producing `T` from the dependencies `D`
    pub fn operation<T, D, F>(&mut self, name: &'static str, op: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        D: Dependencies,
        F: Fn(&B, D) -> std::result::Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        self.operation_exposing(name, Exposes::<T>::new(), op)
    }

    /// Declare an operation producing `T`, located as every type in `exposes`
    pub fn operation_exposing<T, D, F>(&mut self, name: &'static str, exposes: Exposes<T>, op: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        D: Dependencies,
        F: Fn(&B, D) -> std::result::Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        let invoke: BeanOp<B> = Arc::new(move |bean: &B, args: &mut ResolvedArgs| {
            let deps = D::assemble(args)?;
            op(bean, deps).map(erase::<T>)
        });
        self.operations.push(Operation::Produce {
            name,
            declared: TypeKey::of::<T>(),
            exposures: exposes.into_exposures(),
            requests: D::requests(),
            invoke,
        });
        self
    }

    /// Declare a callback run once, while the bean is being added
    pub fn configure<D, F>(&mut self, op: F) -> &mut Self
    where
        D: Dependencies,
        F: Fn(&B, &mut ServiceRegistration, D) -> std::result::Result<(), BoxError> + 'static,
    {
        let invoke: ConfigureOp<B> = Box::new(
            move |bean: &B, registration: &mut ServiceRegistration, args: &mut ResolvedArgs| {
                let deps = D::assemble(args)?;
                op(bean, registration, deps)
            },
        );
        self.operations.push(Operation::Configure {
            requests: D::requests(),
            invoke,
        });
        self
    }
}

impl<B> fmt::Debug for ProviderMethods<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderMethods")
            .field("operations", &self.operations.len())
            .finish()
    }
}

// =============================================================================
// Binding
// =============================================================================

struct Produce<B> {
    origin: String,
    declared: TypeKey,
    exposures: Vec<Exposure>,
    requests: Vec<ServiceRequest>,
    invoke: BeanOp<B>,
}

struct Configure<B> {
    requests: Vec<ServiceRequest>,
    invoke: ConfigureOp<B>,
}

struct Classified<B> {
    decorators: Vec<Produce<B>>,
    factories: Vec<Produce<B>>,
    configurers: Vec<Configure<B>>,
}

fn classify<B>(bean_name: &str, operations: Vec<Operation<B>>) -> Result<Classified<B>> {
    let mut classified = Classified {
        decorators: Vec::new(),
        factories: Vec::new(),
        configurers: Vec::new(),
    };

    for operation in operations {
        match operation {
            Operation::Configure { requests, invoke } => {
                validate_requests(&requests)?;
                classified.configurers.push(Configure { requests, invoke });
            }
            Operation::Produce {
                name,
                declared,
                exposures,
                requests,
                invoke,
            } => {
                validate_requests(&requests)?;
                let decorates = requests.as_slice() == [ServiceRequest::Plain(declared)];
                let produce = Produce {
                    origin: format!("{bean_name}.{name}"),
                    declared,
                    exposures,
                    requests,
                    invoke,
                };

                if name.starts_with("decorate") {
                    if !decorates {
                        return Err(RegistryError::validation(format!(
                            "Cannot use decorator method {bean_name}.{name}() as it must take exactly one parameter of type {declared}."
                        )));
                    }
                    classified.decorators.push(produce);
                } else if name.starts_with("create") {
                    if decorates {
                        classified.decorators.push(produce);
                    } else {
                        classified.factories.push(produce);
                    }
                } else {
                    return Err(RegistryError::validation(format!(
                        "Cannot use method {bean_name}.{name}() as a provider operation; names must start with create or decorate."
                    )));
                }
            }
        }
    }

    Ok(classified)
}

fn validate_requests(requests: &[ServiceRequest]) -> Result<()> {
    for request in requests {
        shape::strategy_for(*request)?;
    }
    Ok(())
}

fn create_fn<B: ProviderBean>(bean: &Arc<B>, invoke: BeanOp<B>) -> CreateFn {
    let bean = Arc::clone(bean);
    Arc::new(move |args: &mut ResolvedArgs| invoke(&bean, args))
}

/// Classify and register every operation of `bean`, then run its configure
/// callbacks
pub(crate) fn bind_bean<B: ProviderBean>(registry: &ServiceRegistry, bean: B) -> Result<()> {
    let bean_name = TypeKey::of::<B>().to_string();
    let mut methods = ProviderMethods::new();
    B::provide(&mut methods);
    let classified = classify(&bean_name, methods.operations)?;

    let inner = registry.inner();
    let _guard = inner.begin_registration()?;

    if inner.parents().is_none() {
        if let Some(decorator) = classified.decorators.first() {
            return Err(RegistryError::validation(format!(
                "Cannot use decorator method {}() when no parent registry is provided.",
                decorator.origin
            )));
        }
    }

    #[cfg(feature = "logging")]
    debug!(
        target: crate::logging::TARGET,
        registry = %inner.display_name(),
        bean = %bean_name,
        decorators = classified.decorators.len(),
        factories = classified.factories.len(),
        configurers = classified.configurers.len(),
        "Adding provider bean"
    );

    let bean = Arc::new(bean);

    for decorator in classified.decorators {
        let create = create_fn(&bean, decorator.invoke);
        inner.add_descriptor(ServiceDescriptor::decorator(
            decorator.declared,
            decorator.exposures,
            decorator.origin,
            create,
        ))?;
    }

    for factory in classified.factories {
        let create = create_fn(&bean, factory.invoke);
        inner.add_descriptor(ServiceDescriptor::factory_method(
            factory.declared,
            factory.exposures,
            factory.origin,
            factory.requests,
            create,
        ))?;
    }

    for configurer in classified.configurers {
        configure(registry, &bean, &bean_name, configurer)?;
    }

    Ok(())
}

/// Resolve a configure callback's dependencies without freezing, then run it
fn configure<B: ProviderBean>(
    registry: &ServiceRegistry,
    bean: &Arc<B>,
    bean_name: &str,
    configurer: Configure<B>,
) -> Result<()> {
    let inner = registry.inner();
    let mut values = Vec::with_capacity(configurer.requests.len());

    for request in configurer.requests {
        if request == ServiceRequest::plain::<ServiceRegistry>() {
            values.push(Resolved::Registry(registry.clone()));
            continue;
        }

        let found = shape::strategy_for(request)?.find(&AllServices::new(inner))?;
        let Some(handle) = found else {
            return Err(RegistryError::creation(format!(
                "Cannot configure services using {bean_name}.configure() as required service of type {request} is not available."
            )));
        };
        values.push(handle.resolve()?);
    }

    let mut registration = ServiceRegistration::new(registry.clone());
    (configurer.invoke)(bean, &mut registration, &mut ResolvedArgs::new(values)).map_err(|cause| {
        RegistryError::creation_caused_by(
            format!("Could not configure services using {bean_name}.configure()."),
            cause,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::All;
    use std::sync::atomic::{AtomicU32, Ordering};

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Plain;

    impl Greeter for Plain {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    struct Shouting(Arc<dyn Greeter>);

    impl Greeter for Shouting {
        fn greet(&self) -> String {
            self.0.greet().to_uppercase()
        }
    }

    struct Decorating;

    impl ProviderBean for Decorating {
        fn provide(methods: &mut ProviderMethods<Self>) {
            methods.operation(
                "decorate_greeter",
                |_bean, inner: Arc<dyn Greeter>| -> std::result::Result<Arc<dyn Greeter>, BoxError> {
                    Ok(Arc::new(Shouting(inner)))
                },
            );
        }
    }

    fn parent_with_greeter() -> ServiceRegistry {
        let parent = ServiceRegistry::named("parent");
        parent.add_arc::<dyn Greeter>(Arc::new(Plain)).unwrap();
        parent
    }

    #[test]
    fn test_factory_operation_with_dependencies() {
        struct Settings(u32);
        struct Pool(u32);

        struct Pools;

        impl ProviderBean for Pools {
            fn provide(methods: &mut ProviderMethods<Self>) {
                methods.operation("create_pool", |_bean, settings: Arc<Settings>| {
                    Ok(Arc::new(Pool(settings.0 * 2)))
                });
            }
        }

        let registry = ServiceRegistry::named("test");
        registry.add(Settings(21)).unwrap();
        registry.add_provider(Pools).unwrap();

        assert_eq!(registry.get::<Pool>().unwrap().0, 42);
    }

    #[test]
    fn test_factory_operation_runs_once() {
        static RUNS: AtomicU32 = AtomicU32::new(0);

        struct Pool;

        struct Repository {
            pool: Arc<Pool>,
        }

        impl crate::Service for Repository {
            type Dependencies = Arc<Pool>;

            fn create(pool: Arc<Pool>) -> std::result::Result<Self, BoxError> {
                Ok(Repository { pool })
            }
        }

        struct Pools;

        impl ProviderBean for Pools {
            fn provide(methods: &mut ProviderMethods<Self>) {
                methods.operation("create_pool", |_bean, ()| {
                    RUNS.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(Pool))
                });
            }
        }

        let registry = ServiceRegistry::named("test");
        registry.add_provider(Pools).unwrap();
        registry.add_type::<Repository>().unwrap();
        assert_eq!(RUNS.load(Ordering::SeqCst), 0);

        let first = registry.get::<Pool>().unwrap();
        let second = registry.get::<Pool>().unwrap();
        let all = registry.get_all::<Pool>().unwrap();
        let repository = registry.get::<Repository>().unwrap();

        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &all[0]));
        assert!(Arc::ptr_eq(&first, &repository.pool));
    }

    #[test]
    fn test_decorator_wraps_parent_service_only_in_child() {
        let parent = parent_with_greeter();
        let child = parent.child("child");
        child.add_provider(Decorating).unwrap();

        assert_eq!(child.get::<dyn Greeter>().unwrap().greet(), "HELLO");
        assert_eq!(parent.get::<dyn Greeter>().unwrap().greet(), "hello");
    }

    #[test]
    fn test_create_with_own_type_is_a_decorator() {
        struct Counter(u32);

        struct Incrementing;

        impl ProviderBean for Incrementing {
            fn provide(methods: &mut ProviderMethods<Self>) {
                methods.operation("create_counter", |_bean, counter: Arc<Counter>| {
                    Ok(Arc::new(Counter(counter.0 + 1)))
                });
            }
        }

        let parent = ServiceRegistry::named("parent");
        parent.add(Counter(1)).unwrap();
        let child = parent.child("child");
        child.add_provider(Incrementing).unwrap();

        assert_eq!(child.get::<Counter>().unwrap().0, 2);
    }

    #[test]
    fn test_decorator_without_parent_is_rejected() {
        let registry = ServiceRegistry::named("root");
        let err = registry.add_provider(Decorating).unwrap_err();

        assert!(matches!(err, RegistryError::Validation { .. }));
        assert_eq!(
            err.to_string(),
            "Cannot use decorator method Decorating.decorate_greeter() when no parent registry is provided."
        );
        assert!(registry.get::<dyn Greeter>().is_err());
    }

    #[test]
    fn test_invalid_operations_register_nothing() {
        struct Settings;

        struct Misnamed;

        impl ProviderBean for Misnamed {
            fn provide(methods: &mut ProviderMethods<Self>) {
                methods.operation("create_settings", |_bean, ()| Ok(Arc::new(Settings)));
                methods.operation("build_settings", |_bean, ()| Ok(Arc::new(Settings)));
            }
        }

        let registry = ServiceRegistry::named("test");
        let err = registry.add_provider(Misnamed).unwrap_err();
        assert!(matches!(err, RegistryError::Validation { .. }));
        assert!(err.to_string().contains("Misnamed.build_settings()"));

        // Nothing from the bean was registered
        assert!(registry.get::<Settings>().is_err());
    }

    #[test]
    fn test_decorate_needs_exactly_its_own_type() {
        struct Greeting(String);

        struct Wrong;

        impl ProviderBean for Wrong {
            fn provide(methods: &mut ProviderMethods<Self>) {
                methods.operation("decorate_greeting", |_bean, (a, _b): (Arc<Greeting>, Arc<u8>)| {
                    Ok(Arc::new(Greeting(a.0.clone())))
                });
            }
        }

        let parent = ServiceRegistry::named("parent");
        let child = parent.child("child");
        let err = child.add_provider(Wrong).unwrap_err();
        assert!(matches!(err, RegistryError::Validation { .. }));
    }

    #[test]
    fn test_configure_runs_once_and_eagerly() {
        static RUNS: AtomicU32 = AtomicU32::new(0);

        struct Port(u16);
        struct Url(String);

        struct Wiring;

        impl ProviderBean for Wiring {
            fn provide(methods: &mut ProviderMethods<Self>) {
                methods.configure(|_bean, registration, port: Arc<Port>| {
                    RUNS.fetch_add(1, Ordering::SeqCst);
                    registration.add(Url(format!("http://localhost:{}", port.0)))?;
                    Ok(())
                });
            }
        }

        let registry = ServiceRegistry::named("test");
        registry.add(Port(8080)).unwrap();
        registry.add_provider(Wiring).unwrap();
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
        assert!(registry.is_mutable());

        assert_eq!(registry.get::<Url>().unwrap().0, "http://localhost:8080");
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_configure_with_missing_service() {
        struct Port;

        struct Wiring;

        impl ProviderBean for Wiring {
            fn provide(methods: &mut ProviderMethods<Self>) {
                methods.configure(|_bean, _registration, _port: Arc<Port>| Ok(()));
            }
        }

        let registry = ServiceRegistry::named("test");
        let err = registry.add_provider(Wiring).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot configure services using Wiring.configure() as required service of type Port is not available."
        );
    }

    #[test]
    fn test_configure_failure_is_wrapped() {
        struct Failing;

        impl ProviderBean for Failing {
            fn provide(methods: &mut ProviderMethods<Self>) {
                methods.configure(|_bean, _registration, ()| Err("no config file".into()));
            }
        }

        let registry = ServiceRegistry::named("test");
        let err = registry.add_provider(Failing).unwrap_err();
        assert_eq!(err.to_string(), "Could not configure services using Failing.configure().");
        assert_eq!(
            std::error::Error::source(&err).map(ToString::to_string),
            Some("no config file".to_string())
        );
    }

    #[test]
    fn test_factory_failure_names_the_operation() {
        struct Socket;

        struct Network;

        impl ProviderBean for Network {
            fn provide(methods: &mut ProviderMethods<Self>) {
                methods.operation("create_socket", |_bean, ()| -> std::result::Result<Arc<Socket>, BoxError> {
                    Err("address in use".into())
                });
            }
        }

        let registry = ServiceRegistry::named("test");
        registry.add_provider(Network).unwrap();

        let err = registry.get::<Socket>().err().unwrap();
        assert_eq!(
            err.to_string(),
            "Could not create service of type Socket using Network.create_socket()."
        );
    }

    #[test]
    fn test_parameter_failure_names_the_index() {
        struct Report;

        struct Reports;

        impl ProviderBean for Reports {
            fn provide(methods: &mut ProviderMethods<Self>) {
                methods.operation(
                    "create_report",
                    |_bean, (_all, _greeter): (All<dyn Greeter>, Arc<dyn Greeter>)| Ok(Arc::new(Report)),
                );
            }
        }

        let registry = ServiceRegistry::named("test");
        registry.add_arc::<dyn Greeter>(Arc::new(Plain)).unwrap();
        registry.add_arc::<dyn Greeter>(Arc::new(Plain)).unwrap();
        registry.add_provider(Reports).unwrap();

        let err = registry.get::<Report>().err().unwrap();
        assert_eq!(
            err.to_string(),
            "Cannot create service of type Report using Reports.create_report() as there is a problem with parameter #2 of type dyn Greeter."
        );
    }

    #[test]
    fn test_factory_receives_owning_registry() {
        struct Handle(String);

        struct Handles;

        impl ProviderBean for Handles {
            fn provide(methods: &mut ProviderMethods<Self>) {
                methods.operation("create_handle", |_bean, registry: ServiceRegistry| {
                    Ok(Arc::new(Handle(registry.display_name().to_string())))
                });
            }
        }

        let parent = ServiceRegistry::named("parent");
        parent.add_provider(Handles).unwrap();
        let child = parent.child("child");

        assert_eq!(child.get::<Handle>().unwrap().0, "parent");
    }

    #[test]
    fn test_frozen_registry_rejects_beans() {
        let parent = parent_with_greeter();
        let child = parent.child("child");
        let _ = child.get::<u8>();
        let err = child.add_provider(Decorating).unwrap_err();
        assert!(matches!(err, RegistryError::IllegalState { .. }));
    }
}
