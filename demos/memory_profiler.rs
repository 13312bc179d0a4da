//! Memory leak profiler
//!
//! Exercises registry creation, resolution, hierarchies and shutdown in a
//! loop so that leaked registries or services show up in a heap profile.
//! Descriptors only hold weak references to their dependents and to their
//! owning registry, so every scenario should return to its starting heap.
//!
//! # Running with dhat (built-in)
//!
//! ```bash
//! cargo run --example memory_profiler --features dhat-heap
//! # Outputs: dhat-heap.json (view at https://nnethercote.github.io/dh_view/dh_view.html)
//! ```
//!
//! # Running with Valgrind (external)
//!
//! ```bash
//! cargo build --example memory_profiler --profile profiling
//! valgrind --leak-check=full --show-leak-kinds=all \
//!     ./target/profiling/examples/memory_profiler
//! ```
//!
//! # Running with LeakSanitizer (requires nightly)
//!
//! ```bash
//! RUSTFLAGS="-Z sanitizer=leak" cargo +nightly run --example memory_profiler --profile sanitizer --target x86_64-unknown-linux-gnu
//! ```

use service_registry::{
    All, BoxError, Exposes, Producer, ProviderBean, ProviderMethods, Service, ServiceRegistry,
    Stoppable,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

static LIVE: AtomicUsize = AtomicUsize::new(0);

/// Counts live instances so leaks are visible without a profiler
struct Tracked;

impl Tracked {
    fn new() -> Self {
        LIVE.fetch_add(1, Ordering::SeqCst);
        Tracked
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        LIVE.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Settings {
    url: String,
    _tracked: Tracked,
}

struct Pool {
    settings: Arc<Settings>,
    _tracked: Tracked,
}

impl Service for Pool {
    type Dependencies = Arc<Settings>;

    fn create(settings: Arc<Settings>) -> Result<Self, BoxError> {
        Ok(Pool {
            settings,
            _tracked: Tracked::new(),
        })
    }
}

impl Stoppable for Pool {
    fn stop(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

trait Listener: Send + Sync {}

struct Audit(#[allow(dead_code)] Tracked);

impl Listener for Audit {}

struct Connection(#[allow(dead_code)] Tracked);

struct Repository {
    pool: Arc<Pool>,
    listeners: All<dyn Listener>,
    connections: Producer<Connection>,
    registry: ServiceRegistry,
}

impl Service for Repository {
    type Dependencies = (Arc<Pool>, All<dyn Listener>, Producer<Connection>, ServiceRegistry);

    fn create(
        (pool, listeners, connections, registry): Self::Dependencies,
    ) -> Result<Self, BoxError> {
        Ok(Repository {
            pool,
            listeners,
            connections,
            registry,
        })
    }
}

struct RequestServices;

impl ProviderBean for RequestServices {
    fn provide(methods: &mut ProviderMethods<Self>) {
        methods.operation("decorate_settings", |_bean, parent: Arc<Settings>| {
            Ok(Arc::new(Settings {
                url: format!("{}?request", parent.url),
                _tracked: Tracked::new(),
            }))
        });
    }
}

fn settings(url: &str) -> Settings {
    Settings {
        url: url.to_string(),
        _tracked: Tracked::new(),
    }
}

fn report(scenario: &str) {
    let live = LIVE.load(Ordering::SeqCst);
    let status = if live == 0 { "ok" } else { "LEAK" };
    println!("  {scenario:<28} live instances: {live:>4}  [{status}]");
}

fn profile_fixed_instances(iterations: usize) {
    for _ in 0..iterations {
        let registry = ServiceRegistry::named("fixed");
        registry.add(settings("postgres://localhost")).unwrap();
        let _ = registry.get::<Settings>().unwrap();
    }
    report("fixed instances");
}

fn profile_constructed(iterations: usize) {
    for _ in 0..iterations {
        let registry = ServiceRegistry::named("constructed");
        registry.add(settings("postgres://localhost")).unwrap();
        registry
            .add_type_exposing(Exposes::<Pool>::new().stoppable())
            .unwrap();
        let pool = registry.get::<Pool>().unwrap();
        assert_eq!(pool.settings.url, "postgres://localhost");
        registry.close().unwrap();
    }
    report("constructed + close");
}

fn profile_full_dependency_graph(iterations: usize) {
    for _ in 0..iterations {
        let registry = ServiceRegistry::named("graph");
        registry.add(settings("postgres://localhost")).unwrap();
        registry.add_type::<Pool>().unwrap();
        registry.add_type::<Repository>().unwrap();
        registry
            .add_arc::<dyn Listener>(Arc::new(Audit(Tracked::new())))
            .unwrap();
        registry
            .add_factory::<Connection, _>(|| Arc::new(Connection(Tracked::new())))
            .unwrap();

        let repository = registry.get::<Repository>().unwrap();
        let _ = repository.connections.create();
        assert_eq!(repository.listeners.len(), 1);
        assert_eq!(repository.registry.id(), registry.id());
        assert!(Arc::ptr_eq(&repository.pool, &registry.get::<Pool>().unwrap()));

        // Repository holds its registry; close() releases the instances
        registry.close().unwrap();
    }
    report("registry self-injection");
}

fn profile_hierarchies(iterations: usize) {
    let global = ServiceRegistry::named("global");
    global.add(settings("postgres://global")).unwrap();

    for _ in 0..iterations {
        let session = global.child("session");
        let request = ServiceRegistry::builder()
            .display_name("request")
            .parent(&session)
            .provider(RequestServices)
            .build()
            .unwrap();
        let decorated = request.get::<Settings>().unwrap();
        assert!(decorated.url.ends_with("?request"));
        request.close().unwrap();
        session.close().unwrap();
    }

    drop(global);
    report("hierarchies + decorators");
}

fn profile_concurrent(iterations: usize) {
    let registry = ServiceRegistry::named("shared");
    registry.add(settings("postgres://localhost")).unwrap();
    registry.add_type::<Pool>().unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..iterations {
                    let _ = registry.get::<Pool>().unwrap();
                    let _ = registry.get_all::<Settings>().unwrap();
                }
            });
        }
    });

    drop(registry);
    report("concurrent resolution");
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    println!("=== Memory profiler for service-registry ===\n");

    let iterations = 1_000;
    profile_fixed_instances(iterations);
    profile_constructed(iterations);
    profile_full_dependency_graph(iterations);
    profile_hierarchies(iterations);
    profile_concurrent(iterations);

    #[cfg(feature = "dhat-heap")]
    {
        println!("\ndhat heap profile written to: dhat-heap.json");
        println!("   View at: https://nnethercote.github.io/dh_view/dh_view.html");
    }

    #[cfg(not(feature = "dhat-heap"))]
    {
        println!("\nTip: Run with --features dhat-heap for detailed heap profiling");
        println!("   cargo run --example memory_profiler --features dhat-heap");
    }
}
