//! A build-tool style registry hierarchy
//!
//! A global registry holds process-wide services, each build session gets a
//! child, and each project gets a child of the session. A provider bean in the
//! project registry decorates the session's compiler, and closing the project
//! stops only what the project created.
//!
//! Run with:
//!   cargo run --example hierarchy

use service_registry::{
    BoxError, Exposes, ProviderBean, ProviderMethods, ServiceRegistration, ServiceRegistry,
    Stoppable,
};
use std::sync::Arc;

trait Compiler: Send + Sync {
    fn compile(&self, source: &str) -> String;
}

struct Rustc;

impl Compiler for Rustc {
    fn compile(&self, source: &str) -> String {
        format!("rustc({source})")
    }
}

struct Cached {
    inner: Arc<dyn Compiler>,
}

impl Compiler for Cached {
    fn compile(&self, source: &str) -> String {
        format!("cached({})", self.inner.compile(source))
    }
}

struct FileWatcher {
    root: String,
}

impl Stoppable for FileWatcher {
    fn stop(&self) -> Result<(), BoxError> {
        println!("  stopped watcher for {}", self.root);
        Ok(())
    }
}

struct ProjectDir(String);

struct ProjectServices;

impl ProviderBean for ProjectServices {
    fn provide(methods: &mut ProviderMethods<Self>) {
        methods
            .operation(
                "decorate_compiler",
                |_bean, inner: Arc<dyn Compiler>| -> Result<Arc<dyn Compiler>, BoxError> {
                    Ok(Arc::new(Cached { inner }))
                },
            )
            .operation_exposing(
                "create_watcher",
                Exposes::<FileWatcher>::new().stoppable(),
                |_bean, dir: Arc<ProjectDir>| {
                    Ok(Arc::new(FileWatcher {
                        root: dir.0.clone(),
                    }))
                },
            )
            .configure(|_bean, registration: &mut ServiceRegistration, ()| {
                println!("  configuring {}", registration.registry_name());
                registration.add(ProjectDir("/work/app".into()))?;
                Ok(())
            });
    }
}

fn main() -> Result<(), BoxError> {
    println!("=== Registry Hierarchy Demo ===\n");

    let global = ServiceRegistry::named("global services");
    let session = global.child("build session services");
    session.add_arc::<dyn Compiler>(Arc::new(Rustc))?;

    let project = ServiceRegistry::builder()
        .display_name("project :app services")
        .parent(&session)
        .provider(ProjectServices)
        .build()?;

    let compiler = project.get::<dyn Compiler>()?;
    println!("project compiles: {}", compiler.compile("main.rs"));
    println!(
        "session compiles: {}",
        session.get::<dyn Compiler>()?.compile("main.rs")
    );

    project.get::<FileWatcher>()?;

    match project.get::<String>() {
        Ok(_) => unreachable!(),
        Err(e) => println!("\nexpected miss: {e}"),
    }

    println!("\nclosing {}", project.display_name());
    project.close()?;
    session.close()?;
    global.close()?;

    println!("\n=== Demo Complete ===");
    Ok(())
}
