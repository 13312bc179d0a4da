//! # Service Registry - Hierarchical, Type-Directed Service Lookup
//!
//! A registry of services keyed by type, composed into parent/child
//! hierarchies. A child answers from its own registrations first and falls
//! through to its parents in declaration order.
//!
//! ## Features
//!
//! - 🔎 **Typed requests** - ask for one service, every service, or a factory of a type
//! - 🌳 **Hierarchies** - any number of parents, own registrations shadow inherited ones
//! - 🏭 **Lazy singletons** - constructor-backed services are created once, on first lookup
//! - 🧩 **Provider beans** - factory, decorator and configure operations declared in one place
//! - 🛑 **Ordered shutdown** - `close()` stops dependents before the services they use
//! - 📊 **Observable** - optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use service_registry::{BoxError, Service, ServiceRegistry};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! impl Service for UserService {
//!     type Dependencies = Arc<Database>;
//!
//!     fn create(db: Arc<Database>) -> Result<Self, BoxError> {
//!         Ok(UserService { db })
//!     }
//! }
//!
//! let registry = ServiceRegistry::named("application");
//! registry.add(Database { url: "postgres://localhost".into() }).unwrap();
//! registry.add_type::<UserService>().unwrap();
//!
//! // The first lookup freezes the registry and creates UserService
//! let users = registry.get::<UserService>().unwrap();
//! assert_eq!(users.db.url, "postgres://localhost");
//! assert!(!registry.is_mutable());
//! ```
//!
//! ## Request Shapes
//!
//! ```rust
//! use service_registry::ServiceRegistry;
//! use std::sync::Arc;
//!
//! trait Plugin: Send + Sync {}
//!
//! struct Audit;
//! impl Plugin for Audit {}
//!
//! struct Metrics;
//! impl Plugin for Metrics {}
//!
//! struct Ticket(u32);
//!
//! let registry = ServiceRegistry::named("plugins");
//! registry.add_arc::<dyn Plugin>(Arc::new(Audit)).unwrap();
//! registry.add_arc::<dyn Plugin>(Arc::new(Metrics)).unwrap();
//! registry.add_factory::<Ticket, _>(|| Arc::new(Ticket(1))).unwrap();
//!
//! // Every service assignable to a type, in registration order
//! assert_eq!(registry.get_all::<dyn Plugin>().unwrap().len(), 2);
//!
//! // A single lookup is ambiguous here
//! assert!(registry.get::<dyn Plugin>().is_err());
//!
//! // A factory, or one fresh instance from it
//! assert_eq!(registry.new_instance::<Ticket>().unwrap().0, 1);
//! ```
//!
//! ## Hierarchies
//!
//! ```rust
//! use service_registry::ServiceRegistry;
//!
//! struct AppConfig {
//!     name: String,
//! }
//!
//! let global = ServiceRegistry::named("global");
//! global.add(AppConfig { name: "production".into() }).unwrap();
//!
//! let build = global.child("build");
//! assert_eq!(build.get::<AppConfig>().unwrap().name, "production");
//!
//! let test = global.child("test");
//! test.add(AppConfig { name: "test".into() }).unwrap();
//! assert_eq!(test.get::<AppConfig>().unwrap().name, "test");
//! ```
//!
//! ## Concurrency
//!
//! Every registration, lookup and `close()` on one registry serializes on
//! that registry's reentrant lock, so a registry behaves as if single
//! threaded. Lookup strategies are shared by all registries through a
//! concurrent map that is read without any registry lock.

mod composite;
mod dependency;
mod descriptor;
mod error;
mod factory;
mod id;
mod index;
mod lifecycle;
#[cfg(feature = "logging")]
pub mod logging;
mod provider;
mod registry;
mod request;
mod shape;

pub use composite::ServiceLookup;
pub use dependency::{All, Dependencies, Dependency, ResolvedArgs, Service};
pub use descriptor::Exposes;
pub use error::{BoxError, Cause, RegistryError, Result};
pub use factory::{Factory, Producer};
pub use id::RegistryId;
pub use lifecycle::{StopFailure, Stoppable};
pub use provider::{ProviderBean, ProviderMethods};
pub use registry::{RegistryBuilder, ServiceRegistration, ServiceRegistry, WeakRegistry};
pub use request::{downcast, erase, AnyService, ServiceRequest, TypeKey};

#[cfg(feature = "derive")]
pub use service_registry_derive::Service;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        All, BoxError, Exposes, Factory, Producer, ProviderBean, ProviderMethods, RegistryError,
        Result, Service, ServiceLookup, ServiceRegistration, ServiceRegistry, Stoppable,
        WeakRegistry,
    };
    pub use std::sync::Arc;
}
