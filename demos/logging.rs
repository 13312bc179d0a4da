//! Example demonstrating logging output
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use service_registry::{BoxError, Exposes, Service, ServiceRegistry, Stoppable};
use std::sync::Arc;

#[allow(dead_code)]
struct Database {
    url: String,
}

impl Stoppable for Database {
    fn stop(&self) -> Result<(), BoxError> {
        println!("  [App] Database connection closed");
        Ok(())
    }
}

#[allow(dead_code)]
struct UserService {
    db: Arc<Database>,
}

impl Service for UserService {
    type Dependencies = Arc<Database>;

    fn create(db: Arc<Database>) -> Result<Self, BoxError> {
        println!("  [App] UserService being created...");
        Ok(UserService { db })
    }
}

#[allow(dead_code)]
struct RequestContext {
    request_id: String,
}

fn main() -> Result<(), BoxError> {
    // JSON if logging-json is enabled, pretty otherwise
    service_registry::logging::builder()
        .trace()
        .registry_only()
        .from_env()
        .init();

    println!("=== Service Registry Logging Demo ===\n");

    // logs: "Creating service registry"
    let global = ServiceRegistry::named("global");

    // logs: "Registering service"
    global.add_exposing(
        Database {
            url: "postgres://localhost/mydb".into(),
        },
        Exposes::new().stoppable(),
    )?;
    global.add_type::<UserService>()?;

    // logs: "Registry is no longer mutable", "Created service instance"
    let _users = global.get::<UserService>()?;

    // logs: "Resolution cache hit"
    let _users_again = global.get::<UserService>()?;

    // A miss is an ordinary outcome, not a failure in the log
    assert!(global.get::<i32>().is_err());

    // logs: "Delegating service lookup to parents"
    let request = global.child("request");
    request.add(RequestContext {
        request_id: "req-12345".into(),
    })?;
    let _ctx = request.get::<RequestContext>()?;
    let _db_from_parent = request.get::<Database>()?;

    // logs: "Closing registry"
    request.close()?;
    global.close()?;

    println!("\n=== Demo Complete ===");
    println!("\nTip: Use --features logging-json for production (JSON output)");
    println!("     Use --features logging-pretty for development (colorful output)");
    println!("     Set RUST_LOG=service_registry=debug to hide TRACE events");
    Ok(())
}
