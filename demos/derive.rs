//! Example demonstrating #[derive(Service)]
//!
//! Run with:
//!   cargo run --example derive --features derive

use service_registry::{All, Producer, Service, ServiceRegistry};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[allow(dead_code)]
struct Database {
    url: String,
}

trait AuditSink: Send + Sync {
    fn name(&self) -> &'static str;
}

struct FileAudit;

impl AuditSink for FileAudit {
    fn name(&self) -> &'static str {
        "file"
    }
}

struct SyslogAudit;

impl AuditSink for SyslogAudit {
    fn name(&self) -> &'static str {
        "syslog"
    }
}

struct Session {
    id: u64,
}

#[derive(Service)]
struct UserService {
    #[dep]
    db: Arc<Database>,
    #[dep]
    audit: All<dyn AuditSink>,
    #[dep]
    sessions: Producer<Session>,
    // Non-dep field uses Default
    request_count: AtomicU64,
}

impl UserService {
    fn describe(&self) -> String {
        let sinks: Vec<_> = self.audit.iter().map(|sink| sink.name()).collect();
        format!(
            "UserService on {} auditing to {:?} (requests: {})",
            self.db.url,
            sinks,
            self.request_count.load(Ordering::Relaxed)
        )
    }

    fn login(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.sessions.create().id
    }
}

#[derive(Service)]
struct HealthCheck;

fn main() {
    println!("=== #[derive(Service)] Demo ===\n");

    static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

    let registry = ServiceRegistry::named("users");
    registry
        .add(Database {
            url: "postgres://localhost/users".into(),
        })
        .unwrap();
    registry.add_arc::<dyn AuditSink>(Arc::new(FileAudit)).unwrap();
    registry.add_arc::<dyn AuditSink>(Arc::new(SyslogAudit)).unwrap();
    registry
        .add_factory::<Session, _>(|| {
            Arc::new(Session {
                id: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            })
        })
        .unwrap();
    registry.add_type::<UserService>().unwrap();
    registry.add_type::<HealthCheck>().unwrap();

    let users = registry.get::<UserService>().unwrap();
    println!("{}", users.describe());
    println!("session {}", users.login());
    println!("session {}", users.login());
    println!("{}", users.describe());

    registry.get::<HealthCheck>().unwrap();
    println!("\nHealthCheck has no dependencies and was created too");
}
