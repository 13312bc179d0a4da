#![no_main]

//! Fuzz target for a single registry's lifecycle
//!
//! Interleaves registrations, lookups and close() and checks the freeze
//! latch, lazy creation counts and stop-exactly-once.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use service_registry::{BoxError, Exposes, RegistryError, Service, ServiceRegistry, Stoppable};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

static CREATED: AtomicU32 = AtomicU32::new(0);
static STOPPED: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Arbitrary)]
struct Value(u32);

struct Lazy;

impl Service for Lazy {
    type Dependencies = Arc<Value>;

    fn create(_value: Arc<Value>) -> Result<Self, BoxError> {
        CREATED.fetch_add(1, Ordering::SeqCst);
        Ok(Lazy)
    }
}

impl Stoppable for Lazy {
    fn stop(&self) -> Result<(), BoxError> {
        STOPPED.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Ticket;

#[derive(Debug, Arbitrary)]
enum LifecycleOp {
    AddValue(Value),
    AddLazy,
    AddFactory,
    GetValue,
    GetLazy,
    GetAllValues,
    NewTicket,
    Close,
}

fuzz_target!(|ops: Vec<LifecycleOp>| {
    CREATED.store(0, Ordering::SeqCst);
    STOPPED.store(0, Ordering::SeqCst);

    let registry = ServiceRegistry::named("fuzz");
    let mut values = 0_usize;
    let mut lazies = 0_usize;
    let mut frozen = false;
    let mut closed = false;

    for op in ops.into_iter().take(64) {
        match op {
            LifecycleOp::AddValue(value) => {
                let result = registry.add(value);
                assert_eq!(result.is_ok(), !frozen && !closed);
                if result.is_ok() {
                    values += 1;
                }
            }
            LifecycleOp::AddLazy => {
                let result = registry.add_type_exposing(Exposes::<Lazy>::new().stoppable());
                if let Err(e) = &result {
                    assert!(matches!(e, RegistryError::IllegalState { .. }));
                } else {
                    lazies += 1;
                }
            }
            LifecycleOp::AddFactory => {
                let _ = registry.add_factory::<Ticket, _>(|| Arc::new(Ticket));
            }
            LifecycleOp::GetValue => {
                let result = registry.get::<Value>();
                frozen = true;
                if !closed {
                    assert_eq!(result.is_ok(), values == 1);
                }
            }
            LifecycleOp::GetLazy => {
                let result = registry.get::<Lazy>();
                frozen = true;
                if !closed && lazies == 1 && values == 1 {
                    assert!(result.is_ok());
                }
            }
            LifecycleOp::GetAllValues => {
                let result = registry.get_all::<Value>();
                frozen = true;
                match result {
                    Ok(all) => assert_eq!(all.len(), values),
                    Err(_) => assert!(closed),
                }
            }
            LifecycleOp::NewTicket => {
                let _ = registry.new_instance::<Ticket>();
                frozen = true;
            }
            LifecycleOp::Close => {
                let _ = registry.close();
                closed = true;
            }
        }

        assert_eq!(registry.is_mutable(), !frozen);
        assert_eq!(registry.is_closed(), closed);
        // Lazy services are created at most once
        assert!(CREATED.load(Ordering::SeqCst) <= 1);
    }

    let _ = registry.close();
    assert_eq!(STOPPED.load(Ordering::SeqCst), CREATED.load(Ordering::SeqCst));
});
