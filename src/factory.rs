//! The factory abstraction
//!
//! A [`Factory<T>`] produces a fresh `T` each time it is asked. Factories are
//! ordinary services: they are registered with a `factory_of` exposure and
//! located through `get_factory::<T>()` or a [`Producer<T>`] dependency.

use std::fmt;
use std::sync::Arc;

/// Produces new instances of `T`
pub trait Factory<T: ?Sized>: Send + Sync {
    /// Create a new instance
    fn create(&self) -> Arc<T>;
}

impl<T, F> Factory<T> for F
where
    T: ?Sized,
    F: Fn() -> Arc<T> + Send + Sync,
{
    #[inline]
    fn create(&self) -> Arc<T> {
        self()
    }
}

// =============================================================================
// Producer
// =============================================================================

/// A resolved factory of `T`, injectable as a dependency.
///
/// ```rust
/// use service_registry::{Producer, ServiceRegistry};
/// use std::sync::Arc;
///
/// struct Ticket(u32);
///
/// let registry = ServiceRegistry::named("tickets");
/// registry.add_factory::<Ticket, _>(|| Arc::new(Ticket(7))).unwrap();
///
/// let producer = Producer::new(registry.get_factory::<Ticket>().unwrap());
/// assert_eq!(producer.create().0, 7);
/// ```
pub struct Producer<T: ?Sized + 'static> {
    factory: Arc<dyn Factory<T>>,
}

impl<T: ?Sized + 'static> Producer<T> {
    #[inline]
    pub fn new(factory: Arc<dyn Factory<T>>) -> Self {
        Self { factory }
    }

    /// Create a new instance through the underlying factory
    #[inline]
    pub fn create(&self) -> Arc<T> {
        self.factory.create()
    }

    /// The underlying factory
    #[inline]
    pub fn factory(&self) -> &Arc<dyn Factory<T>> {
        &self.factory
    }
}

impl<T: ?Sized + 'static> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("element", &std::any::type_name::<T>())
            .finish()
    }
}
