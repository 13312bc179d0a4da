//! Lookup strategies, shared by every registry in the process
//!
//! A strategy depends only on the shape of a request, never on a registry,
//! so one table serves the whole process. It is read and written without
//! any registry lock; two threads racing on the first insert compute the
//! same value.

use crate::composite::Provider;
use crate::descriptor::ServiceHandle;
use crate::error::Result;
use crate::request::{ServiceRequest, TypeKey};
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::Lazy;

#[cfg(feature = "logging")]
use tracing::trace;

/// How to ask a provider for a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LookupStrategy {
    /// One service assignable to the type
    Service(TypeKey),
    /// One factory-capable service producing the element type
    Factory(TypeKey),
    /// Every service assignable to the element type, never cached
    Services(TypeKey),
}

static STRATEGIES: Lazy<DashMap<ServiceRequest, LookupStrategy, RandomState>> =
    Lazy::new(|| DashMap::with_capacity_and_hasher_and_shard_amount(64, RandomState::new(), 8));

/// Validate `request` and return its strategy, memoized per request shape.
///
/// Invalid requests are never stored, so they fail on every call.
pub(crate) fn strategy_for(request: ServiceRequest) -> Result<LookupStrategy> {
    if let Some(strategy) = STRATEGIES.get(&request) {
        return Ok(*strategy);
    }

    request.validate()?;
    let strategy = match request {
        ServiceRequest::Plain(key) => LookupStrategy::Service(key),
        ServiceRequest::FactoryOf(element) => LookupStrategy::Factory(element),
        ServiceRequest::CollectionOf(element) => LookupStrategy::Services(element),
    };

    #[cfg(feature = "logging")]
    trace!(
        target: crate::logging::TARGET,
        request = %request,
        strategy = ?strategy,
        "Computed lookup strategy"
    );

    STRATEGIES.insert(request, strategy);
    Ok(strategy)
}

impl LookupStrategy {
    /// Collections always succeed, possibly empty.
    pub(crate) fn find(&self, provider: &dyn Provider) -> Result<Option<ServiceHandle>> {
        match *self {
            Self::Service(key) => provider.get_service(key),
            Self::Factory(element) => provider.get_factory(element),
            Self::Services(element) => {
                let mut members = Vec::new();
                provider.collect(element, &mut members)?;
                Ok(Some(ServiceHandle::Collection(members)))
            }
        }
    }

    /// Whether a located handle for this strategy may be cached per registry
    pub(crate) fn is_cacheable(&self) -> bool {
        !matches!(self, Self::Services(_))
    }
}
