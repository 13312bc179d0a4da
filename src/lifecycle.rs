//! Stoppable services and stop failure aggregation

use crate::error::{BoxError, Cause};
use std::fmt;
use std::sync::Arc;

/// A service that holds resources released when its registry closes.
///
/// Register the capability with [`Exposes::stoppable`](crate::Exposes::stoppable).
/// A registry stops a service only if it created or was handed that service
/// itself; services obtained from a parent are left to the parent.
pub trait Stoppable: Send + Sync {
    fn stop(&self) -> Result<(), BoxError>;
}

/// A single failure recorded while closing a registry
#[derive(Clone)]
pub struct StopFailure {
    service: String,
    cause: Cause,
}

impl StopFailure {
    pub fn new(service: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self {
            service: service.into(),
            cause: Arc::from(cause.into()),
        }
    }

    /// Display name of the service whose stop failed
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn cause(&self) -> &Cause {
        &self.cause
    }
}

impl fmt::Debug for StopFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopFailure")
            .field("service", &self.service)
            .field("cause", &self.cause.to_string())
            .finish()
    }
}

impl fmt::Display for StopFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.service, self.cause)
    }
}
