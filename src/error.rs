//! Error types for service registration, resolution and shutdown

use crate::lifecycle::StopFailure;
use crate::request::TypeKey;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by user supplied constructors, operations and stop hooks
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared cause attached to wrapping errors
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur while registering, locating or stopping services
#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    /// Lookup found nothing for the requested type
    #[error("{message}")]
    UnknownService { requested: TypeKey, message: String },

    /// Malformed registration or unsupported request shape
    #[error("{message}")]
    Validation { message: String },

    /// A construction operation failed or had an unsatisfiable parameter
    #[error("{message}")]
    Creation {
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    /// Ambiguous candidates, self-dependency, or resolving against a closed registry
    #[error("{message}")]
    Lookup {
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    /// Mutating a frozen or closed registry
    #[error("{message}")]
    IllegalState { message: String },

    /// One or more services failed to stop during close
    #[error("Failed to stop {} service(s) of {registry}: {}", failures.len(), join_failures(failures))]
    Stop {
        registry: String,
        failures: Vec<StopFailure>,
    },
}

fn join_failures(failures: &[StopFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl RegistryError {
    /// Create an UnknownService error for a requested type
    #[inline]
    pub fn unknown_service(requested: TypeKey, message: impl Into<String>) -> Self {
        Self::UnknownService {
            requested,
            message: message.into(),
        }
    }

    /// Create a Validation error
    #[inline]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a Creation error without an underlying cause
    #[inline]
    pub fn creation(message: impl Into<String>) -> Self {
        Self::Creation {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a Creation error wrapping an underlying cause
    #[inline]
    pub fn creation_caused_by(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Creation {
            message: message.into(),
            cause: Some(Arc::from(cause.into())),
        }
    }

    /// Create a Lookup error
    #[inline]
    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup {
            message: message.into(),
            cause: None,
        }
    }

    /// Create a Lookup error wrapping an underlying cause
    #[inline]
    pub fn lookup_caused_by(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Lookup {
            message: message.into(),
            cause: Some(Arc::from(cause.into())),
        }
    }

    /// Create an IllegalState error
    #[inline]
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Returns the requested type when this is an UnknownService error
    pub fn unknown_type(&self) -> Option<TypeKey> {
        match self {
            Self::UnknownService { requested, .. } => Some(*requested),
            _ => None,
        }
    }

    /// True when this is an UnknownService error for any type
    #[inline]
    pub fn is_unknown_service(&self) -> bool {
        matches!(self, Self::UnknownService { .. })
    }

    /// True when this is an UnknownService error for exactly `requested`
    pub fn is_unknown_service_for(&self, requested: TypeKey) -> bool {
        self.unknown_type() == Some(requested)
    }

    /// Failures collected by `close()`, empty for every other kind
    pub fn stop_failures(&self) -> &[StopFailure] {
        match self {
            Self::Stop { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
