//! Type keys, request variants and type-erased service values
//!
//! Every service crosses the registry as an [`AnyService`]: an
//! `Arc<dyn Any + Send + Sync>` whose payload is always the `Arc<T>` for the
//! view type `T` that was asked for. Storing the `Arc<T>` rather than `T`
//! lets the same machinery carry sized types and trait objects alike.

use crate::error::{RegistryError, Result};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A type-erased service value wrapping an `Arc<T>`
pub type AnyService = Arc<dyn Any + Send + Sync>;

/// Erase a typed service into an [`AnyService`]
#[inline]
pub fn erase<T: ?Sized + Send + Sync + 'static>(service: Arc<T>) -> AnyService {
    Arc::new(service)
}

/// Recover the typed service from an [`AnyService`] produced by [`erase`]
#[inline]
pub fn downcast<T: ?Sized + Send + Sync + 'static>(service: &AnyService) -> Option<Arc<T>> {
    service.downcast_ref::<Arc<T>>().cloned()
}

// =============================================================================
// TypeKey
// =============================================================================

/// Identity of a requested or exposed type.
///
/// Equality and hashing use the `TypeId` only; the name is carried for
/// diagnostics and rendered without module paths.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key for `T`, which may be a trait object such as `dyn Logger`
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Key of the catch-all bucket every registration is indexed under
    #[inline]
    pub fn root() -> Self {
        Self::of::<dyn Any + Send + Sync>()
    }

    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name with module paths stripped (`dyn app::Logger` becomes `dyn Logger`)
    pub fn short_name(&self) -> String {
        let mut out = String::with_capacity(self.name.len());
        let mut segment = String::new();
        for ch in self.name.chars() {
            if ch.is_alphanumeric() || ch == '_' || ch == ':' {
                segment.push(ch);
            } else {
                out.push_str(last_path_segment(&segment));
                segment.clear();
                out.push(ch);
            }
        }
        out.push_str(last_path_segment(&segment));
        out
    }
}

fn last_path_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

// =============================================================================
// ServiceRequest
// =============================================================================

/// The shape of a lookup: one service, a factory of services, or every service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceRequest {
    /// A single service assignable to the type
    Plain(TypeKey),
    /// A factory producing the element type
    FactoryOf(TypeKey),
    /// Every service assignable to the element type
    CollectionOf(TypeKey),
}

impl ServiceRequest {
    #[inline]
    pub fn plain<T: ?Sized + 'static>() -> Self {
        Self::Plain(TypeKey::of::<T>())
    }

    #[inline]
    pub fn factory_of<T: ?Sized + 'static>() -> Self {
        Self::FactoryOf(TypeKey::of::<T>())
    }

    #[inline]
    pub fn collection_of<T: ?Sized + 'static>() -> Self {
        Self::CollectionOf(TypeKey::of::<T>())
    }

    /// The type being requested, or the element type for factories and collections
    #[inline]
    pub fn key(&self) -> TypeKey {
        match self {
            Self::Plain(key) | Self::FactoryOf(key) | Self::CollectionOf(key) => *key,
        }
    }

    /// Reject request shapes that can never name a service
    pub fn validate(&self) -> Result<()> {
        let name = self.key().name();
        if name.starts_with('[') {
            return Err(RegistryError::validation(
                "Locating services with array type is not supported.",
            ));
        }
        if name == "()" {
            return Err(RegistryError::validation(
                "Locating services with unit type is not supported.",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ServiceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(key) => write!(f, "{key}"),
            Self::FactoryOf(key) => write!(f, "Factory<{key}>"),
            Self::CollectionOf(key) => write!(f, "All<{key}>"),
        }
    }
}
