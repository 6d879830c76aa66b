//! Service scope definitions.

use serde::{Deserialize, Serialize};

/// Service scopes controlling instance caching behavior
///
/// Defines where an instance lives once constructed and who shares it.
///
/// # Scope Characteristics
///
/// - **Singleton**: cached in the singleton manager, shared process-wide
/// - **Request**: cached in the active request context, torn down with it
/// - **Transient**: never cached, a new instance for every resolution
///
/// # Examples
///
/// ```rust
/// use ferrous_locator::Scope;
///
/// assert!(Scope::Singleton.is_cached());
/// assert!(Scope::Request.is_cached());
/// assert!(!Scope::Transient.is_cached());
/// assert_eq!(Scope::default(), Scope::Singleton);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Scope {
    /// Single instance per container, cached until invalidated
    ///
    /// Singleton services are created once when first requested and shared
    /// by every caller and every request context.
    #[default]
    Singleton,
    /// Single instance per request context
    ///
    /// Resolving a request-scoped service requires an active request context.
    /// Two resolutions inside one request observe the same instance, different
    /// requests always get distinct instances.
    Request,
    /// New instance per resolution, never cached
    ///
    /// The holder used to build a transient instance is discarded as soon as
    /// construction finishes, so the instance lives only as long as the caller
    /// keeps it.
    Transient,
}

impl Scope {
    /// Whether holders of this scope are kept in a cache.
    pub fn is_cached(self) -> bool {
        !matches!(self, Scope::Transient)
    }
}
