//! Error types for the service locator.

use std::sync::Arc;

use crate::validation::ValidationError;

/// Boxed error type accepted from service authors.
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Service locator errors
///
/// Represents the various error conditions that can occur while resolving,
/// constructing, or tearing down services.
///
/// Errors are `Clone` because a construction failure is captured once inside
/// its instance holder and then delivered to every caller that was waiting on
/// that holder.
///
/// # Examples
///
/// ```rust
/// use ferrous_locator::DiError;
///
/// let not_found = DiError::FactoryNotFound("Clock(1)".to_string());
/// let circular = DiError::CircularDependency(vec!["A(1)".into(), "B(2)".into(), "A(1)".into()]);
///
/// assert_eq!(not_found.to_string(), "No factory registered for Clock(1)");
/// assert_eq!(circular.to_string(), "Circular dependency: A(1) -> B(2) -> A(1)");
/// ```
#[derive(thiserror::Error, Debug, Clone)]
pub enum DiError {
    /// Token has no registered record at any registry level
    #[error("No factory registered for {0}")]
    FactoryNotFound(String),
    /// A factory token's lazy arguments have not been produced yet
    #[error("Arguments of factory token {0} have not been resolved yet")]
    FactoryTokenNotResolved(String),
    /// Scope rule violated, e.g. request scope resolved with no active request
    #[error("Instance {0} not found")]
    InstanceNotFound(String),
    /// Instance is being torn down; retried internally
    #[error("Instance {0} is being destroyed")]
    InstanceDestroying(String),
    /// Instance left the cache while it was being looked up; retried internally
    #[error("Instance {0} expired")]
    InstanceExpired(String),
    /// Synchronous mutual dependency detected (includes path)
    #[error("Circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),
    /// Argument schema rejected the input
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Registered target produced a different type than the token promises
    #[error("Type mismatch for {name}: expected {expected}")]
    TypeMismatch { name: String, expected: &'static str },
    /// A request context with this id is already active
    #[error("Request context {0} already exists")]
    RequestContextExists(String),
    /// No active request context with this id
    #[error("Request context {0} not found")]
    RequestContextNotFound(String),
    /// Synchronous injection hit a dependency that is still settling
    #[error("Dependency {0} is still pending")]
    DependencyPending(String),
    /// Service definition cannot be instantiated as written
    #[error("Invalid service definition: {0}")]
    Definition(String),
    /// Maximum construction nesting exceeded
    #[error("Max depth {0} exceeded")]
    DepthExceeded(usize),
    /// Anything unexpected, including constructor, factory and hook failures
    #[error("{0}")]
    Unknown(Arc<dyn std::error::Error + Send + Sync>),
}

impl DiError {
    /// Wraps an arbitrary error as [`DiError::Unknown`].
    pub fn unknown<E>(error: E) -> Self
    where
        E: Into<DynError>,
    {
        DiError::Unknown(Arc::from(error.into()))
    }

    /// Races the container resolves by waiting and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DiError::InstanceDestroying(_) | DiError::InstanceExpired(_))
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(self, DiError::DependencyPending(_))
    }
}

/// Result type for locator operations
///
/// A convenience alias for `Result<T, DiError>` used throughout the crate.
pub type DiResult<T> = Result<T, DiError>;
