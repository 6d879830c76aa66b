//! Diagnostic observers for resolution and lifecycle events.
//!
//! The locator itself logs through `tracing`; observers are an additional,
//! optional sink for applications that want structured callbacks (metrics,
//! audit trails, test assertions). With no observer registered nothing is
//! called.

use std::sync::Arc;
use std::time::Duration;

use crate::error::DiError;
use crate::scope::Scope;

/// Observer trait for locator events.
///
/// Calls are made synchronously on the resolving task. Keep implementations
/// lightweight.
///
/// # Examples
///
/// ```
/// use ferrous_locator::{Container, ContainerObserver, Scope};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
///
/// #[derive(Default)]
/// struct CountingObserver {
///     resolved: AtomicUsize,
/// }
///
/// impl ContainerObserver for CountingObserver {
///     fn resolved(&self, _name: &str, _scope: Scope, _duration: Duration) {
///         self.resolved.fetch_add(1, Ordering::Relaxed);
///     }
/// }
///
/// let observer = Arc::new(CountingObserver::default());
/// let container = Container::builder().observer(observer.clone()).build();
/// # let _ = container;
/// ```
pub trait ContainerObserver: Send + Sync {
    /// A lookup for `name` started.
    fn resolving(&self, _name: &str) {}

    /// A lookup for `name` produced an instance.
    fn resolved(&self, _name: &str, _scope: Scope, _duration: Duration) {}

    /// A construction of `name` failed; every waiter receives `error`.
    fn creation_failed(&self, _name: &str, _error: &DiError) {}

    /// A holder for `name` was torn down and removed from its cache.
    fn destroyed(&self, _name: &str, _scope: Scope) {}
}

/// Observer that forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl LoggingObserver {
    pub fn new() -> Self {
        Self
    }
}

impl ContainerObserver for LoggingObserver {
    fn resolving(&self, name: &str) {
        tracing::trace!(name = %name, "resolving");
    }

    fn resolved(&self, name: &str, scope: Scope, duration: Duration) {
        tracing::debug!(name = %name, ?scope, ?duration, "resolved");
    }

    fn creation_failed(&self, name: &str, error: &DiError) {
        tracing::warn!(name = %name, %error, "creation failed");
    }

    fn destroyed(&self, name: &str, scope: Scope) {
        tracing::debug!(name = %name, ?scope, "destroyed");
    }
}

/// Registered observers, notified in registration order.
#[derive(Default, Clone)]
pub(crate) struct Observers {
    observers: Vec<Arc<dyn ContainerObserver>>,
}

impl Observers {
    pub(crate) fn push(&mut self, observer: Arc<dyn ContainerObserver>) {
        self.observers.push(observer);
    }

    #[inline]

    pub(crate) fn resolving(&self, name: &str) {
        for o in &self.observers {
            o.resolving(name);
        }
    }

    pub(crate) fn resolved(&self, name: &str, scope: Scope, duration: Duration) {
        for o in &self.observers {
            o.resolved(name, scope, duration);
        }
    }

    pub(crate) fn creation_failed(&self, name: &str, error: &DiError) {
        for o in &self.observers {
            o.creation_failed(name, error);
        }
    }

    pub(crate) fn destroyed(&self, name: &str, scope: Scope) {
        for o in &self.observers {
            o.destroyed(name, scope);
        }
    }
}
