//! Per-request holder caches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::{downcast, WeakContainer};
use crate::error::{DiError, DiResult};
use crate::singletons::HolderStore;
use crate::token::Token;

/// One active request and the request-scoped instances built for it.
///
/// Created by [`Container::begin_request`](crate::Container::begin_request)
/// and drained by [`Container::end_request`](crate::Container::end_request).
/// Lookups through an ended context fail with
/// [`DiError::RequestContextNotFound`].
///
/// # Examples
///
/// ```
/// use ferrous_locator::{Container, DiError, FactoryContext, Scope, ServiceArgs, Token, DiResult};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> DiResult<()> {
/// let session = Token::<String>::new("Session");
/// let container = Container::new();
/// container.registry().register_factory(&session, Scope::Request, |ctx: FactoryContext, _: ServiceArgs| async move {
///     Ok::<_, DiError>(format!("session for {}", ctx.request_id().unwrap_or("nobody")))
/// });
///
/// let request = container.begin_request("r1")?;
/// let first = request.get(&session).await?;
/// assert_eq!(*first, "session for r1");
/// assert!(Arc::ptr_eq(&first, &request.get(&session).await?));
///
/// container.end_request("r1").await?;
/// assert!(request.get(&session).await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct RequestContext {
    request_id: String,
    priority: i32,
    metadata: Value,
    started_at: Instant,
    active: AtomicBool,
    store: Arc<HolderStore>,
    container: WeakContainer,
}

impl RequestContext {
    pub(crate) fn new(request_id: String, metadata: Value, priority: i32, container: WeakContainer) -> Self {
        Self {
            request_id,
            priority,
            metadata,
            started_at: Instant::now(),
            active: AtomicBool::new(true),
            store: HolderStore::new(),
            container,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Metadata supplied to `begin_request_with`; `Null` when none was given.
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// False once the request has been ended.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Names of the request-scoped holders currently cached, sorted.
    pub fn holder_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.store.holders().into_iter().map(|h| h.name.clone()).collect();
        names.sort();
        names
    }

    /// Resolves `token` with this context as the active request.
    pub async fn get<T: Send + Sync + 'static>(self: &Arc<Self>, token: &Token<T>) -> DiResult<Arc<T>> {
        self.resolve(token, None).await
    }

    /// Like [`get`](Self::get) with explicit arguments.
    pub async fn get_with<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        token: &Token<T>,
        args: Value,
    ) -> DiResult<Arc<T>> {
        self.resolve(token, Some(args)).await
    }

    async fn resolve<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        token: &Token<T>,
        args: Option<Value>,
    ) -> DiResult<Arc<T>> {
        self.ensure_active()?;
        let container = self.container.upgrade_or_err()?;
        let resolved = container
            .resolve_erased(token.core().clone(), args, Some(self.clone()))
            .await?;
        downcast(resolved.instance, &resolved.holder.name)
    }

    /// Ends this request; equivalent to `container.end_request(id)`.
    pub async fn end(&self) -> DiResult<()> {
        let container = self.container.upgrade_or_err()?;
        container.end_request(&self.request_id).await
    }

    pub(crate) fn ensure_active(&self) -> DiResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DiError::RequestContextNotFound(self.request_id.clone()))
        }
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn store(&self) -> &Arc<HolderStore> {
        &self.store
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("priority", &self.priority)
            .field("active", &self.is_active())
            .field("holders", &self.store.len())
            .finish()
    }
}
