//! Factory context handed to constructors and factories.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;

use super::request::RequestContext;
use super::{downcast, Container};
use crate::deferred::Deferred;
use crate::error::{DiError, DiResult};
use crate::holder::{HolderStatus, InstanceHolder};
use crate::internal::{DestroyBag, Frame};
use crate::naming::instance_name;
use crate::target::AnyArc;
use crate::token::Token;

type Prefetched = Arc<Mutex<HashMap<String, (AnyArc, Arc<InstanceHolder>)>>>;

/// Context passed to constructors and factories for resolving dependencies.
///
/// Every construction gets its own context. Injections made through it are
/// recorded as dependencies of the instance being built, so invalidating a
/// dependency later cascades to it.
///
/// Three injection modes are offered:
///
/// - [`inject`](Self::inject) awaits the dependency. Use it for edges that
///   are not part of a cycle.
/// - [`inject_now`](Self::inject_now) never awaits. If the dependency is not
///   available yet its resolution is scheduled and the constructor is re-run
///   once it settled; propagate its error with `?`.
/// - [`defer`](Self::defer) returns a [`Deferred`] handle that resolves on
///   first use. It is the only mode that may span a dependency cycle.
#[derive(Clone)]
pub struct FactoryContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    container: Container,
    holder: Arc<InstanceHolder>,
    request: Option<Arc<RequestContext>>,
    pending: Mutex<Vec<BoxFuture<'static, DiResult<()>>>>,
    prefetched: Prefetched,
    // registered by the current attempt; handed to the holder only once it succeeds
    listeners: Mutex<DestroyBag>,
}

impl FactoryContext {
    pub(crate) fn new(
        container: Container,
        holder: Arc<InstanceHolder>,
        request: Option<Arc<RequestContext>>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                container,
                holder,
                request,
                pending: Mutex::new(Vec::new()),
                prefetched: Arc::new(Mutex::new(HashMap::new())),
                listeners: Mutex::new(DestroyBag::default()),
            }),
        }
    }

    /// Instance name of the service being constructed.
    pub fn name(&self) -> &str {
        &self.inner.holder.name
    }

    /// Id of the request this construction belongs to, if any.
    ///
    /// Singletons are never tied to a request and always see `None`.
    pub fn request_id(&self) -> Option<&str> {
        self.inner.request.as_ref().map(|r| r.request_id())
    }

    pub fn container(&self) -> &Container {
        &self.inner.container
    }

    /// Resolves a dependency, awaiting its construction.
    ///
    /// Fails with [`DiError::CircularDependency`] when the dependency is
    /// already being constructed further up this resolution chain.
    pub async fn inject<T: Send + Sync + 'static>(&self, token: &Token<T>) -> DiResult<Arc<T>> {
        self.inject_inner(token, None).await
    }

    /// Like [`inject`](Self::inject) with explicit arguments.
    pub async fn inject_with<T: Send + Sync + 'static>(&self, token: &Token<T>, args: Value) -> DiResult<Arc<T>> {
        self.inject_inner(token, Some(args)).await
    }

    async fn inject_inner<T: Send + Sync + 'static>(&self, token: &Token<T>, args: Option<Value>) -> DiResult<Arc<T>> {
        let resolved = self
            .inner
            .container
            .resolve_erased(token.core().clone(), args, self.inner.request.clone())
            .await?;
        self.inner
            .container
            .track_dependency(&self.inner.holder, &resolved.holder);
        downcast(resolved.instance, &resolved.holder.name)
    }

    /// Resolves a dependency without awaiting.
    ///
    /// Returns the instance when it is already available. Otherwise the
    /// resolution is scheduled and `DependencyPending` is returned; the
    /// constructor is then re-run once every scheduled dependency settled,
    /// a bounded number of times.
    pub fn inject_now<T: Send + Sync + 'static>(&self, token: &Token<T>) -> DiResult<Arc<T>> {
        let core = token.core();
        let name = instance_name(&core.identity(), core.resolve_args_now(None)?.as_ref());

        let prefetched = self.inner.prefetched.lock().get(&name).cloned();
        if let Some((instance, holder)) = prefetched {
            self.inner.container.track_dependency(&self.inner.holder, &holder);
            return downcast(instance, &name);
        }

        let container = &self.inner.container;
        if let Some(holder) = container.cached_holder(core.id, &name, self.inner.request.as_ref())? {
            match holder.status() {
                HolderStatus::Created => {
                    if let Some(Ok(instance)) = holder.outcome() {
                        container.track_dependency(&self.inner.holder, &holder);
                        return downcast(instance, &name);
                    }
                }
                HolderStatus::Creating => {
                    if let Some(frame) = Frame::current() {
                        if frame.contains_holder(holder.id) {
                            return Err(DiError::CircularDependency(frame.path_to(&name)));
                        }
                    }
                }
                HolderStatus::Error => {
                    if let Some(Err(err)) = holder.outcome() {
                        return Err(err);
                    }
                }
                HolderStatus::Destroying | HolderStatus::Destroyed => {}
            }
        }

        let resolving = container.resolve_erased(core.clone(), None, self.inner.request.clone());
        let prefetched = self.inner.prefetched.clone();
        let key = name.clone();
        self.inner.pending.lock().push(
            async move {
                let resolved = resolving.await?;
                prefetched.lock().insert(key, (resolved.instance, resolved.holder));
                Ok(())
            }
            .boxed(),
        );
        Err(DiError::DependencyPending(name))
    }

    /// Returns a handle that resolves `token` on first use.
    pub fn defer<T: Send + Sync + 'static>(&self, token: &Token<T>) -> Deferred<T> {
        self.defer_inner(token, None)
    }

    /// Like [`defer`](Self::defer) with explicit arguments.
    pub fn defer_with<T: Send + Sync + 'static>(&self, token: &Token<T>, args: Value) -> Deferred<T> {
        self.defer_inner(token, Some(args))
    }

    fn defer_inner<T: Send + Sync + 'static>(&self, token: &Token<T>, args: Option<Value>) -> Deferred<T> {
        if let Ok(resolved_args) = token.core().resolve_args_now(args.clone()) {
            let name = instance_name(&token.identity(), resolved_args.as_ref());
            self.inner.container.note_dependency(&self.inner.holder, &name);
        }
        Deferred::new(
            self.inner.container.downgrade(),
            &self.inner.holder,
            self.inner.request.as_ref(),
            token.core().clone(),
            args,
        )
    }

    /// Registers a callback run when the instance is invalidated.
    ///
    /// Listeners registered by an attempt that is re-run or fails are dropped
    /// without running.
    pub fn add_destroy_listener<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.listeners.lock().push_sync(Box::new(listener));
    }

    /// Registers an async callback run when the instance is invalidated.
    ///
    /// Async callbacks run before sync ones, each group in reverse
    /// registration order.
    pub fn add_async_destroy_listener<F, Fut>(&self, listener: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.listeners.lock().push_async(listener);
    }

    /// Destroy listeners registered since the last call.
    pub(crate) fn take_listeners(&self) -> DestroyBag {
        std::mem::take(&mut *self.inner.listeners.lock())
    }

    pub(crate) fn take_pending(&self) -> Vec<BoxFuture<'static, DiResult<()>>> {
        std::mem::take(&mut *self.inner.pending.lock())
    }
}

impl std::fmt::Debug for FactoryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryContext")
            .field("name", &self.name())
            .field("request_id", &self.request_id())
            .field("pending", &self.inner.pending.lock().len())
            .finish()
    }
}
