//! Lazily resolved dependency handles.

use std::any::Any;
use std::future::IntoFuture;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;

use crate::container::{downcast, RequestContext, WeakContainer};
use crate::error::DiResult;
use crate::holder::InstanceHolder;
use crate::target::AnyArc;
use crate::token::TokenCore;

/// A dependency that is resolved on first use and memoized.
///
/// Obtained from [`FactoryContext::defer`](crate::FactoryContext::defer).
/// The service holding the handle finishes constructing without waiting for
/// the dependency, which is what lets two services refer to each other.
///
/// The handle keeps no strong reference to the container, to the service
/// that created it, or to the resolved instance. The memoized instance is held
/// weakly; once its holder is torn down and every other owner is gone, the
/// next [`get`](Deferred::get) resolves it again through the container. Two
/// services deferring to each other therefore never keep each other alive.
///
/// # Examples
///
/// ```
/// use ferrous_locator::{Container, Deferred, FactoryContext, Injectable, Scope, ServiceArgs, Token, DiResult};
/// use async_trait::async_trait;
///
/// struct Ping { pong: Deferred<Pong> }
/// struct Pong { ping: Deferred<Ping> }
///
/// #[async_trait]
/// impl Injectable for Ping {
///     async fn construct(ctx: &FactoryContext, _: ServiceArgs) -> DiResult<Self> {
///         Ok(Ping { pong: ctx.defer(&Token::of()) })
///     }
/// }
///
/// #[async_trait]
/// impl Injectable for Pong {
///     async fn construct(ctx: &FactoryContext, _: ServiceArgs) -> DiResult<Self> {
///         Ok(Pong { ping: ctx.defer(&Token::of()) })
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> DiResult<()> {
/// let container = Container::new();
/// container.registry().register_class::<Ping>(Scope::Singleton);
/// container.registry().register_class::<Pong>(Scope::Singleton);
///
/// let ping = container.get(&Token::<Ping>::of()).await?;
/// let pong = ping.pong.get().await?;
/// let back = pong.ping.get().await?;
/// assert!(std::sync::Arc::ptr_eq(&ping, &back));
/// # Ok(())
/// # }
/// ```
pub struct Deferred<T> {
    inner: Arc<DeferredInner>,
    _marker: PhantomData<fn() -> T>,
}

struct DeferredInner {
    container: WeakContainer,
    dependent: Weak<InstanceHolder>,
    request: Option<Weak<RequestContext>>,
    core: Arc<TokenCore>,
    args: Option<Value>,
    memo: Mutex<Option<(Weak<dyn Any + Send + Sync>, String)>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("token", &self.inner.core.identity())
            .field("resolved", &self.inner.cached().is_some())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Deferred<T> {
    pub(crate) fn new(
        container: WeakContainer,
        dependent: &Arc<InstanceHolder>,
        request: Option<&Arc<RequestContext>>,
        core: Arc<TokenCore>,
        args: Option<Value>,
    ) -> Self {
        Self {
            inner: Arc::new(DeferredInner {
                container,
                dependent: Arc::downgrade(dependent),
                request: request.map(Arc::downgrade),
                core,
                args,
                memo: Mutex::new(None),
            }),
            _marker: PhantomData,
        }
    }

    /// Resolves the dependency, or returns the memoized instance.
    pub async fn get(&self) -> DiResult<Arc<T>> {
        let (instance, name) = match self.inner.cached() {
            Some(hit) => hit,
            None => self.inner.resolve().await?,
        };
        downcast(instance, &name)
    }

    /// The memoized instance, if [`get`](Self::get) completed and it is still alive.
    pub fn try_get(&self) -> Option<Arc<T>> {
        let (instance, name) = self.inner.cached()?;
        downcast(instance, &name).ok()
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.cached().is_some()
    }
}

impl DeferredInner {
    fn cached(&self) -> Option<(AnyArc, String)> {
        let memo = self.memo.lock();
        let (weak, name) = memo.as_ref()?;
        Some((weak.upgrade()?, name.clone()))
    }

    async fn resolve(&self) -> DiResult<(AnyArc, String)> {
        let container = self.container.upgrade_or_err()?;
        let request = self.request.as_ref().and_then(Weak::upgrade);
        let resolved = container
            .resolve_erased(self.core.clone(), self.args.clone(), request)
            .await?;
        if let Some(dependent) = self.dependent.upgrade() {
            container.track_dependency(&dependent, &resolved.holder);
        }
        let name = resolved.holder.name.clone();
        *self.memo.lock() = Some((Arc::downgrade(&resolved.instance), name.clone()));
        Ok((resolved.instance, name))
    }
}

impl<T: Send + Sync + 'static> IntoFuture for Deferred<T> {
    type Output = DiResult<Arc<T>>;
    type IntoFuture = BoxFuture<'static, DiResult<Arc<T>>>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.get().await }.boxed()
    }
}
