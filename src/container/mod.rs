//! The container façade.
//!
//! [`Container`] ties the registry, the holder caches, the event bus and the
//! instantiator together. Every lookup, whether it comes from application
//! code, a [`FactoryContext`] or a [`Deferred`](crate::Deferred) handle, goes
//! through [`Container::resolve_erased`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;

use crate::config::ContainerConfig;
use crate::error::{DiError, DiResult};
use crate::event_bus::{EventBus, LifecycleEvent};
use crate::holder::{HolderSnapshot, HolderStatus, InstanceHolder, Origin};
use crate::instantiator::ServiceInstantiator;
use crate::internal::{Frame, WaitGraph};
use crate::naming::instance_name;
use crate::observer::{ContainerObserver, Observers};
use crate::registry::{FactoryRecord, Registry};
use crate::scope::Scope;
use crate::singletons::{SingletonManager, Slot};
use crate::target::AnyArc;
use crate::token::{Token, TokenCore, TokenId};
use crate::validation::ServiceArgs;

mod context;
mod invalidator;
mod request;

pub use context::FactoryContext;
pub use request::RequestContext;

/// Async service container.
///
/// Cloning is cheap; clones share every cache.
///
/// # Examples
///
/// ```
/// use ferrous_locator::{Container, DiError, FactoryContext, Scope, ServiceArgs, Token, DiResult};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> DiResult<()> {
/// let counter = Token::<std::sync::atomic::AtomicU32>::new("Counter");
/// let container = Container::new();
/// container.registry().register_factory(&counter, Scope::Singleton, |_: FactoryContext, _: ServiceArgs| async {
///     Ok::<_, DiError>(std::sync::atomic::AtomicU32::new(0))
/// });
///
/// let a = container.get(&counter).await?;
/// let b = container.get(&counter).await?;
/// assert!(Arc::ptr_eq(&a, &b));
///
/// container.invalidate(&counter.instance_name_now()?).await;
/// let c = container.get(&counter).await?;
/// assert!(!Arc::ptr_eq(&a, &c));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

pub(crate) struct ContainerInner {
    registry: Arc<Registry>,
    config: ContainerConfig,
    singletons: SingletonManager,
    requests: RwLock<RequestMap>,
    bus: EventBus,
    waits: Arc<WaitGraph>,
    instantiator: ServiceInstantiator,
    observers: Observers,
}

#[derive(Default)]
struct RequestMap {
    active: HashMap<String, Arc<RequestContext>>,
    // begin order, for falling back to the latest active request
    order: Vec<String>,
    current: Option<String>,
}

/// A resolved instance together with the holder that owns it.
pub(crate) struct Resolved {
    pub(crate) instance: AnyArc,
    pub(crate) holder: Arc<InstanceHolder>,
}

/// Non-owning handle used by callbacks and handles stored inside instances.
#[derive(Clone)]
pub(crate) struct WeakContainer(Weak<ContainerInner>);

impl WeakContainer {
    pub(crate) fn upgrade(&self) -> Option<Container> {
        self.0.upgrade().map(|inner| Container { inner })
    }

    pub(crate) fn upgrade_or_err(&self) -> DiResult<Container> {
        self.upgrade()
            .ok_or_else(|| DiError::unknown("container has been dropped"))
    }
}

pub(crate) fn downcast<T: Send + Sync + 'static>(instance: AnyArc, name: &str) -> DiResult<Arc<T>> {
    instance.downcast::<T>().map_err(|_| DiError::TypeMismatch {
        name: name.to_string(),
        expected: std::any::type_name::<T>(),
    })
}

/// Builder for [`Container`].
#[derive(Default)]
pub struct ContainerBuilder {
    registry: Option<Arc<Registry>>,
    config: ContainerConfig,
    observers: Observers,
}

impl ContainerBuilder {
    /// Uses `registry` instead of a fresh one.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds an observer; observers are notified in the order they were added.
    pub fn observer<O: ContainerObserver + 'static>(mut self, observer: Arc<O>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Container {
        let registry = self.registry.unwrap_or_else(|| Arc::new(Registry::new()));
        Container {
            inner: Arc::new(ContainerInner {
                registry,
                instantiator: ServiceInstantiator::new(self.config.max_init_retries),
                config: self.config,
                singletons: SingletonManager::new(),
                requests: RwLock::new(RequestMap::default()),
                bus: EventBus::new(),
                waits: Arc::new(WaitGraph::default()),
                observers: self.observers,
            }),
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    /// Container over a fresh registry with default configuration.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::default()
    }

    /// Container over an existing, possibly shared, registry.
    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self::builder().registry(registry).build()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    /// The bus on which `Create` and `Destroy` events are published per instance name.
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn singletons(&self) -> &SingletonManager {
        &self.inner.singletons
    }

    pub fn is_registered<T>(&self, token: &Token<T>) -> bool {
        self.inner.registry.has(token)
    }

    pub(crate) fn downgrade(&self) -> WeakContainer {
        WeakContainer(Arc::downgrade(&self.inner))
    }

    /// Resolves `token` in the current request, constructing it if needed.
    pub async fn get<T: Send + Sync + 'static>(&self, token: &Token<T>) -> DiResult<Arc<T>> {
        self.get_inner(token, None).await
    }

    /// Like [`get`](Self::get) with explicit arguments.
    ///
    /// Arguments are validated by the token's schema and extend the instance
    /// name, so different arguments yield different cached instances.
    pub async fn get_with<T: Send + Sync + 'static>(&self, token: &Token<T>, args: Value) -> DiResult<Arc<T>> {
        self.get_inner(token, Some(args)).await
    }

    /// Like [`get`](Self::get) but panics on failure.
    ///
    /// # Panics
    ///
    /// Panics with the resolution error.
    pub async fn get_required<T: Send + Sync + 'static>(&self, token: &Token<T>) -> Arc<T> {
        match self.get(token).await {
            Ok(instance) => instance,
            Err(err) => panic!("failed to resolve {}: {}", token.identity(), err),
        }
    }

    async fn get_inner<T: Send + Sync + 'static>(&self, token: &Token<T>, args: Option<Value>) -> DiResult<Arc<T>> {
        let resolved = self
            .resolve_erased(token.core().clone(), args, self.current_request())
            .await?;
        downcast(resolved.instance, &resolved.holder.name)
    }

    /// The already-constructed instance for `token`, without triggering construction.
    ///
    /// Returns `None` when the instance is absent, still being constructed,
    /// failed, or when the token's arguments cannot be computed without awaiting.
    pub fn try_get_sync<T: Send + Sync + 'static>(&self, token: &Token<T>) -> Option<Arc<T>> {
        let name = token.instance_name_now().ok()?;
        let request = self.current_request();
        let holder = self.cached_holder(token.id(), &name, request.as_ref()).ok()??;
        let instance = holder.outcome()?.ok()?;
        downcast(instance, &name).ok()
    }

    /// Cached holder for `name` in the store its record's scope selects.
    pub(crate) fn cached_holder(
        &self,
        id: TokenId,
        name: &str,
        request: Option<&Arc<RequestContext>>,
    ) -> DiResult<Option<Arc<InstanceHolder>>> {
        let record = self
            .inner
            .registry
            .get_by_id(id)
            .ok_or_else(|| DiError::FactoryNotFound(name.to_string()))?;
        Ok(match record.scope {
            Scope::Singleton => self.inner.singletons.store().get(name),
            Scope::Request => request.and_then(|r| r.store().get(name)),
            Scope::Transient => None,
        })
    }

    /// Type-erased resolution shared by every lookup path.
    pub(crate) fn resolve_erased(
        &self,
        core: Arc<TokenCore>,
        args: Option<Value>,
        request: Option<Arc<RequestContext>>,
    ) -> BoxFuture<'static, DiResult<Resolved>> {
        let this = self.clone();
        async move { this.resolve_inner(&core, args, request).await }.boxed()
    }

    async fn resolve_inner(
        &self,
        core: &TokenCore,
        args: Option<Value>,
        request: Option<Arc<RequestContext>>,
    ) -> DiResult<Resolved> {
        let record = self
            .inner
            .registry
            .get_by_id(core.id)
            .ok_or_else(|| DiError::FactoryNotFound(core.identity()))?;
        let args = core.resolve_args(args).await?;
        let name = instance_name(&core.identity(), args.as_ref());

        let started = Instant::now();
        self.inner.observers.resolving(&name);
        let resolved = self.lookup(&record, &name, args, request).await?;
        self.inner.observers.resolved(&name, record.scope, started.elapsed());
        Ok(resolved)
    }

    async fn lookup(
        &self,
        record: &Arc<FactoryRecord>,
        name: &str,
        args: Option<Value>,
        request: Option<Arc<RequestContext>>,
    ) -> DiResult<Resolved> {
        let (store, origin) = match record.scope {
            Scope::Transient => return self.construct_transient(record, name, args, request).await,
            Scope::Singleton => (self.inner.singletons.store().clone(), Origin::Singleton),
            Scope::Request => {
                let ctx = request.as_ref().ok_or_else(|| {
                    tracing::debug!(name = %name, "request-scoped lookup without an active request");
                    DiError::InstanceNotFound(name.to_string())
                })?;
                ctx.ensure_active()?;
                (ctx.store().clone(), Origin::Request(ctx.request_id().to_string()))
            }
        };
        // Singletons are shared across requests and never see one.
        let ctx_request = match record.scope {
            Scope::Singleton => None,
            _ => request,
        };

        loop {
            let slot = store.get_or_reserve(name, || {
                InstanceHolder::new(
                    name.to_string(),
                    record.scope,
                    record.kind(),
                    origin.clone(),
                    Arc::downgrade(&store),
                )
            });
            match slot {
                Slot::Reserved(holder) => {
                    return self.construct(holder, record, args, ctx_request).await;
                }
                Slot::Existing(holder) => match self.await_holder(&holder).await {
                    Ok(instance) => {
                        tracing::trace!(name = %name, "cache hit");
                        return Ok(Resolved { instance, holder });
                    }
                    Err(err) if err.is_retryable() => continue,
                    Err(err) => return Err(err),
                },
            }
        }
    }

    /// Settled outcome of a cached holder; retryable errors mean "look again".
    async fn await_holder(&self, holder: &Arc<InstanceHolder>) -> DiResult<AnyArc> {
        match holder.status() {
            HolderStatus::Created | HolderStatus::Error => holder
                .outcome()
                .unwrap_or_else(|| Err(DiError::InstanceExpired(holder.name.clone()))),
            HolderStatus::Creating => {
                self.wait_for_creation(holder).await?;
                holder
                    .outcome()
                    .unwrap_or_else(|| Err(DiError::InstanceExpired(holder.name.clone())))
            }
            HolderStatus::Destroying | HolderStatus::Destroyed => {
                holder.wait_destroyed().await;
                Err(DiError::InstanceDestroying(holder.name.clone()))
            }
        }
    }

    /// Waits for a `Creating` holder unless doing so would close a cycle.
    async fn wait_for_creation(&self, holder: &InstanceHolder) -> DiResult<()> {
        let Some(frame) = Frame::current() else {
            holder.wait_settled().await;
            return Ok(());
        };
        if frame.contains_holder(holder.id) {
            return Err(DiError::CircularDependency(frame.path_to(&holder.name)));
        }
        let guard = self
            .inner
            .waits
            .begin_wait(frame.holder_ids(), holder.id)
            .ok_or_else(|| DiError::CircularDependency(frame.path_to(&holder.name)))?;
        holder.wait_settled().await;
        drop(guard);
        Ok(())
    }

    async fn construct_transient(
        &self,
        record: &Arc<FactoryRecord>,
        name: &str,
        args: Option<Value>,
        request: Option<Arc<RequestContext>>,
    ) -> DiResult<Resolved> {
        if let Some(frame) = Frame::current() {
            if frame.contains_name(name) {
                return Err(DiError::CircularDependency(frame.path_to(name)));
            }
        }
        let holder = InstanceHolder::new(
            name.to_string(),
            Scope::Transient,
            record.kind(),
            Origin::Transient,
            Weak::new(),
        );
        self.construct(holder, record, args, request).await
    }

    /// Builds a freshly reserved holder inside a new resolution frame.
    async fn construct(
        &self,
        holder: Arc<InstanceHolder>,
        record: &Arc<FactoryRecord>,
        args: Option<Value>,
        request: Option<Arc<RequestContext>>,
    ) -> DiResult<Resolved> {
        let guard = CreationGuard {
            container: self,
            holder: &holder,
        };
        let ctx = FactoryContext::new(self.clone(), holder.clone(), request);
        let result = match Frame::child_of_current(holder.id, &holder.name) {
            Ok(frame) => {
                frame
                    .enter(self.inner.instantiator.instantiate(&ctx, &holder, record, ServiceArgs::new(args)))
                    .await
            }
            Err(err) => Err(err),
        };
        drop(ctx);

        match result {
            Ok(instance) => {
                holder.complete(instance.clone());
                drop(guard);
                tracing::debug!(name = %holder.name, scope = ?holder.scope, "instance created");
                if let Some(key) = holder.event_key() {
                    self.inner.bus.emit(&key, LifecycleEvent::Create).await;
                }
                Ok(Resolved { instance, holder })
            }
            Err(err) => {
                holder.fail(err.clone());
                drop(guard);
                tracing::error!(name = %holder.name, error = %err, "construction failed");
                self.inner.observers.creation_failed(&holder.name, &err);
                self.release_failed(&holder).await;
                Err(err)
            }
        }
    }

    /// Makes room for a retry after a failed construction.
    ///
    /// Singletons stay cached in `Error` for the configured delay so that
    /// concurrent callers see the same failure; request holders go at once.
    async fn release_failed(&self, holder: &Arc<InstanceHolder>) {
        match holder.origin {
            Origin::Transient => {}
            Origin::Request(_) => self.destroy_holder(holder).await,
            Origin::Singleton => {
                let delay = self.inner.config.error_eviction_delay;
                let container = self.downgrade();
                let failed = holder.clone();
                let eviction = async move {
                    tokio::time::sleep(delay).await;
                    if let Some(container) = container.upgrade() {
                        if failed.status() == HolderStatus::Error {
                            container.destroy_holder(&failed).await;
                        }
                    }
                };
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(eviction);
                    }
                    Err(_) => self.destroy_holder(holder).await,
                }
            }
        }
    }

    /// Records that `dependent` consumed `dependency` and subscribes it to the
    /// dependency's `Destroy` event.
    pub(crate) fn track_dependency(&self, dependent: &Arc<InstanceHolder>, dependency: &InstanceHolder) {
        if dependent.origin == Origin::Transient || dependent.id == dependency.id {
            return;
        }
        let Some(key) = dependency.event_key() else {
            return;
        };
        if matches!(dependent.status(), HolderStatus::Destroying | HolderStatus::Destroyed) {
            return;
        }
        dependent.add_dependency(&dependency.name);
        if dependent.is_subscribed(&key) {
            return;
        }

        let container = self.downgrade();
        let target = Arc::downgrade(dependent);
        let subscription = self.inner.bus.on(key, LifecycleEvent::Destroy, move |_, _| {
            let container = container.clone();
            let target = target.clone();
            async move {
                if let (Some(container), Some(holder)) = (container.upgrade(), target.upgrade()) {
                    container.destroy_holder(&holder).await;
                }
            }
            .boxed()
        });
        dependent.push_subscription(subscription);
    }

    /// Records a dependency by name before it has been resolved.
    pub(crate) fn note_dependency(&self, dependent: &InstanceHolder, name: &str) {
        if dependent.origin != Origin::Transient && dependent.name != name {
            dependent.add_dependency(name);
        }
    }

    /// Starts a request with no metadata and the configured default priority.
    pub fn begin_request(&self, request_id: impl Into<String>) -> DiResult<Arc<RequestContext>> {
        self.begin_request_with(request_id, Value::Null, self.inner.config.default_request_priority)
    }

    /// Starts a request and makes it the current one.
    pub fn begin_request_with(
        &self,
        request_id: impl Into<String>,
        metadata: Value,
        priority: i32,
    ) -> DiResult<Arc<RequestContext>> {
        let request_id = request_id.into();
        let mut requests = self.inner.requests.write();
        if requests.active.contains_key(&request_id) {
            return Err(DiError::RequestContextExists(request_id));
        }
        let ctx = Arc::new(RequestContext::new(
            request_id.clone(),
            metadata,
            priority,
            self.downgrade(),
        ));
        requests.active.insert(request_id.clone(), ctx.clone());
        requests.order.push(request_id.clone());
        requests.current = Some(request_id.clone());
        tracing::debug!(request_id = %request_id, priority, "request started");
        Ok(ctx)
    }

    /// Ends a request, running the destroy callbacks of all its holders concurrently.
    ///
    /// If it was the current request, the most recently begun request still
    /// active becomes current.
    pub async fn end_request(&self, request_id: &str) -> DiResult<()> {
        let ctx = {
            let mut requests = self.inner.requests.write();
            let ctx = requests
                .active
                .remove(request_id)
                .ok_or_else(|| DiError::RequestContextNotFound(request_id.to_string()))?;
            requests.order.retain(|id| id != request_id);
            if requests.current.as_deref() == Some(request_id) {
                requests.current = requests.order.last().cloned();
            }
            ctx
        };
        ctx.deactivate();

        let holders = ctx.store().holders();
        futures::future::join_all(holders.iter().map(|h| self.destroy_when_settled(h))).await;
        // anything that raced into the store while draining
        let leftover = ctx.store().drain();
        futures::future::join_all(leftover.iter().map(|h| self.destroy_when_settled(h))).await;
        tracing::debug!(request_id = %request_id, holders = holders.len(), "request ended");
        Ok(())
    }

    pub fn current_request(&self) -> Option<Arc<RequestContext>> {
        let requests = self.inner.requests.read();
        requests
            .current
            .as_ref()
            .and_then(|id| requests.active.get(id).cloned())
    }

    /// Makes an already active request the current one.
    pub fn set_current_request(&self, request_id: &str) -> DiResult<()> {
        let mut requests = self.inner.requests.write();
        if !requests.active.contains_key(request_id) {
            return Err(DiError::RequestContextNotFound(request_id.to_string()));
        }
        requests.current = Some(request_id.to_string());
        Ok(())
    }

    /// Ids of the active requests in the order they were begun.
    pub fn active_requests(&self) -> Vec<String> {
        self.inner.requests.read().order.clone()
    }

    fn request_contexts(&self) -> Vec<Arc<RequestContext>> {
        self.inner.requests.read().active.values().cloned().collect()
    }

    /// Every cached holder, singletons first.
    fn all_holders(&self) -> Vec<Arc<InstanceHolder>> {
        let mut holders = self.inner.singletons.store().holders();
        for ctx in self.request_contexts() {
            holders.extend(ctx.store().holders());
        }
        holders
    }

    /// Diagnostic view of every cached holder, sorted by request then name.
    pub fn snapshot(&self) -> Vec<HolderSnapshot> {
        let mut snapshots: Vec<HolderSnapshot> = self.all_holders().iter().map(|h| h.snapshot()).collect();
        snapshots.sort_by(|a, b| (&a.request_id, &a.name).cmp(&(&b.request_id, &b.name)));
        snapshots
    }

    /// Human-readable dump of the caches.
    #[cfg(feature = "diagnostics")]
    pub fn to_debug_string(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "Container");
        let _ = writeln!(out, "  registry tokens: {}", self.inner.registry.len());
        let _ = writeln!(out, "  active requests: {:?}", self.active_requests());
        for s in self.snapshot() {
            let owner = s.request_id.as_deref().unwrap_or("-");
            let _ = writeln!(
                out,
                "  [{}] {} {:?} {:?} deps={:?} destroy_callbacks={} age={:?}",
                owner, s.name, s.scope, s.status, s.dependencies, s.destroy_callbacks, s.age
            );
        }
        out
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("registered", &self.inner.registry.len())
            .field("singletons", &self.inner.singletons.len())
            .field("requests", &self.active_requests())
            .finish()
    }
}

/// Fails the holder if its construction future is dropped before settling.
struct CreationGuard<'a> {
    container: &'a Container,
    holder: &'a Arc<InstanceHolder>,
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        if self.holder.status() == HolderStatus::Creating {
            tracing::warn!(name = %self.holder.name, "construction cancelled");
            self.holder
                .fail(DiError::unknown(format!("construction of {} was cancelled", self.holder.name)));
            for subscription in self.holder.take_subscriptions() {
                self.container.inner.bus.off(&subscription);
            }
            self.holder.detach();
        }
    }
}
