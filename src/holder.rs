//! Instance holders: the unit of lifecycle state.
//!
//! A holder is allocated in [`HolderStatus::Creating`] the moment a cache miss
//! triggers construction and is published in its cache right away, so
//! concurrent lookups of the same name wait on it instead of constructing a
//! second instance.
//!
//! ```text
//! Creating ──► Created ──► Destroying ──► Destroyed (removed from cache)
//!     └──────► Error ─────────┘
//! ```
//!
//! Nothing ever returns to `Creating`; re-creation after removal allocates a
//! new holder under the same name.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::error::{DiError, DiResult};
use crate::event_bus::Subscription;
use crate::internal::DestroyBag;
use crate::scope::Scope;
use crate::singletons::HolderStore;
use crate::target::{AnyArc, FactoryKind};

static NEXT_HOLDER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HolderStatus {
    Creating,
    Created,
    Error,
    Destroying,
    /// Removed from its cache; only observable through a retained handle.
    Destroyed,
}

impl HolderStatus {
    pub fn is_settled(self) -> bool {
        !matches!(self, HolderStatus::Creating)
    }
}

/// Which cache a holder lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Origin {
    Singleton,
    Request(String),
    Transient,
}

impl Origin {
    /// Event-bus key for `name`; request-scoped names are qualified by their request.
    pub(crate) fn event_key(&self, name: &str) -> Option<String> {
        match self {
            Origin::Singleton => Some(name.to_string()),
            Origin::Request(id) => Some(format!("{}/{}", id, name)),
            Origin::Transient => None,
        }
    }
}

struct HolderState {
    instance: Option<AnyArc>,
    error: Option<DiError>,
    destroy: DestroyBag,
    subscriptions: Vec<Subscription>,
}

/// Everything needed to finish tearing a holder down.
pub(crate) struct Teardown {
    pub(crate) callbacks: DestroyBag,
    pub(crate) subscriptions: Vec<Subscription>,
}

pub(crate) struct InstanceHolder {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) scope: Scope,
    pub(crate) kind: FactoryKind,
    pub(crate) origin: Origin,
    pub(crate) created_at: Instant,
    store: Weak<HolderStore>,
    dependencies: Mutex<HashSet<String>>,
    state: Mutex<HolderState>,
    status: watch::Sender<HolderStatus>,
}

impl InstanceHolder {
    pub(crate) fn new(
        name: String,
        scope: Scope,
        kind: FactoryKind,
        origin: Origin,
        store: Weak<HolderStore>,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(HolderStatus::Creating);
        Arc::new(Self {
            id: NEXT_HOLDER_ID.fetch_add(1, Ordering::Relaxed),
            name,
            scope,
            kind,
            origin,
            created_at: Instant::now(),
            store,
            dependencies: Mutex::new(HashSet::new()),
            state: Mutex::new(HolderState {
                instance: None,
                error: None,
                destroy: DestroyBag::default(),
                subscriptions: Vec::new(),
            }),
            status,
        })
    }

    pub(crate) fn status(&self) -> HolderStatus {
        *self.status.borrow()
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn event_key(&self) -> Option<String> {
        self.origin.event_key(&self.name)
    }

    /// Settled result for waiters.
    ///
    /// A captured error stays observable through teardown so every waiter of a
    /// failed construction receives it. A created instance that is already
    /// being torn down yields `None`.
    pub(crate) fn outcome(&self) -> Option<DiResult<AnyArc>> {
        let state = self.state.lock();
        match self.status() {
            HolderStatus::Creating => None,
            HolderStatus::Created => state.instance.clone().map(Ok),
            _ => state.error.clone().map(Err),
        }
    }

    #[cfg(test)]
    pub(crate) fn instance(&self) -> Option<AnyArc> {
        self.state.lock().instance.clone()
    }

    /// Whether the live instance sits at address `ptr`.
    pub(crate) fn holds(&self, ptr: *const ()) -> bool {
        self.state
            .lock()
            .instance
            .as_ref()
            .is_some_and(|own| Arc::as_ptr(own) as *const () == ptr)
    }

    /// `Creating → Created`
    pub(crate) fn complete(&self, instance: AnyArc) {
        let mut state = self.state.lock();
        if self.status() != HolderStatus::Creating {
            return;
        }
        state.instance = Some(instance);
        self.status.send_replace(HolderStatus::Created);
    }

    /// `Creating → Error`
    pub(crate) fn fail(&self, error: DiError) {
        let mut state = self.state.lock();
        if self.status() != HolderStatus::Creating {
            return;
        }
        state.error = Some(error);
        self.status.send_replace(HolderStatus::Error);
    }

    /// `Created | Error → Destroying`; `None` when the holder is in any other state.
    pub(crate) fn begin_destroy(&self) -> Option<Teardown> {
        let mut state = self.state.lock();
        match self.status() {
            HolderStatus::Created | HolderStatus::Error => {
                self.status.send_replace(HolderStatus::Destroying);
                Some(Teardown {
                    callbacks: std::mem::take(&mut state.destroy),
                    subscriptions: std::mem::take(&mut state.subscriptions),
                })
            }
            _ => None,
        }
    }

    /// Final transition; releases the instance.
    pub(crate) fn finish_destroy(&self) {
        let mut state = self.state.lock();
        state.instance = None;
        self.status.send_replace(HolderStatus::Destroyed);
    }

    pub(crate) fn take_subscriptions(&self) -> Vec<Subscription> {
        std::mem::take(&mut self.state.lock().subscriptions)
    }

    pub(crate) async fn wait_settled(&self) {
        let mut rx = self.status.subscribe();
        let _ = rx.wait_for(|s| s.is_settled()).await;
    }

    pub(crate) async fn wait_destroyed(&self) {
        let mut rx = self.status.subscribe();
        let _ = rx.wait_for(|s| *s == HolderStatus::Destroyed).await;
    }

    /// Takes over the callbacks a successful construction registered.
    pub(crate) fn adopt_destroy(&self, callbacks: DestroyBag) {
        self.state.lock().destroy.append(callbacks);
    }

    pub(crate) fn push_async_destroy<Fut, F>(&self, f: F)
    where
        Fut: std::future::Future<Output = ()> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
    {
        self.state.lock().destroy.push_async(f);
    }

    pub(crate) fn destroy_callback_count(&self) -> usize {
        self.state.lock().destroy.len()
    }

    pub(crate) fn push_subscription(&self, subscription: Subscription) {
        self.state.lock().subscriptions.push(subscription);
    }

    pub(crate) fn is_subscribed(&self, key: &str) -> bool {
        self.state.lock().subscriptions.iter().any(|s| s.name() == key)
    }

    /// Records a dependency; returns `false` if it was already known.
    pub(crate) fn add_dependency(&self, name: &str) -> bool {
        self.dependencies.lock().insert(name.to_string())
    }

    pub(crate) fn depends_on(&self, name: &str) -> bool {
        self.dependencies.lock().contains(name)
    }

    pub(crate) fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = self.dependencies.lock().iter().cloned().collect();
        deps.sort();
        deps
    }

    pub(crate) fn clear_dependencies(&self) {
        self.dependencies.lock().clear();
    }

    /// Removes this holder from its cache if it is still the entry for its name.
    pub(crate) fn detach(&self) -> bool {
        match self.store.upgrade() {
            Some(store) => store.remove(self),
            None => false,
        }
    }
}

impl std::fmt::Debug for InstanceHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHolder")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("status", &self.status())
            .finish()
    }
}

/// Read-only view of a holder for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct HolderSnapshot {
    pub name: String,
    pub scope: Scope,
    pub kind: FactoryKind,
    pub status: HolderStatus,
    /// Owning request id for request-scoped holders.
    pub request_id: Option<String>,
    pub dependencies: Vec<String>,
    pub destroy_callbacks: usize,
    pub age: Duration,
}

impl InstanceHolder {
    pub(crate) fn snapshot(&self) -> HolderSnapshot {
        let holder = self;
        HolderSnapshot {
            name: holder.name.clone(),
            scope: holder.scope,
            kind: holder.kind,
            status: holder.status(),
            request_id: match &holder.origin {
                Origin::Request(id) => Some(id.clone()),
                _ => None,
            },
            dependencies: holder.dependencies(),
            destroy_callbacks: holder.destroy_callback_count(),
            age: holder.age(),
        }
    }
}
