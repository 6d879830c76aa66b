//! Name-scoped publish/subscribe for holder lifecycle events.
//!
//! The only consumer in the locator is cascading invalidation: a holder that
//! consumed another holder subscribes to that dependency's `Destroy` event and
//! tears itself down when it fires. Dependents therefore never need a reverse
//! pointer from the dependency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;

/// Lifecycle events published per instance name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// A holder finished construction; informational.
    Create,
    /// A holder was removed from its cache.
    Destroy,
}

pub(crate) type Listener = Arc<dyn Fn(String, LifecycleEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    name: String,
    event: LifecycleEvent,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event(&self) -> LifecycleEvent {
        self.event
    }
}

/// Publish/subscribe keyed by `(name, event)`.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<(String, LifecycleEvent), Vec<(u64, Listener)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `listener` to `event` under `name`.
    pub fn on<F>(&self, name: impl Into<String>, event: LifecycleEvent, listener: F) -> Subscription
    where
        F: Fn(String, LifecycleEvent) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = name.into();
        self.listeners
            .lock()
            .entry((name.clone(), event))
            .or_default()
            .push((id, Arc::new(listener)));
        Subscription { id, name, event }
    }

    /// Removes a subscription; unknown handles are ignored.
    pub fn off(&self, subscription: &Subscription) {
        let mut listeners = self.listeners.lock();
        let key = (subscription.name.clone(), subscription.event);
        if let Some(list) = listeners.get_mut(&key) {
            list.retain(|(id, _)| *id != subscription.id);
            if list.is_empty() {
                listeners.remove(&key);
            }
        }
    }

    /// Notifies every listener of `(name, event)` and waits for all of them.
    ///
    /// Listeners are snapshotted before any of them runs, so a listener may
    /// subscribe or unsubscribe without deadlocking the bus.
    pub async fn emit(&self, name: &str, event: LifecycleEvent) {
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.lock();
            match listeners.get(&(name.to_string(), event)) {
                Some(list) => list.iter().map(|(_, l)| l.clone()).collect(),
                None => return,
            }
        };
        tracing::trace!(name = %name, ?event, listeners = snapshot.len(), "emitting lifecycle event");
        join_all(snapshot.into_iter().map(|l| l(name.to_string(), event))).await;
    }

    pub fn listener_count(&self, name: &str, event: LifecycleEvent) -> usize {
        self.listeners
            .lock()
            .get(&(name.to_string(), event))
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn emit_reaches_only_matching_listeners() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let sub = bus.on("Db(1)", LifecycleEvent::Destroy, move |_, _| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });

        bus.emit("Db(1)", LifecycleEvent::Create).await;
        bus.emit("Cache(2)", LifecycleEvent::Destroy).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        bus.emit("Db(1)", LifecycleEvent::Destroy).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bus.off(&sub);
        assert_eq!(bus.listener_count("Db(1)", LifecycleEvent::Destroy), 0);
        bus.emit("Db(1)", LifecycleEvent::Destroy).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
