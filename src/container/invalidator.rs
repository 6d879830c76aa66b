//! Invalidation, cascading teardown and graceful shutdown.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;

use super::Container;
use crate::config::ClearOptions;
use crate::event_bus::LifecycleEvent;
use crate::holder::{HolderStatus, InstanceHolder};

impl Container {
    /// Destroys the holder named `name` and every holder depending on it.
    ///
    /// Holders are looked up in the singleton cache and in every active
    /// request. Dependents of the destroyed holders are torn down through
    /// their `Destroy` subscriptions, so the cascade is transitive. Holders
    /// still under construction are awaited and the invalidation retried a
    /// bounded number of times.
    pub async fn invalidate(&self, name: &str) {
        self.invalidate_round(name.to_string(), 1).await
    }

    fn invalidate_round(&self, name: String, round: usize) -> BoxFuture<'static, ()> {
        let this = self.clone();
        async move {
            let holders = this.matching_holders(&name);
            if holders.is_empty() {
                tracing::trace!(name = %name, "nothing to invalidate");
                return;
            }
            tracing::debug!(name = %name, round, holders = holders.len(), "invalidating");

            for holder in holders {
                match holder.status() {
                    HolderStatus::Destroying | HolderStatus::Destroyed => holder.wait_destroyed().await,
                    HolderStatus::Creating => {
                        if round >= this.inner.config.max_invalidation_rounds {
                            tracing::warn!(
                                name = %holder.name,
                                round,
                                "instance still creating after max invalidation rounds; giving up"
                            );
                            continue;
                        }
                        holder.wait_settled().await;
                        this.invalidate_round(name.clone(), round + 1).await;
                    }
                    HolderStatus::Created | HolderStatus::Error => this.destroy_holder(&holder).await,
                }
            }
        }
        .boxed()
    }

    /// Invalidates whichever cached holder owns `instance`.
    ///
    /// Returns `false` if no cache holds it, e.g. for transient instances.
    pub async fn invalidate_instance<T: Send + Sync + 'static>(&self, instance: &Arc<T>) -> bool {
        let ptr = Arc::as_ptr(instance) as *const ();
        let owner = self
            .inner
            .singletons
            .store()
            .find_instance(ptr)
            .or_else(|| self.request_contexts().iter().find_map(|r| r.store().find_instance(ptr)));
        match owner {
            Some(holder) => {
                let name = holder.name.clone();
                self.invalidate(&name).await;
                true
            }
            None => false,
        }
    }

    fn matching_holders(&self, name: &str) -> Vec<Arc<InstanceHolder>> {
        let mut holders = self.inner.singletons.store().matching(name);
        for ctx in self.request_contexts() {
            holders.extend(ctx.store().matching(name));
        }
        holders
    }

    /// Tears a settled holder down.
    ///
    /// Runs its destroy callbacks, clears its dependencies, drops its
    /// subscriptions, removes it from its cache and finally publishes its
    /// `Destroy` event. Waits instead if another task is already tearing it
    /// down. `Creating` holders are left alone.
    pub(crate) async fn destroy_holder(&self, holder: &Arc<InstanceHolder>) {
        let Some(teardown) = holder.begin_destroy() else {
            if holder.status() == HolderStatus::Destroying {
                holder.wait_destroyed().await;
            }
            return;
        };

        teardown.callbacks.run_all_reverse().await;
        holder.clear_dependencies();
        for subscription in &teardown.subscriptions {
            self.inner.bus.off(subscription);
        }
        holder.detach();
        // Signalled before the event so that dependents reaching back here
        // through a cycle see a finished holder instead of waiting on it.
        holder.finish_destroy();

        tracing::debug!(name = %holder.name, scope = ?holder.scope, "instance destroyed");
        self.inner.observers.destroyed(&holder.name, holder.scope);
        if let Some(key) = holder.event_key() {
            self.inner.bus.emit(&key, LifecycleEvent::Destroy).await;
        }
    }

    pub(crate) async fn destroy_when_settled(&self, holder: &Arc<InstanceHolder>) {
        if holder.status() == HolderStatus::Creating {
            holder.wait_settled().await;
        }
        self.destroy_holder(holder).await;
    }

    /// Waits until no cached holder is creating or being destroyed.
    pub async fn ready(&self) {
        let holders = self.all_holders();
        join_all(holders.iter().map(|holder| async move {
            match holder.status() {
                HolderStatus::Creating => holder.wait_settled().await,
                HolderStatus::Destroying => holder.wait_destroyed().await,
                _ => {}
            }
        }))
        .await;
    }

    /// Destroys every singleton in dependency order, then ends every request.
    ///
    /// Each round destroys, concurrently, the singletons whose dependencies
    /// have all been cleared already. Destroying a dependency still cascades
    /// to its dependents through their `Destroy` subscriptions. Whatever is
    /// left after the round limit, or once no progress is possible because
    /// of a cycle, is destroyed without ordering.
    pub async fn clear_all(&self, options: ClearOptions) {
        if options.wait_for_settlement {
            self.ready().await;
        }
        let max_rounds = options.max_rounds.unwrap_or(self.inner.config.max_clear_rounds);
        let store = self.inner.singletons.store().clone();

        let mut round = 0;
        loop {
            let remaining = store.holders();
            if remaining.is_empty() {
                break;
            }
            if round >= max_rounds {
                tracing::warn!(remaining = remaining.len(), max_rounds, "clear rounds exhausted; forcing destruction");
                join_all(remaining.iter().map(|h| self.destroy_when_settled(h))).await;
                break;
            }
            round += 1;

            let pending: HashSet<&str> = remaining.iter().map(|h| h.name.as_str()).collect();
            let clearable: Vec<Arc<InstanceHolder>> = remaining
                .iter()
                .filter(|h| h.dependencies().iter().all(|dep| !pending.contains(dep.as_str())))
                .cloned()
                .collect();
            if clearable.is_empty() {
                tracing::warn!(remaining = remaining.len(), "dependency cycle among singletons; forcing destruction");
                join_all(remaining.iter().map(|h| self.destroy_when_settled(h))).await;
                break;
            }
            tracing::debug!(round, clearing = clearable.len(), "clearing singletons");
            join_all(clearable.iter().map(|h| self.destroy_when_settled(h))).await;
        }

        if options.clear_request_contexts {
            for request_id in self.active_requests() {
                // already ended concurrently is fine
                let _ = self.end_request(&request_id).await;
            }
        }
    }

    /// Shuts the container down: clears every singleton and ends every request.
    pub async fn dispose(&self) {
        tracing::debug!("disposing container");
        self.clear_all(ClearOptions::default()).await;
    }
}
