//! Holder caches: the process-wide singleton manager and the store that backs
//! each request context.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::holder::InstanceHolder;

/// Outcome of [`HolderStore::get_or_reserve`].
pub(crate) enum Slot {
    /// A holder already exists under the name, in whatever state.
    Existing(Arc<InstanceHolder>),
    /// A fresh `Creating` holder was inserted; the caller must construct it.
    Reserved(Arc<InstanceHolder>),
}

/// Name-keyed map of holders.
///
/// `get_or_reserve` checks and inserts under one lock, which is what keeps
/// construction at-most-once when callers race on the same name.
#[derive(Default)]
pub(crate) struct HolderStore {
    holders: Mutex<HashMap<String, Arc<InstanceHolder>>>,
}

impl HolderStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<InstanceHolder>> {
        self.holders.lock().get(name).cloned()
    }

    pub(crate) fn get_or_reserve<F>(&self, name: &str, make: F) -> Slot
    where
        F: FnOnce() -> Arc<InstanceHolder>,
    {
        let mut holders = self.holders.lock();
        if let Some(existing) = holders.get(name) {
            return Slot::Existing(existing.clone());
        }
        let holder = make();
        holders.insert(name.to_string(), holder.clone());
        Slot::Reserved(holder)
    }

    /// Removes `holder` if it is still the entry for its name.
    pub(crate) fn remove(&self, holder: &InstanceHolder) -> bool {
        let mut holders = self.holders.lock();
        match holders.get(&holder.name) {
            Some(current) if current.id == holder.id => {
                holders.remove(&holder.name);
                true
            }
            _ => false,
        }
    }

    /// Holders named `name` or depending on `name`.
    pub(crate) fn matching(&self, name: &str) -> Vec<Arc<InstanceHolder>> {
        self.holders
            .lock()
            .values()
            .filter(|h| h.name == name || h.depends_on(name))
            .cloned()
            .collect()
    }

    pub(crate) fn find_instance(&self, ptr: *const ()) -> Option<Arc<InstanceHolder>> {
        self.holders.lock().values().find(|h| h.holds(ptr)).cloned()
    }

    pub(crate) fn holders(&self) -> Vec<Arc<InstanceHolder>> {
        self.holders.lock().values().cloned().collect()
    }

    pub(crate) fn drain(&self) -> Vec<Arc<InstanceHolder>> {
        self.holders.lock().drain().map(|(_, h)| h).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.holders.lock().len()
    }
}

/// Process-wide cache of singleton-scope holders.
#[derive(Default)]
pub struct SingletonManager {
    store: Arc<HolderStore>,
}

impl SingletonManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn store(&self) -> &Arc<HolderStore> {
        &self.store
    }

    /// Number of cached singleton holders, in any state.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names currently cached.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.store.holders().into_iter().map(|h| h.name.clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::Origin;
    use crate::scope::Scope;
    use crate::target::FactoryKind;

    fn make(store: &Arc<HolderStore>, name: &str) -> Arc<InstanceHolder> {
        InstanceHolder::new(
            name.to_string(),
            Scope::Singleton,
            FactoryKind::Class,
            Origin::Singleton,
            Arc::downgrade(store),
        )
    }

    #[test]
    fn reserve_is_at_most_once() {
        let store = HolderStore::new();
        let first = match store.get_or_reserve("A", || make(&store, "A")) {
            Slot::Reserved(h) => h,
            Slot::Existing(_) => panic!("expected reservation"),
        };
        match store.get_or_reserve("A", || panic!("must not allocate twice")) {
            Slot::Existing(h) => assert_eq!(h.id, first.id),
            Slot::Reserved(_) => panic!("expected existing holder"),
        }
    }

    #[test]
    fn remove_ignores_stale_holder() {
        let store = HolderStore::new();
        let old = make(&store, "A");
        let new = make(&store, "A");
        let _ = store.get_or_reserve("A", || new.clone());

        assert!(!store.remove(&old));
        assert_eq!(store.len(), 1);
        assert!(new.detach());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn matching_includes_dependents() {
        let store = HolderStore::new();
        let a = make(&store, "A");
        let b = make(&store, "B");
        b.add_dependency("A");
        let c = make(&store, "C");
        for h in [&a, &b, &c] {
            let _ = store.get_or_reserve(&h.name, || h.clone());
        }

        let mut names: Vec<String> = store.matching("A").into_iter().map(|h| h.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["A", "B"]);
    }
}
