//! Token registry with priority override and parent delegation.
//!
//! Each registry level maps a token id to the factory records registered for
//! it. The record with the highest priority wins; among equal priorities the
//! most recent registration wins, so re-registering a binding overrides it.
//! Lookups fall through to the parent level only when a token is absent
//! locally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{DiError, DiResult};
use crate::scope::Scope;
use crate::target::{FactoryKind, Target};
use crate::token::{Token, TokenId};
use crate::traits::{Factory, Injectable};

static GLOBAL: Lazy<Arc<Registry>> = Lazy::new(|| Arc::new(Registry::new()));

/// One registration of a token.
#[derive(Debug, Clone)]
pub struct FactoryRecord {
    pub scope: Scope,
    pub target: Target,
    pub priority: i32,
    /// Identity of the token this record was registered under.
    pub original_token: String,
    seq: u64,
}

impl FactoryRecord {
    pub fn kind(&self) -> FactoryKind {
        self.target.kind()
    }

    fn rank(&self) -> (i32, u64) {
        (self.priority, self.seq)
    }
}

#[derive(Default)]
struct TokenEntry {
    records: Vec<Arc<FactoryRecord>>,
    winner: Option<usize>,
}

impl TokenEntry {
    fn recompute_winner(&mut self) {
        self.winner = self
            .records
            .iter()
            .enumerate()
            .max_by_key(|(_, r)| r.rank())
            .map(|(i, _)| i);
    }
}

/// Service registry holding all factory records of one level.
///
/// # Examples
///
/// ```
/// use ferrous_locator::{FactoryContext, Registry, Scope, ServiceArgs, Target, Token, DiResult};
///
/// let logger = Token::<&'static str>::new("Logger");
/// let registry = Registry::new();
/// let console = Target::factory(|_: FactoryContext, _: ServiceArgs| async { DiResult::Ok("console") });
/// let json = Target::factory(|_: FactoryContext, _: ServiceArgs| async { DiResult::Ok("json") });
///
/// registry.set(&logger, Scope::Singleton, console, 0);
/// registry.set(&logger, Scope::Singleton, json, 10);
/// assert_eq!(registry.get(&logger).unwrap().priority, 10);
///
/// registry.delete(&logger);
/// assert_eq!(registry.get(&logger).unwrap().priority, 0);
/// ```
pub struct Registry {
    parent: Option<Arc<Registry>>,
    entries: RwLock<HashMap<TokenId, TokenEntry>>,
    next_seq: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates a root registry.
    pub fn new() -> Self {
        Self {
            parent: None,
            entries: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Creates a level whose lookups fall back to `parent`.
    pub fn child(parent: Arc<Registry>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new()
        }
    }

    /// Process-wide default registry, for applications that want one.
    ///
    /// Nothing in the locator consults it implicitly.
    pub fn global() -> Arc<Registry> {
        GLOBAL.clone()
    }

    pub fn parent(&self) -> Option<&Arc<Registry>> {
        self.parent.as_ref()
    }

    /// Appends a record; it becomes the winner when its priority is at least the current winner's.
    pub fn set<T>(&self, token: &Token<T>, scope: Scope, target: Target, priority: i32) {
        let record = Arc::new(FactoryRecord {
            scope,
            target,
            priority,
            original_token: token.identity(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        });
        tracing::debug!(
            token = %record.original_token,
            ?scope,
            priority,
            target = record.target.type_name(),
            "registering factory record"
        );

        let mut entries = self.entries.write();
        let entry = entries.entry(token.id()).or_default();
        let wins = match entry.winner {
            Some(i) => record.priority >= entry.records[i].priority,
            None => true,
        };
        entry.records.push(record);
        if wins {
            entry.winner = Some(entry.records.len() - 1);
        }
    }

    /// Registers [`Injectable`] type `C` under `Token::<C>::of()` with priority 0.
    pub fn register_class<C: Injectable>(&self, scope: Scope) -> Token<C> {
        let token = Token::<C>::of();
        self.set(&token, scope, Target::class::<C>(), 0);
        token
    }

    /// Registers [`Injectable`] type `C` under an explicit token.
    pub fn register_class_as<C: Injectable>(&self, token: &Token<C>, scope: Scope, priority: i32) {
        self.set(token, scope, Target::class::<C>(), priority);
    }

    /// Registers a factory producing `T` with priority 0.
    pub fn register_factory<T, F>(&self, token: &Token<T>, scope: Scope, factory: F)
    where
        T: Send + Sync + 'static,
        F: Factory<T>,
    {
        self.set(token, scope, Target::factory(factory), 0);
    }

    /// Winning record at the nearest level that knows the token.
    pub fn get<T>(&self, token: &Token<T>) -> DiResult<Arc<FactoryRecord>> {
        self.get_by_id(token.id())
            .ok_or_else(|| DiError::FactoryNotFound(token.identity()))
    }

    pub(crate) fn get_by_id(&self, id: TokenId) -> Option<Arc<FactoryRecord>> {
        let local = {
            let entries = self.entries.read();
            entries
                .get(&id)
                .and_then(|e| e.winner.map(|i| e.records[i].clone()))
        };
        match local {
            Some(record) => Some(record),
            None => self.parent.as_ref().and_then(|p| p.get_by_id(id)),
        }
    }

    /// Every record for the token, highest priority first.
    pub fn get_all<T>(&self, token: &Token<T>) -> Vec<Arc<FactoryRecord>> {
        let mut local: Vec<Arc<FactoryRecord>> = {
            let entries = self.entries.read();
            entries
                .get(&token.id())
                .map(|e| e.records.clone())
                .unwrap_or_default()
        };
        if local.is_empty() {
            return self
                .parent
                .as_ref()
                .map(|p| p.get_all(token))
                .unwrap_or_default();
        }
        local.sort_by(|a, b| b.rank().cmp(&a.rank()));
        local
    }

    /// Whether this level or any ancestor knows the token.
    pub fn has<T>(&self, token: &Token<T>) -> bool {
        self.get_by_id(token.id()).is_some()
    }

    /// Removes this level's winning record and promotes the next best one.
    ///
    /// Returns the removed record. The parent is never touched.
    pub fn delete<T>(&self, token: &Token<T>) -> Option<Arc<FactoryRecord>> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&token.id())?;
        let removed = entry.records.remove(entry.winner?);
        entry.recompute_winner();
        if entry.records.is_empty() {
            entries.remove(&token.id());
        }
        tracing::debug!(token = %removed.original_token, priority = removed.priority, "deleted factory record");
        Some(removed)
    }

    /// Changes the scope of every record of the token at the nearest level that knows it.
    pub fn update_scope<T>(&self, token: &Token<T>, scope: Scope) -> DiResult<()> {
        {
            let mut entries = self.entries.write();
            if let Some(entry) = entries.get_mut(&token.id()) {
                for record in entry.records.iter_mut() {
                    let mut updated = (**record).clone();
                    updated.scope = scope;
                    *record = Arc::new(updated);
                }
                return Ok(());
            }
        }
        match &self.parent {
            Some(parent) => parent.update_scope(token, scope),
            None => Err(DiError::FactoryNotFound(token.identity())),
        }
    }

    /// Number of tokens known at this level.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::FactoryContext;
    use crate::validation::ServiceArgs;

    fn named(label: &'static str) -> Target {
        Target::factory(move |_: FactoryContext, _: ServiceArgs| async move { DiResult::Ok(label) })
    }

    #[test]
    fn missing_token_is_factory_not_found() {
        let registry = Registry::new();
        let token = Token::<&'static str>::new("Missing");
        assert!(matches!(registry.get(&token), Err(DiError::FactoryNotFound(_))));
    }

    #[test]
    fn equal_priority_latest_wins() {
        let registry = Registry::new();
        let token = Token::<&'static str>::new("Svc");
        registry.set(&token, Scope::Singleton, named("a"), 0);
        let first_seq = registry.get(&token).unwrap().seq;
        registry.set(&token, Scope::Singleton, named("b"), 0);
        assert!(registry.get(&token).unwrap().seq > first_seq);
    }

    #[test]
    fn lower_priority_does_not_displace_winner() {
        let registry = Registry::new();
        let token = Token::<&'static str>::new("Svc");
        registry.set(&token, Scope::Singleton, named("high"), 5);
        registry.set(&token, Scope::Transient, named("low"), 1);
        assert_eq!(registry.get(&token).unwrap().scope, Scope::Singleton);

        let all = registry.get_all(&token);
        assert_eq!(all.iter().map(|r| r.priority).collect::<Vec<_>>(), vec![5, 1]);
    }

    #[test]
    fn delete_recomputes_and_finally_empties() {
        let registry = Registry::new();
        let token = Token::<&'static str>::new("Svc");
        registry.set(&token, Scope::Singleton, named("a"), 1);
        registry.set(&token, Scope::Singleton, named("b"), 3);
        registry.set(&token, Scope::Singleton, named("c"), 2);

        assert_eq!(registry.delete(&token).unwrap().priority, 3);
        assert_eq!(registry.get(&token).unwrap().priority, 2);
        assert_eq!(registry.delete(&token).unwrap().priority, 2);
        assert_eq!(registry.delete(&token).unwrap().priority, 1);
        assert!(registry.delete(&token).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn local_registration_shadows_parent_regardless_of_priority() {
        let parent = Arc::new(Registry::new());
        let token = Token::<&'static str>::new("Svc");
        parent.set(&token, Scope::Singleton, named("parent"), 100);

        let child = Registry::child(parent.clone());
        assert_eq!(child.get(&token).unwrap().priority, 100);
        assert_eq!(child.get_all(&token).len(), 1);

        child.set(&token, Scope::Transient, named("child"), -5);
        assert_eq!(child.get(&token).unwrap().priority, -5);
        assert_eq!(child.get_all(&token).len(), 1);

        child.delete(&token);
        assert_eq!(child.get(&token).unwrap().priority, 100);
        assert_eq!(parent.get_all(&token).len(), 1);
    }

    #[test]
    fn update_scope_delegates_to_parent_when_absent() {
        let parent = Arc::new(Registry::new());
        let token = Token::<&'static str>::new("Svc");
        parent.set(&token, Scope::Singleton, named("a"), 0);
        parent.set(&token, Scope::Singleton, named("b"), 1);

        let child = Registry::child(parent.clone());
        child.update_scope(&token, Scope::Request).unwrap();
        assert!(parent.get_all(&token).iter().all(|r| r.scope == Scope::Request));

        let unknown = Token::<&'static str>::new("Unknown");
        assert!(child.update_scope(&unknown, Scope::Request).is_err());
    }
}
