//! Injection tokens.
//!
//! A token is the identity under which factory records are registered and
//! instances are looked up. Identity is a process-unique [`TokenId`]; arguments
//! never participate in token equality, they only extend the instance name.

use std::any::TypeId;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{DiError, DiResult};
use crate::naming::instance_name;
use crate::validation::{ArgumentSchema, SharedSchema, ValidationError};

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

// One token core per Rust type for `Token::of`
static TYPE_TOKENS: Lazy<Mutex<HashMap<TypeId, Arc<TokenCore>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Stable numeric identity of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(u64);

impl TokenId {
    fn next() -> Self {
        TokenId(NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) type ArgsResolver = Arc<dyn Fn() -> BoxFuture<'static, DiResult<Value>> + Send + Sync>;

pub(crate) enum Flavor {
    Plain,
    Bound(Value),
    Factory {
        resolver: ArgsResolver,
        memo: tokio::sync::OnceCell<Value>,
    },
}

/// Untyped token state shared by every clone of a [`Token`].
pub(crate) struct TokenCore {
    pub(crate) id: TokenId,
    pub(crate) name: Cow<'static, str>,
    pub(crate) schema: Option<SharedSchema>,
    pub(crate) flavor: Flavor,
}

impl TokenCore {
    fn plain(id: TokenId, name: Cow<'static, str>) -> Self {
        Self {
            id,
            name,
            schema: None,
            flavor: Flavor::Plain,
        }
    }

    /// `Name(id)`, the prefix of every instance name built from this token.
    pub(crate) fn identity(&self) -> String {
        format!("{}({})", self.name, self.id)
    }

    pub(crate) fn validate(&self, args: Option<Value>) -> DiResult<Option<Value>> {
        match (&self.schema, args) {
            (Some(schema), Some(input)) => schema
                .validate(input)
                .map(Some)
                .map_err(|message| ValidationError::new(self.identity(), message).into()),
            (_, args) => Ok(args),
        }
    }

    /// Produces validated arguments, awaiting a factory token's resolver on first use.
    pub(crate) async fn resolve_args(&self, explicit: Option<Value>) -> DiResult<Option<Value>> {
        match &self.flavor {
            Flavor::Plain => self.validate(explicit),
            Flavor::Bound(args) => self.validate(Some(args.clone())),
            Flavor::Factory { resolver, memo } => {
                let raw = memo.get_or_try_init(|| (resolver)()).await?;
                self.validate(Some(raw.clone()))
            }
        }
    }

    /// Synchronous variant of [`resolve_args`](Self::resolve_args) for call sites that must not await.
    pub(crate) fn resolve_args_now(&self, explicit: Option<Value>) -> DiResult<Option<Value>> {
        match &self.flavor {
            Flavor::Plain => self.validate(explicit),
            Flavor::Bound(args) => self.validate(Some(args.clone())),
            Flavor::Factory { memo, .. } => match memo.get() {
                Some(raw) => self.validate(Some(raw.clone())),
                None => Err(DiError::FactoryTokenNotResolved(self.identity())),
            },
        }
    }
}

/// Typed injection token.
///
/// `T` is the type an instance resolved through this token downcasts to.
/// Cloning a token is cheap and preserves identity.
///
/// # Examples
///
/// ```rust
/// use ferrous_locator::Token;
/// use serde_json::json;
///
/// struct Database;
///
/// let token = Token::<Database>::new("Database");
/// let replica = token.bound(json!({ "role": "replica" }));
///
/// // Bound tokens keep the identity of the token they come from
/// assert_eq!(token.id(), replica.id());
/// assert_eq!(replica.instance_name_now().unwrap(), format!("{}:role=replica", token.identity()));
///
/// // Type tokens are stable per type
/// assert_eq!(Token::<Database>::of().id(), Token::<Database>::of().id());
/// ```
pub struct Token<T> {
    core: Arc<TokenCore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Token<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flavor = match &self.core.flavor {
            Flavor::Plain => "plain",
            Flavor::Bound(_) => "bound",
            Flavor::Factory { .. } => "factory",
        };
        f.debug_struct("Token")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("flavor", &flavor)
            .field("schema", &self.core.schema.is_some())
            .finish()
    }
}

impl<T> PartialEq for Token<T> {
    fn eq(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }
}

impl<T> Eq for Token<T> {}

impl<T> Token<T> {
    /// Creates a plain token with a fresh identity.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self::from_core(Arc::new(TokenCore::plain(TokenId::next(), name.into())))
    }

    /// The token for type `T`; every call returns the same identity.
    pub fn of() -> Self
    where
        T: 'static,
    {
        let core = TYPE_TOKENS
            .lock()
            .entry(TypeId::of::<T>())
            .or_insert_with(|| {
                let full = std::any::type_name::<T>();
                let short = full.rsplit("::").next().unwrap_or(full);
                Arc::new(TokenCore::plain(TokenId::next(), Cow::Owned(short.to_string())))
            })
            .clone();
        Self::from_core(core)
    }

    pub(crate) fn from_core(core: Arc<TokenCore>) -> Self {
        Self {
            core,
            _marker: PhantomData,
        }
    }

    pub(crate) fn core(&self) -> &Arc<TokenCore> {
        &self.core
    }

    /// Attaches an argument schema; identity is preserved.
    pub fn with_schema<S: ArgumentSchema>(&self, schema: S) -> Self {
        self.derive(Some(Arc::new(schema)), self.clone_flavor())
    }

    /// A bound token: same identity with fixed arguments baked in.
    pub fn bound(&self, args: Value) -> Self {
        self.derive(self.core.schema.clone(), Flavor::Bound(args))
    }

    /// A factory token: same identity with arguments produced lazily by `resolver`.
    ///
    /// The resolver runs at most once successfully; its output is memoized.
    pub fn with_factory_args<F, Fut>(&self, resolver: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DiResult<Value>> + Send + 'static,
    {
        let resolver: ArgsResolver =
            Arc::new(move || -> BoxFuture<'static, DiResult<Value>> { Box::pin(resolver()) });
        self.derive(
            self.core.schema.clone(),
            Flavor::Factory {
                resolver,
                memo: tokio::sync::OnceCell::new(),
            },
        )
    }

    fn derive(&self, schema: Option<SharedSchema>, flavor: Flavor) -> Self {
        Self::from_core(Arc::new(TokenCore {
            id: self.core.id,
            name: self.core.name.clone(),
            schema,
            flavor,
        }))
    }

    fn clone_flavor(&self) -> Flavor {
        match &self.core.flavor {
            Flavor::Plain => Flavor::Plain,
            Flavor::Bound(args) => Flavor::Bound(args.clone()),
            Flavor::Factory { resolver, memo } => Flavor::Factory {
                resolver: resolver.clone(),
                memo: match memo.get() {
                    Some(v) => tokio::sync::OnceCell::new_with(Some(v.clone())),
                    None => tokio::sync::OnceCell::new(),
                },
            },
        }
    }

    pub fn id(&self) -> TokenId {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// `Name(id)`
    pub fn identity(&self) -> String {
        self.core.identity()
    }

    /// Runs the schema, if any, over `args`.
    pub fn validate(&self, args: Option<Value>) -> DiResult<Option<Value>> {
        self.core.validate(args)
    }

    /// True once a factory token's arguments have been produced; always true otherwise.
    pub fn is_resolved(&self) -> bool {
        match &self.core.flavor {
            Flavor::Factory { memo, .. } => memo.initialized(),
            _ => true,
        }
    }

    /// Instance name for this token without extra arguments, if computable without awaiting.
    pub fn instance_name_now(&self) -> DiResult<String> {
        let args = self.core.resolve_args_now(None)?;
        Ok(instance_name(&self.identity(), args.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Marker;

    #[test]
    fn new_tokens_are_distinct() {
        let a = Token::<Marker>::new("Marker");
        let b = Token::<Marker>::new("Marker");
        assert_ne!(a, b);
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn type_token_uses_short_name() {
        let token = Token::<Marker>::of();
        assert_eq!(token.name(), "Marker");
    }

    #[tokio::test]
    async fn factory_args_are_memoized() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let token = Token::<Marker>::new("Pool").with_factory_args(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "size": 4 }))
            }
        });

        assert!(!token.is_resolved());
        assert!(matches!(
            token.instance_name_now(),
            Err(DiError::FactoryTokenNotResolved(_))
        ));

        let first = token.core().resolve_args(None).await.unwrap();
        let second = token.core().resolve_args(None).await.unwrap();
        assert_eq!(first, Some(json!({ "size": 4 })));
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(token.is_resolved());
    }

    #[test]
    fn schema_rejection_becomes_validation_error() {
        let token = Token::<Marker>::new("Port").with_schema(|v: Value| {
            if v.is_u64() {
                Ok(v)
            } else {
                Err("expected a port number".to_string())
            }
        });
        assert!(token.validate(Some(json!(80))).is_ok());
        assert!(matches!(
            token.validate(Some(json!("eighty"))),
            Err(DiError::Validation(_))
        ));
        assert_eq!(token.validate(None).unwrap(), None);
    }
}
