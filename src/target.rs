//! Type-erased construction targets stored in factory records.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::container::FactoryContext;
use crate::error::DiResult;
use crate::traits::{Factory, Injectable};
use crate::validation::ServiceArgs;

// Type-erased Arc for storage
pub(crate) type AnyArc = Arc<dyn Any + Send + Sync>;

/// How a record builds its instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactoryKind {
    /// An [`Injectable`] type constructed by the locator.
    Class,
    /// A [`Factory`] object whose `create` produces the instance.
    Factory,
}

/// Lifecycle hooks exposed by a freshly built instance.
#[async_trait]
pub(crate) trait InstanceHooks: Send + Sync {
    async fn on_init(&self) -> DiResult<()>;
    async fn on_destroy(&self);
}

/// Result of one construction attempt.
pub(crate) struct Built {
    pub(crate) instance: AnyArc,
    pub(crate) hooks: Option<Arc<dyn InstanceHooks>>,
}

#[async_trait]
pub(crate) trait ErasedTarget: Send + Sync {
    fn type_name(&self) -> &'static str;

    async fn build(&self, ctx: &FactoryContext, args: ServiceArgs) -> DiResult<Built>;
}

/// What a factory record constructs: a class or a factory object.
///
/// ```
/// use ferrous_locator::{FactoryContext, FactoryKind, ServiceArgs, Target, DiResult};
///
/// let target = Target::factory(|_ctx: FactoryContext, _args: ServiceArgs| async {
///     DiResult::Ok(7u32)
/// });
/// assert_eq!(target.kind(), FactoryKind::Factory);
/// assert_eq!(target.type_name(), "u32");
/// ```
#[derive(Clone)]
pub struct Target {
    kind: FactoryKind,
    inner: Arc<dyn ErasedTarget>,
}

impl Target {
    /// Class target built through [`Injectable::construct`].
    pub fn class<C: Injectable>() -> Self {
        Self {
            kind: FactoryKind::Class,
            inner: Arc::new(ClassTarget::<C>(PhantomData)),
        }
    }

    /// Factory target built through [`Factory::create`].
    pub fn factory<T, F>(factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Factory<T>,
    {
        Self {
            kind: FactoryKind::Factory,
            inner: Arc::new(FactoryTarget {
                factory,
                _marker: PhantomData::<fn() -> T>,
            }),
        }
    }

    pub fn kind(&self) -> FactoryKind {
        self.kind
    }

    /// Name of the type this target produces.
    pub fn type_name(&self) -> &'static str {
        self.inner.type_name()
    }

    pub(crate) async fn build(&self, ctx: &FactoryContext, args: ServiceArgs) -> DiResult<Built> {
        self.inner.build(ctx, args).await
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("kind", &self.kind)
            .field("type_name", &self.type_name())
            .finish()
    }
}

struct ClassTarget<C>(PhantomData<fn() -> C>);

struct ClassHooks<C>(Arc<C>);

#[async_trait]
impl<C: Injectable> InstanceHooks for ClassHooks<C> {
    async fn on_init(&self) -> DiResult<()> {
        self.0.on_service_init().await
    }

    async fn on_destroy(&self) {
        self.0.on_service_destroy().await
    }
}

#[async_trait]
impl<C: Injectable> ErasedTarget for ClassTarget<C> {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<C>()
    }

    async fn build(&self, ctx: &FactoryContext, args: ServiceArgs) -> DiResult<Built> {
        let instance = Arc::new(C::construct(ctx, args).await?);
        Ok(Built {
            instance: instance.clone(),
            hooks: Some(Arc::new(ClassHooks(instance))),
        })
    }
}

struct FactoryTarget<T, F> {
    factory: F,
    _marker: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F> ErasedTarget for FactoryTarget<T, F>
where
    T: Send + Sync + 'static,
    F: Factory<T>,
{
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    async fn build(&self, ctx: &FactoryContext, args: ServiceArgs) -> DiResult<Built> {
        let instance = self.factory.create(ctx, args).await?;
        Ok(Built {
            instance: Arc::new(instance),
            hooks: None,
        })
    }
}
