//! Class-style services.

use async_trait::async_trait;

use crate::container::FactoryContext;
use crate::error::DiResult;
use crate::validation::ServiceArgs;

/// A service the locator constructs itself.
///
/// `construct` receives a [`FactoryContext`] for injecting dependencies and the
/// validated arguments of the token it was resolved through. The two hooks are
/// awaited by the locator: `on_service_init` once after a successful
/// construction (a failure turns the whole construction into an error) and
/// `on_service_destroy` once when the instance is invalidated.
///
/// # Examples
///
/// ```
/// use ferrous_locator::{Container, FactoryContext, Injectable, Scope, ServiceArgs, Token, DiResult};
/// use async_trait::async_trait;
/// use std::sync::Arc;
///
/// struct Clock;
///
/// #[async_trait]
/// impl Injectable for Clock {
///     async fn construct(_ctx: &FactoryContext, _args: ServiceArgs) -> DiResult<Self> {
///         Ok(Clock)
///     }
/// }
///
/// struct Scheduler {
///     clock: Arc<Clock>,
/// }
///
/// #[async_trait]
/// impl Injectable for Scheduler {
///     async fn construct(ctx: &FactoryContext, _args: ServiceArgs) -> DiResult<Self> {
///         Ok(Scheduler { clock: ctx.inject(&Token::<Clock>::of()).await? })
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> DiResult<()> {
/// let container = Container::new();
/// container.registry().register_class::<Clock>(Scope::Singleton);
/// container.registry().register_class::<Scheduler>(Scope::Transient);
///
/// let scheduler = container.get(&Token::<Scheduler>::of()).await?;
/// let clock = container.get(&Token::<Clock>::of()).await?;
/// assert!(Arc::ptr_eq(&scheduler.clock, &clock));
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Builds the instance.
    async fn construct(ctx: &FactoryContext, args: ServiceArgs) -> DiResult<Self>;

    /// Post-construction hook.
    async fn on_service_init(&self) -> DiResult<()> {
        Ok(())
    }

    /// Pre-destruction hook.
    async fn on_service_destroy(&self) {}
}
