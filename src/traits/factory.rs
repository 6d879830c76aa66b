//! Factory-object services.

use std::future::Future;

use async_trait::async_trait;

use crate::container::FactoryContext;
use crate::error::DiResult;
use crate::validation::ServiceArgs;

/// Trait for objects that produce services of type `T`.
///
/// Factories are useful when the product is a foreign type, a trait object,
/// or needs arguments that shape it. Destroy callbacks are registered through
/// [`FactoryContext::add_destroy_listener`].
///
/// Async closures taking `(FactoryContext, ServiceArgs)` are factories too.
///
/// # Examples
///
/// ```
/// use ferrous_locator::{Container, DiError, FactoryContext, Scope, ServiceArgs, Token, DiResult};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> DiResult<()> {
/// let greeting = Token::<String>::new("Greeting");
///
/// let container = Container::new();
/// container.registry().register_factory(
///     &greeting,
///     Scope::Singleton,
///     |_ctx: FactoryContext, args: ServiceArgs| async move {
///         let who: Option<String> = args.field("who")?;
///         Ok::<_, DiError>(format!("hello {}", who.unwrap_or_else(|| "world".into())))
///     },
/// );
///
/// assert_eq!(*container.get(&greeting).await?, "hello world");
/// assert_eq!(*container.get_with(&greeting, json!({ "who": "crab" })).await?, "hello crab");
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Factory<T: Send + Sync + 'static>: Send + Sync + 'static {
    /// Creates a new instance.
    async fn create(&self, ctx: &FactoryContext, args: ServiceArgs) -> DiResult<T>;
}

#[async_trait]
impl<T, F, Fut> Factory<T> for F
where
    T: Send + Sync + 'static,
    F: Fn(FactoryContext, ServiceArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DiResult<T>> + Send,
{
    async fn create(&self, ctx: &FactoryContext, args: ServiceArgs) -> DiResult<T> {
        self(ctx.clone(), args).await
    }
}
