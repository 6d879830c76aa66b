//! Drives one construction: build, pending-dependency retries, post-construction hook.

use std::panic::AssertUnwindSafe;

use futures::future::join_all;
use futures::FutureExt;

use crate::container::FactoryContext;
use crate::error::{DiError, DiResult};
use crate::holder::InstanceHolder;
use crate::registry::FactoryRecord;
use crate::target::AnyArc;
use crate::validation::ServiceArgs;

/// Runs a record's target and its lifecycle hooks.
///
/// A target that used [`FactoryContext::inject_now`] against a dependency that
/// was not ready yet fails its attempt with the `DependencyPending` sentinel.
/// The instantiator then awaits every dependency scheduled during that attempt
/// and runs the target again, up to `max_retries` times. A target that still
/// reports pending dependencies after that is a definition error: the edge
/// needs deferred injection.
///
/// Destroy listeners registered by an attempt are handed to the holder only
/// when that attempt builds and initializes successfully.
pub(crate) struct ServiceInstantiator {
    max_retries: usize,
}

impl ServiceInstantiator {
    pub(crate) fn new(max_retries: usize) -> Self {
        Self { max_retries }
    }

    pub(crate) async fn instantiate(
        &self,
        ctx: &FactoryContext,
        holder: &InstanceHolder,
        record: &FactoryRecord,
        args: ServiceArgs,
    ) -> DiResult<AnyArc> {
        let mut attempt = 0;
        let built = loop {
            let outcome = AssertUnwindSafe(record.target.build(ctx, args.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panic_error(ctx.name(), payload)));

            match outcome {
                Ok(built) => break built,
                Err(err) if err.is_pending() => {
                    drop(ctx.take_listeners());
                    let pending = ctx.take_pending();
                    if pending.is_empty() || attempt >= self.max_retries {
                        tracing::error!(
                            name = %ctx.name(),
                            attempts = attempt + 1,
                            "dependencies still pending after retries; use deferred injection for this edge"
                        );
                        return Err(DiError::Definition(format!(
                            "{} still had pending dependencies after {} attempts; inject them with `defer` instead",
                            ctx.name(),
                            attempt + 1
                        )));
                    }
                    attempt += 1;
                    tracing::debug!(name = %ctx.name(), attempt, pending = pending.len(), "awaiting pending dependencies");
                    for result in join_all(pending).await {
                        result?;
                    }
                }
                Err(err) => return Err(err),
            }
        };

        let listeners = ctx.take_listeners();
        if let Some(hooks) = built.hooks {
            AssertUnwindSafe(hooks.on_init())
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panic_error(ctx.name(), payload)))?;
            holder.adopt_destroy(listeners);
            holder.push_async_destroy(move || async move { hooks.on_destroy().await });
        } else {
            holder.adopt_destroy(listeners);
        }
        Ok(built.instance)
    }
}

fn panic_error(name: &str, payload: Box<dyn std::any::Any + Send>) -> DiError {
    let message = payload
        .downcast_ref::<&'static str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    DiError::unknown(format!("construction of {} panicked: {}", name, message))
}
