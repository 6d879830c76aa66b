//! # ferrous-locator
//!
//! Async service locator with three lifetime scopes, cycle-tolerant deferred
//! injection and dependency-aware invalidation.
//!
//! ## Features
//!
//! - **Scopes**: Singleton, Request and Transient services
//! - **Deduplicated construction**: concurrent lookups of one instance share a single construction
//! - **Cycle handling**: deferred injection spans cycles, synchronous cycles fail fast with the path
//! - **Priority overrides**: higher-priority registrations shadow production bindings, parent registries layer underneath
//! - **Cascading invalidation**: destroying a service tears down everything that consumed it
//! - **Graceful shutdown**: `clear_all` destroys singletons in dependency order
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_locator::{Container, FactoryContext, Injectable, Scope, ServiceArgs, Token, DiResult};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! #[async_trait]
//! impl Injectable for Database {
//!     async fn construct(_ctx: &FactoryContext, args: ServiceArgs) -> DiResult<Self> {
//!         let url: Option<String> = args.field("url")?;
//!         Ok(Database { url: url.unwrap_or_else(|| "postgres://localhost".into()) })
//!     }
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! #[async_trait]
//! impl Injectable for UserService {
//!     async fn construct(ctx: &FactoryContext, _args: ServiceArgs) -> DiResult<Self> {
//!         Ok(UserService { db: ctx.inject(&Token::of()).await? })
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> DiResult<()> {
//! let container = Container::new();
//! container.registry().register_class::<Database>(Scope::Singleton);
//! container.registry().register_class::<UserService>(Scope::Transient);
//!
//! let users = container.get(&Token::<UserService>::of()).await?;
//! assert_eq!(users.db.url, "postgres://localhost");
//!
//! // Invalidating the database cascades to nothing cached here, since
//! // transients are never cached, but the next lookup builds a fresh one.
//! let db_name = Token::<Database>::of().instance_name_now()?;
//! container.invalidate(&db_name).await;
//! let again = container.get(&Token::<UserService>::of()).await?;
//! assert!(!Arc::ptr_eq(&users.db, &again.db));
//!
//! container.dispose().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Request Scope
//!
//! ```rust
//! use ferrous_locator::{Container, DiError, FactoryContext, Scope, ServiceArgs, Token, DiResult};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> DiResult<()> {
//! let request_id = Token::<String>::new("RequestId");
//! let container = Container::new();
//! container.registry().register_factory(&request_id, Scope::Request, |ctx: FactoryContext, _: ServiceArgs| async move {
//!     Ok::<_, DiError>(ctx.request_id().unwrap_or_default().to_string())
//! });
//!
//! let r1 = container.begin_request("r1")?;
//! let r2 = container.begin_request("r2")?;
//! assert_eq!(*r1.get(&request_id).await?, "r1");
//! assert_eq!(*r2.get(&request_id).await?, "r2");
//!
//! container.end_request("r1").await?;
//! container.end_request("r2").await?;
//! assert!(matches!(container.get(&request_id).await, Err(DiError::InstanceNotFound(_))));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod event_bus;
pub mod holder;
pub mod naming;
pub mod observer;
pub mod registry;
pub mod scope;
pub mod singletons;
pub mod target;
pub mod token;
pub mod traits;
pub mod validation;

mod deferred;
mod instantiator;
mod internal;

pub use config::{ClearOptions, ContainerConfig};
pub use container::{Container, ContainerBuilder, FactoryContext, RequestContext};
pub use deferred::Deferred;
pub use error::{DiError, DiResult, DynError};
pub use event_bus::{EventBus, LifecycleEvent, Subscription};
pub use holder::{HolderSnapshot, HolderStatus};
pub use naming::instance_name;
pub use observer::{ContainerObserver, LoggingObserver};
pub use registry::{FactoryRecord, Registry};
pub use scope::Scope;
pub use singletons::SingletonManager;
pub use target::{FactoryKind, Target};
pub use token::{Token, TokenId};
pub use traits::{Factory, Injectable};
pub use validation::{ArgumentSchema, ServiceArgs, TypedSchema, ValidationError};
