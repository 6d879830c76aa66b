use async_trait::async_trait;
use ferrous_locator::{
    Container, DiError, DiResult, FactoryContext, HolderStatus, Injectable, Scope, ServiceArgs, Target,
    Token, TypedSchema,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Clock;

#[async_trait]
impl Injectable for Clock {
    async fn construct(_ctx: &FactoryContext, _args: ServiceArgs) -> DiResult<Self> {
        Ok(Clock)
    }
}

#[tokio::test]
async fn test_basic_singleton_identity() {
    let container = Container::new();
    let token = container.registry().register_class::<Clock>(Scope::Singleton);

    let first = container.get(&token).await.unwrap();
    let second = container.get(&token).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_transient_creates_new_instances() {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();
    let token = Token::<usize>::new("Ticket");

    let container = Container::new();
    container
        .registry()
        .register_factory(&token, Scope::Transient, move |_: FactoryContext, _: ServiceArgs| {
            let counter = counter_clone.clone();
            async move { Ok::<_, DiError>(counter.fetch_add(1, Ordering::SeqCst)) }
        });

    let a = container.get(&token).await.unwrap();
    let b = container.get(&token).await.unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!((*a, *b), (0, 1));
    // never cached
    assert!(container.singletons().is_empty());
    assert!(container.try_get_sync(&token).is_none());
}

#[tokio::test]
async fn test_factory_with_dependencies() {
    struct Config {
        port: u16,
    }

    struct Server {
        config: Arc<Config>,
        name: String,
    }

    let config = Token::<Config>::new("Config");
    let server = Token::<Server>::new("Server");

    let container = Container::new();
    container
        .registry()
        .register_factory(&config, Scope::Singleton, |_: FactoryContext, _: ServiceArgs| async {
            Ok::<_, DiError>(Config { port: 8080 })
        });
    let config_dep = config.clone();
    container
        .registry()
        .register_factory(&server, Scope::Singleton, move |ctx: FactoryContext, _: ServiceArgs| {
            let config = config_dep.clone();
            async move {
                Ok::<_, DiError>(Server {
                    config: ctx.inject(&config).await?,
                    name: "MyServer".to_string(),
                })
            }
        });

    let resolved = container.get(&server).await.unwrap();
    assert_eq!(resolved.config.port, 8080);
    assert_eq!(resolved.name, "MyServer");

    let snapshot = container.snapshot();
    let server_entry = snapshot.iter().find(|s| s.name == server.identity()).unwrap();
    assert_eq!(server_entry.dependencies, vec![config.identity()]);
    assert_eq!(server_entry.status, HolderStatus::Created);
}

#[tokio::test]
async fn test_arguments_extend_the_instance_name() {
    let token = Token::<String>::new("Greeter");
    let container = Container::new();
    container
        .registry()
        .register_factory(&token, Scope::Singleton, |_: FactoryContext, args: ServiceArgs| async move {
            let who: Option<String> = args.field("who")?;
            Ok::<_, DiError>(format!("hi {}", who.unwrap_or_default()))
        });

    let crab = container.get_with(&token, json!({ "who": "crab" })).await.unwrap();
    let crab_again = container.get_with(&token, json!({ "who": "crab" })).await.unwrap();
    let fish = container.get_with(&token, json!({ "who": "fish" })).await.unwrap();

    assert!(Arc::ptr_eq(&crab, &crab_again));
    assert!(!Arc::ptr_eq(&crab, &fish));
    assert_eq!(
        container.singletons().names(),
        vec![
            format!("{}:who=crab", token.identity()),
            format!("{}:who=fish", token.identity()),
        ]
    );
}

#[tokio::test]
async fn test_bound_token_shares_registration() {
    let token = Token::<u16>::new("Port");
    let container = Container::new();
    container
        .registry()
        .register_factory(&token, Scope::Singleton, |_: FactoryContext, args: ServiceArgs| async move {
            Ok::<_, DiError>(args.field::<u16>("port")?.unwrap_or(80))
        });

    let https = token.bound(json!({ "port": 443 }));
    assert_eq!(*container.get(&https).await.unwrap(), 443);
    assert_eq!(*container.get(&token).await.unwrap(), 80);
}

#[tokio::test]
async fn test_factory_token_arguments_resolve_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let base = Token::<String>::new("Dsn");
    let token = base.with_factory_args(move || {
        let calls = calls_clone.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "host": "db.internal" }))
        }
    });

    let container = Container::new();
    container
        .registry()
        .register_factory(&base, Scope::Singleton, |_: FactoryContext, args: ServiceArgs| async move {
            Ok::<_, DiError>(args.field::<String>("host")?.unwrap_or_default())
        });

    assert!(container.try_get_sync(&token).is_none());
    let first = container.get(&token).await.unwrap();
    let second = container.get(&token).await.unwrap();
    assert_eq!(*first, "db.internal");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&container.try_get_sync(&token).unwrap(), &first));
}

#[tokio::test]
async fn test_schema_validation_error() {
    #[derive(Deserialize)]
    #[allow(dead_code)]
    struct PoolArgs {
        size: u32,
    }

    let token = Token::<u32>::new("Pool").with_schema(TypedSchema::<PoolArgs>::new());
    let container = Container::new();
    container
        .registry()
        .register_factory(&token, Scope::Singleton, |_: FactoryContext, args: ServiceArgs| async move {
            Ok::<_, DiError>(args.field::<u32>("size")?.unwrap_or(1))
        });

    assert_eq!(*container.get_with(&token, json!({ "size": 4 })).await.unwrap(), 4);
    let err = container.get_with(&token, json!({ "size": "big" })).await.unwrap_err();
    assert!(matches!(err, DiError::Validation(_)));
}

#[tokio::test]
async fn test_missing_registration() {
    let container = Container::new();
    let token = Token::<Clock>::new("Unregistered");
    assert!(!container.is_registered(&token));
    let err = container.get(&token).await.unwrap_err();
    assert!(matches!(err, DiError::FactoryNotFound(name) if name == token.identity()));
}

#[tokio::test]
async fn test_type_mismatch_is_reported() {
    let token = Token::<String>::new("Label");
    let container = Container::new();
    // The record produces a u32 although the token promises a String
    container.registry().set(
        &token,
        Scope::Singleton,
        Target::factory(|_: FactoryContext, _: ServiceArgs| async { Ok::<_, DiError>(7u32) }),
        0,
    );

    let err = container.get(&token).await.unwrap_err();
    assert!(matches!(err, DiError::TypeMismatch { ref name, .. } if *name == token.identity()));
}

#[tokio::test]
async fn test_tokens_compare_by_identity_not_name() {
    let registered = Token::<u32>::new("Number");
    let container = Container::new();
    container
        .registry()
        .register_factory(&registered, Scope::Singleton, |_: FactoryContext, _: ServiceArgs| async {
            Ok::<_, DiError>(7u32)
        });

    let same_name = Token::<u32>::new("Number");
    assert!(matches!(container.get(&same_name).await, Err(DiError::FactoryNotFound(_))));
    assert_eq!(*container.get(&registered).await.unwrap(), 7);
}

#[tokio::test]
async fn test_lifecycle_hooks_run_once() {
    static INITS: AtomicUsize = AtomicUsize::new(0);
    static DESTROYS: AtomicUsize = AtomicUsize::new(0);

    struct Connection;

    #[async_trait]
    impl Injectable for Connection {
        async fn construct(_ctx: &FactoryContext, _args: ServiceArgs) -> DiResult<Self> {
            Ok(Connection)
        }

        async fn on_service_init(&self) -> DiResult<()> {
            INITS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_service_destroy(&self) {
            DESTROYS.fetch_add(1, Ordering::SeqCst);
        }
    }

    let container = Container::new();
    let token = container.registry().register_class::<Connection>(Scope::Singleton);
    container.get(&token).await.unwrap();
    container.get(&token).await.unwrap();
    assert_eq!(INITS.load(Ordering::SeqCst), 1);

    container.dispose().await;
    assert_eq!(DESTROYS.load(Ordering::SeqCst), 1);
    assert!(container.singletons().is_empty());
}

#[tokio::test]
async fn test_failing_init_hook_fails_construction() {
    #[derive(Debug)]
    struct Broken;

    #[async_trait]
    impl Injectable for Broken {
        async fn construct(_ctx: &FactoryContext, _args: ServiceArgs) -> DiResult<Self> {
            Ok(Broken)
        }

        async fn on_service_init(&self) -> DiResult<()> {
            Err(DiError::unknown("refused to start"))
        }
    }

    let container = Container::new();
    let token = container.registry().register_class::<Broken>(Scope::Singleton);
    let err = container.get(&token).await.unwrap_err();
    assert_eq!(err.to_string(), "refused to start");
}

#[tokio::test]
#[should_panic(expected = "failed to resolve")]
async fn test_get_required_panics() {
    let container = Container::new();
    let token = Token::<Clock>::new("Nope");
    container.get_required(&token).await;
}

#[tokio::test]
async fn test_inject_with_and_explicit_class_token() {
    struct Shard(u32);
    struct Router {
        shards: Vec<Arc<Shard>>,
        fallback: ferrous_locator::Deferred<Shard>,
    }

    #[async_trait]
    impl Injectable for Router {
        async fn construct(ctx: &FactoryContext, _args: ServiceArgs) -> DiResult<Self> {
            let shard = Token::<Shard>::of();
            let mut shards = Vec::new();
            for n in 0..3u32 {
                shards.push(ctx.inject_with(&shard, json!({ "n": n })).await?);
            }
            Ok(Router {
                shards,
                fallback: ctx.defer_with(&shard, json!({ "n": 99 })),
            })
        }
    }

    let container = Container::new();
    container
        .registry()
        .register_factory(&Token::<Shard>::of(), Scope::Singleton, |_: FactoryContext, args: ServiceArgs| async move {
            Ok::<_, DiError>(Shard(args.field::<u32>("n")?.unwrap_or_default()))
        });
    let router = Token::<Router>::new("PrimaryRouter");
    container
        .registry()
        .register_class_as::<Router>(&router, Scope::Singleton, 5);
    assert_eq!(container.registry().get(&router).unwrap().priority, 5);

    let resolved = container.get(&router).await.unwrap();
    let ids: Vec<u32> = resolved.shards.iter().map(|s| s.0).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(container.singletons().len(), 4);

    assert_eq!(resolved.fallback.get().await.unwrap().0, 99);
    let second = container
        .get_with(&Token::<Shard>::of(), json!({ "n": 1 }))
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&second, &resolved.shards[1]));

    // Dropping a shard cascades to the router through the recorded dependency
    container
        .invalidate(&format!("{}:n=1", Token::<Shard>::of().identity()))
        .await;
    assert!(container.try_get_sync(&router).is_none());
}
