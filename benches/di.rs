use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ferrous_locator::*;
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_singleton_hit(c: &mut Criterion) {
    let rt = runtime();
    let token = Token::<u64>::new("Answer");
    let container = Container::new();
    container
        .registry()
        .register_factory(&token, Scope::Singleton, |_: FactoryContext, _: ServiceArgs| async {
            Ok::<_, DiError>(42u64)
        });
    rt.block_on(container.get(&token)).unwrap();

    c.bench_function("singleton_hit_u64", |b| {
        b.iter(|| black_box(rt.block_on(container.get(&token)).unwrap()))
    });

    c.bench_function("try_get_sync_hit", |b| {
        b.iter(|| black_box(container.try_get_sync(&token).unwrap()))
    });
}

fn bench_transient(c: &mut Criterion) {
    struct Payload {
        data: Vec<u64>,
    }

    let rt = runtime();
    let token = Token::<Payload>::new("Payload");
    let container = Container::new();
    container
        .registry()
        .register_factory(&token, Scope::Transient, |_: FactoryContext, _: ServiceArgs| async {
            Ok::<_, DiError>(Payload {
                data: (0..64).collect(),
            })
        });

    c.bench_function("transient_construct", |b| {
        b.iter(|| {
            let payload = rt.block_on(container.get(&token)).unwrap();
            black_box(payload.data.len())
        })
    });
}

fn bench_dependency_chain(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("dependency_chain");

    for depth in [1usize, 4, 16] {
        let container = Container::new();
        let tokens: Vec<Token<usize>> = (0..depth)
            .map(|i| Token::new(format!("Link{}", i)))
            .collect();

        for (i, token) in tokens.iter().enumerate() {
            let previous = i.checked_sub(1).map(|p| tokens[p].clone());
            container
                .registry()
                .register_factory(token, Scope::Singleton, move |ctx: FactoryContext, _: ServiceArgs| {
                    let previous = previous.clone();
                    async move {
                        let below = match previous {
                            Some(token) => *ctx.inject(&token).await?,
                            None => 0,
                        };
                        Ok::<_, DiError>(below + 1)
                    }
                });
        }

        let top = tokens[depth - 1].clone();
        group.bench_with_input(BenchmarkId::new("cold", depth), &depth, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let value = container.get(&top).await.unwrap();
                    container.clear_all(ClearOptions::default()).await;
                    black_box(*value)
                })
            })
        });
    }
    group.finish();
}

fn bench_request_scope(c: &mut Criterion) {
    let rt = runtime();
    let token = Token::<String>::new("Session");
    let container = Container::new();
    container
        .registry()
        .register_factory(&token, Scope::Request, |ctx: FactoryContext, _: ServiceArgs| async move {
            Ok::<_, DiError>(ctx.request_id().unwrap_or_default().to_string())
        });

    let mut counter = 0u64;
    c.bench_function("request_begin_get_end", |b| {
        b.iter(|| {
            counter += 1;
            let id = format!("req-{}", counter);
            rt.block_on(async {
                let request = container.begin_request(id.as_str()).unwrap();
                let session = request.get(&token).await.unwrap();
                request.end().await.unwrap();
                black_box(session)
            })
        })
    });
}

fn bench_argument_naming(c: &mut Criterion) {
    let args = json!({ "host": "db.internal", "port": 5432, "pool": { "min": 1, "max": 8 } });
    c.bench_function("instance_name_with_args", |b| {
        b.iter(|| black_box(naming::instance_name("Database(3)", Some(&args))))
    });
}

fn bench_concurrent_first_get(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    c.bench_function("concurrent_first_get_x16", |b| {
        b.iter(|| {
            rt.block_on(async {
                let token = Token::<u64>::new("Shared");
                let container = Container::new();
                container
                    .registry()
                    .register_factory(&token, Scope::Singleton, |_: FactoryContext, _: ServiceArgs| async {
                        Ok::<_, DiError>(7u64)
                    });
                let gets = (0..16).map(|_| container.get(&token));
                let values: Vec<Arc<u64>> = futures::future::try_join_all(gets).await.unwrap();
                black_box(values.len())
            })
        })
    });
}

criterion_group!(
    benches,
    bench_singleton_hit,
    bench_transient,
    bench_dependency_chain,
    bench_request_scope,
    bench_argument_naming,
    bench_concurrent_first_get
);
criterion_main!(benches);
