//! Benchmarks for container fan-out and pipeline unwinding.

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;
use unitflow::container::Container;
use unitflow::pipeline::{fan_out, Action, ForEachContainer, Pipeline};
use unitflow::{ProvisionError, Result};

fn batch(size: usize) -> Vec<Container> {
    (0..size).map(|_| Container::new("bench", "web")).collect()
}

/// Tags the container, failing for one named index.
struct Tag {
    fail_at: Option<usize>,
}

#[async_trait]
impl Action<(), Container> for Tag {
    fn name(&self) -> &str {
        "tag"
    }

    async fn forward(&self, _args: &(), previous: Container) -> Result<Container> {
        let mut container = previous;
        if self.fail_at == container.image.parse::<usize>().ok() {
            return Err(ProvisionError::runtime("tag failed"));
        }
        container.routable = true;
        Ok(container)
    }

    async fn backward(&self, _args: &(), result: &Container) {
        black_box(result.routable);
    }
}

fn indexed(size: usize) -> Vec<Container> {
    batch(size)
        .into_iter()
        .enumerate()
        .map(|(i, mut c)| {
            c.image = i.to_string();
            c
        })
        .collect()
}

fn fan_out_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fan_out");
    for size in [8_usize, 64, 512] {
        for workers in [0_usize, 4] {
            group.bench_with_input(
                BenchmarkId::new(format!("workers_{workers}"), size),
                &size,
                |b, &size| {
                    b.iter(|| {
                        rt.block_on(async {
                            let mut containers = batch(size);
                            let report = fan_out(&mut containers, workers, true, |c, sink| async move {
                                sink.push(c.clone());
                                Ok(c)
                            })
                            .await;
                            black_box(report.is_success())
                        })
                    });
                },
            );
        }
    }
    group.finish();
}

fn unwind_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("for_each_unwind");
    for size in [8_usize, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let pipeline = Pipeline::new("bench")
                        .then(ForEachContainer::new(Tag { fail_at: None }))
                        .then(ForEachContainer::new(Tag {
                            fail_at: Some(size / 2),
                        }));
                    black_box(pipeline.execute(&(), indexed(size)).await.is_err())
                })
            });
        });
    }
    group.finish();
}

criterion_group!(benches, fan_out_benchmark, unwind_benchmark);
criterion_main!(benches);
