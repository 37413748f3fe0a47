use criterion::measurement::WallTime;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkGroup, Criterion};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tribuf::{locking, lockfree, padded, Consumer, Producer, Strategy};

/// Run a benchmark while an antagonist thread hammers the other half
fn under_contention<R>(mut antagonist: impl FnMut() + Send, benchmark: impl FnOnce() -> R) -> R {
    let stop = AtomicBool::new(false);
    thread::scope(|scope| {
        scope.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                antagonist();
            }
        });
        let result = benchmark();
        stop.store(true, Ordering::Relaxed);
        result
    })
}

fn bench_strategy<S>(group: &mut BenchmarkGroup<'_, WallTime>)
where
    S: Strategy<u32> + Default,
    S::Input: Send,
    S::Output: Send,
{
    let name = S::NAME;

    {
        let (mut input, mut output) = S::default().split();
        group.bench_function(format!("{name}/clean read"), |b| {
            b.iter(|| {
                black_box(output.fetch());
            })
        });
        group.bench_function(format!("{name}/write"), |b| {
            b.iter(|| input.write(black_box(0)))
        });
        group.bench_function(format!("{name}/write and dirty read"), |b| {
            b.iter(|| {
                input.write(black_box(0));
                black_box(output.fetch());
            })
        });
    }

    {
        let (mut input, mut output) = S::default().split();
        under_contention(
            || input.write(black_box(0)),
            || {
                group.bench_function(format!("{name}/contended read"), |b| {
                    b.iter(|| {
                        black_box(output.fetch());
                    })
                });
            },
        );
    }

    {
        let (mut input, mut output) = S::default().split();
        under_contention(
            || {
                black_box(output.fetch());
            },
            || {
                group.bench_function(format!("{name}/contended write"), |b| {
                    b.iter(|| input.write(black_box(0)))
                });
            },
        );
    }
}

pub fn benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("triple buffer");
    bench_strategy::<locking::TripleBuffer<u32>>(&mut group);
    bench_strategy::<lockfree::TripleBuffer<u32>>(&mut group);
    bench_strategy::<padded::TripleBuffer<u32>>(&mut group);
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
