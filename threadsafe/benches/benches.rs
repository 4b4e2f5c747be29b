use criterion::{criterion_group, criterion_main, Criterion};
use threadsafe::ThreadSafe;

fn count_to_1000_sync(b: &mut Criterion) {
    b.bench_function("count_to_1000_sync", |b| {
        let value = ThreadSafe::new(0u32).unwrap();

        b.iter(|| {
            value.sync(|v: &mut u32| *v = 0);

            for n in 0..1000u32 {
                value.sync(move |v: &mut u32| *v += n + 1);
            }

            let total = value.sync(|v: &u32| *v);
            assert_eq!(total, 500500);
            total
        });
    });
}

fn count_to_1000_spawn(b: &mut Criterion) {
    b.bench_function("count_to_1000_spawn", |b| {
        let value = ThreadSafe::new(0u32).unwrap();

        b.iter(|| {
            value.sync(|v: &mut u32| *v = 0);

            for n in 0..1000u32 {
                value.spawn(move |v: &mut u32| *v += n + 1).wait().unwrap();
            }

            let total = value.sync(|v: &u32| *v);
            assert_eq!(total, 500500);
            total
        });
    });
}

fn read_1000_spawn_batched(b: &mut Criterion) {
    b.bench_function("read_1000_spawn_batched", |b| {
        let value = ThreadSafe::new(1u32).unwrap();

        b.iter(|| {
            let handles = (0..1000)
                .map(|_| value.spawn(|v: &u32| *v))
                .collect::<Vec<_>>();

            let total = threadsafe::get_results(&handles)
                .unwrap()
                .into_iter()
                .sum::<u32>();

            assert_eq!(total, 1000);
            total
        });
    });
}

fn count_to_1000_rwlock(b: &mut Criterion) {
    b.bench_function("count_to_1000_rwlock", |b| {
        let value = parking_lot::RwLock::new(0u32);

        b.iter(|| {
            *value.write() = 0;

            for n in 0..1000u32 {
                *value.write() += n + 1;
            }

            let total = *value.read();
            assert_eq!(total, 500500);
            total
        });
    });
}

criterion_group!(
    benches,
    count_to_1000_sync,
    count_to_1000_spawn,
    read_1000_spawn_batched,
    count_to_1000_rwlock
);
criterion_main!(benches);
