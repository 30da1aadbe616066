use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use garnet_core::backtrace::{Backtrace, BacktraceFormatter, RootInfo, SourceLocation, StackTraceElement};
use garnet_core::thread::{SafepointManager, ThreadManager};
use garnet_core::{Mutex, ObjectSpaceManager, RObject, SizedQueue, UnsizedQueue, Value, WeakMap};
use std::sync::Arc;
use std::time::Duration;

fn manager() -> Arc<ThreadManager> {
    Arc::new(ThreadManager::new(
        Arc::new(SafepointManager::new()),
        Duration::from_millis(10),
    ))
}

fn bench_mutex(c: &mut Criterion) {
    let threads = manager();
    let thread = threads.create_thread(None);
    let mutex = Mutex::new();

    c.bench_function("mutex_lock_unlock", |b| {
        b.iter(|| {
            mutex.lock(&thread).unwrap();
            mutex.unlock(&thread).unwrap();
        });
    });

    c.bench_function("mutex_synchronize", |b| {
        b.iter(|| mutex.synchronize(&thread, || Ok(black_box(1))).unwrap());
    });
}

fn bench_queues(c: &mut Criterion) {
    let threads = manager();
    let thread = threads.create_thread(None);
    let mut group = c.benchmark_group("queues");

    let unsized_queue = UnsizedQueue::new();
    group.bench_function("unsized_add_take", |b| {
        b.iter(|| {
            unsized_queue.add(black_box(7u64));
            unsized_queue.take(&thread).unwrap()
        });
    });

    for capacity in [1i64, 64] {
        let sized = SizedQueue::new(capacity).unwrap();
        group.bench_with_input(BenchmarkId::new("sized_put_take", capacity), &sized, |b, queue| {
            b.iter(|| {
                queue.put(&thread, black_box(7u64)).unwrap();
                queue.take(&thread).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_object_space(c: &mut Criterion) {
    let space = ObjectSpaceManager::new();
    let object = Value::Object(RObject::new("Object"));
    space.object_id(&object);

    c.bench_function("object_id_cached", |b| {
        b.iter(|| space.object_id(black_box(&object)));
    });

    c.bench_function("object_id_fixnum", |b| {
        b.iter(|| space.object_id(black_box(&Value::Integer(42))));
    });

    let map = WeakMap::new();
    let keys: Vec<Value> = (0..256).map(|_| Value::Object(RObject::new("Key"))).collect();
    for (i, key) in keys.iter().enumerate() {
        map.set(key.clone(), Value::Integer(i as i64));
    }
    c.bench_function("weak_map_get", |b| {
        b.iter(|| map.get(black_box(&keys[128])));
    });
}

fn bench_backtrace(c: &mut Criterion) {
    let elements: Vec<StackTraceElement> = (0..64)
        .map(|i| {
            StackTraceElement::new(
                RootInfo::ruby(&format!("method_{}", i)),
                Some(SourceLocation::new("app.rb", i + 1)),
            )
        })
        .collect();
    let formatter = BacktraceFormatter::default();

    c.bench_function("backtrace_materialize_and_format", |b| {
        b.iter(|| {
            let backtrace = Backtrace::lazy(black_box(elements.clone()), 1);
            formatter.format_backtrace(None, &backtrace)
        });
    });
}

criterion_group!(benches, bench_mutex, bench_queues, bench_object_space, bench_backtrace);
criterion_main!(benches);
