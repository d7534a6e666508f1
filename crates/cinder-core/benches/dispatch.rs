use cinder_core::{registry, BackendKind, Network, PrimitiveInst, PrimitiveKind, ShapeMode};
use cinder_runtime::{DataType, Engine, Format, Layout};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

fn range_instance(engine: &Arc<Engine>, network: &Arc<Network>, data_type: DataType, n: usize) -> PrimitiveInst {
    let start = match data_type {
        DataType::F32 => engine.attach_host(Layout::scalar(DataType::F32, Format::Bfyx), &[0.5f32], network.stream()),
        _ => engine.attach_host(Layout::scalar(DataType::I64, Format::Bfyx), &[0i64], network.stream()),
    }
    .unwrap();
    let output = engine.allocate(Layout::from_dims(data_type, Format::Bfyx, &[n])).unwrap();
    PrimitiveInst::new("range:bench", PrimitiveKind::RANGE, Arc::clone(network), vec![start], output)
}

fn benchmark_registry_lookup(c: &mut Criterion) {
    let map = registry::global();

    c.bench_function("registry_lookup_hit", |b| {
        b.iter(|| {
            map.lookup(
                black_box(PrimitiveKind::RANGE),
                BackendKind::Cpu,
                ShapeMode::Static,
                DataType::I32,
                Format::Bfzyx,
            )
            .unwrap();
        });
    });

    c.bench_function("registry_resolve_fallback", |b| {
        b.iter(|| {
            map.resolve(
                black_box(PrimitiveKind::RANGE),
                &[BackendKind::Device, BackendKind::Cpu],
                ShapeMode::Static,
                DataType::U8,
                Format::Bfwzyx,
            )
            .unwrap();
        });
    });
}

fn benchmark_range_execute(c: &mut Criterion) {
    let engine = Arc::new(Engine::default());
    let network = Arc::new(Network::new(Arc::clone(&engine)).unwrap());

    for (backend, data_type) in [
        (BackendKind::Cpu, DataType::I64),
        (BackendKind::Cpu, DataType::F32),
        (BackendKind::Device, DataType::F32),
    ] {
        let mut group = c.benchmark_group(format!("range_execute_{backend}_{data_type}"));

        for size in [1_000, 65_536, 1_000_000].iter() {
            group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &n| {
                let inst = range_instance(&engine, &network, data_type, n);
                let mut implementation = registry::global().create(&inst, backend).unwrap();

                b.iter(|| {
                    let event = implementation.execute(&[], &inst).unwrap();
                    event.wait();
                    black_box(event.id());
                });
            });
        }

        group.finish();
    }
}

criterion_group!(benches, benchmark_registry_lookup, benchmark_range_execute);
criterion_main!(benches);
