use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mensura_observation::{Observation, ObservationContext, ObservationHandler, ObservationRegistry};

// Run this benchmark with:
// cargo bench --bench observation

#[derive(Debug)]
struct CountingHandler;

impl ObservationHandler for CountingHandler {
    fn on_start(&self, context: &mut ObservationContext) {
        *context.compute_if_absent(|| 0u64) += 1;
    }

    fn supports_context(&self, _context: &ObservationContext) -> bool {
        true
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    let noop = ObservationRegistry::create();
    c.bench_function("NoopObservationLifecycle", |b| {
        b.iter(|| {
            let observation = Observation::start_new("bench", Some(&noop));
            observation.open_scope().close();
            observation.stop();
            black_box(observation);
        });
    });

    let registry = ObservationRegistry::create();
    registry
        .observation_config()
        .observation_handler(CountingHandler);
    c.bench_function("ObservationLifecycle", |b| {
        b.iter(|| {
            let observation = Observation::start_new("bench", Some(&registry));
            observation.low_cardinality_key_value("kind", "bench");
            observation.open_scope().close();
            observation.stop();
            black_box(observation);
        });
    });

    c.bench_function("NestedScopes", |b| {
        let observation = Observation::start_new("bench", Some(&registry));
        b.iter(|| {
            let outer = observation.open_scope();
            let inner = observation.open_scope();
            black_box(registry.current_observation());
            inner.close();
            outer.close();
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
      .warm_up_time(std::time::Duration::from_secs(1))
      .measurement_time(std::time::Duration::from_secs(2));
    targets = criterion_benchmark
}

criterion_main!(benches);
