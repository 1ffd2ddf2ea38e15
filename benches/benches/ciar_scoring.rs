//! CIAR scoring hot-path benchmarks.

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use strata_core::ciar::CiarScorer;
use strata_core::models::{Fact, FactType};

fn bench_calculate(c: &mut Criterion) {
    let scorer = CiarScorer::default();
    let mut fact = Fact::new("bench-session", "Customer prefers rail for the weekly flow")
        .with_components(0.9, 0.85)
        .with_type(FactType::Preference)
        .with_extracted_at(Utc::now() - Duration::days(3));
    fact.access_count = 7;

    c.bench_function("ciar_calculate", |b| {
        b.iter(|| black_box(scorer.calculate(black_box(&fact))));
    });

    c.bench_function("ciar_calculate_components", |b| {
        b.iter(|| black_box(scorer.calculate_components(black_box(&fact))));
    });
}

fn bench_certainty_inference(c: &mut Criterion) {
    let scorer = CiarScorer::default();
    let samples = [
        "I prefer morning departures on this corridor",
        "They usually clear customs within a day",
        "It might be cheaper to consolidate shipments",
        "A plain statement without any markers",
    ];

    c.bench_function("ciar_infer_certainty", |b| {
        b.iter(|| {
            for sample in &samples {
                black_box(scorer.infer_certainty(black_box(sample)));
            }
        });
    });
}

criterion_group!(benches, bench_calculate, bench_certainty_inference);
criterion_main!(benches);
