//! Context-block rendering and filter parsing benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use strata_core::models::{ContextBlock, Fact, FactType, Role, Turn};
use strata_core::storage::filter::FilterExpr;

fn loaded_block() -> ContextBlock {
    let mut block = ContextBlock::new("bench-session", 0.6);
    for i in 0..20 {
        block.recent_turns.push(Turn::new(
            "bench-session",
            format!("t{i}"),
            if i % 2 == 0 { Role::User } else { Role::Assistant },
            format!("Turn {i} discussing rail capacity and customs windows"),
        ));
    }
    for i in 0..10 {
        let fact_type = if i == 0 {
            FactType::Instruction
        } else {
            FactType::Preference
        };
        block.significant_facts.push(
            Fact::new("bench-session", format!("Fact {i} about the corridor"))
                .with_components(0.9, 0.8)
                .with_type(fact_type),
        );
    }
    block
}

fn bench_prompt_rendering(c: &mut Criterion) {
    let block = loaded_block();
    c.bench_function("context_to_prompt_string", |b| {
        b.iter(|| black_box(block.to_prompt_string(black_box(false))));
    });

    let mut block = loaded_block();
    c.bench_function("context_token_estimate", |b| {
        b.iter(|| black_box(block.estimate_token_count()));
    });
}

fn bench_filter_parse(c: &mut Criterion) {
    let expression =
        "knowledge_type:='recommendation' && tags:=[rail,ocean] && confidence_score:>=0.7";
    c.bench_function("fulltext_filter_parse", |b| {
        b.iter(|| black_box(FilterExpr::parse(black_box(expression)).unwrap()));
    });

    let expr = FilterExpr::parse(expression).unwrap();
    let doc = serde_json::json!({
        "knowledge_type": "recommendation",
        "tags": ["rail"],
        "confidence_score": 0.9,
    });
    c.bench_function("fulltext_filter_match", |b| {
        b.iter(|| black_box(expr.matches(black_box(&doc))));
    });
}

criterion_group!(benches, bench_prompt_rendering, bench_filter_parse);
criterion_main!(benches);
