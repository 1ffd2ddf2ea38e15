//! Benchmark-only crate; see the `benches/` targets.
