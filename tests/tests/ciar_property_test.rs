//! Property tests over the CIAR scoring invariants.

use chrono::{Duration, Utc};
use proptest::prelude::*;

use strata_core::ciar::CiarScorer;
use strata_core::models::Fact;

proptest! {
    /// The stored score always tracks the component product within the
    /// 0.01 tolerance after construction and after access updates.
    #[test]
    fn score_tracks_component_product(
        certainty in 0.0f64..=1.0,
        impact in 0.0f64..=1.0,
        accesses in 0u64..50,
    ) {
        let mut fact = Fact::new("s1", "property fact").with_components(certainty, impact);
        for _ in 0..accesses {
            fact.mark_accessed();
        }
        prop_assert!((fact.ciar_score - fact.expected_score()).abs() <= 0.01);
    }

    /// Component bounds: certainty/impact in [0,1], age decay floored at
    /// the minimum, recency boost capped at 1 + max_boost.
    #[test]
    fn components_stay_in_their_ranges(
        certainty in -1.0f64..=2.0,
        impact in -1.0f64..=2.0,
        age_days in 0i64..2000,
        accesses in 0u64..10_000,
    ) {
        let scorer = CiarScorer::default();
        let mut fact = Fact::new("s1", "bounded fact")
            .with_components(certainty, impact)
            .with_extracted_at(Utc::now() - Duration::days(age_days));
        fact.access_count = accesses;

        let components = scorer.calculate_components(&fact);
        prop_assert!((0.0..=1.0).contains(&components.certainty));
        prop_assert!((0.0..=1.0).contains(&components.impact));
        prop_assert!(components.age_decay >= 0.1 - f64::EPSILON);
        prop_assert!(components.age_decay <= 1.0 + f64::EPSILON);
        prop_assert!(components.recency_boost >= 1.0);
        prop_assert!(components.recency_boost <= 1.3 + 1e-9);
        prop_assert!(
            (components.final_score
                - components.base_score * components.temporal_score).abs() < 1e-9
        );
    }

    /// Recency boost grows monotonically with access count.
    #[test]
    fn recency_boost_is_monotonic(a in 0u64..1000, b in 0u64..1000) {
        let scorer = CiarScorer::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(scorer.recency_boost(low) <= scorer.recency_boost(high) + 1e-12);
    }
}
