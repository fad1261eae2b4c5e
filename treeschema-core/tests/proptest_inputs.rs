//! Property-based tests for input normalisation using proptest.

use proptest::prelude::*;
use serde_json::json;

use treeschema_core::{Ids, LinkInput, LinkSpec, PollPolicy, Tags};

struct AnyKind;

// --- Ids ---

proptest! {
    #[test]
    fn ids_are_unique_and_keep_first_occurrence_order(raw in prop::collection::vec(1i64..50, 0..40)) {
        let ids: Ids<AnyKind> = raw.clone().into();
        let values = ids.as_slice();

        for (i, a) in values.iter().enumerate() {
            prop_assert!(!values[i + 1..].contains(a));
        }
        let mut expected = Vec::new();
        for v in raw {
            if !expected.contains(&v) {
                expected.push(v);
            }
        }
        prop_assert_eq!(values, expected.as_slice());
    }
}

// --- Tags ---

proptest! {
    #[test]
    fn tags_normalize_is_idempotent(raw in prop::collection::vec("[a-z]{1,8}( [a-z]{1,4})?", 0..12)) {
        let once = Tags::from(raw.clone()).normalize().unwrap();
        let twice = Tags::from(once.clone()).normalize().unwrap();
        prop_assert_eq!(&once, &twice);
        prop_assert!(once.len() <= raw.len());
    }

    #[test]
    fn tags_ignore_surrounding_whitespace(tag in "[a-z]{1,10}", pad in " {0,3}") {
        let padded = format!("{pad}{tag}{pad}");
        let tags = Tags::from(vec![padded, tag.clone()]).normalize().unwrap();
        prop_assert_eq!(tags, vec![tag]);
    }
}

// --- Links ---

proptest! {
    #[test]
    fn link_mapping_and_spec_shapes_agree(pairs in prop::collection::vec((1i64..1000, 1i64..1000), 1..10)) {
        let specs: Vec<LinkSpec> = pairs.iter().map(|&(s, t)| LinkSpec::new(s, t)).collect();
        let mappings = json!(pairs
            .iter()
            .map(|&(s, t)| json!({ "source_field_id": s, "target_field_id": t }))
            .collect::<Vec<_>>());

        let from_specs = LinkInput::from(specs).normalize().unwrap();
        let from_json = LinkInput::try_from(mappings).unwrap().normalize().unwrap();
        prop_assert_eq!(&from_specs, &from_json);

        let mut sorted = from_specs.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(sorted.len(), from_specs.len());
    }

    #[test]
    fn link_with_non_positive_id_is_rejected(s in -100i64..=0, t in 1i64..100) {
        prop_assert!(LinkInput::from(LinkSpec::new(s, t)).normalize().is_err());
        prop_assert!(LinkInput::from(LinkSpec::new(t, s)).normalize().is_err());
    }
}

// --- Poll policy ---

proptest! {
    #[test]
    fn poll_interval_is_monotonic_and_capped(
        initial in 1u64..5_000,
        max in 1u64..60_000,
        multiplier in 0.5f64..4.0,
        attempt in 0u32..30,
    ) {
        let policy = PollPolicy {
            initial_interval_ms: initial,
            max_interval_ms: max,
            multiplier,
            timeout_secs: 60.0,
        };
        let now = policy.interval_for(attempt);
        let next = policy.interval_for(attempt + 1);
        prop_assert!(next >= now);
        prop_assert!(now.as_millis() as u64 <= max.max(initial));
    }
}
