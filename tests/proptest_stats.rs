//! Property-based tests for location statistics, projection and domains.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use wafermap_rs::grid::build_domain;
use wafermap_rs::projector::{project, project_location};
use wafermap_rs::stats::compute;
use wafermap_rs::types::*;

fn code() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("0".to_string()),
        Just("1".to_string()),
        Just(String::new()),
        "[A-Z][0-9]{1,3}",
    ]
}

fn records(codes: Vec<String>) -> Vec<Arc<TestRecord>> {
    codes
        .into_iter()
        .map(|sb| Arc::new(TestRecord::new("B", "1", 0, 0, sb)))
        .collect()
}

proptest! {
    #[test]
    fn code_counts_sum_to_die_count(codes in prop::collection::vec(code(), 0..64)) {
        let stats = compute(&records(codes), 0, 0);
        let total: u32 = stats.code_counts.values().sum();
        prop_assert_eq!(total, stats.die_count);
    }

    #[test]
    fn failure_rate_matches_counts(codes in prop::collection::vec(code(), 1..64)) {
        let stats = compute(&records(codes), 0, 0);
        let expected = stats.failure_count as f64 / stats.die_count as f64;
        prop_assert!((stats.failure_rate - expected).abs() < 1e-12);
        let recorded: usize = stats.failure_records_by_code.values().map(Vec::len).sum();
        prop_assert_eq!(recorded as u32, stats.failure_count);
    }

    #[test]
    fn projection_all_is_identity(codes in prop::collection::vec(code(), 0..32), x in -50i32..50, y in -50i32..50) {
        let stats = compute(&records(codes), x, y);
        let mut map = WaferMap::new(DomainSource::BoundingBox);
        map.cells.insert(stats.key(), MapCell::observed(stats.clone()));
        map.cells.insert(CoordinateKey::new(x + 1, y), MapCell::empty(CoordinateKey::new(x + 1, y)));

        prop_assert_eq!(project(&map, &FilterMode::All), map);
        prop_assert_eq!(project_location(&stats, &FilterMode::All), stats);
    }

    #[test]
    fn projection_keeps_die_count(codes in prop::collection::vec(code(), 0..32), pick in code()) {
        let stats = compute(&records(codes), 0, 0);
        for mode in [FilterMode::PassOnly, FilterMode::FailOnly, FilterMode::SpecificCode(pick.clone())] {
            let view = project_location(&stats, &mode);
            prop_assert_eq!(view.die_count, stats.die_count);
            prop_assert!(view.failure_count <= view.die_count);
        }
    }

    #[test]
    fn reference_domain_has_unique_keys(
        coords in prop::collection::vec((-20i32..20, -20i32..20), 1..100),
    ) {
        let reference: Vec<ReferenceCoord> =
            coords.iter().map(|&(x, y)| ReferenceCoord::new(x, y)).collect();
        let unique: BTreeSet<(i32, i32)> = coords.iter().copied().collect();

        let mut reversed = reference.clone();
        reversed.reverse();

        let forward = build_domain(&reference, Vec::new(), u64::MAX).unwrap();
        let backward = build_domain(&reversed, Vec::new(), u64::MAX).unwrap();
        prop_assert_eq!(forward.len(), unique.len());
        prop_assert_eq!(forward, backward);
    }
}
