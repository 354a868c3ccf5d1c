//! Per-location failure statistics and map-level summaries.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::aggregate::CoordinateGroups;
use crate::types::*;

/// `"0"` and `"1"` pass; every other code is a failure category.
#[inline]
pub fn is_pass_code(code: &str) -> bool {
    PASS_CODES.iter().any(|pass| *pass == code)
}

/// Failure rate with the zero-die case pinned to 0.
#[inline]
pub fn rate(failures: u32, dies: u32) -> f64 {
    if dies == 0 {
        0.0
    } else {
        failures as f64 / dies as f64
    }
}

/// Statistics for the dies at one coordinate, in a single pass.
pub fn compute(records: &[Arc<TestRecord>], x: i32, y: i32) -> LocationStatistics {
    let mut stats = LocationStatistics::empty(x, y);

    for record in records {
        let code = record.outcome_code();
        *stats.code_counts.entry(code.to_string()).or_insert(0) += 1;
        stats.die_count += 1;

        if !is_pass_code(code) {
            stats
                .failure_records_by_code
                .entry(code.to_string())
                .or_default()
                .push(Arc::clone(record));
            stats.failure_count += 1;
        }
    }

    stats.failure_rate = rate(stats.failure_count, stats.die_count);
    stats
}

/// Statistics for every group.
pub fn compute_all(groups: &CoordinateGroups) -> BTreeMap<CoordinateKey, LocationStatistics> {
    groups
        .iter()
        .map(|(key, records)| (*key, compute(records, key.x, key.y)))
        .collect()
}

/// Totals over the observed cells of a map view.
pub fn summarize(map: &WaferMap) -> MapSummary {
    let mut summary = MapSummary {
        domain_size: map.len(),
        dropped_dies: map.dropped_dies,
        ..MapSummary::default()
    };

    for stats in map.observed() {
        summary.total_dies += stats.die_count as u64;
        summary.total_failures += stats.failure_count as u64;
        summary.location_count += 1;
        for (code, count) in &stats.code_counts {
            *summary
                .code_distribution
                .entry(code.clone())
                .or_insert(0) += *count as u64;
        }
    }

    summary.overall_failure_rate = if summary.total_dies == 0 {
        0.0
    } else {
        summary.total_failures as f64 / summary.total_dies as f64
    };
    summary
}
