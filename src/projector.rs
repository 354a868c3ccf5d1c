//! Failure-code projection of a base wafer map.
//!
//! The base map is never mutated; every projection yields a fresh map.

use crate::stats::{is_pass_code, rate};
use crate::types::*;

/// Derive the display view of `base` under `mode`.
pub fn project(base: &WaferMap, mode: &FilterMode) -> WaferMap {
    WaferMap {
        cells: base
            .cells
            .iter()
            .map(|(key, cell)| (*key, project_cell(cell, mode)))
            .collect(),
        domain_source: base.domain_source,
        dropped_locations: base.dropped_locations,
        dropped_dies: base.dropped_dies,
    }
}

fn project_cell(cell: &MapCell, mode: &FilterMode) -> MapCell {
    if cell.is_empty() {
        return cell.clone();
    }
    MapCell {
        state: cell.state,
        stats: project_location(&cell.stats, mode),
    }
}

/// Project the statistics of a single location.
pub fn project_location(base: &LocationStatistics, mode: &FilterMode) -> LocationStatistics {
    let mut view = LocationStatistics {
        failure_count: 0,
        failure_rate: 0.0,
        failure_records_by_code: Default::default(),
        pass_count: None,
        ..base.clone()
    };

    match mode {
        FilterMode::All => {
            view.failure_count = base.failure_count;
            view.failure_rate = base.failure_rate;
            view.failure_records_by_code = base.failure_records_by_code.clone();
        }
        FilterMode::PassOnly => {
            let passed: u32 = PASS_CODES.iter().map(|c| base.code_count(c)).sum();
            view.pass_count = Some(passed);
            view.failure_count = base.die_count.saturating_sub(passed);
            view.failure_rate = rate(view.failure_count, base.die_count);
        }
        FilterMode::FailOnly => {
            view.failure_count = base.failure_count;
            view.failure_rate = base.failure_rate;
            view.failure_records_by_code = base
                .failure_records_by_code
                .iter()
                .filter(|(code, _)| !is_pass_code(code))
                .map(|(code, recs)| (code.clone(), recs.clone()))
                .collect();
        }
        FilterMode::SpecificCode(code) => {
            view.failure_count = base.code_count(code);
            view.failure_rate = rate(view.failure_count, base.die_count);
            if let Some(recs) = base.failure_records_by_code.get(code) {
                view.failure_records_by_code.insert(code.clone(), recs.clone());
            }
        }
    }
    view
}
