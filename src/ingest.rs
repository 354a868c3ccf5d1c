//! Column normalization: raw header/row tables into canonical test records.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{EngineError, Result};
use crate::logging::{debug, info};
use crate::stats::is_pass_code;
use crate::types::*;

/// A delimited-file parse result: header names plus positional rows.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<FieldValue>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<FieldValue>>) -> Self {
        Self { headers, rows }
    }
}

/// Index of the first header equal to `name`, ignoring case and padding.
pub fn find_column(headers: &[String], name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
}

/// Header positions of the required columns, resolved once per table.
struct ColumnMap {
    required: [usize; REQUIRED_COLUMNS.len()],
    passthrough: Vec<(usize, String)>,
}

impl ColumnMap {
    fn resolve(headers: &[String]) -> Result<Self> {
        let mut required = [0usize; REQUIRED_COLUMNS.len()];
        let mut missing = Vec::new();

        for (slot, name) in required.iter_mut().zip(REQUIRED_COLUMNS) {
            match find_column(headers, name) {
                Some(idx) => *slot = idx,
                None => missing.push(name.to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(EngineError::MissingColumns {
                missing,
                found: headers.to_vec(),
            });
        }

        let claimed: HashSet<usize> = required.iter().copied().collect();
        let passthrough = headers
            .iter()
            .enumerate()
            .filter(|(idx, h)| {
                !claimed.contains(idx)
                    && !REQUIRED_COLUMNS
                        .iter()
                        .any(|r| h.trim().eq_ignore_ascii_case(r))
            })
            .map(|(idx, h)| (idx, h.clone()))
            .collect();

        Ok(Self {
            required,
            passthrough,
        })
    }

    fn build(&self, row: &[FieldValue]) -> TestRecord {
        let cell = |idx: usize| row.get(idx).cloned().unwrap_or_default();
        let text = |idx: usize| row.get(idx).map(FieldValue::to_text).unwrap_or_default();
        let [lot, step, batch, wafer, x, y, hb, sb, asic_id] = self.required;

        TestRecord {
            lot: text(lot),
            test_step: text(step),
            batch_id: text(batch),
            wafer_id: text(wafer),
            x: cell(x),
            y: cell(y),
            hard_bin: text(hb),
            soft_bin: text(sb),
            asic_id: text(asic_id),
            extra: self
                .passthrough
                .iter()
                .map(|(idx, name)| (name.clone(), cell(*idx)))
                .collect(),
        }
    }
}

/// An ingested, immutable set of records.
#[derive(Clone, Debug, Default)]
pub struct RecordBatch {
    records: Vec<Arc<TestRecord>>,
}

impl RecordBatch {
    pub fn new(records: Vec<TestRecord>) -> Self {
        Self {
            records: records.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn records(&self) -> &[Arc<TestRecord>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct non-empty batch ids, in first-seen order.
    pub fn batch_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .filter(|r| !r.batch_id.is_empty())
            .filter(|r| seen.insert(r.batch_id.as_str()))
            .map(|r| r.batch_id.clone())
            .collect()
    }

    /// Distinct non-empty wafer ids of one batch, numerically ordered when
    /// both sides are numbers.
    pub fn wafer_ids(&self, batch_id: &str) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .records
            .iter()
            .filter(|r| r.batch_id == batch_id && !r.wafer_id.is_empty())
            .map(|r| r.wafer_id.as_str())
            .collect();
        let mut wafers: Vec<String> = set.into_iter().map(str::to_string).collect();
        wafers.sort_by(|a, b| compare_wafer_ids(a, b));
        wafers
    }

    /// Sorted distinct failure codes. Empty when every die passed.
    pub fn failure_codes(&self) -> Vec<String> {
        let codes: BTreeSet<&str> = self
            .records
            .iter()
            .map(|r| r.outcome_code())
            .filter(|c| !is_pass_code(c))
            .collect();
        codes.into_iter().map(str::to_string).collect()
    }

    /// Die count per outcome code over the whole batch.
    pub fn code_histogram(&self) -> BTreeMap<String, u64> {
        let mut hist = BTreeMap::new();
        for rec in &self.records {
            *hist.entry(rec.outcome_code().to_string()).or_insert(0) += 1;
        }
        hist
    }
}

fn compare_wafer_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(na), Ok(nb)) => na.partial_cmp(&nb).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

/// Normalize a raw table into canonical records.
///
/// Every required column is matched case-insensitively; the first matching
/// header wins. Remaining headers are kept as passthrough fields.
pub fn normalize(table: &RawTable) -> Result<RecordBatch> {
    let columns = ColumnMap::resolve(&table.headers)?;
    debug!(
        headers = table.headers.len(),
        passthrough = columns.passthrough.len(),
        "columns resolved"
    );

    let records: Vec<TestRecord> = table.rows.iter().map(|row| columns.build(row)).collect();
    let batch = RecordBatch::new(records);

    info!(
        records = batch.len(),
        batches = batch.batch_ids().len(),
        failure_codes = batch.failure_codes().len(),
        "records normalized"
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn row(vals: &[&str]) -> Vec<FieldValue> {
        vals.iter().map(|v| FieldValue::from(*v)).collect()
    }

    const FULL: [&str; 10] = [
        "STLOT", "TestStep", "ASIC", "Wafer", "x", "y", "hb", "sb", "asicid", "Temp",
    ];

    #[test]
    fn test_normalize_case_insensitive() {
        let table = RawTable::new(
            headers(&FULL),
            vec![row(&["L1", "CP1", "A1", "3", "4", "5", "1", "C012", "ID9", "25C"])],
        );
        let batch = normalize(&table).unwrap();
        let rec = &batch.records()[0];
        assert_eq!(rec.lot, "L1");
        assert_eq!(rec.batch_id, "A1");
        assert_eq!(rec.wafer_id, "3");
        assert_eq!(rec.x, FieldValue::from("4"));
        assert_eq!(rec.soft_bin, "C012");
        assert_eq!(rec.extra.get("Temp"), Some(&FieldValue::from("25C")));
    }

    #[test]
    fn test_normalize_reports_missing_and_found() {
        let table = RawTable::new(headers(&["stlot", "asic", "X", "Y"]), vec![]);
        match normalize(&table) {
            Err(EngineError::MissingColumns { missing, found }) => {
                assert_eq!(missing, vec!["teststep", "wafer", "HB", "SB", "ASICID"]);
                assert_eq!(found, vec!["stlot", "asic", "X", "Y"]);
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn test_first_matching_header_wins() {
        let mut names = FULL.to_vec();
        names.push("SB");
        let table = RawTable::new(
            headers(&names),
            vec![row(&["L", "S", "A", "1", "0", "0", "1", "E1", "I", "t", "E2"])],
        );
        let batch = normalize(&table).unwrap();
        assert_eq!(batch.records()[0].soft_bin, "E1");
        // duplicate of a required column is not carried as passthrough
        assert!(!batch.records()[0].extra.contains_key("SB"));
    }

    #[test]
    fn test_short_rows_pad_missing() {
        let table = RawTable::new(headers(&FULL), vec![row(&["L", "S", "A", "1"])]);
        let batch = normalize(&table).unwrap();
        let rec = &batch.records()[0];
        assert_eq!(rec.x, FieldValue::Missing);
        assert_eq!(rec.outcome_code(), "0");
    }

    #[test]
    fn test_batch_and_wafer_listing() {
        let batch = RecordBatch::new(vec![
            TestRecord::new("B2", "10", 0, 0, "0"),
            TestRecord::new("B1", "2", 0, 0, "0"),
            TestRecord::new("B2", "9", 0, 0, "0"),
            TestRecord::new("", "1", 0, 0, "0"),
            TestRecord::new("B2", "10", 1, 0, "0"),
        ]);
        assert_eq!(batch.batch_ids(), vec!["B2", "B1"]);
        assert_eq!(batch.wafer_ids("B2"), vec!["9", "10"]);
    }

    #[test]
    fn test_failure_codes_never_fabricated() {
        let passing = RecordBatch::new(vec![
            TestRecord::new("B", "1", 0, 0, "0"),
            TestRecord::new("B", "1", 0, 1, "1"),
        ]);
        assert!(passing.failure_codes().is_empty());

        let failing = RecordBatch::new(vec![
            TestRecord::new("B", "1", 0, 0, "F123"),
            TestRecord::new("B", "1", 0, 1, "C012"),
            TestRecord::new("B", "1", 0, 2, "C012"),
        ]);
        assert_eq!(failing.failure_codes(), vec!["C012", "F123"]);
        assert_eq!(failing.code_histogram().get("C012"), Some(&2));
    }
}
