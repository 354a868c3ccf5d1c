//! Grouping of test records by die coordinate.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::logging::trace;
use crate::types::{CoordinateKey, FieldValue, TestRecord};

/// Records sharing one coordinate, in input order.
pub type CoordinateGroups = BTreeMap<CoordinateKey, Vec<Arc<TestRecord>>>;

/// Coerce one coordinate component to an integer.
///
/// Values must be finite, integral and fit in `i32`. Fractional positions
/// such as `"2.5"` are rejected rather than rounded, so the record is
/// dropped like any other malformed coordinate.
pub fn coerce_coordinate(value: &FieldValue) -> Option<i32> {
    if let FieldValue::Int(v) = value {
        return i32::try_from(*v).ok();
    }
    let v = value.as_f64()?;
    if !v.is_finite() || v.fract() != 0.0 || v < i32::MIN as f64 || v > i32::MAX as f64 {
        return None;
    }
    Some(v as i32)
}

/// The single place coordinates are read from a record.
pub fn coordinate_of(record: &TestRecord) -> Option<CoordinateKey> {
    let x = coerce_coordinate(&record.x)?;
    let y = coerce_coordinate(&record.y)?;
    Some(CoordinateKey::new(x, y))
}

/// Group records by coordinate. Malformed coordinates are skipped.
pub fn group_by_coordinate(records: &[Arc<TestRecord>]) -> CoordinateGroups {
    group_matching(records, |_| true)
}

/// Group the records accepted by `keep`.
pub fn group_matching<F>(records: &[Arc<TestRecord>], mut keep: F) -> CoordinateGroups
where
    F: FnMut(&TestRecord) -> bool,
{
    let mut groups = CoordinateGroups::new();
    for record in records.iter().filter(|r| keep(r)) {
        match coordinate_of(record) {
            Some(key) => groups.entry(key).or_default().push(Arc::clone(record)),
            None => {
                trace!(x = ?record.x, y = ?record.y, "dropping record with malformed coordinate");
            }
        }
    }
    groups
}
