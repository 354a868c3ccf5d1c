//! Wafer map data types and structures.

#[cfg(feature = "python")]
use pyo3::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Column names (canonical spelling).
pub const COL_LOT: &str = "stlot";
pub const COL_TEST_STEP: &str = "teststep";
pub const COL_BATCH: &str = "asic";
pub const COL_WAFER: &str = "wafer";
pub const COL_X: &str = "X";
pub const COL_Y: &str = "Y";
pub const COL_HARD_BIN: &str = "HB";
pub const COL_SOFT_BIN: &str = "SB";
pub const COL_ASIC_ID: &str = "ASICID";

/// Columns every ingested table must provide, in reporting order.
pub const REQUIRED_COLUMNS: [&str; 9] = [
    COL_LOT,
    COL_TEST_STEP,
    COL_BATCH,
    COL_WAFER,
    COL_X,
    COL_Y,
    COL_HARD_BIN,
    COL_SOFT_BIN,
    COL_ASIC_ID,
];

/// Outcome codes that denote a passing die.
pub const PASS_CODES: [&str; 2] = ["0", "1"];

/// Outcome code substituted for an absent SB value.
pub const DEFAULT_OUTCOME_CODE: &str = "0";

/// Largest magnitude below which every integer is exactly representable in `f64`.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A raw cell value as handed over by the table reader.
///
/// Untagged so that `3`, `3.0`, `"3"` and `null` all deserialize.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
    #[default]
    Missing,
}

impl FieldValue {
    /// Numeric view of the value. Text is trimmed before parsing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
            FieldValue::Missing => None,
        }
    }

    /// Textual view of the value; integral floats render without a fraction.
    /// Past the exact-integer range of `f64` they keep their own rendering.
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Int(v) => v.to_string(),
            FieldValue::Float(v) if v.fract() == 0.0 && v.abs() < MAX_EXACT_INTEGER => {
                format!("{}", *v as i64)
            }
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Missing => String::new(),
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::Missing => true,
            _ => false,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

/// One tested die, in canonical shape.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TestRecord {
    pub lot: String,
    pub test_step: String,
    /// ASIC batch (the `asic` column).
    pub batch_id: String,
    pub wafer_id: String,
    pub x: FieldValue,
    pub y: FieldValue,
    pub hard_bin: String,
    /// Soft bin (the `SB` column), i.e. the outcome code.
    pub soft_bin: String,
    pub asic_id: String,
    /// Passthrough columns, preserved but not interpreted.
    pub extra: BTreeMap<String, FieldValue>,
}

impl TestRecord {
    /// Minimal record with only the fields the engine interprets.
    pub fn new(
        batch_id: impl Into<String>,
        wafer_id: impl Into<String>,
        x: impl Into<FieldValue>,
        y: impl Into<FieldValue>,
        soft_bin: impl Into<String>,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            wafer_id: wafer_id.into(),
            x: x.into(),
            y: y.into(),
            soft_bin: soft_bin.into(),
            ..Self::default()
        }
    }

    /// Outcome code with an absent value normalized to `"0"`.
    pub fn outcome_code(&self) -> &str {
        if self.soft_bin.is_empty() {
            DEFAULT_OUTCOME_CODE
        } else {
            &self.soft_bin
        }
    }
}

/// Integer die position used for grouping and lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoordinateKey {
    pub x: i32,
    pub y: i32,
}

impl CoordinateKey {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for CoordinateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for CoordinateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("invalid coordinate key '{s}'"))?;
        let x = x.trim().parse().map_err(|_| format!("invalid x in '{s}'"))?;
        let y = y.trim().parse().map_err(|_| format!("invalid y in '{s}'"))?;
        Ok(Self { x, y })
    }
}

// Keys serialize as "x,y" strings so maps stay valid JSON objects.
impl Serialize for CoordinateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CoordinateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One position of the authoritative die grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceCoord {
    #[serde(alias = "X")]
    pub x: i32,
    #[serde(alias = "Y")]
    pub y: i32,
}

impl ReferenceCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn key(&self) -> CoordinateKey {
        CoordinateKey::new(self.x, self.y)
    }
}

/// Per-coordinate failure statistics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LocationStatistics {
    pub x: i32,
    pub y: i32,
    pub die_count: u32,
    pub failure_count: u32,
    pub failure_rate: f64,
    pub code_counts: BTreeMap<String, u32>,
    pub failure_records_by_code: BTreeMap<String, Vec<Arc<TestRecord>>>,
    /// Only populated by the pass-only projection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_count: Option<u32>,
}

impl LocationStatistics {
    /// The canonical no-data statistic.
    pub fn empty(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            die_count: 0,
            failure_count: 0,
            failure_rate: 0.0,
            code_counts: BTreeMap::new(),
            failure_records_by_code: BTreeMap::new(),
            pass_count: None,
        }
    }

    pub fn key(&self) -> CoordinateKey {
        CoordinateKey::new(self.x, self.y)
    }

    pub fn code_count(&self, code: &str) -> u32 {
        self.code_counts.get(code).copied().unwrap_or(0)
    }
}

/// Whether a map cell carries observed dies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellState {
    Observed,
    Empty,
}

/// Where the coordinate domain of a map came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainSource {
    Reference,
    BoundingBox,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MapCell {
    pub state: CellState,
    #[serde(flatten)]
    pub stats: LocationStatistics,
}

impl MapCell {
    pub fn observed(stats: LocationStatistics) -> Self {
        Self {
            state: CellState::Observed,
            stats,
        }
    }

    pub fn empty(key: CoordinateKey) -> Self {
        Self {
            state: CellState::Empty,
            stats: LocationStatistics::empty(key.x, key.y),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state == CellState::Empty
    }
}

/// Position-indexed statistics over the full active domain.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WaferMap {
    pub cells: BTreeMap<CoordinateKey, MapCell>,
    pub domain_source: DomainSource,
    /// Observed locations that fell outside the domain.
    pub dropped_locations: usize,
    /// Dies at those dropped locations.
    pub dropped_dies: u64,
}

impl WaferMap {
    pub fn new(domain_source: DomainSource) -> Self {
        Self {
            cells: BTreeMap::new(),
            domain_source,
            dropped_locations: 0,
            dropped_dies: 0,
        }
    }

    pub fn get(&self, key: &CoordinateKey) -> Option<&MapCell> {
        self.cells.get(key)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cells with at least one observed die.
    pub fn observed(&self) -> impl Iterator<Item = &LocationStatistics> {
        self.cells
            .values()
            .filter(|c| !c.is_empty())
            .map(|c| &c.stats)
    }

    pub fn empty_count(&self) -> usize {
        self.cells.values().filter(|c| c.is_empty()).count()
    }

    /// Highest failure rate among observed cells (0 when none).
    pub fn max_failure_rate(&self) -> f64 {
        self.observed()
            .map(|s| s.failure_rate)
            .fold(0.0, f64::max)
    }

    /// JSON payload for an external renderer.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Which dies count as "failures" in a display view.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum FilterMode {
    #[default]
    All,
    PassOnly,
    FailOnly,
    SpecificCode(String),
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterMode::All => f.write_str("all"),
            FilterMode::PassOnly => f.write_str("pass"),
            FilterMode::FailOnly => f.write_str("fail"),
            FilterMode::SpecificCode(code) => f.write_str(code),
        }
    }
}

impl FromStr for FilterMode {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "all" => FilterMode::All,
            "pass" => FilterMode::PassOnly,
            "fail" => FilterMode::FailOnly,
            code => FilterMode::SpecificCode(code.to_string()),
        })
    }
}

/// Aggregate numbers for one map view.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[cfg_attr(feature = "python", pyclass(frozen))]
pub struct MapSummary {
    #[cfg_attr(feature = "python", pyo3(get))]
    pub total_dies: u64,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub total_failures: u64,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub overall_failure_rate: f64,
    /// Cells with observed dies.
    #[cfg_attr(feature = "python", pyo3(get))]
    pub location_count: usize,
    /// All cells in the domain, empty ones included.
    #[cfg_attr(feature = "python", pyo3(get))]
    pub domain_size: usize,
    #[cfg_attr(feature = "python", pyo3(get))]
    pub dropped_dies: u64,
    /// Die count per outcome code across observed cells.
    pub code_distribution: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_numeric_view() {
        assert_eq!(FieldValue::from(" 12 ").as_f64(), Some(12.0));
        assert_eq!(FieldValue::from(3).as_f64(), Some(3.0));
        assert_eq!(FieldValue::from("abc").as_f64(), None);
        assert_eq!(FieldValue::Missing.as_f64(), None);
    }

    #[test]
    fn test_field_value_text_view() {
        assert_eq!(FieldValue::Float(4.0).to_text(), "4");
        assert_eq!(FieldValue::Float(4.5).to_text(), "4.5");
        assert_eq!(FieldValue::Int(7).to_text(), "7");
        assert_eq!(FieldValue::Missing.to_text(), "");
    }

    #[test]
    fn test_large_float_ids_stay_distinct() {
        let a = FieldValue::Float(1e19).to_text();
        let b = FieldValue::Float(2e19).to_text();
        assert_ne!(a, b);
        assert_ne!(a, i64::MAX.to_string());
        assert_eq!(FieldValue::Float(-9.0e15).to_text(), "-9000000000000000");
        assert_eq!(FieldValue::Float(4_503_599_627_370_496.0).to_text(), "4503599627370496");
    }

    #[test]
    fn test_field_value_untagged_json() {
        let vals: Vec<FieldValue> = serde_json::from_str(r#"[1, 2.5, "x", null]"#).unwrap();
        assert_eq!(
            vals,
            vec![
                FieldValue::Int(1),
                FieldValue::Float(2.5),
                FieldValue::Text("x".into()),
                FieldValue::Missing
            ]
        );
    }

    #[test]
    fn test_outcome_code_defaults_to_pass() {
        let rec = TestRecord::new("A1", "1", 0, 0, "");
        assert_eq!(rec.outcome_code(), "0");
        let rec = TestRecord::new("A1", "1", 0, 0, "E7");
        assert_eq!(rec.outcome_code(), "E7");
    }

    #[test]
    fn test_coordinate_key_string_form() {
        let key = CoordinateKey::new(-3, 12);
        assert_eq!(key.to_string(), "-3,12");
        assert_eq!("-3, 12".parse::<CoordinateKey>().unwrap(), key);
        assert!("3".parse::<CoordinateKey>().is_err());
    }

    #[test]
    fn test_reference_coord_accepts_either_casing() {
        let lower: ReferenceCoord = serde_json::from_str(r#"{"x": 1, "y": 2}"#).unwrap();
        let upper: ReferenceCoord = serde_json::from_str(r#"{"X": 1, "Y": 2}"#).unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn test_filter_mode_string_form() {
        for mode in ["all", "pass", "fail", "C012"] {
            let parsed: FilterMode = mode.parse().unwrap();
            assert_eq!(parsed.to_string(), mode);
        }
        assert_eq!("pass".parse::<FilterMode>().unwrap(), FilterMode::PassOnly);
    }

    #[test]
    fn test_wafer_map_json_uses_string_keys() {
        let mut map = WaferMap::new(DomainSource::BoundingBox);
        map.cells.insert(CoordinateKey::new(1, 2), MapCell::empty(CoordinateKey::new(1, 2)));
        let json = map.to_json().unwrap();
        assert!(json.contains("\"1,2\""));
        assert!(json.contains("\"state\":\"empty\""));
    }
}
