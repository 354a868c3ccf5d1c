//! Coordinate domain construction and render intensity.

use std::collections::{BTreeMap, BTreeSet};

use crate::aggregate::coerce_coordinate;
use crate::error::{EngineError, Result};
use crate::ingest::RawTable;
use crate::logging::debug;
use crate::types::*;

/// Floor for the normalization ceiling so low rates keep visual contrast.
pub const MIN_INTENSITY_CEILING: f64 = 0.1;

/// The set of coordinates a map must cover.
#[derive(Clone, Debug, PartialEq)]
pub struct Domain {
    pub keys: BTreeSet<CoordinateKey>,
    pub source: DomainSource,
}

impl Domain {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &CoordinateKey) -> bool {
        self.keys.contains(key)
    }
}

/// Build the active domain.
///
/// A non-empty reference set is used verbatim (deduplicated). Otherwise the
/// inclusive bounding box of the observed locations is filled in, refusing
/// boxes larger than `max_cells`.
pub fn build_domain<I>(reference: &[ReferenceCoord], observed: I, max_cells: u64) -> Result<Domain>
where
    I: IntoIterator<Item = CoordinateKey>,
{
    if !reference.is_empty() {
        let keys: BTreeSet<CoordinateKey> = reference.iter().map(ReferenceCoord::key).collect();
        debug!(reference = reference.len(), unique = keys.len(), "domain from reference grid");
        return Ok(Domain {
            keys,
            source: DomainSource::Reference,
        });
    }

    let mut bounds: Option<(i32, i32, i32, i32)> = None;
    for key in observed {
        bounds = Some(match bounds {
            None => (key.x, key.x, key.y, key.y),
            Some((x0, x1, y0, y1)) => (x0.min(key.x), x1.max(key.x), y0.min(key.y), y1.max(key.y)),
        });
    }

    let mut keys = BTreeSet::new();
    if let Some((x_min, x_max, y_min, y_max)) = bounds {
        let width = (x_max as i64 - x_min as i64 + 1) as u64;
        let height = (y_max as i64 - y_min as i64 + 1) as u64;
        let cells = width.saturating_mul(height);
        if cells > max_cells {
            return Err(EngineError::DomainTooLarge {
                cells,
                limit: max_cells,
            });
        }
        debug!(x_min, x_max, y_min, y_max, cells, "domain from bounding box");
        for x in x_min..=x_max {
            for y in y_min..=y_max {
                keys.insert(CoordinateKey::new(x, y));
            }
        }
    }

    Ok(Domain {
        keys,
        source: DomainSource::BoundingBox,
    })
}

fn is_axis_header(header: &str, axis: char) -> bool {
    let lower = header.trim().to_lowercase();
    lower == axis.to_string()
        || lower == format!("{axis}坐标")
        || (lower.contains(axis) && lower.contains("coord"))
}

/// Extract reference coordinates from a loosely-labelled table.
///
/// Column detection accepts `x`/`y`, `x坐标`/`y坐标`, or any header holding
/// the axis letter together with `coord`. A header is claimed by X first.
/// Rows whose values do not coerce to integers are skipped.
pub fn reference_from_table(table: &RawTable) -> Result<Vec<ReferenceCoord>> {
    let x_col = table.headers.iter().position(|h| is_axis_header(h, 'x'));
    let y_col = table
        .headers
        .iter()
        .enumerate()
        .position(|(idx, h)| Some(idx) != x_col && is_axis_header(h, 'y'));

    let (Some(x_col), Some(y_col)) = (x_col, y_col) else {
        return Err(EngineError::ReferenceColumnsNotFound {
            found: table.headers.clone(),
        });
    };

    let coords: Vec<ReferenceCoord> = table
        .rows
        .iter()
        .filter_map(|row| {
            let x = coerce_coordinate(row.get(x_col)?)?;
            let y = coerce_coordinate(row.get(y_col)?)?;
            Some(ReferenceCoord::new(x, y))
        })
        .collect();

    debug!(rows = table.rows.len(), coords = coords.len(), "reference coordinates extracted");
    Ok(coords)
}

/// Normalized failure intensity in `[0, 1]`.
///
/// `max_rate` is the highest rate in the current view; the ceiling never
/// drops below [`MIN_INTENSITY_CEILING`].
pub fn intensity(rate: f64, max_rate: f64) -> f64 {
    intensity_with_floor(rate, max_rate, MIN_INTENSITY_CEILING)
}

pub fn intensity_with_floor(rate: f64, max_rate: f64, floor: f64) -> f64 {
    let ceiling = max_rate.max(floor);
    if !rate.is_finite() || rate <= 0.0 || ceiling <= 0.0 {
        return 0.0;
    }
    (rate / ceiling).min(1.0)
}

/// Intensity of every cell relative to the map's own maximum rate.
pub fn intensity_map(map: &WaferMap, floor: f64) -> BTreeMap<CoordinateKey, f64> {
    let max_rate = map.max_failure_rate();
    map.cells
        .iter()
        .map(|(key, cell)| {
            let value = if cell.is_empty() {
                0.0
            } else {
                intensity_with_floor(cell.stats.failure_rate, max_rate, floor)
            };
            (*key, value)
        })
        .collect()
}
