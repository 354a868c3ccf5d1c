//! PyO3 bindings for wafer map generation.

use pyo3::exceptions::{PyKeyError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;

use crate::assembler::{MapResult, Selection, Session};
use crate::error::EngineError;
use crate::grid;
use crate::ingest::RawTable;
use crate::types::{FieldValue, FilterMode, MapSummary, ReferenceCoord};

fn to_py_err(e: EngineError) -> PyErr {
    match e {
        EngineError::NoDataForSelection { .. } | EngineError::ReferenceSetNotFound(_) => {
            PyKeyError::new_err(e.to_string())
        }
        EngineError::Cancelled { .. } | EngineError::Io(_) => PyRuntimeError::new_err(e.to_string()),
        _ => PyValueError::new_err(e.to_string()),
    }
}

fn selection_from(batch: Option<String>, wafer: Option<String>) -> Selection {
    match (batch, wafer) {
        (Some(batch_id), Some(wafer_id)) => Selection::Wafer { batch_id, wafer_id },
        (Some(batch_id), None) => Selection::Batch(batch_id),
        _ => Selection::MergeAll,
    }
}

fn run(
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    batch: Option<String>,
    wafer: Option<String>,
    mode: &str,
    reference: Vec<(i32, i32)>,
) -> Result<MapResult, EngineError> {
    let table = RawTable::new(
        headers,
        rows.into_iter()
            .map(|row| row.into_iter().map(FieldValue::Text).collect())
            .collect(),
    );
    let mut session = Session::default();
    session.load_records(&table)?;
    session.set_reference(
        reference
            .into_iter()
            .map(|(x, y)| ReferenceCoord::new(x, y))
            .collect::<Vec<_>>(),
    );
    let mode: FilterMode = mode.parse().unwrap_or_default();
    session.generate(&selection_from(batch, wafer), &mode)
}

/// Build a wafer map from tabular rows and return it as JSON.
///
/// `batch` + `wafer` select one wafer, `batch` alone a whole batch, and
/// neither merges everything onto `reference`.
#[pyfunction]
#[pyo3(signature = (headers, rows, batch=None, wafer=None, mode="all", reference=Vec::new()))]
fn build_wafer_map_rs(
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    batch: Option<String>,
    wafer: Option<String>,
    mode: &str,
    reference: Vec<(i32, i32)>,
) -> PyResult<String> {
    let result = run(headers, rows, batch, wafer, mode, reference).map_err(to_py_err)?;
    result.map.to_json().map_err(|e| to_py_err(e.into()))
}

/// Same inputs as `build_wafer_map_rs`, returning only the summary.
#[pyfunction]
#[pyo3(signature = (headers, rows, batch=None, wafer=None, mode="all", reference=Vec::new()))]
fn summarize_rs(
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    batch: Option<String>,
    wafer: Option<String>,
    mode: &str,
    reference: Vec<(i32, i32)>,
) -> PyResult<MapSummary> {
    let result = run(headers, rows, batch, wafer, mode, reference).map_err(to_py_err)?;
    Ok((*result.summary).clone())
}

#[pyfunction]
fn intensity_rs(rate: f64, max_rate: f64) -> f64 {
    grid::intensity(rate, max_rate)
}

/// Python module: wafermap_rs
#[pymodule]
fn wafermap_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(build_wafer_map_rs, m)?)?;
    m.add_function(wrap_pyfunction!(summarize_rs, m)?)?;
    m.add_function(wrap_pyfunction!(intensity_rs, m)?)?;
    m.add_class::<MapSummary>()?;
    Ok(())
}
