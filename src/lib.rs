//! wafermap-rs: wafer map aggregation and caching engine with optional Python bindings.
//!
//! Per-die test records are grouped by coordinate, reduced to per-location
//! failure statistics, merged onto a reference (or bounding-box) die grid and
//! cached per selection and failure-code filter.

mod logging;

pub mod aggregate;
pub mod assembler;
pub mod cache;
pub mod chunked;
pub mod config;
pub mod error;
pub mod grid;
pub mod ingest;
pub mod projector;
pub mod stats;
pub mod types;

#[cfg(feature = "python")]
mod python;

pub use assembler::{MapResult, Selection, Session};
pub use error::{EngineError, Result};
