//! Map assembly: the session context that ties ingestion, aggregation,
//! domain construction, projection and caching together.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::aggregate::group_matching;
use crate::cache::{CacheValue, Namespace, ResultCache};
use crate::chunked::{CancelToken, ChunkProgress, ChunkedExecutor};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::grid::{build_domain, intensity_map, reference_from_table};
use crate::ingest::{normalize, RawTable, RecordBatch};
use crate::logging::{debug, info, warn};
use crate::projector::project;
use crate::stats::{compute_all, summarize};
use crate::types::*;

/// Which records a map is built from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Selection {
    /// One wafer of one batch.
    Wafer { batch_id: String, wafer_id: String },
    /// Every wafer of one batch, merged by coordinate.
    Batch(String),
    /// All records regardless of batch or wafer. Needs a reference grid.
    MergeAll,
}

impl Selection {
    pub fn wafer(batch_id: impl Into<String>, wafer_id: impl Into<String>) -> Self {
        Selection::Wafer {
            batch_id: batch_id.into(),
            wafer_id: wafer_id.into(),
        }
    }

    pub fn matches(&self, record: &TestRecord) -> bool {
        match self {
            Selection::Wafer { batch_id, wafer_id } => {
                record.batch_id == *batch_id && record.wafer_id == *wafer_id
            }
            Selection::Batch(batch_id) => record.batch_id == *batch_id,
            Selection::MergeAll => true,
        }
    }

    /// Composite key under which a projection of this selection is cached.
    ///
    /// Ids and codes are length-prefixed and every part is tagged, so two
    /// distinct `(selection, mode)` pairs never share a key.
    pub fn cache_key(&self, mode: &FilterMode) -> String {
        let mode = mode_tag(mode);
        match self {
            Selection::Wafer { batch_id, wafer_id } => {
                format!("wafer/{}/{}/{mode}", segment(batch_id), segment(wafer_id))
            }
            Selection::Batch(batch_id) => format!("batch/{}/{mode}", segment(batch_id)),
            Selection::MergeAll => format!("merged/{mode}"),
        }
    }
}

fn segment(part: &str) -> String {
    format!("{}:{part}", part.len())
}

fn mode_tag(mode: &FilterMode) -> String {
    match mode {
        FilterMode::All => "all".to_string(),
        FilterMode::PassOnly => "pass".to_string(),
        FilterMode::FailOnly => "fail".to_string(),
        FilterMode::SpecificCode(code) => format!("code={}", segment(code)),
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Wafer { batch_id, wafer_id } => {
                write!(f, "batch {batch_id} wafer {wafer_id}")
            }
            Selection::Batch(batch_id) => write!(f, "batch {batch_id}"),
            Selection::MergeAll => f.write_str("all records"),
        }
    }
}

/// A generated map view with its summary.
#[derive(Clone, Debug)]
pub struct MapResult {
    pub map: Arc<WaferMap>,
    pub summary: Arc<MapSummary>,
    /// True when the base statistics came from the cache.
    pub cached: bool,
}

/// Explicit session state: records, reference grid, configuration and cache.
pub struct Session {
    config: EngineConfig,
    records: RecordBatch,
    reference: Arc<[ReferenceCoord]>,
    cache: ResultCache,
    cancel: CancelToken,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        let cache = ResultCache::new(config.cache_ttl());
        Self {
            config,
            records: RecordBatch::default(),
            reference: Arc::from(Vec::new()),
            cache,
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn records(&self) -> &RecordBatch {
        &self.records
    }

    pub fn reference(&self) -> &[ReferenceCoord] {
        &self.reference
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Token that aborts an in-flight merge at its next chunk boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // ── Inputs ──────────────────────────────────────────────────────

    /// Normalize and load a raw table, replacing the current records.
    pub fn load_records(&mut self, table: &RawTable) -> Result<usize> {
        let batch = normalize(table)?;
        Ok(self.load_batch(batch))
    }

    pub fn load_batch(&mut self, batch: RecordBatch) -> usize {
        self.records = batch;
        self.invalidate_views();
        info!(records = self.records.len(), "record batch loaded");
        self.records.len()
    }

    /// Replace the active reference grid. An empty grid selects the
    /// bounding-box fallback for wafer and batch maps.
    pub fn set_reference(&mut self, coords: impl Into<Arc<[ReferenceCoord]>>) -> usize {
        self.reference = coords.into();
        self.invalidate_views();
        info!(coords = self.reference.len(), "reference grid set");
        self.reference.len()
    }

    pub fn load_reference_table(&mut self, table: &RawTable) -> Result<usize> {
        let coords = reference_from_table(table)?;
        Ok(self.set_reference(coords))
    }

    /// Keep a named reference set available for [`use_reference_set`](Self::use_reference_set).
    pub fn register_reference_set(&self, name: &str, coords: impl Into<Arc<[ReferenceCoord]>>) {
        self.cache
            .set_in(Namespace::ReferenceData, name, CacheValue::Reference(coords.into()), None);
    }

    pub fn use_reference_set(&mut self, name: &str) -> Result<usize> {
        let coords = self
            .cache
            .get_in(Namespace::ReferenceData, name)
            .and_then(|v| v.as_reference().cloned())
            .ok_or_else(|| EngineError::ReferenceSetNotFound(name.to_string()))?;
        Ok(self.set_reference(coords))
    }

    fn invalidate_views(&self) {
        self.cache.clear_in(Namespace::WaferMaps);
        self.cache.clear_in(Namespace::Statistics);
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn batch_ids(&self) -> Vec<String> {
        self.records.batch_ids()
    }

    pub fn wafer_ids(&self, batch_id: &str) -> Vec<String> {
        self.records.wafer_ids(batch_id)
    }

    pub fn failure_codes(&self) -> Vec<String> {
        self.records.failure_codes()
    }

    /// Render intensity of every cell, using the configured floor.
    pub fn intensities(&self, map: &WaferMap) -> BTreeMap<CoordinateKey, f64> {
        intensity_map(map, self.config.min_intensity_ceiling)
    }

    // ── Map generation ──────────────────────────────────────────────

    pub fn generate(&self, selection: &Selection, mode: &FilterMode) -> Result<MapResult> {
        self.generate_with(selection, mode, &mut |_| {})
    }

    /// Generate a map, calling `on_yield` between merge slices.
    ///
    /// Served from the cache when the same projection exists; otherwise a
    /// cached base map for the selection is re-projected, and only when that
    /// is missing too are the records aggregated again.
    ///
    /// Runs against the session's [`cancel_token`](Self::cancel_token). A
    /// cancel stays pending until a merge observes it, and is cleared once
    /// that run has stopped.
    pub fn generate_with(
        &self,
        selection: &Selection,
        mode: &FilterMode,
        on_yield: &mut dyn FnMut(ChunkProgress),
    ) -> Result<MapResult> {
        let result = self.generate_with_cancel(selection, mode, &self.cancel, on_yield);
        if matches!(result, Err(EngineError::Cancelled { .. })) {
            self.cancel.reset();
        }
        result
    }

    /// Like [`generate_with`](Self::generate_with), but aborted only by
    /// `cancel`. Concurrent callers each pass their own token.
    pub fn generate_with_cancel(
        &self,
        selection: &Selection,
        mode: &FilterMode,
        cancel: &CancelToken,
        on_yield: &mut dyn FnMut(ChunkProgress),
    ) -> Result<MapResult> {
        let key = selection.cache_key(mode);

        if let Some(map) = self.cached_map(&key) {
            debug!(key = %key, "serving cached map");
            let summary = self.summary_for(&key, &map);
            return Ok(MapResult {
                map,
                summary,
                cached: true,
            });
        }

        let base_key = selection.cache_key(&FilterMode::All);
        let (base, cached) = match self.cached_map(&base_key) {
            Some(base) => (base, true),
            None => {
                let base = Arc::new(self.assemble(selection, cancel, on_yield)?);
                self.cache
                    .set_in(Namespace::WaferMaps, &base_key, CacheValue::Map(Arc::clone(&base)), None);
                (base, false)
            }
        };

        let map = if *mode == FilterMode::All {
            base
        } else {
            let view = Arc::new(project(&base, mode));
            self.cache
                .set_in(Namespace::WaferMaps, &key, CacheValue::Map(Arc::clone(&view)), None);
            view
        };
        let summary = self.summary_for(&key, &map);

        info!(
            selection = %selection,
            mode = %mode,
            cells = map.len(),
            failures = summary.total_failures,
            "wafer map generated"
        );
        Ok(MapResult {
            map,
            summary,
            cached,
        })
    }

    /// One map per batch, skipping batches without records.
    pub fn generate_by_batch(
        &self,
        batch_ids: &[String],
        mode: &FilterMode,
    ) -> Result<Vec<(String, MapResult)>> {
        let mut maps = Vec::with_capacity(batch_ids.len());
        for batch_id in batch_ids {
            match self.generate(&Selection::Batch(batch_id.clone()), mode) {
                Ok(result) => maps.push((batch_id.clone(), result)),
                Err(EngineError::NoDataForSelection { .. }) => {
                    warn!(batch_id = %batch_id, "no records for batch, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(maps)
    }

    fn cached_map(&self, key: &str) -> Option<Arc<WaferMap>> {
        self.cache
            .get_in(Namespace::WaferMaps, key)
            .and_then(|v| v.as_map().cloned())
    }

    fn summary_for(&self, key: &str, map: &WaferMap) -> Arc<MapSummary> {
        if let Some(summary) = self
            .cache
            .get_in(Namespace::Statistics, key)
            .and_then(|v| v.as_summary().cloned())
        {
            return summary;
        }
        let summary = Arc::new(summarize(map));
        self.cache
            .set_in(Namespace::Statistics, key, CacheValue::Summary(Arc::clone(&summary)), None);
        summary
    }

    /// Aggregate the selected records and merge them onto the domain.
    fn assemble(
        &self,
        selection: &Selection,
        cancel: &CancelToken,
        on_yield: &mut dyn FnMut(ChunkProgress),
    ) -> Result<WaferMap> {
        if *selection == Selection::MergeAll && self.reference.is_empty() {
            return Err(EngineError::EmptyDomain);
        }
        if *selection != Selection::MergeAll
            && !self.records.records().iter().any(|r| selection.matches(r))
        {
            return Err(EngineError::NoDataForSelection {
                selection: selection.to_string(),
            });
        }

        let groups = group_matching(self.records.records(), |r| selection.matches(r));
        let mut stats = compute_all(&groups);
        let domain = build_domain(
            &self.reference,
            stats.keys().copied(),
            self.config.max_domain_cells,
        )?;
        debug!(
            locations = stats.len(),
            domain = domain.len(),
            "merging statistics onto domain"
        );

        let mut map = WaferMap::new(domain.source);
        let executor =
            ChunkedExecutor::new(self.config.chunk_size).with_cancel(cancel.clone());
        executor.run(
            domain.keys.iter(),
            |key| {
                let cell = match stats.remove(key) {
                    Some(s) => MapCell::observed(s),
                    None => MapCell::empty(*key),
                };
                map.cells.insert(*key, cell);
            },
            &mut *on_yield,
        )?;

        // Whatever was not claimed by the domain lies outside it.
        map.dropped_locations = stats.len();
        map.dropped_dies = stats.values().map(|s| s.die_count as u64).sum();
        if map.dropped_locations > 0 {
            debug!(
                locations = map.dropped_locations,
                dies = map.dropped_dies,
                "observed locations outside domain dropped"
            );
        }
        Ok(map)
    }
}
