//! Namespaced in-memory result cache with lazy time-based expiry.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{EngineError, Result};
use crate::logging::{debug, warn};
use crate::types::{MapSummary, ReferenceCoord, WaferMap};

/// Default time-to-live: 30 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_millis(1_800_000);

/// Independent partitions of the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    WaferMaps,
    ReferenceData,
    Statistics,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [
        Namespace::WaferMaps,
        Namespace::ReferenceData,
        Namespace::Statistics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::WaferMaps => "waferMaps",
            Namespace::ReferenceData => "referenceData",
            Namespace::Statistics => "statistics",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waferMaps" | "wafer_maps" => Ok(Namespace::WaferMaps),
            "referenceData" | "reference_data" => Ok(Namespace::ReferenceData),
            "statistics" => Ok(Namespace::Statistics),
            other => Err(EngineError::UnknownNamespace(other.to_string())),
        }
    }
}

/// A cached value. Shared immutably; callers project rather than mutate.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheValue {
    Map(Arc<WaferMap>),
    Reference(Arc<[ReferenceCoord]>),
    Summary(Arc<MapSummary>),
}

impl CacheValue {
    pub fn as_map(&self) -> Option<&Arc<WaferMap>> {
        match self {
            CacheValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Arc<[ReferenceCoord]>> {
        match self {
            CacheValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_summary(&self) -> Option<&Arc<MapSummary>> {
        match self {
            CacheValue::Summary(s) => Some(s),
            _ => None,
        }
    }
}

struct CacheEntry {
    value: CacheValue,
    /// `None` when the TTL overflows the clock, i.e. never expires.
    expires_at: Option<Instant>,
}

type Partition = HashMap<String, CacheEntry>;

/// Result cache owned by a session.
///
/// Each namespace sits behind its own lock, so a reader sees either the old
/// or the new value of a key, never a partial write.
pub struct ResultCache {
    partitions: [Mutex<Partition>; 3],
    default_ttl: Duration,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ResultCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            partitions: Default::default(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn partition(&self, ns: Namespace) -> MutexGuard<'_, Partition> {
        // A poisoned lock still holds whole entries; keep serving them.
        self.partitions[ns.index()]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up `key`. Unknown namespaces log a warning and miss.
    pub fn get(&self, namespace: &str, key: &str) -> Option<CacheValue> {
        match namespace.parse::<Namespace>() {
            Ok(ns) => self.get_in(ns, key),
            Err(_) => {
                warn!(namespace, "cache read against unknown namespace");
                None
            }
        }
    }

    /// Store `value` under `key`; `ttl` defaults to the cache's default.
    pub fn set(
        &self,
        namespace: &str,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let ns: Namespace = namespace.parse()?;
        self.set_in(ns, key, value, ttl);
        Ok(())
    }

    pub fn clear(&self, namespace: &str) -> Result<()> {
        let ns: Namespace = namespace.parse()?;
        self.clear_in(ns);
        Ok(())
    }

    pub fn clear_all(&self) {
        for ns in Namespace::ALL {
            self.partition(ns).clear();
        }
        debug!("cleared all cache namespaces");
    }

    /// Expired entries are evicted here rather than by a sweeper.
    pub fn get_in(&self, ns: Namespace, key: &str) -> Option<CacheValue> {
        let mut part = self.partition(ns);
        let expired = match part.get(key) {
            None => {
                debug!(namespace = %ns, key, "cache miss");
                return None;
            }
            Some(entry) => entry.expires_at.is_some_and(|t| Instant::now() > t),
        };
        if expired {
            part.remove(key);
            debug!(namespace = %ns, key, "cache entry expired");
            return None;
        }
        debug!(namespace = %ns, key, "cache hit");
        part.get(key).map(|entry| entry.value.clone())
    }

    pub fn set_in(&self, ns: Namespace, key: &str, value: CacheValue, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires_at = Instant::now().checked_add(ttl);
        self.partition(ns).insert(key.to_string(), CacheEntry { value, expires_at });
        debug!(namespace = %ns, key, ttl_ms = ttl.as_millis() as u64, "cache set");
    }

    pub fn clear_in(&self, ns: Namespace) {
        self.partition(ns).clear();
        debug!(namespace = %ns, "cache namespace cleared");
    }

    /// Entries currently held, expired or not.
    pub fn len(&self, ns: Namespace) -> usize {
        self.partition(ns).len()
    }

    pub fn is_empty(&self, ns: Namespace) -> bool {
        self.len(ns) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DomainSource;
    use std::thread;

    fn map_value() -> CacheValue {
        CacheValue::Map(Arc::new(WaferMap::new(DomainSource::Reference)))
    }

    #[test]
    fn test_get_after_set() {
        let cache = ResultCache::default();
        cache.set("waferMaps", "A_1_all", map_value(), None).unwrap();
        assert_eq!(cache.get("waferMaps", "A_1_all"), Some(map_value()));
        assert_eq!(cache.get("waferMaps", "A_1_pass"), None);
    }

    #[test]
    fn test_expired_entry_is_evicted() {
        let cache = ResultCache::default();
        cache
            .set("waferMaps", "k", map_value(), Some(Duration::from_millis(1)))
            .unwrap();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get("waferMaps", "k"), None);
        assert_eq!(cache.len(Namespace::WaferMaps), 0);
    }

    #[test]
    fn test_unknown_namespace() {
        let cache = ResultCache::default();
        assert_eq!(cache.get("bogus", "k"), None);
        assert!(matches!(
            cache.set("bogus", "k", map_value(), None),
            Err(EngineError::UnknownNamespace(ns)) if ns == "bogus"
        ));
        assert!(cache.clear("bogus").is_err());
    }

    #[test]
    fn test_namespaces_are_independent() {
        let cache = ResultCache::default();
        cache.set("waferMaps", "k", map_value(), None).unwrap();
        cache
            .set("statistics", "k", CacheValue::Summary(Arc::default()), None)
            .unwrap();
        cache
            .set("referenceData", "k", CacheValue::Reference(Arc::from(vec![])), None)
            .unwrap();

        cache.clear("waferMaps").unwrap();
        assert!(cache.get("waferMaps", "k").is_none());
        assert!(cache.get("statistics", "k").is_some());
        assert!(cache.get("reference_data", "k").is_some());

        cache.clear_all();
        for ns in Namespace::ALL {
            assert!(cache.is_empty(ns));
        }
    }

    #[test]
    fn test_value_accessors() {
        let v = map_value();
        assert!(v.as_map().is_some());
        assert!(v.as_summary().is_none());
        assert!(v.as_reference().is_none());
    }

    #[test]
    fn test_concurrent_readers_see_whole_values() {
        let cache = Arc::new(ResultCache::default());
        cache.set("waferMaps", "k", map_value(), None).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..100 {
                        cache.set_in(Namespace::WaferMaps, "k", map_value(), None);
                        assert!(cache.get("waferMaps", "k").is_some());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
