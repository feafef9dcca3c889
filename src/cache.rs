// Expired entries are evicted lazily by the `get` that finds them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheClass {
    Search,
    Paper,
    Bibtex,
}

impl CacheClass {
    pub const ALL: [CacheClass; 3] = [CacheClass::Search, CacheClass::Paper, CacheClass::Bibtex];

    pub fn ttl(self) -> Duration {
        match self {
            CacheClass::Search => Duration::from_secs(10 * 60),
            CacheClass::Paper => Duration::from_secs(60 * 60),
            CacheClass::Bibtex => Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CacheClass::Search => "search",
            CacheClass::Paper => "paper",
            CacheClass::Bibtex => "bibtex",
        }
    }
}

/// Derive a cache key from an operation and its arguments.
///
/// Argument names and values are trimmed and lower-cased and the pairs are
/// sorted, so the same logical request always lands on the same key.
pub fn cache_key(operation: &str, params: &[(&str, &str)]) -> String {
    let mut normalized: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                k.trim().to_lowercase(),
                v.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase(),
            )
        })
        .collect();
    normalized.sort();

    let mut input = operation.trim().to_lowercase();
    for (k, v) in &normalized {
        input.push('|');
        input.push_str(k);
        input.push('=');
        input.push_str(v);
    }
    format!("{}:{:x}", operation, md5::compute(input.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub class: CacheClass,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A single-class TTL store.
pub struct TtlCache<V> {
    class: CacheClass,
    ttl: Duration,
    entries: DashMap<String, Entry<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(class: CacheClass) -> Self {
        Self::with_ttl(class, class.ttl())
    }

    pub fn with_ttl(class: CacheClass, ttl: Duration) -> Self {
        Self {
            class,
            ttl,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `key`. An expired entry counts as a miss and is removed.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            // A concurrent set may have refreshed the entry since we looked.
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let now = Instant::now();
        let before = self.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            class: self.class,
            ttl_secs: self.ttl.as_secs(),
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            size: self.len(),
        }
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("class", &self.class)
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.len())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

/// The process-wide result cache: one [`TtlCache`] per class, holding
/// serialized payloads so any result type can be stored.
#[derive(Debug)]
pub struct Cache {
    search: TtlCache<serde_json::Value>,
    paper: TtlCache<serde_json::Value>,
    bibtex: TtlCache<serde_json::Value>,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            search: TtlCache::new(CacheClass::Search),
            paper: TtlCache::new(CacheClass::Paper),
            bibtex: TtlCache::new(CacheClass::Bibtex),
        }
    }
}

impl Cache {
    /// Build a cache whose classes all share `ttl`.
    #[cfg(test)]
    pub fn with_uniform_ttl(ttl: Duration) -> Self {
        Self {
            search: TtlCache::with_ttl(CacheClass::Search, ttl),
            paper: TtlCache::with_ttl(CacheClass::Paper, ttl),
            bibtex: TtlCache::with_ttl(CacheClass::Bibtex, ttl),
        }
    }

    pub fn class(&self, class: CacheClass) -> &TtlCache<serde_json::Value> {
        match class {
            CacheClass::Search => &self.search,
            CacheClass::Paper => &self.paper,
            CacheClass::Bibtex => &self.bibtex,
        }
    }

    pub fn get<T: DeserializeOwned>(&self, class: CacheClass, key: &str) -> Option<T> {
        let value = self.class(class).get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => {
                tracing::debug!(class = class.name(), key, "cache hit");
                Some(v)
            }
            Err(e) => {
                tracing::warn!(class = class.name(), key, "discarding undecodable cache entry: {}", e);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, class: CacheClass, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.class(class).set(key, v),
            Err(e) => tracing::warn!(class = class.name(), key, "not caching unserializable value: {}", e),
        }
    }

    pub fn purge_expired(&self) -> usize {
        CacheClass::ALL
            .into_iter()
            .map(|c| self.class(c).purge_expired())
            .sum()
    }

    pub fn stats(&self) -> Vec<CacheStats> {
        CacheClass::ALL.into_iter().map(|c| self.class(c).stats()).collect()
    }
}
