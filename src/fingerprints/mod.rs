// Fingerprints and the content-addressed artifact cache. A fingerprint
// canonically identifies one stage's output: equal fingerprints
// guarantee identical output. Fingerprints form a DAG through their
// dependency lists; cached artifacts key off the root fingerprint's
// content address.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;

// ============================================================================
// Fingerprint
// ============================================================================

/// Canonical structured identity of one pipeline stage. Parameters are
/// kept in a sorted map so serialization is canonical; two fingerprints
/// are equal iff the stage's output is guaranteed identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub stage: String,
    pub params: BTreeMap<String, serde_json::Value>,
    pub seed: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Fingerprint>,
}

impl Fingerprint {
    pub fn new(stage: impl Into<String>, seed: u64) -> Self {
        Self {
            stage: stage.into(),
            params: BTreeMap::new(),
            seed,
            dependencies: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_dependency(mut self, dependency: Fingerprint) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Hex SHA-256 of the canonical JSON form; the cache key.
    pub fn content_address(&self) -> String {
        let canonical =
            serde_json::to_string(self).expect("fingerprints serialize infallibly");
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

// ============================================================================
// Cache
// ============================================================================

struct CacheSlot<T> {
    build_lock: Mutex<()>,
    artifact: RwLock<Option<Arc<T>>>,
}

impl<T> Default for CacheSlot<T> {
    fn default() -> Self {
        Self {
            build_lock: Mutex::new(()),
            artifact: RwLock::new(None),
        }
    }
}

/// Content-addressed artifact cache with an at-most-one-concurrent-build
/// guarantee per fingerprint: concurrent requests for the same key block
/// on the slot's build lock until the first producer finishes. A miss is
/// control flow, not an error.
pub struct FingerprintCache<T> {
    slots: DashMap<String, Arc<CacheSlot<T>>>,
}

impl<T> Default for FingerprintCache<T> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<T> FingerprintCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, fingerprint: &Fingerprint) -> Arc<CacheSlot<T>> {
        Arc::clone(
            &self
                .slots
                .entry(fingerprint.content_address())
                .or_default(),
        )
    }

    /// Fast-path probe without building.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<Arc<T>> {
        let slot = self.slots.get(&fingerprint.content_address())?;
        let value = slot.artifact.read().clone();
        value
    }

    /// Returns the cached artifact, or builds and stores it. The build
    /// closure runs at most once per fingerprint across all threads.
    pub fn get_or_build<F>(&self, fingerprint: &Fingerprint, build: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let slot = self.slot(fingerprint);

        if let Some(artifact) = slot.artifact.read().clone() {
            return Ok(artifact);
        }

        let _guard = slot.build_lock.lock();

        // Another producer may have finished while this thread waited.
        if let Some(artifact) = slot.artifact.read().clone() {
            return Ok(artifact);
        }

        let artifact = Arc::new(build()?);
        *slot.artifact.write() = Some(Arc::clone(&artifact));
        Ok(artifact)
    }

    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.artifact.read().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fingerprint(seed: u64) -> Fingerprint {
        Fingerprint::new("feature_ensemble", seed)
            .with_param("num_features", json!(10))
            .with_dependency(Fingerprint::new("data_frame", 0).with_param("nrows", json!(100)))
    }

    #[test]
    fn test_equality_implies_equal_address() {
        assert_eq!(fingerprint(1), fingerprint(1));
        assert_eq!(fingerprint(1).content_address(), fingerprint(1).content_address());
        assert_ne!(fingerprint(1).content_address(), fingerprint(2).content_address());
    }

    #[test]
    fn test_param_order_is_canonical() {
        let a = Fingerprint::new("s", 0)
            .with_param("a", json!(1))
            .with_param("b", json!(2));
        let b = Fingerprint::new("s", 0)
            .with_param("b", json!(2))
            .with_param("a", json!(1));
        assert_eq!(a.content_address(), b.content_address());
    }

    #[test]
    fn test_dependency_changes_address() {
        let base = Fingerprint::new("s", 0);
        let with_dep = Fingerprint::new("s", 0).with_dependency(Fingerprint::new("d", 1));
        assert_ne!(base.content_address(), with_dep.content_address());
    }

    #[test]
    fn test_cache_hit_and_miss() {
        let cache: FingerprintCache<u64> = FingerprintCache::new();
        assert!(cache.lookup(&fingerprint(1)).is_none());

        let built = cache.get_or_build(&fingerprint(1), || Ok(42)).unwrap();
        assert_eq!(*built, 42);
        assert_eq!(*cache.lookup(&fingerprint(1)).unwrap(), 42);

        // Hit: the closure must not run again.
        let hit = cache
            .get_or_build(&fingerprint(1), || panic!("must not rebuild"))
            .unwrap();
        assert_eq!(*hit, 42);
    }

    #[test]
    fn test_single_producer_under_contention() {
        let cache: Arc<FingerprintCache<usize>> = Arc::new(FingerprintCache::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let builds = Arc::clone(&builds);
                std::thread::spawn(move || {
                    let artifact = cache
                        .get_or_build(&fingerprint(7), || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            Ok(123)
                        })
                        .unwrap();
                    *artifact
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 123);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }
}
