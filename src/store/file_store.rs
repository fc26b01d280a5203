//! File Store
//!
//! Maps file names to immutable [`FileRecord`]s and tracks which one was
//! inserted most recently. A single mutex guards the map and the most-recent
//! marker; it is only held for map operations, never across I/O. Records are
//! handed out as `Arc`s so callers can copy content after the lock is released.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use super::record::{FileRecord, NameRule, StoreError};

/// Default window during which a file may be advertised as latest: 10 minutes
const DEFAULT_MAX_FILE_AGE: Duration = Duration::from_secs(600);

/// Default extra window during which a file stays downloadable: 1 minute
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Two-tier retention: advertised as latest vs. still downloadable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Age up to which a record may be reported as the most recent file
    pub max_file_age: Duration,
    /// Additional age during which the record remains retrievable by name
    pub grace_period: Duration,
}

impl RetentionPolicy {
    pub fn new(max_file_age: Duration, grace_period: Duration) -> Self {
        Self {
            max_file_age,
            grace_period,
        }
    }

    /// Age beyond which a record is evicted
    pub fn retention(&self) -> Duration {
        self.max_file_age.saturating_add(self.grace_period)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILE_AGE, DEFAULT_GRACE_PERIOD)
    }
}

/// Statistics about the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: usize,
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
}

/// State guarded by the store lock
#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Arc<FileRecord>>,
    /// Always names a key of `entries` when set
    most_recent: Option<String>,
}

/// Shared cache of discovered files
#[derive(Debug)]
pub struct FileStore {
    policy: RetentionPolicy,
    name_rule: NameRule,
    inner: Mutex<Inner>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FileStore {
    /// Create an empty store
    pub fn new(policy: RetentionPolicy, name_rule: NameRule) -> Self {
        Self {
            policy,
            name_rule,
            inner: Mutex::new(Inner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn name_rule(&self) -> &NameRule {
        &self.name_rule
    }

    /// Every critical section leaves `Inner` consistent, so a poisoned lock
    /// still guards valid state.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a file discovered now
    pub fn insert(&self, name: &str, content: Vec<u8>) -> Result<bool, StoreError> {
        self.insert_at(name, content, Instant::now())
    }

    /// Insert a file discovered at `now` and mark it as the most recent one
    ///
    /// Returns `false` if the name was already present. That name keeps its
    /// original record but still becomes the most recent entry.
    pub fn insert_at(&self, name: &str, content: Vec<u8>, now: Instant) -> Result<bool, StoreError> {
        self.name_rule.check(name)?;
        let record = FileRecord::new(name.to_string(), content, now)?;
        let size = record.size();

        let mut inner = self.lock();
        let stored = match inner.entries.entry(name.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(record));
                true
            }
        };
        inner.most_recent = Some(name.to_string());
        drop(inner);

        if stored {
            debug!(name = name, size = size, "Stored file");
        } else {
            trace!(name = name, "File already stored, marked most recent");
        }
        Ok(stored)
    }

    /// Check whether a name is present
    pub fn contains(&self, name: &str) -> bool {
        self.lock().entries.contains_key(name)
    }

    /// Look up a record by name
    ///
    /// Does not touch the most-recent marker or the record's age.
    pub fn lookup(&self, name: &str) -> Option<Arc<FileRecord>> {
        let found = self.lock().entries.get(name).cloned();
        match found {
            Some(record) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(name = name, "Store HIT");
                Some(record)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(name = name, "Store MISS");
                None
            }
        }
    }

    /// Name and size of the most recent file, if it is still advertisable
    pub fn most_recent_eligible(&self) -> Option<(String, u32)> {
        self.most_recent_eligible_at(Instant::now())
    }

    /// Name and size of the most recent file if its age at `now` does not
    /// exceed the maximum file age
    pub fn most_recent_eligible_at(&self, now: Instant) -> Option<(String, u32)> {
        let inner = self.lock();
        let name = inner.most_recent.as_ref()?;
        let record = match inner.entries.get(name) {
            Some(record) => record,
            None => panic!("most recent file '{}' missing from store", name),
        };

        if record.age(now) > self.policy.max_file_age {
            return None;
        }
        Some((name.clone(), record.size()))
    }

    /// Remove every record older than the retention window at `now`
    ///
    /// Returns the removed names so the caller can delete backing files
    /// without holding the lock.
    pub fn evict_expired(&self, now: Instant) -> Vec<String> {
        let retention = self.policy.retention();
        let mut evicted = Vec::new();

        let mut inner = self.lock();
        inner.entries.retain(|name, record| {
            if record.age(now) > retention {
                evicted.push(name.clone());
                false
            } else {
                true
            }
        });
        let stale = matches!(&inner.most_recent, Some(current) if !inner.entries.contains_key(current));
        if stale {
            inner.most_recent = None;
        }
        drop(inner);

        for name in &evicted {
            info!(name = %name, "Evicted expired file");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Get store statistics
    pub fn stats(&self) -> StoreStats {
        let (entries, total_size) = {
            let inner = self.lock();
            let total = inner.entries.values().map(|r| u64::from(r.size())).sum();
            (inner.entries.len(), total)
        };
        StoreStats {
            entries,
            total_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Log current store metrics
    pub fn log_metrics(&self) {
        let stats = self.stats();
        debug!(
            entries = stats.entries,
            total_size = stats.total_size,
            hits = stats.hits,
            misses = stats.misses,
            "Store metrics"
        );
    }

    #[cfg(test)]
    fn most_recent_raw(&self) -> Option<String> {
        self.lock().most_recent.clone()
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default(), NameRule::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn store() -> FileStore {
        FileStore::new(
            RetentionPolicy::new(Duration::from_secs(600), Duration::from_secs(60)),
            NameRule::default(),
        )
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_latest_scenario() {
        let store = store();
        let t0 = Instant::now();
        assert_eq!(store.most_recent_eligible_at(t0), None);

        store.insert_at("a.jpg", vec![1; 100], t0).unwrap();
        assert_eq!(
            store.most_recent_eligible_at(t0),
            Some(("a.jpg".to_string(), 100))
        );

        let t1 = t0 + secs(30);
        store.insert_at("b.jpg", vec![2; 50], t1).unwrap();
        assert_eq!(
            store.most_recent_eligible_at(t1),
            Some(("b.jpg".to_string(), 50))
        );

        // b.jpg is past the maximum age, but still inside the grace period
        let t2 = t1 + secs(601);
        assert_eq!(store.most_recent_eligible_at(t2), None);
        assert!(store.lookup("b.jpg").is_some());
    }

    #[test]
    fn test_eligibility_boundary() {
        let store = store();
        let t0 = Instant::now();
        store.insert_at("a.jpg", vec![0; 4], t0).unwrap();

        assert!(store.most_recent_eligible_at(t0 + secs(600)).is_some());
        assert!(store.most_recent_eligible_at(t0 + secs(601)).is_none());
    }

    #[test]
    fn test_evict_after_grace_period() {
        let store = store();
        let t0 = Instant::now();
        store.insert_at("a.jpg", vec![0; 4], t0).unwrap();

        // Exactly at the retention limit nothing is evicted
        assert!(store.evict_expired(t0 + secs(660)).is_empty());
        assert!(store.lookup("a.jpg").is_some());

        let evicted = store.evict_expired(t0 + secs(661));
        assert_eq!(evicted, vec!["a.jpg".to_string()]);
        assert!(store.lookup("a.jpg").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_evict_clears_most_recent() {
        let store = store();
        let t0 = Instant::now();
        store.insert_at("a.jpg", vec![0; 4], t0).unwrap();
        store.insert_at("b.jpg", vec![0; 4], t0 + secs(100)).unwrap();

        // Only a.jpg expires; b.jpg stays most recent
        let evicted = store.evict_expired(t0 + secs(700));
        assert_eq!(evicted, vec!["a.jpg".to_string()]);
        assert_eq!(store.most_recent_raw(), Some("b.jpg".to_string()));

        let evicted = store.evict_expired(t0 + secs(800));
        assert_eq!(evicted, vec!["b.jpg".to_string()]);
        assert_eq!(store.most_recent_raw(), None);
    }

    #[test]
    fn test_eviction_does_not_fall_back() {
        let store = store();
        let t0 = Instant::now();
        store.insert_at("b.jpg", vec![0; 8], t0).unwrap();
        store.insert_at("a.jpg", vec![0; 4], t0 + secs(100)).unwrap();
        store.insert_at("b.jpg", vec![0; 8], t0 + secs(100)).unwrap();

        // b.jpg keeps its original discovery time and expires first
        let evicted = store.evict_expired(t0 + secs(661));
        assert_eq!(evicted, vec!["b.jpg".to_string()]);
        assert!(store.lookup("a.jpg").is_some());
        assert_eq!(store.most_recent_eligible_at(t0 + secs(661)), None);

        store.insert_at("a.jpg", vec![0; 4], t0 + secs(661)).unwrap();
        assert_eq!(
            store.most_recent_eligible_at(t0 + secs(661)),
            Some(("a.jpg".to_string(), 4))
        );
    }

    #[test]
    fn test_duplicate_insert_keeps_record() {
        let store = store();
        let t0 = Instant::now();
        assert!(store.insert_at("a.jpg", vec![1; 10], t0).unwrap());
        assert!(store.insert_at("b.jpg", vec![2; 20], t0).unwrap());
        assert!(!store.insert_at("a.jpg", vec![3; 30], t0 + secs(5)).unwrap());
        assert_eq!(store.len(), 2);

        let record = store.lookup("a.jpg").unwrap();
        assert_eq!(record.size(), 10);
        assert_eq!(record.age(t0 + secs(5)), secs(5));
        assert_eq!(
            store.most_recent_eligible_at(t0),
            Some(("a.jpg".to_string(), 10))
        );
    }

    #[test]
    fn test_insert_rejects_bad_names() {
        let store = store();
        assert!(matches!(
            store.insert("notes.txt", vec![]),
            Err(StoreError::WrongSuffix { .. })
        ));
        assert_eq!(store.insert("", vec![]), Err(StoreError::EmptyName));
        assert!(store.is_empty());
        assert_eq!(store.most_recent_raw(), None);
    }

    #[test]
    fn test_most_recent_always_present() {
        let store = store();
        let t0 = Instant::now();
        for i in 0..20u64 {
            let name = format!("img-{}.jpg", i);
            store.insert_at(&name, vec![0; 4], t0 + secs(i * 50)).unwrap();
            store.evict_expired(t0 + secs(i * 60));
            if let Some(name) = store.most_recent_raw() {
                assert!(store.contains(&name));
            }
        }
        store.evict_expired(t0 + secs(10_000));
        assert_eq!(store.most_recent_raw(), None);
    }

    #[test]
    fn test_stats() {
        let store = store();
        store.insert("a.jpg", vec![0; 100]).unwrap();
        store.insert("b.jpg", vec![0; 50]).unwrap();

        assert!(store.lookup("a.jpg").is_some());
        assert!(store.lookup("missing.jpg").is_none());

        let stats = store.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.total_size, 150);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_concurrent_insert_and_evict() {
        let store = Arc::new(store());
        let t0 = Instant::now();

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..200u64 {
                    let name = format!("w-{}.jpg", i);
                    store.insert_at(&name, vec![0; 16], t0 + secs(i)).unwrap();
                    store.evict_expired(t0 + secs(i + 600));
                }
            })
        };
        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    if let Some((name, size)) = store.most_recent_eligible_at(t0) {
                        assert_eq!(size, 16);
                        assert!(name.ends_with(".jpg"));
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();

        if let Some(name) = store.most_recent_raw() {
            assert!(store.contains(&name));
        }
    }
}
