//! TTL-bounded record cache with a periodic expiry sweep and pluggable
//! persistence.
//!
//! All reads, writes and the sweep go through one mutex. The sweep holds it for
//! a full pass over every record.

use crate::error::CacheError;
use crate::metrics::{CACHE_EVICTIONS_TOTAL, CACHE_RECORDS};
use crate::types::{RecordType, ResourceRecord};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub value: String,
    pub ttl: u32,
    pub created_at: DateTime<Utc>,
}

impl CacheRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) > TimeDelta::seconds(self.ttl as i64)
    }
}

/// Record type -> queried name -> records in insertion order.
pub type Buckets = HashMap<RecordType, HashMap<String, Vec<CacheRecord>>>;

pub fn empty_buckets() -> Buckets {
    RecordType::ALL.into_iter().map(|t| (t, HashMap::new())).collect()
}

/// Backing store the cache is loaded from at start and flushed to at stop.
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Buckets>, CacheError>;
    fn save(&self, buckets: &Buckets) -> Result<(), CacheError>;
}

/// Stores the cache as JSON in a single file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStore for JsonFileStore {
    fn load(&self) -> Result<Option<Buckets>, CacheError> {
        if !self.path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read(&self.path)?;
        let buckets: Vec<(RecordType, HashMap<String, Vec<CacheRecord>>)> = serde_json::from_slice(&content)?;
        Ok(Some(buckets.into_iter().collect()))
    }

    fn save(&self, buckets: &Buckets) -> Result<(), CacheError> {
        let mut ordered: Vec<_> = buckets.iter().collect();
        ordered.sort_by_key(|(t, _)| t.code());
        let json = serde_json::to_vec(&ordered)?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

pub struct RecordCache {
    buckets: Mutex<Buckets>,
    store: Arc<dyn CacheStore>,
}

impl RecordCache {
    /// Loads the cache from `store`, starting with one empty bucket per
    /// supported type when the store is empty.
    pub fn open(store: Arc<dyn CacheStore>) -> Result<Self, CacheError> {
        let mut buckets = store.load()?.unwrap_or_else(empty_buckets);
        for names in buckets.values_mut() {
            names.retain(|_, records| !records.is_empty());
        }
        let count: usize = buckets.values().flat_map(|n| n.values()).map(Vec::len).sum();
        tracing::info!("[cache] Loaded {} records across {} types", count, buckets.len());
        Ok(Self { buckets: Mutex::new(buckets), store })
    }

    fn lock(&self) -> MutexGuard<'_, Buckets> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records cached for `(rtype, name)`; empty when there are none.
    pub fn get(&self, rtype: RecordType, name: &str) -> Result<Vec<CacheRecord>, CacheError> {
        let buckets = self.lock();
        let bucket = buckets.get(&rtype).ok_or(CacheError::InvalidArgument(rtype))?;
        Ok(bucket.get(name).cloned().unwrap_or_default())
    }

    /// Appends one record per value, all sharing `ttl` and one creation time.
    /// Existing records for the key are kept.
    pub fn put<I, S>(&self, rtype: RecordType, name: &str, ttl: u32, values: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let created_at = Utc::now();
        let mut buckets = self.lock();
        let bucket = buckets.get_mut(&rtype).ok_or(CacheError::InvalidArgument(rtype))?;
        let mut records = values
            .into_iter()
            .map(|v| CacheRecord { value: v.into(), ttl, created_at })
            .peekable();
        if records.peek().is_some() {
            bucket.entry(name.to_string()).or_default().extend(records);
        }
        Ok(())
    }

    /// Appends every record under its own type and name in one critical
    /// section. Nothing is stored unless the cache has a bucket for every
    /// record's type.
    pub fn put_records<'a, I>(&self, records: I) -> Result<(), CacheError>
    where
        I: IntoIterator<Item = &'a ResourceRecord>,
    {
        let records: Vec<&ResourceRecord> = records.into_iter().collect();
        let created_at = Utc::now();
        let mut buckets = self.lock();
        if let Some(rr) = records.iter().find(|rr| !buckets.contains_key(&rr.rtype)) {
            return Err(CacheError::InvalidArgument(rr.rtype));
        }
        for rr in records {
            if let Some(bucket) = buckets.get_mut(&rr.rtype) {
                let record = CacheRecord { value: rr.data.clone(), ttl: rr.ttl, created_at };
                bucket.entry(rr.name.clone()).or_default().push(record);
            }
        }
        Ok(())
    }

    pub fn contains_key(&self, rtype: RecordType, name: &str) -> bool {
        self.lock().get(&rtype).is_some_and(|bucket| bucket.contains_key(name))
    }

    /// Total number of cached records.
    pub fn len(&self) -> usize {
        self.lock().values().flat_map(|n| n.values()).map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Utc::now())
    }

    /// Removes every record older than its ttl at `now` and drops keys left
    /// without records. Returns the number of records removed.
    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut buckets = self.lock();
        let mut removed = 0;
        for names in buckets.values_mut() {
            names.retain(|_, records| {
                let before = records.len();
                records.retain(|r| !r.is_expired_at(now));
                removed += before - records.len();
                !records.is_empty()
            });
        }
        removed
    }

    pub fn snapshot(&self) -> Buckets {
        self.lock().clone()
    }

    /// Writes the current state to the store.
    pub fn flush(&self) -> Result<(), CacheError> {
        let snapshot = self.snapshot();
        self.store.save(&snapshot)
    }

    /// Starts the background sweep. The returned guard stops it and flushes
    /// the cache, either through [`SweepGuard::shutdown`] or on drop.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> SweepGuard {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let cache = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {
                        let removed = cache.evict_expired();
                        if removed > 0 {
                            CACHE_EVICTIONS_TOTAL.inc_by(removed as u64);
                            tracing::debug!("[cache] Sweep evicted {} expired records", removed);
                        }
                        CACHE_RECORDS.set(cache.len() as i64);
                    }
                }
            }
            tracing::debug!("[cache] Sweeper stopped");
        });

        SweepGuard { cache: Arc::clone(self), stop_tx, handle: Some(handle) }
    }
}

pub struct SweepGuard {
    cache: Arc<RecordCache>,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl SweepGuard {
    /// Stops the sweep, waits for it to finish and flushes the cache.
    pub async fn shutdown(mut self) -> Result<(), CacheError> {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("[cache] Sweeper task failed: {}", e);
            }
        }
        self.cache.flush()?;
        tracing::info!("[cache] Flushed {} records to store", self.cache.len());
        Ok(())
    }
}

impl Drop for SweepGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.send(true);
            handle.abort();
            if let Err(e) = self.cache.flush() {
                tracing::error!("[cache] Flush on drop failed: {}", e);
            }
        }
    }
}
