//! In-memory cache of task queries keyed by [`QueryKey`].
//!
//! The cache is an explicitly constructed instance with one entry per
//! distinct key. Reads go through [`TaskCache::fetch`], which de-duplicates
//! concurrent loads of the same key (single-flight); writes come from the
//! mutation coordinator. Invalidation only marks entries stale — the next
//! read refetches, and subscribed keys are refreshed in the background by
//! the engine.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::store::{StoreError, Task, TaskPage};

use super::key::{KeyPrefix, QueryKey};

/// The value shape held by one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
  /// List-shaped queries (`List`, `ByOwner`).
  Page(TaskPage),
  /// Record-shaped queries (`Detail`, `Random`).
  Task(Task),
}

impl CacheValue {
  pub fn as_page(&self) -> Option<&TaskPage> {
    match self {
      CacheValue::Page(page) => Some(page),
      CacheValue::Task(_) => None,
    }
  }

  pub fn as_task(&self) -> Option<&Task> {
    match self {
      CacheValue::Task(task) => Some(task),
      CacheValue::Page(_) => None,
    }
  }
}

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  Idle,
  Fetching,
  Success,
  Error,
}

/// One cached query result with its status and freshness metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub data: Option<CacheValue>,
  pub status: EntryStatus,
  pub error: Option<String>,
  pub last_updated: Option<DateTime<Utc>>,
  pub stale: bool,
}

impl CacheEntry {
  fn idle() -> Self {
    Self {
      data: None,
      status: EntryStatus::Idle,
      error: None,
      last_updated: None,
      stale: false,
    }
  }
}

/// Change notifications emitted by the cache.
#[derive(Debug, Clone)]
pub enum CacheEvent {
  /// An entry received new data (fetch completion or write).
  Updated(QueryKey),
  /// An entry was marked stale.
  Invalidated(QueryKey),
  /// An entry was removed.
  Removed(QueryKey),
}

type FetchResult = Result<CacheValue, StoreError>;

/// The cache layer: entry map, single-flight table, and event channel.
pub struct TaskCache {
  entries: Mutex<HashMap<QueryKey, CacheEntry>>,
  in_flight: Mutex<HashMap<QueryKey, broadcast::Sender<FetchResult>>>,
  events_tx: broadcast::Sender<CacheEvent>,
  /// How long before successful data is considered stale by age alone.
  stale_time: Duration,
}

enum FetchRole {
  /// Another caller is already loading this key; share its result.
  Follower(broadcast::Receiver<FetchResult>),
  /// This caller drives the load.
  Leader(broadcast::Sender<FetchResult>),
}

impl TaskCache {
  pub fn new() -> Self {
    let (events_tx, _) = broadcast::channel(256);
    Self {
      entries: Mutex::new(HashMap::new()),
      in_flight: Mutex::new(HashMap::new()),
      events_tx,
      stale_time: Duration::minutes(5),
    }
  }

  /// Set the age after which successful data is considered stale.
  #[allow(dead_code)]
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Subscribe to cache change events.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.events_tx.subscribe()
  }

  /// Current entry for a key, creating an Idle entry if absent.
  ///
  /// The returned entry is a snapshot; mutating it has no effect on the
  /// cache.
  pub fn read(&self, key: QueryKey) -> CacheEntry {
    let mut entries = self.entries.lock();
    entries.entry(key).or_insert_with(CacheEntry::idle).clone()
  }

  /// Keys currently present in the cache that fall under a prefix.
  pub fn keys_matching(&self, prefix: &KeyPrefix) -> Vec<QueryKey> {
    let entries = self.entries.lock();
    entries
      .keys()
      .filter(|key| key.matches(prefix))
      .copied()
      .collect()
  }

  /// Read-through fetch with single-flight de-duplication.
  ///
  /// Returns cached data immediately when the entry is Success and fresh.
  /// Otherwise one caller runs the loader while concurrent callers for the
  /// same key await the shared outcome — the same resolved value or the
  /// same error. On failure the entry keeps its previous data so the UI can
  /// keep showing something.
  pub async fn fetch<F, Fut>(&self, key: QueryKey, loader: F) -> FetchResult
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = FetchResult>,
  {
    let role = {
      let mut entries = self.entries.lock();
      let entry = entries.entry(key).or_insert_with(CacheEntry::idle);

      if entry.status == EntryStatus::Success && !self.is_stale(entry) {
        if let Some(data) = &entry.data {
          trace!(key = %key, "cache hit");
          return Ok(data.clone());
        }
      }

      let mut in_flight = self.in_flight.lock();
      if let Some(tx) = in_flight.get(&key) {
        FetchRole::Follower(tx.subscribe())
      } else {
        let (tx, _rx) = broadcast::channel(1);
        in_flight.insert(key, tx.clone());
        entry.status = EntryStatus::Fetching;
        FetchRole::Leader(tx)
      }
    };

    match role {
      FetchRole::Follower(mut rx) => {
        trace!(key = %key, "joining in-flight fetch");
        match rx.recv().await {
          Ok(result) => result,
          // Leader dropped without settling (task aborted mid-load).
          Err(_) => Err(StoreError::Transport("fetch was cancelled".to_string())),
        }
      }
      FetchRole::Leader(tx) => {
        debug!(key = %key, "fetching");
        let result = loader().await;

        {
          let mut entries = self.entries.lock();
          let entry = entries.entry(key).or_insert_with(CacheEntry::idle);
          match &result {
            Ok(data) => {
              entry.data = Some(data.clone());
              entry.status = EntryStatus::Success;
              entry.error = None;
              entry.last_updated = Some(Utc::now());
              entry.stale = false;
            }
            Err(e) => {
              entry.status = EntryStatus::Error;
              entry.error = Some(e.to_string());
              // Previous data stays available for stale-while-error display.
            }
          }
        }
        self.in_flight.lock().remove(&key);

        // Waiting followers may all be gone; that is fine.
        let _ = tx.send(result.clone());
        if result.is_ok() {
          self.emit(CacheEvent::Updated(key));
        }
        result
      }
    }
  }

  /// Unconditionally overwrite an entry with new data.
  ///
  /// Used for optimistic projections, server-truth commits, and rollback.
  pub fn write(&self, key: QueryKey, value: CacheValue) {
    {
      let mut entries = self.entries.lock();
      let entry = entries.entry(key).or_insert_with(CacheEntry::idle);
      entry.data = Some(value);
      entry.status = EntryStatus::Success;
      entry.error = None;
      entry.last_updated = Some(Utc::now());
      entry.stale = false;
    }
    self.emit(CacheEvent::Updated(key));
  }

  /// Mark every entry under a prefix stale.
  ///
  /// Does not refetch; the next `fetch` of each key reloads. Subscribed
  /// keys are picked up promptly by the engine's background refresh.
  pub fn invalidate(&self, prefix: &KeyPrefix) {
    let invalidated: Vec<QueryKey> = {
      let mut entries = self.entries.lock();
      entries
        .iter_mut()
        .filter(|(key, _)| key.matches(prefix))
        .map(|(key, entry)| {
          entry.stale = true;
          *key
        })
        .collect()
    };
    for key in invalidated {
      debug!(key = %key, "invalidated");
      self.emit(CacheEvent::Invalidated(key));
    }
  }

  /// Drop an entry entirely (confirmed delete of a detail record).
  pub fn remove(&self, key: QueryKey) {
    let removed = self.entries.lock().remove(&key).is_some();
    if removed {
      self.emit(CacheEvent::Removed(key));
    }
  }

  fn is_stale(&self, entry: &CacheEntry) -> bool {
    if entry.stale {
      return true;
    }
    match entry.last_updated {
      Some(at) => Utc::now() - at > self.stale_time,
      None => true,
    }
  }

  fn emit(&self, event: CacheEvent) {
    if self.events_tx.send(event).is_err() {
      trace!("no cache event subscribers");
    }
  }
}

impl Default for TaskCache {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  fn page(ids: &[i64]) -> CacheValue {
    CacheValue::Page(TaskPage {
      tasks: ids
        .iter()
        .map(|id| Task {
          id: *id,
          text: format!("task {}", id),
          completed: false,
          owner_id: 1,
        })
        .collect(),
      total: ids.len() as u64,
      skip: 0,
      limit: 30,
    })
  }

  const LIST: QueryKey = QueryKey::List { limit: 30, skip: 0 };

  #[tokio::test]
  async fn test_fetch_populates_and_reuses_cache() {
    let cache = TaskCache::new();
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
      let calls = calls.clone();
      let data = cache
        .fetch(LIST, move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(page(&[1, 2]))
        })
        .await
        .unwrap();
      assert_eq!(data.as_page().unwrap().tasks.len(), 2);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.read(LIST).status, EntryStatus::Success);
  }

  #[tokio::test]
  async fn test_concurrent_fetches_share_one_load() {
    let cache = Arc::new(TaskCache::new());
    let calls = Arc::new(AtomicU32::new(0));

    let loader = |calls: Arc<AtomicU32>| async move {
      calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(std::time::Duration::from_millis(50)).await;
      Ok(page(&[1]))
    };

    let (a, b) = tokio::join!(
      cache.fetch(LIST, {
        let calls = calls.clone();
        move || loader(calls)
      }),
      cache.fetch(LIST, {
        let calls = calls.clone();
        move || loader(calls)
      }),
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_concurrent_fetches_share_one_rejection() {
    let cache = Arc::new(TaskCache::new());

    let loader = || async move {
      tokio::time::sleep(std::time::Duration::from_millis(50)).await;
      Err(StoreError::Transport("boom".to_string()))
    };

    let (a, b) = tokio::join!(cache.fetch(LIST, loader), cache.fetch(LIST, loader));
    assert_eq!(a.unwrap_err(), b.unwrap_err());
  }

  #[tokio::test]
  async fn test_fetch_error_preserves_previous_data() {
    let cache = TaskCache::new();
    cache.write(LIST, page(&[1, 2]));
    cache.invalidate(&KeyPrefix::Lists);

    let result = cache
      .fetch(LIST, || async { Err(StoreError::Transport("down".to_string())) })
      .await;
    assert!(result.is_err());

    let entry = cache.read(LIST);
    assert_eq!(entry.status, EntryStatus::Error);
    assert_eq!(entry.error.as_deref(), Some("transport failure: down"));
    assert_eq!(entry.data, Some(page(&[1, 2])));
  }

  async fn counted_fetch(cache: &TaskCache, calls: &Arc<AtomicU32>) {
    let calls = calls.clone();
    cache
      .fetch(LIST, move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(page(&[1]))
      })
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_invalidate_forces_refetch() {
    let cache = TaskCache::new();
    let calls = Arc::new(AtomicU32::new(0));

    counted_fetch(&cache, &calls).await;
    counted_fetch(&cache, &calls).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    cache.invalidate(&KeyPrefix::Lists);
    counted_fetch(&cache, &calls).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_invalidate_prefix_spares_disjoint_keys() {
    let cache = TaskCache::new();
    let detail = QueryKey::Detail { id: 5 };
    cache.write(LIST, page(&[1]));
    cache.write(QueryKey::List { limit: 10, skip: 20 }, page(&[2]));
    cache.write(
      detail,
      CacheValue::Task(Task {
        id: 5,
        text: "keep".to_string(),
        completed: false,
        owner_id: 1,
      }),
    );

    cache.invalidate(&KeyPrefix::Lists);

    assert!(cache.read(LIST).stale);
    assert!(cache.read(QueryKey::List { limit: 10, skip: 20 }).stale);
    assert!(!cache.read(detail).stale);
  }

  #[tokio::test]
  async fn test_write_clears_staleness() {
    let cache = TaskCache::new();
    cache.write(LIST, page(&[1]));
    cache.invalidate(&KeyPrefix::Lists);
    assert!(cache.read(LIST).stale);

    cache.write(LIST, page(&[1, 2]));
    let entry = cache.read(LIST);
    assert!(!entry.stale);
    assert_eq!(entry.data, Some(page(&[1, 2])));
  }

  #[tokio::test]
  async fn test_remove_drops_entry() {
    let cache = TaskCache::new();
    cache.write(LIST, page(&[1]));
    cache.remove(LIST);
    assert_eq!(cache.read(LIST).status, EntryStatus::Idle);
  }

  #[tokio::test]
  async fn test_read_creates_idle_entry() {
    let cache = TaskCache::new();
    let entry = cache.read(LIST);
    assert_eq!(entry.status, EntryStatus::Idle);
    assert!(entry.data.is_none());
  }

  #[tokio::test]
  async fn test_stale_time_ages_entries() {
    let cache = TaskCache::new().with_stale_time(Duration::zero());
    let calls = Arc::new(AtomicU32::new(0));

    for _ in 0..2 {
      let calls = calls.clone();
      cache
        .fetch(LIST, move || async move {
          calls.fetch_add(1, Ordering::SeqCst);
          Ok(page(&[1]))
        })
        .await
        .unwrap();
    }

    // Zero stale time means every fetch reloads.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_events_emitted_on_write_and_invalidate() {
    let cache = TaskCache::new();
    let mut rx = cache.subscribe();

    cache.write(LIST, page(&[1]));
    cache.invalidate(&KeyPrefix::Lists);
    cache.remove(LIST);

    assert!(matches!(rx.try_recv().unwrap(), CacheEvent::Updated(_)));
    assert!(matches!(rx.try_recv().unwrap(), CacheEvent::Invalidated(_)));
    assert!(matches!(rx.try_recv().unwrap(), CacheEvent::Removed(_)));
  }
}
