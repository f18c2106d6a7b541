//! The sync engine: what the UI talks to.
//!
//! Wraps the cache, the store, and the mutation coordinator behind the
//! read/mutate/watch surface. Watched keys are refetched in the background
//! as soon as they are invalidated; everything else refetches lazily on the
//! next read.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::store::{StoreError, Task, TaskPage, TaskPatch, TaskStore};

use super::cache::{CacheEvent, CacheValue, TaskCache};
use super::key::{KeyPrefix, QueryKey};
use super::mutation::{Mutation, MutationCoordinator, SyncError};
use super::policy::MutationKind;

/// Discrete signals for the UI, distinct from the stream of cached data.
#[derive(Debug, Clone)]
pub enum SyncEvent {
  /// A mutation failed and the cache was rolled back. One event per
  /// failure, for toast-style notification.
  MutationFailed {
    kind: MutationKind,
    message: String,
  },
}

type WatchMap = Arc<Mutex<HashMap<QueryKey, usize>>>;

/// Registration of interest in one query key.
///
/// While at least one guard for a key is alive, invalidation of that key
/// triggers a prompt background refetch. Dropping the guard unregisters.
pub struct WatchGuard {
  key: QueryKey,
  watched: WatchMap,
}

impl Drop for WatchGuard {
  fn drop(&mut self) {
    let mut watched = self.watched.lock();
    if let Some(count) = watched.get_mut(&self.key) {
      *count -= 1;
      if *count == 0 {
        watched.remove(&self.key);
      }
    }
  }
}

pub struct SyncEngine {
  cache: Arc<TaskCache>,
  store: Arc<dyn TaskStore>,
  coordinator: MutationCoordinator,
  owner_id: i64,
  watched: WatchMap,
  events_tx: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
  /// Build an engine over the given store and spawn its background
  /// refresher. One engine per application session.
  pub fn new(store: Arc<dyn TaskStore>, owner_id: i64) -> Arc<Self> {
    Self::with_cache(Arc::new(TaskCache::new()), store, owner_id)
  }

  /// As [`SyncEngine::new`] with a caller-provided cache (tests use this to
  /// control staleness).
  pub fn with_cache(cache: Arc<TaskCache>, store: Arc<dyn TaskStore>, owner_id: i64) -> Arc<Self> {
    let (events_tx, _) = broadcast::channel(64);
    let engine = Arc::new(Self {
      coordinator: MutationCoordinator::new(cache.clone(), store.clone()),
      cache,
      store,
      owner_id,
      watched: Arc::new(Mutex::new(HashMap::new())),
      events_tx,
    });
    Self::spawn_refresher(&engine);
    engine
  }

  /// Snapshot access to the underlying cache (status display, tests).
  pub fn cache(&self) -> &TaskCache {
    &self.cache
  }

  /// Subscribe to discrete sync signals (mutation failures).
  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.events_tx.subscribe()
  }

  /// Subscribe to cache change events (re-render triggers).
  pub fn subscribe_cache(&self) -> broadcast::Receiver<CacheEvent> {
    self.cache.subscribe()
  }

  /// Register interest in a key for prompt background refresh.
  pub fn watch(&self, key: QueryKey) -> WatchGuard {
    *self.watched.lock().entry(key).or_insert(0) += 1;
    WatchGuard {
      key,
      watched: self.watched.clone(),
    }
  }

  /// One page of tasks, read-through cached.
  pub async fn list(&self, limit: u64, skip: u64) -> Result<TaskPage, SyncError> {
    let store = self.store.clone();
    let value = self
      .cache
      .fetch(QueryKey::List { limit, skip }, move || async move {
        store.list(limit, skip).await.map(CacheValue::Page)
      })
      .await?;
    expect_page(value)
  }

  /// A single task, read-through cached.
  pub async fn detail(&self, id: i64) -> Result<Task, SyncError> {
    let store = self.store.clone();
    let value = self
      .cache
      .fetch(QueryKey::Detail { id }, move || async move {
        store.get(id).await.map(CacheValue::Task)
      })
      .await?;
    expect_task(value)
  }

  /// All tasks for one owner, read-through cached.
  pub async fn by_owner(&self, owner_id: i64) -> Result<TaskPage, SyncError> {
    let store = self.store.clone();
    let value = self
      .cache
      .fetch(QueryKey::ByOwner { owner_id }, move || async move {
        store.by_owner(owner_id).await.map(CacheValue::Page)
      })
      .await?;
    expect_page(value)
  }

  /// A random task, read-through cached.
  pub async fn random(&self) -> Result<Task, SyncError> {
    let store = self.store.clone();
    let value = self
      .cache
      .fetch(QueryKey::Random, move || async move {
        store.random().await.map(CacheValue::Task)
      })
      .await?;
    expect_task(value)
  }

  /// Add a task with the configured owner.
  pub async fn add_task(&self, text: &str) -> Result<Task, SyncError> {
    self
      .run_mutation(Mutation::Add {
        text: text.to_string(),
        owner_id: self.owner_id,
      })
      .await
  }

  /// Flip a task's completed flag.
  pub async fn toggle_task(&self, id: i64) -> Result<Task, SyncError> {
    let before = self.resolve_task(id).await?;
    let patch = TaskPatch::completed(!before.completed);
    self.run_mutation(Mutation::Update { patch, before }).await
  }

  /// Delete a task.
  pub async fn delete_task(&self, id: i64) -> Result<Task, SyncError> {
    let before = self.resolve_task(id).await?;
    self.run_mutation(Mutation::Delete { before }).await
  }

  async fn run_mutation(&self, mutation: Mutation) -> Result<Task, SyncError> {
    let kind = match &mutation {
      Mutation::Add { .. } => MutationKind::Add,
      Mutation::Update { .. } => MutationKind::Update,
      Mutation::Delete { .. } => MutationKind::Delete,
    };
    match self.coordinator.mutate(mutation).await {
      Ok(task) => Ok(task),
      Err(e) => {
        let _ = self.events_tx.send(SyncEvent::MutationFailed {
          kind,
          message: e.to_string(),
        });
        Err(e)
      }
    }
  }

  /// Pre-image of a task: cached detail, then any cached page, then the
  /// store.
  async fn resolve_task(&self, id: i64) -> Result<Task, SyncError> {
    let detail = self.cache.read(QueryKey::Detail { id });
    if let Some(task) = detail.data.as_ref().and_then(CacheValue::as_task) {
      return Ok(task.clone());
    }
    for key in self.cache.keys_matching(&KeyPrefix::All) {
      if let Some(CacheValue::Page(page)) = self.cache.read(key).data {
        if let Some(task) = page.find(id) {
          return Ok(task.clone());
        }
      }
    }
    Ok(self.store.get(id).await?)
  }

  fn spawn_refresher(engine: &Arc<Self>) {
    let weak: Weak<Self> = Arc::downgrade(engine);
    let mut events = engine.cache.subscribe();
    tokio::spawn(async move {
      loop {
        let event = match events.recv().await {
          Ok(event) => event,
          Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "cache event stream lagged");
            continue;
          }
          Err(broadcast::error::RecvError::Closed) => break,
        };
        let CacheEvent::Invalidated(key) = event else {
          continue;
        };
        let Some(engine) = weak.upgrade() else {
          break;
        };
        if !engine.watched.lock().contains_key(&key) {
          continue;
        }
        debug!(key = %key, "background refresh");
        tokio::spawn(async move {
          if let Err(e) = engine.refetch(key).await {
            warn!(key = %key, error = %e, "background refresh failed");
          }
        });
      }
    });
  }

  async fn refetch(&self, key: QueryKey) -> Result<(), SyncError> {
    match key {
      QueryKey::List { limit, skip } => {
        self.list(limit, skip).await?;
      }
      QueryKey::Detail { id } => {
        self.detail(id).await?;
      }
      QueryKey::ByOwner { owner_id } => {
        self.by_owner(owner_id).await?;
      }
      QueryKey::Random => {
        self.random().await?;
      }
    }
    Ok(())
  }
}

fn expect_page(value: CacheValue) -> Result<TaskPage, SyncError> {
  match value {
    CacheValue::Page(page) => Ok(page),
    CacheValue::Task(_) => Err(SyncError::Store(StoreError::Transport(
      "cache entry has the wrong shape".to_string(),
    ))),
  }
}

fn expect_task(value: CacheValue) -> Result<Task, SyncError> {
  match value {
    CacheValue::Task(task) => Ok(task),
    CacheValue::Page(_) => Err(SyncError::Store(StoreError::Transport(
      "cache entry has the wrong shape".to_string(),
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::{MemoryTaskStore, NewTask};
  use async_trait::async_trait;
  use std::time::Duration;

  const LIST: QueryKey = QueryKey::List { limit: 30, skip: 0 };

  /// Store wrapper that delays write operations so tests can observe the
  /// optimistic window.
  struct DelayedStore {
    inner: MemoryTaskStore,
    write_delay: Duration,
  }

  #[async_trait]
  impl TaskStore for DelayedStore {
    async fn list(&self, limit: u64, skip: u64) -> Result<TaskPage, StoreError> {
      self.inner.list(limit, skip).await
    }
    async fn get(&self, id: i64) -> Result<Task, StoreError> {
      self.inner.get(id).await
    }
    async fn random(&self) -> Result<Task, StoreError> {
      self.inner.random().await
    }
    async fn by_owner(&self, owner_id: i64) -> Result<TaskPage, StoreError> {
      self.inner.by_owner(owner_id).await
    }
    async fn create(&self, task: NewTask) -> Result<Task, StoreError> {
      tokio::time::sleep(self.write_delay).await;
      self.inner.create(task).await
    }
    async fn update(&self, id: i64, patch: TaskPatch) -> Result<Task, StoreError> {
      tokio::time::sleep(self.write_delay).await;
      self.inner.update(id, patch).await
    }
    async fn delete(&self, id: i64) -> Result<Task, StoreError> {
      tokio::time::sleep(self.write_delay).await;
      self.inner.delete(id).await
    }
  }

  fn seeded_task(id: i64, text: &str, completed: bool) -> Task {
    Task {
      id,
      text: text.to_string(),
      completed,
      owner_id: 1,
    }
  }

  #[tokio::test]
  async fn test_list_is_read_through_cached() {
    let store = Arc::new(MemoryTaskStore::new());
    let engine = SyncEngine::new(store, 1);

    let first = engine.list(30, 0).await.unwrap();
    assert_eq!(first.total, 3);
    // Second read is served from cache.
    let second = engine.list(30, 0).await.unwrap();
    assert_eq!(first, second);
  }

  #[tokio::test]
  async fn test_add_is_optimistically_visible() {
    let store = Arc::new(DelayedStore {
      inner: MemoryTaskStore::new(),
      write_delay: Duration::from_millis(100),
    });
    let engine = SyncEngine::new(store, 1);
    engine.list(30, 0).await.unwrap();

    let handle = {
      let engine = engine.clone();
      tokio::spawn(async move { engine.add_task("Optimistic").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Before the remote call resolves: placeholder present, total bumped.
    let entry = engine.cache().read(LIST);
    let data = entry.data.unwrap();
    let page = data.as_page().unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.tasks[0].text, "Optimistic");
    assert!(page.tasks[0].id < 0);

    let created = handle.await.unwrap().unwrap();
    assert!(created.id > 0);
  }

  #[tokio::test]
  async fn test_toggle_scenario() {
    let store = Arc::new(MemoryTaskStore::with_tasks(vec![seeded_task(
      1, "Learn", false,
    )]));
    let engine = SyncEngine::new(store, 1);
    engine.list(30, 0).await.unwrap();

    let updated = engine.toggle_task(1).await.unwrap();
    assert!(updated.completed);

    // List shows the toggle, the detail key holds the same record, and
    // list-prefix keys are stale.
    let entry = engine.cache().read(LIST);
    let data = entry.data.clone().unwrap();
    assert!(data.as_page().unwrap().find(1).unwrap().completed);
    let detail = engine.cache().read(QueryKey::Detail { id: 1 });
    assert_eq!(detail.data, Some(CacheValue::Task(updated)));
    assert!(entry.stale);
  }

  #[tokio::test]
  async fn test_delete_failure_reverts_and_signals() {
    let store = Arc::new(MemoryTaskStore::new());
    let engine = SyncEngine::new(store.clone(), 1);
    let prior = engine.list(30, 0).await.unwrap();
    let mut events = engine.subscribe();

    store.fail_next(StoreError::Transport("connection reset".to_string()));
    let err = engine.delete_task(2).await.unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::Transport(_))));

    let entry = engine.cache().read(LIST);
    let data = entry.data.unwrap();
    let page = data.as_page().unwrap();
    assert!(page.find(2).is_some());
    assert_eq!(page.total, prior.total);

    match events.try_recv().unwrap() {
      SyncEvent::MutationFailed { kind, .. } => assert_eq!(kind, MutationKind::Delete),
    }
  }

  #[tokio::test]
  async fn test_delete_mid_flight_hides_row() {
    let store = Arc::new(DelayedStore {
      inner: MemoryTaskStore::new(),
      write_delay: Duration::from_millis(100),
    });
    let engine = SyncEngine::new(store, 1);
    engine.list(30, 0).await.unwrap();

    let handle = {
      let engine = engine.clone();
      tokio::spawn(async move { engine.delete_task(2).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let entry = engine.cache().read(LIST);
    let data = entry.data.unwrap();
    let page = data.as_page().unwrap();
    assert!(page.find(2).is_none());
    assert_eq!(page.total, 2);

    handle.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn test_watched_key_refreshes_after_mutation() {
    let store = Arc::new(MemoryTaskStore::new());
    let engine = SyncEngine::new(store, 1);
    engine.list(30, 0).await.unwrap();
    let _guard = engine.watch(LIST);

    let created = engine.add_task("Fresh").await.unwrap();

    // The invalidation from settle triggers a background refetch of the
    // watched key; wait for it to land.
    let mut fresh = false;
    for _ in 0..50 {
      tokio::time::sleep(Duration::from_millis(10)).await;
      let entry = engine.cache().read(LIST);
      if !entry.stale {
        let data = entry.data.unwrap();
        let page = data.as_page().unwrap();
        assert_eq!(page.total, 4);
        assert!(page.find(created.id).is_some());
        fresh = true;
        break;
      }
    }
    assert!(fresh, "watched key was not refreshed");
  }

  #[tokio::test]
  async fn test_unwatched_key_stays_stale() {
    let store = Arc::new(MemoryTaskStore::new());
    let engine = SyncEngine::new(store, 1);
    engine.list(30, 0).await.unwrap();
    drop(engine.watch(LIST));

    engine.add_task("Lazy").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.cache().read(LIST).stale);
  }

  #[tokio::test]
  async fn test_toggle_unknown_task_is_not_found() {
    let store = Arc::new(MemoryTaskStore::new());
    let engine = SyncEngine::new(store, 1);
    let err = engine.toggle_task(99).await.unwrap_err();
    assert_eq!(err, SyncError::Store(StoreError::NotFound));
  }

  #[tokio::test]
  async fn test_invalidation_spares_disjoint_namespaces() {
    let store = Arc::new(MemoryTaskStore::new());
    let engine = SyncEngine::new(store, 1);
    engine.list(30, 0).await.unwrap();
    let task = engine.detail(3).await.unwrap();
    assert_eq!(task.id, 3);

    engine.add_task("New").await.unwrap();

    // Add invalidates lists only; the unrelated detail entry stays fresh.
    assert!(engine.cache().read(LIST).stale);
    assert!(!engine.cache().read(QueryKey::Detail { id: 3 }).stale);
  }

  #[tokio::test]
  async fn test_watch_guard_counts_references() {
    let store = Arc::new(MemoryTaskStore::new());
    let engine = SyncEngine::new(store, 1);
    let a = engine.watch(LIST);
    let b = engine.watch(LIST);
    drop(a);
    assert!(engine.watched.lock().contains_key(&LIST));
    drop(b);
    assert!(!engine.watched.lock().contains_key(&LIST));
  }
}
