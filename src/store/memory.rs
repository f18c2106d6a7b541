//! In-memory task store for offline mode and tests.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;

use super::types::{NewTask, Task, TaskPage, TaskPatch};
use super::{StoreError, TaskStore};

/// Task store backed by a plain in-process vector.
///
/// Mirrors the remote service's semantics: ids are assigned from a counter,
/// unknown ids are `NotFound`. A failure can be injected for the next
/// operation to exercise rollback paths.
pub struct MemoryTaskStore {
  tasks: Mutex<Vec<Task>>,
  next_id: AtomicI64,
  fail_next: Mutex<Option<StoreError>>,
}

impl MemoryTaskStore {
  /// Create a store with the default fixture tasks.
  pub fn new() -> Self {
    Self::with_tasks(vec![
      Task {
        id: 1,
        text: "Learn Rust".to_string(),
        completed: false,
        owner_id: 1,
      },
      Task {
        id: 2,
        text: "Build a task app".to_string(),
        completed: true,
        owner_id: 1,
      },
      Task {
        id: 3,
        text: "Deploy to production".to_string(),
        completed: false,
        owner_id: 1,
      },
    ])
  }

  /// Create a store seeded with the given tasks.
  pub fn with_tasks(tasks: Vec<Task>) -> Self {
    let next_id = tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
    Self {
      tasks: Mutex::new(tasks),
      next_id: AtomicI64::new(next_id),
      fail_next: Mutex::new(None),
    }
  }

  /// Make the next store operation fail with the given error.
  #[allow(dead_code)]
  pub fn fail_next(&self, error: StoreError) {
    *self.fail_next.lock() = Some(error);
  }

  fn take_injected_failure(&self) -> Result<(), StoreError> {
    match self.fail_next.lock().take() {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}

impl Default for MemoryTaskStore {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
  async fn list(&self, limit: u64, skip: u64) -> Result<TaskPage, StoreError> {
    self.take_injected_failure()?;
    let tasks = self.tasks.lock();
    let page: Vec<Task> = tasks
      .iter()
      .skip(skip as usize)
      .take(limit as usize)
      .cloned()
      .collect();
    Ok(TaskPage {
      tasks: page,
      total: tasks.len() as u64,
      skip,
      limit,
    })
  }

  async fn get(&self, id: i64) -> Result<Task, StoreError> {
    self.take_injected_failure()?;
    let tasks = self.tasks.lock();
    tasks
      .iter()
      .find(|t| t.id == id)
      .cloned()
      .ok_or(StoreError::NotFound)
  }

  async fn random(&self) -> Result<Task, StoreError> {
    self.take_injected_failure()?;
    let tasks = self.tasks.lock();
    // No randomness source here; rotate by length so repeat calls vary once
    // the set changes. Good enough for fixtures.
    tasks
      .get(tasks.len() / 2)
      .or_else(|| tasks.first())
      .cloned()
      .ok_or(StoreError::NotFound)
  }

  async fn by_owner(&self, owner_id: i64) -> Result<TaskPage, StoreError> {
    self.take_injected_failure()?;
    let tasks = self.tasks.lock();
    let owned: Vec<Task> = tasks
      .iter()
      .filter(|t| t.owner_id == owner_id)
      .cloned()
      .collect();
    let total = owned.len() as u64;
    Ok(TaskPage {
      tasks: owned,
      total,
      skip: 0,
      limit: total,
    })
  }

  async fn create(&self, task: NewTask) -> Result<Task, StoreError> {
    self.take_injected_failure()?;
    let created = Task {
      id: self.next_id.fetch_add(1, Ordering::SeqCst),
      text: task.text,
      completed: task.completed,
      owner_id: task.owner_id,
    };
    self.tasks.lock().insert(0, created.clone());
    Ok(created)
  }

  async fn update(&self, id: i64, patch: TaskPatch) -> Result<Task, StoreError> {
    self.take_injected_failure()?;
    let mut tasks = self.tasks.lock();
    let task = tasks
      .iter_mut()
      .find(|t| t.id == id)
      .ok_or(StoreError::NotFound)?;
    *task = patch.apply_to(task);
    Ok(task.clone())
  }

  async fn delete(&self, id: i64) -> Result<Task, StoreError> {
    self.take_injected_failure()?;
    let mut tasks = self.tasks.lock();
    let index = tasks
      .iter()
      .position(|t| t.id == id)
      .ok_or(StoreError::NotFound)?;
    Ok(tasks.remove(index))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_list_pagination() {
    let store = MemoryTaskStore::new();
    let page = store.list(2, 1).await.unwrap();
    assert_eq!(page.tasks.len(), 2);
    assert_eq!(page.total, 3);
    assert_eq!(page.skip, 1);
    assert_eq!(page.tasks[0].id, 2);
  }

  #[tokio::test]
  async fn test_create_assigns_fresh_id() {
    let store = MemoryTaskStore::new();
    let created = store
      .create(NewTask {
        text: "Write tests".to_string(),
        completed: false,
        owner_id: 1,
      })
      .await
      .unwrap();
    assert_eq!(created.id, 4);

    let page = store.list(30, 0).await.unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.tasks[0].id, created.id);
  }

  #[tokio::test]
  async fn test_update_unknown_id_is_not_found() {
    let store = MemoryTaskStore::new();
    let err = store.update(99, TaskPatch::completed(true)).await.unwrap_err();
    assert_eq!(err, StoreError::NotFound);
  }

  #[tokio::test]
  async fn test_delete_returns_record() {
    let store = MemoryTaskStore::new();
    let deleted = store.delete(2).await.unwrap();
    assert_eq!(deleted.text, "Build a task app");
    assert_eq!(store.list(30, 0).await.unwrap().total, 2);
  }

  #[tokio::test]
  async fn test_injected_failure_fires_once() {
    let store = MemoryTaskStore::new();
    store.fail_next(StoreError::Transport("connection reset".to_string()));
    assert!(store.get(1).await.is_err());
    assert!(store.get(1).await.is_ok());
  }

  #[tokio::test]
  async fn test_by_owner_filters() {
    let store = MemoryTaskStore::with_tasks(vec![
      Task {
        id: 1,
        text: "a".to_string(),
        completed: false,
        owner_id: 1,
      },
      Task {
        id: 2,
        text: "b".to_string(),
        completed: false,
        owner_id: 2,
      },
    ]);
    let page = store.by_owner(2).await.unwrap();
    assert_eq!(page.tasks.len(), 1);
    assert_eq!(page.tasks[0].id, 2);
  }
}
