//! Remote task store clients.
//!
//! The store owns durable task state. Everything here returns explicit
//! `Result` values; a missing record is a `StoreError::NotFound`, never a
//! panic or a sentinel.

mod http;
mod memory;
mod types;

pub use http::HttpTaskStore;
pub use memory::MemoryTaskStore;
pub use types::{NewTask, Task, TaskPage, TaskPatch};

use async_trait::async_trait;

/// Failure surfaced by a store operation.
///
/// Timeouts and connection problems are both `Transport`; the sync layer
/// treats them uniformly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
  #[error("record not found")]
  NotFound,
  #[error("transport failure: {0}")]
  Transport(String),
}

/// Operations every task store backend provides.
///
/// `HttpTaskStore` talks to the remote service; `MemoryTaskStore` serves
/// fixture data for offline mode and tests.
#[async_trait]
pub trait TaskStore: Send + Sync {
  /// Fetch one page of tasks.
  async fn list(&self, limit: u64, skip: u64) -> Result<TaskPage, StoreError>;

  /// Fetch a single task by id.
  async fn get(&self, id: i64) -> Result<Task, StoreError>;

  /// Fetch a random task.
  async fn random(&self) -> Result<Task, StoreError>;

  /// Fetch all tasks belonging to one owner.
  async fn by_owner(&self, owner_id: i64) -> Result<TaskPage, StoreError>;

  /// Create a task. The store assigns the id and returns the full record.
  async fn create(&self, task: NewTask) -> Result<Task, StoreError>;

  /// Apply a partial update and return the full updated record.
  async fn update(&self, id: i64, patch: TaskPatch) -> Result<Task, StoreError>;

  /// Delete a task and return the deleted record for confirmation.
  async fn delete(&self, id: i64) -> Result<Task, StoreError>;
}
