//! Task record types shared between the store clients and the sync layer.

use serde::{Deserialize, Serialize};

/// A single task record as owned by the remote store.
///
/// Wire names follow the service (`todo`, `userId`); the Rust side uses
/// `text` and `owner_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
  pub id: i64,
  #[serde(rename = "todo")]
  pub text: String,
  pub completed: bool,
  #[serde(rename = "userId")]
  pub owner_id: i64,
}

/// One page of a task list query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPage {
  #[serde(rename = "todos")]
  pub tasks: Vec<Task>,
  pub total: u64,
  pub skip: u64,
  pub limit: u64,
}

impl TaskPage {
  /// Find a task in this page by id.
  pub fn find(&self, id: i64) -> Option<&Task> {
    self.tasks.iter().find(|t| t.id == id)
  }
}

/// Payload for creating a task. The store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
  #[serde(rename = "todo")]
  pub text: String,
  pub completed: bool,
  #[serde(rename = "userId")]
  pub owner_id: i64,
}

/// Partial update for an existing task. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
  #[serde(rename = "todo", skip_serializing_if = "Option::is_none")]
  pub text: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub completed: Option<bool>,
  #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
  pub owner_id: Option<i64>,
}

impl TaskPatch {
  /// Patch that only flips the completed flag.
  pub fn completed(value: bool) -> Self {
    Self {
      completed: Some(value),
      ..Self::default()
    }
  }

  /// Apply this patch to a task, shallow-merging set fields.
  pub fn apply_to(&self, task: &Task) -> Task {
    Task {
      id: task.id,
      text: self.text.clone().unwrap_or_else(|| task.text.clone()),
      completed: self.completed.unwrap_or(task.completed),
      owner_id: self.owner_id.unwrap_or(task.owner_id),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn task() -> Task {
    Task {
      id: 1,
      text: "Learn Rust".to_string(),
      completed: false,
      owner_id: 1,
    }
  }

  #[test]
  fn test_patch_applies_only_set_fields() {
    let patched = TaskPatch::completed(true).apply_to(&task());
    assert_eq!(patched.id, 1);
    assert_eq!(patched.text, "Learn Rust");
    assert!(patched.completed);
    assert_eq!(patched.owner_id, 1);
  }

  #[test]
  fn test_task_wire_names() {
    let json = serde_json::to_value(task()).unwrap();
    assert_eq!(json["todo"], "Learn Rust");
    assert_eq!(json["userId"], 1);
  }

  #[test]
  fn test_page_find() {
    let page = TaskPage {
      tasks: vec![task()],
      total: 1,
      skip: 0,
      limit: 30,
    };
    assert!(page.find(1).is_some());
    assert!(page.find(2).is_none());
  }
}
