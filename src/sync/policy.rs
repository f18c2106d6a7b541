//! Invalidation policy: which key families a mutation touches.
//!
//! Pure and stateless — the policy maps a mutation to key prefixes and never
//! looks at the cache or performs I/O. Prefixes always address whole
//! families (every cached pagination window), never one hardcoded page.

use crate::store::Task;

use super::key::KeyPrefix;

/// The three logical mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
  Add,
  Update,
  Delete,
}

impl MutationKind {
  pub fn describe(&self) -> &'static str {
    match self {
      MutationKind::Add => "add",
      MutationKind::Update => "update",
      MutationKind::Delete => "delete",
    }
  }
}

/// Key families the optimistic projection writes to (and therefore the
/// families snapshotted for rollback).
pub fn optimistic_prefixes(kind: MutationKind, owner_id: i64, id: Option<i64>) -> Vec<KeyPrefix> {
  match kind {
    MutationKind::Add => vec![KeyPrefix::Lists, KeyPrefix::ByOwner(owner_id)],
    MutationKind::Update => {
      let mut prefixes = vec![KeyPrefix::Lists, KeyPrefix::ByOwner(owner_id)];
      if let Some(id) = id {
        prefixes.push(KeyPrefix::Detail(id));
      }
      prefixes
    }
    // The detail entry is removed on confirmed delete, not projected.
    MutationKind::Delete => vec![KeyPrefix::Lists, KeyPrefix::ByOwner(owner_id)],
  }
}

/// Key families marked stale after settle, success or failure.
///
/// `before` is the pre-mutation record where one exists (update/delete);
/// `after` is the server-confirmed record where one exists (add/update).
pub fn stale_prefixes(
  kind: MutationKind,
  before: Option<&Task>,
  after: Option<&Task>,
) -> Vec<KeyPrefix> {
  match kind {
    MutationKind::Add => vec![KeyPrefix::Lists],
    MutationKind::Update | MutationKind::Delete => {
      let mut prefixes = vec![KeyPrefix::Lists];
      // Owner and id from the server record when the call succeeded, else
      // from the pre-image captured before the attempt.
      let task = after.or(before);
      if let Some(task) = task {
        prefixes.push(KeyPrefix::ByOwner(task.owner_id));
        prefixes.push(KeyPrefix::Detail(task.id));
      }
      prefixes
    }
  }
}
