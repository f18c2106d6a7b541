//! The mutation coordinator: snapshot, optimistic apply, commit, settle.
//!
//! One invocation runs one logical mutation through the four phases in
//! order. The visible cache state after settle is either the post-mutation
//! state (success) or exactly the pre-mutation snapshot (failure) — never a
//! partial overwrite. Concurrent mutations are not serialized; two touching
//! the same key are last-write-wins.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::{NewTask, StoreError, Task, TaskPatch, TaskStore};

use super::cache::{CacheValue, TaskCache};
use super::key::QueryKey;
use super::policy::{self, MutationKind};

/// Failure surfaced by a mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
  /// Rejected before any cache side effect.
  #[error("validation failed: {0}")]
  Validation(String),
  /// The remote call failed; the cache has been rolled back.
  #[error(transparent)]
  Store(#[from] StoreError),
}

/// One logical mutation request.
#[derive(Debug, Clone)]
pub enum Mutation {
  Add { text: String, owner_id: i64 },
  Update { patch: TaskPatch, before: Task },
  Delete { before: Task },
}

impl Mutation {
  fn kind(&self) -> MutationKind {
    match self {
      Mutation::Add { .. } => MutationKind::Add,
      Mutation::Update { .. } => MutationKind::Update,
      Mutation::Delete { .. } => MutationKind::Delete,
    }
  }
}

/// Runs mutations against the store and keeps the cache consistent.
pub struct MutationCoordinator {
  cache: Arc<TaskCache>,
  store: Arc<dyn TaskStore>,
  /// Temporary ids for optimistic records live in their own negative
  /// namespace so they can never collide with server-assigned ids, even
  /// under rapid double-submission.
  next_temp_id: AtomicI64,
}

impl MutationCoordinator {
  pub fn new(cache: Arc<TaskCache>, store: Arc<dyn TaskStore>) -> Self {
    Self {
      cache,
      store,
      next_temp_id: AtomicI64::new(-1),
    }
  }

  /// Run one mutation through the full protocol.
  ///
  /// Returns the authoritative server record on success. On failure every
  /// snapshotted cache entry has been restored and the error is returned
  /// for the caller to surface; the caller may re-invoke, which starts a
  /// fresh cycle.
  pub async fn mutate(&self, mutation: Mutation) -> Result<Task, SyncError> {
    // Phase 0: validation, before any cache side effect.
    validate(&mutation)?;

    let kind = mutation.kind();
    let (owner_id, id) = match &mutation {
      Mutation::Add { owner_id, .. } => (*owner_id, None),
      Mutation::Update { before, .. } | Mutation::Delete { before } => {
        (before.owner_id, Some(before.id))
      }
    };

    // Phase 1: snapshot every cached entry the optimistic apply will touch.
    let mut affected: Vec<QueryKey> = Vec::new();
    for prefix in policy::optimistic_prefixes(kind, owner_id, id) {
      for key in self.cache.keys_matching(&prefix) {
        if !affected.contains(&key) {
          affected.push(key);
        }
      }
    }
    let snapshot: Vec<(QueryKey, CacheValue)> = affected
      .iter()
      .filter_map(|key| self.cache.read(*key).data.map(|data| (*key, data)))
      .collect();

    // Phase 2: optimistic apply.
    let temp_id = self.next_temp_id.fetch_sub(1, Ordering::SeqCst);
    let before = match &mutation {
      Mutation::Add { .. } => None,
      Mutation::Update { before, .. } | Mutation::Delete { before } => Some(before.clone()),
    };
    for (key, prior) in &snapshot {
      if let Some(projected) = project(&mutation, temp_id, key, prior) {
        self.cache.write(*key, projected);
      }
    }
    debug!(
      kind = kind.describe(),
      affected = snapshot.len(),
      "optimistic apply"
    );

    // Phase 3: exactly one remote call, no automatic retry.
    let outcome = match mutation {
      Mutation::Add { text, owner_id } => {
        self
          .store
          .create(NewTask {
            text,
            completed: false,
            owner_id,
          })
          .await
      }
      Mutation::Update { patch, before } => self.store.update(before.id, patch).await,
      Mutation::Delete { before } => self.store.delete(before.id).await,
    };

    // Phase 4: settle.
    match outcome {
      Ok(server) => {
        match kind {
          MutationKind::Add => {
            // The placeholder must not survive commit anywhere.
            for (key, _) in &snapshot {
              self.replace_temp_record(*key, temp_id, &server);
            }
            self
              .cache
              .write(QueryKey::Detail { id: server.id }, CacheValue::Task(server.clone()));
          }
          MutationKind::Update => {
            self
              .cache
              .write(QueryKey::Detail { id: server.id }, CacheValue::Task(server.clone()));
          }
          MutationKind::Delete => {
            self.cache.remove(QueryKey::Detail { id: server.id });
          }
        }
        for prefix in policy::stale_prefixes(kind, before.as_ref(), Some(&server)) {
          self.cache.invalidate(&prefix);
        }
        Ok(server)
      }
      Err(e) => {
        warn!(kind = kind.describe(), error = %e, "mutation failed, rolling back");
        for (key, prior) in snapshot {
          self.cache.write(key, prior);
        }
        // Invalidation still runs so the next read reconciles with the
        // server.
        for prefix in policy::stale_prefixes(kind, before.as_ref(), None) {
          self.cache.invalidate(&prefix);
        }
        Err(SyncError::Store(e))
      }
    }
  }

  /// Swap an optimistic placeholder for the authoritative record wherever
  /// it landed.
  fn replace_temp_record(&self, key: QueryKey, temp_id: i64, server: &Task) {
    let entry = self.cache.read(key);
    let Some(CacheValue::Page(mut page)) = entry.data else {
      return;
    };
    let mut touched = false;
    for task in &mut page.tasks {
      if task.id == temp_id {
        *task = server.clone();
        touched = true;
      }
    }
    if touched {
      self.cache.write(key, CacheValue::Page(page));
    }
  }
}

fn validate(mutation: &Mutation) -> Result<(), SyncError> {
  let text = match mutation {
    Mutation::Add { text, .. } => Some(text.as_str()),
    Mutation::Update { patch, .. } => patch.text.as_deref(),
    Mutation::Delete { .. } => None,
  };
  if let Some(text) = text {
    if text.trim().is_empty() {
      return Err(SyncError::Validation("task text must not be empty".to_string()));
    }
  }
  Ok(())
}

/// Expected post-mutation value for one affected entry.
///
/// Returns `None` when the entry is unaffected by this mutation (e.g. a
/// detail entry for a different task).
fn project(mutation: &Mutation, temp_id: i64, key: &QueryKey, prior: &CacheValue) -> Option<CacheValue> {
  match mutation {
    Mutation::Add { text, owner_id } => {
      let prior = prior.as_page()?;
      let temp = Task {
        id: temp_id,
        text: text.clone(),
        completed: false,
        owner_id: *owner_id,
      };
      // Later pagination windows only see the count change; the record
      // itself belongs at the head of the first window.
      let prepend = match key {
        QueryKey::List { skip, .. } => *skip == 0,
        QueryKey::ByOwner { .. } => true,
        _ => false,
      };
      let mut page = prior.clone();
      if prepend {
        page.tasks.insert(0, temp);
      }
      page.total += 1;
      Some(CacheValue::Page(page))
    }
    Mutation::Update { patch, before } => match prior {
      CacheValue::Page(page) => {
        let mut page = page.clone();
        let mut touched = false;
        for task in &mut page.tasks {
          if task.id == before.id {
            *task = patch.apply_to(task);
            touched = true;
          }
        }
        touched.then(|| CacheValue::Page(page))
      }
      CacheValue::Task(task) => {
        (task.id == before.id).then(|| CacheValue::Task(patch.apply_to(task)))
      }
    },
    Mutation::Delete { before } => {
      let prior = prior.as_page()?;
      let mut page = prior.clone();
      page.tasks.retain(|t| t.id != before.id);
      page.total = page.total.saturating_sub(1);
      Some(CacheValue::Page(page))
    }
  }
}
