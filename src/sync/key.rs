//! Structural identities for cached task queries.

use std::fmt;

/// Identity of one cached query.
///
/// Keys are structural: two keys are equal iff their kind and parameters
/// are equal, so each distinct query owns exactly one cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
  /// One pagination window of the task list.
  List { limit: u64, skip: u64 },
  /// A single task by id.
  Detail { id: i64 },
  /// All tasks belonging to one owner.
  ByOwner { owner_id: i64 },
  /// The "random task" query.
  Random,
}

/// Selector over the key hierarchy.
///
/// A prefix addresses either one key or a whole family of keys; invalidating
/// `Lists` hits every cached pagination window while leaving detail and
/// owner queries alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPrefix {
  /// Every `List` key, regardless of window.
  Lists,
  /// The detail key for one id.
  Detail(i64),
  /// The owner query for one owner.
  ByOwner(i64),
  /// The random-task key.
  Random,
  /// Everything.
  All,
}

impl QueryKey {
  /// Whether this key falls under the given prefix.
  pub fn matches(&self, prefix: &KeyPrefix) -> bool {
    match (prefix, self) {
      (KeyPrefix::All, _) => true,
      (KeyPrefix::Lists, QueryKey::List { .. }) => true,
      (KeyPrefix::Detail(id), QueryKey::Detail { id: key_id }) => id == key_id,
      (KeyPrefix::ByOwner(owner), QueryKey::ByOwner { owner_id }) => owner == owner_id,
      (KeyPrefix::Random, QueryKey::Random) => true,
      _ => false,
    }
  }

  /// Human-readable form for logs.
  pub fn describe(&self) -> String {
    match self {
      QueryKey::List { limit, skip } => format!("tasks list limit={} skip={}", limit, skip),
      QueryKey::Detail { id } => format!("task {}", id),
      QueryKey::ByOwner { owner_id } => format!("tasks for owner {}", owner_id),
      QueryKey::Random => "random task".to_string(),
    }
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.describe())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_lists_prefix_matches_every_window() {
    let prefix = KeyPrefix::Lists;
    assert!(QueryKey::List { limit: 30, skip: 0 }.matches(&prefix));
    assert!(QueryKey::List { limit: 10, skip: 20 }.matches(&prefix));
    assert!(!QueryKey::Detail { id: 5 }.matches(&prefix));
    assert!(!QueryKey::ByOwner { owner_id: 1 }.matches(&prefix));
    assert!(!QueryKey::Random.matches(&prefix));
  }

  #[test]
  fn test_detail_prefix_is_id_scoped() {
    assert!(QueryKey::Detail { id: 5 }.matches(&KeyPrefix::Detail(5)));
    assert!(!QueryKey::Detail { id: 6 }.matches(&KeyPrefix::Detail(5)));
  }

  #[test]
  fn test_random_prefix_matches_only_random() {
    assert!(QueryKey::Random.matches(&KeyPrefix::Random));
    assert!(!QueryKey::List { limit: 30, skip: 0 }.matches(&KeyPrefix::Random));
  }

  #[test]
  fn test_by_owner_prefix_is_owner_scoped() {
    assert!(QueryKey::ByOwner { owner_id: 1 }.matches(&KeyPrefix::ByOwner(1)));
    assert!(!QueryKey::ByOwner { owner_id: 2 }.matches(&KeyPrefix::ByOwner(1)));
    assert!(!QueryKey::List { limit: 30, skip: 0 }.matches(&KeyPrefix::ByOwner(1)));
  }

  #[test]
  fn test_all_prefix_matches_everything() {
    for key in [
      QueryKey::List { limit: 30, skip: 0 },
      QueryKey::Detail { id: 1 },
      QueryKey::ByOwner { owner_id: 1 },
      QueryKey::Random,
    ] {
      assert!(key.matches(&KeyPrefix::All));
    }
  }

  #[test]
  fn test_keys_are_structural() {
    assert_eq!(
      QueryKey::List { limit: 30, skip: 0 },
      QueryKey::List { limit: 30, skip: 0 }
    );
    assert_ne!(
      QueryKey::List { limit: 30, skip: 0 },
      QueryKey::List { limit: 30, skip: 30 }
    );
  }
}
