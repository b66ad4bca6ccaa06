//! Newtype wrappers for the various id types in the system.
//!
//! Internal record ids are `i64` surrogate keys; `TaskId` is the opaque
//! external identifier (`res_` + 12 hex chars) callers use to reference a
//! research task across process boundaries.

use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;

macro_rules! pk_newtype {
  ($name:ident) => {
    #[derive(
      Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type,
    )]
    #[sqlx(transparent)]
    #[serde(transparent)]
    pub struct $name(pub i64);

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }

    impl From<i64> for $name {
      fn from(id: i64) -> Self {
        $name(id)
      }
    }

    impl From<$name> for i64 {
      fn from(id: $name) -> Self {
        id.0
      }
    }

    impl $name {
      pub fn new(id: i64) -> Self {
        $name(id)
      }

      pub fn inner(&self) -> i64 {
        self.0
      }
    }
  };
}

pk_newtype!(UserPk);
pk_newtype!(TaskPk);
pk_newtype!(GraphNodePk);
pk_newtype!(ChatSessionPk);

/// Opaque external identifier for a research task: `res_` followed by 12 hex
/// characters. Distinct from `TaskPk`, the internal surrogate key, so callers
/// never depend on row order or sequence gaps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
  const PREFIX: &'static str = "res_";

  /// Generate a new, globally-unique task id from random bytes.
  pub fn generate() -> Self {
    use rand::RngCore;
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    TaskId(format!("{}{}", Self::PREFIX, hex::encode(bytes)))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Well-formed task ids are exactly `res_` followed by 12 lowercase hex chars.
  pub fn is_well_formed(s: &str) -> bool {
    s.strip_prefix(Self::PREFIX)
      .map(|rest| rest.len() == 12 && rest.chars().all(|c| c.is_ascii_hexdigit()))
      .unwrap_or(false)
  }
}

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<String> for TaskId {
  fn from(s: String) -> Self {
    TaskId(s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn generated_task_id_is_well_formed() {
    let id = TaskId::generate();
    assert!(TaskId::is_well_formed(id.as_str()), "{}", id.as_str());
  }

  #[test]
  fn malformed_task_ids_rejected() {
    assert!(!TaskId::is_well_formed("res_xyz"));
    assert!(!TaskId::is_well_formed("task_abcdef012345"));
    assert!(!TaskId::is_well_formed("res_abcdef01234")); // 11 chars
  }

  #[test]
  fn pk_ordering_and_display() {
    let a = TaskPk::new(1);
    let b = TaskPk::new(2);
    assert!(a < b);
    assert_eq!(format!("{}", a), "1");
  }
}
