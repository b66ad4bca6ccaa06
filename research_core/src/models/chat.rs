use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ChatSessionPk, UserPk};
use crate::models::result::SourceSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
  User,
  Assistant,
  System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
  pub id: ChatSessionPk,
  pub user_id: UserPk,
  pub title: String,
  pub context: Value,
  pub last_activity: DateTime<Utc>,
  pub created_at: DateTime<Utc>,
}

impl ChatSession {
  /// Derive a session title from the opening message, matching the teacher's
  /// convention of truncating user-supplied text for display fields.
  pub fn title_from_message(message: &str) -> String {
    let truncated: String = message.chars().take(60).collect();
    if message.chars().count() > 60 {
      format!("{truncated}...")
    } else {
      truncated
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
  pub id: i64,
  pub session_id: ChatSessionPk,
  pub role: ChatRole,
  pub content: String,
  pub sources: Vec<SourceSummary>,
  pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_message_is_not_truncated() {
    assert_eq!(ChatSession::title_from_message("hello"), "hello");
  }

  #[test]
  fn long_message_is_truncated_with_ellipsis() {
    let msg = "x".repeat(100);
    let title = ChatSession::title_from_message(&msg);
    assert_eq!(title, format!("{}...", "x".repeat(60)));
  }
}
