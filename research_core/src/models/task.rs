use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::ids::{TaskId, TaskPk, UserPk};

/// Research depth preset. Chooses per-stage deadlines and source limits; see
/// `DepthConfig::for_depth` and `StageDeadlines::for_depth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
  Quick,
  Standard,
  Comprehensive,
}

impl std::fmt::Display for ResearchDepth {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      ResearchDepth::Quick => "quick",
      ResearchDepth::Standard => "standard",
      ResearchDepth::Comprehensive => "comprehensive",
    };
    write!(f, "{s}")
  }
}

/// Lookup table of limits per depth. Treated as a constant table, never
/// computed — see design notes on dynamic config.
#[derive(Debug, Clone, Copy)]
pub struct DepthConfig {
  pub max_searches: usize,
  pub max_sources: u32,
  pub summarization_length: usize,
  pub synthesis_detail: &'static str,
}

impl DepthConfig {
  pub fn for_depth(depth: ResearchDepth) -> Self {
    match depth {
      ResearchDepth::Quick => DepthConfig {
        max_searches: 1,
        max_sources: 5,
        summarization_length: 200,
        synthesis_detail: "brief",
      },
      ResearchDepth::Standard => DepthConfig {
        max_searches: 3,
        max_sources: 15,
        summarization_length: 300,
        synthesis_detail: "standard",
      },
      ResearchDepth::Comprehensive => DepthConfig {
        max_searches: 5,
        max_sources: 30,
        summarization_length: 500,
        synthesis_detail: "detailed",
      },
    }
  }
}

/// Per-stage deadlines, in seconds, as a function of depth.
#[derive(Debug, Clone, Copy)]
pub struct StageDeadlines {
  pub analysis: Duration,
  pub search: Duration,
  pub fetch: Duration,
  pub synthesis: Duration,
  pub detailed_analysis: Duration,
}

impl StageDeadlines {
  pub fn for_depth(depth: ResearchDepth) -> Self {
    let (analysis, search, fetch, synthesis) = match depth {
      ResearchDepth::Quick => (30, 60, 120, 300),
      ResearchDepth::Standard => (60, 120, 300, 600),
      ResearchDepth::Comprehensive => (120, 180, 600, 900),
    };
    StageDeadlines {
      analysis: Duration::from_secs(analysis),
      search: Duration::from_secs(search),
      fetch: Duration::from_secs(fetch),
      synthesis: Duration::from_secs(synthesis),
      detailed_analysis: Duration::from_secs(synthesis / 2),
    }
  }
}

/// Lifecycle status of a `ResearchTask`. `Completed`, `Failed`, and `Cancelled`
/// are terminal and absorbing: once reached, no further transition is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Pending,
  Analyzing,
  Searching,
  Fetching,
  Synthesizing,
  Generating,
  Completed,
  Failed,
  Cancelled,
}

impl TaskStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
    )
  }

  /// Whether `self -> next` is a legal state-machine transition. `Failed` and
  /// `Cancelled` are reachable from any non-terminal state; the happy path is
  /// strictly ordered.
  pub fn can_transition_to(self, next: TaskStatus) -> bool {
    if self.is_terminal() {
      return false;
    }
    if matches!(next, TaskStatus::Failed | TaskStatus::Cancelled) {
      return true;
    }
    matches!(
      (self, next),
      (TaskStatus::Pending, TaskStatus::Analyzing)
        | (TaskStatus::Analyzing, TaskStatus::Searching)
        | (TaskStatus::Searching, TaskStatus::Fetching)
        | (TaskStatus::Fetching, TaskStatus::Synthesizing)
        | (TaskStatus::Synthesizing, TaskStatus::Generating)
        | (TaskStatus::Generating, TaskStatus::Completed)
    )
  }

  /// Monotonic progress percentage associated with entering this status.
  pub fn entry_progress(self) -> u8 {
    match self {
      TaskStatus::Pending => 0,
      TaskStatus::Analyzing => 10,
      TaskStatus::Searching => 25,
      TaskStatus::Fetching => 50,
      TaskStatus::Synthesizing => 85,
      TaskStatus::Generating => 95,
      TaskStatus::Completed => 100,
      TaskStatus::Failed | TaskStatus::Cancelled => 0,
    }
  }
}

/// A single research task: one invocation of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchTask {
  pub id: TaskPk,
  pub task_id: TaskId,
  pub user_id: UserPk,
  pub query: String,
  pub depth: ResearchDepth,
  pub max_sources: u32,
  pub options: Value,
  pub status: TaskStatus,
  pub progress: u8,
  pub warnings: Vec<String>,
  pub error_message: Option<String>,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

/// Fields accepted when creating a new task; the repository assigns `id`,
/// `task_id`, `status`, `progress`, and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResearchTask {
  pub user_id: UserPk,
  pub query: String,
  pub depth: ResearchDepth,
  pub max_sources: u32,
  pub options: Value,
}

impl ResearchTask {
  /// Clamp a caller-requested `max_sources` to the depth's ceiling.
  pub fn clamp_max_sources(requested: u32, depth: ResearchDepth) -> u32 {
    let ceiling = DepthConfig::for_depth(depth).max_sources;
    requested.clamp(1, ceiling)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn terminal_states_absorb() {
    for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
      assert!(terminal.is_terminal());
      for next in [
        TaskStatus::Pending,
        TaskStatus::Analyzing,
        TaskStatus::Completed,
        TaskStatus::Failed,
      ] {
        assert!(!terminal.can_transition_to(next));
      }
    }
  }

  #[test]
  fn happy_path_is_strictly_ordered() {
    let path = [
      TaskStatus::Pending,
      TaskStatus::Analyzing,
      TaskStatus::Searching,
      TaskStatus::Fetching,
      TaskStatus::Synthesizing,
      TaskStatus::Generating,
      TaskStatus::Completed,
    ];
    for pair in path.windows(2) {
      assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
    }
    // skipping a stage is not allowed
    assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Fetching));
  }

  #[test]
  fn failed_and_cancelled_reachable_from_any_non_terminal() {
    for s in [
      TaskStatus::Pending,
      TaskStatus::Analyzing,
      TaskStatus::Searching,
      TaskStatus::Fetching,
      TaskStatus::Synthesizing,
      TaskStatus::Generating,
    ] {
      assert!(s.can_transition_to(TaskStatus::Failed));
      assert!(s.can_transition_to(TaskStatus::Cancelled));
    }
  }

  #[test]
  fn max_sources_clamped_to_depth_ceiling() {
    assert_eq!(
      ResearchTask::clamp_max_sources(100, ResearchDepth::Quick),
      5
    );
    assert_eq!(
      ResearchTask::clamp_max_sources(0, ResearchDepth::Standard),
      1
    );
    assert_eq!(
      ResearchTask::clamp_max_sources(10, ResearchDepth::Comprehensive),
      10
    );
  }

  #[test]
  fn detailed_analysis_deadline_is_half_synthesis() {
    let d = StageDeadlines::for_depth(ResearchDepth::Standard);
    assert_eq!(d.detailed_analysis, d.synthesis / 2);
  }
}
