use async_trait::async_trait;

use crate::error::CoreError;

/// Wraps a whole request's worth of repository calls in a single
/// transaction, per §4.9: the orchestrator commits a task's terminal state
/// and its `ResearchResult` together, never one without the other.
///
/// Mirrors the teacher's transactional-boundary pattern (a handle borrowed
/// for the lifetime of one logical operation, committed or rolled back as a
/// unit) generalized from a single `ChatRepository` to the full repository
/// set this system persists.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
  type Tasks: crate::contracts::repositories::TaskRepository;
  type Results: crate::contracts::repositories::ResultRepository;
  type Graph: crate::contracts::repositories::GraphRepository;

  fn tasks(&self) -> &Self::Tasks;
  fn results(&self) -> &Self::Results;
  fn graph(&self) -> &Self::Graph;

  async fn commit(self) -> Result<(), CoreError>;
  async fn rollback(self) -> Result<(), CoreError>;
}
