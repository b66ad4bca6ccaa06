use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Mutex;

use research_core::contracts::unit_of_work::UnitOfWork;
use research_core::error::CoreError;

use crate::exec::PgExec;
use crate::repositories::{PgGraphRepository, PgResultRepository, PgTaskRepository};

/// A single logical request's worth of writes, backed by one Postgres
/// transaction shared across the task/result/graph repositories (§4.9). The
/// orchestrator uses this to commit a task's terminal status together with
/// its `ResearchResult` and graph artifacts, never one without the other.
pub struct PgUnitOfWork {
  exec: PgExec,
  tx: Arc<Mutex<sqlx::Transaction<'static, sqlx::Postgres>>>,
  tasks: PgTaskRepository,
  results: PgResultRepository,
  graph: PgGraphRepository,
}

impl PgUnitOfWork {
  pub async fn begin(pool: &PgPool) -> Result<Self, CoreError> {
    let tx = pool.begin().await.map_err(CoreError::from_database_error)?;
    let tx = Arc::new(Mutex::new(tx));
    let exec = PgExec::Tx(tx.clone());
    Ok(Self {
      exec: exec.clone(),
      tx,
      tasks: PgTaskRepository::new(exec.clone()),
      results: PgResultRepository::new(exec.clone()),
      graph: PgGraphRepository::new(exec),
    })
  }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
  type Tasks = PgTaskRepository;
  type Results = PgResultRepository;
  type Graph = PgGraphRepository;

  fn tasks(&self) -> &Self::Tasks {
    &self.tasks
  }

  fn results(&self) -> &Self::Results {
    &self.results
  }

  fn graph(&self) -> &Self::Graph {
    &self.graph
  }

  async fn commit(self) -> Result<(), CoreError> {
    let Self { exec, tx, tasks, results, graph } = self;
    drop((exec, tasks, results, graph));
    let tx = Arc::into_inner(tx)
      .ok_or_else(|| CoreError::Internal("unit of work still has outstanding references".into()))?
      .into_inner();
    tx.commit().await.map_err(CoreError::from_database_error)
  }

  async fn rollback(self) -> Result<(), CoreError> {
    let Self { exec, tx, tasks, results, graph } = self;
    drop((exec, tasks, results, graph));
    let tx = Arc::into_inner(tx)
      .ok_or_else(|| CoreError::Internal("unit of work still has outstanding references".into()))?
      .into_inner();
    tx.rollback().await.map_err(CoreError::from_database_error)
  }
}
