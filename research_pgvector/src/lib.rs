pub mod exec;
pub mod repositories;
pub mod unit_of_work;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use exec::PgExec;
pub use repositories::{
  PgArtifactRepository, PgChatMessageRepository, PgChatSessionRepository, PgGraphRepository,
  PgResultRepository, PgSessionRepository, PgShareRepository, PgTaskRepository, PgUserRepository,
};
pub use unit_of_work::PgUnitOfWork;

/// Connect to Postgres and run the embedded migrations. Mirrors the
/// teacher's `PgPoolOptions::new().connect(db_url)` call site in
/// `bot_server/src/indexer.rs`, generalized with a bounded pool and a
/// migration step since this store owns its own schema.
pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
  let pool = PgPoolOptions::new()
    .max_connections(max_connections)
    .connect(database_url)
    .await?;
  sqlx::migrate!("./migrations").run(&pool).await?;
  Ok(pool)
}

/// A handle bundling one repository per contract, all backed directly by the
/// pool (no shared transaction). Use `PgUnitOfWork::begin` instead when a
/// caller needs several writes to commit atomically.
#[derive(Clone)]
pub struct PgStore {
  pub users: std::sync::Arc<PgUserRepository>,
  pub sessions: std::sync::Arc<PgSessionRepository>,
  pub tasks: std::sync::Arc<PgTaskRepository>,
  pub results: std::sync::Arc<PgResultRepository>,
  pub artifacts: std::sync::Arc<PgArtifactRepository>,
  pub shares: std::sync::Arc<PgShareRepository>,
  pub graph: std::sync::Arc<PgGraphRepository>,
  pub chat_sessions: std::sync::Arc<PgChatSessionRepository>,
  pub chat_messages: std::sync::Arc<PgChatMessageRepository>,
  pub pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    let exec = PgExec::pool(pool.clone());
    Self {
      users: std::sync::Arc::new(PgUserRepository::new(exec.clone())),
      sessions: std::sync::Arc::new(PgSessionRepository::new(exec.clone())),
      tasks: std::sync::Arc::new(PgTaskRepository::new(exec.clone())),
      results: std::sync::Arc::new(PgResultRepository::new(exec.clone())),
      artifacts: std::sync::Arc::new(PgArtifactRepository::new(exec.clone())),
      shares: std::sync::Arc::new(PgShareRepository::new(exec.clone())),
      graph: std::sync::Arc::new(PgGraphRepository::new(exec.clone())),
      chat_sessions: std::sync::Arc::new(PgChatSessionRepository::new(exec.clone())),
      chat_messages: std::sync::Arc::new(PgChatMessageRepository::new(exec)),
      pool,
    }
  }

  pub async fn unit_of_work(&self) -> anyhow::Result<PgUnitOfWork> {
    Ok(PgUnitOfWork::begin(&self.pool).await?)
  }
}
