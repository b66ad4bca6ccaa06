use std::sync::Arc;

use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;

use research_core::error::CoreError;

/// Either a pooled connection or a shared, in-flight transaction.
///
/// Repositories are generic over this instead of `PgPool` directly so the
/// same repository code backs both ordinary calls and the unit-of-work
/// transaction that wraps a whole request (§4.9). Cloning is cheap — the
/// transaction variant is reference-counted, mirroring the teacher's
/// `Arc<PgPool>`-everywhere convention generalized to also carry a
/// transaction handle.
#[derive(Clone)]
pub enum PgExec {
  Pool(PgPool),
  Tx(Arc<Mutex<Transaction<'static, Postgres>>>),
}

impl PgExec {
  pub fn pool(pool: PgPool) -> Self {
    PgExec::Pool(pool)
  }

  /// Run a closure with a live `&mut PgConnection`, regardless of whether
  /// this handle wraps a pool (which checks out a connection per call) or a
  /// transaction (which reuses the same connection for the whole request).
  pub async fn with<'a, F, T>(&'a self, f: F) -> Result<T, CoreError>
  where
    F: for<'c> FnOnce(
      &'c mut PgConnection,
    ) -> futures::future::BoxFuture<'c, Result<T, sqlx::Error>>,
  {
    match self {
      PgExec::Pool(pool) => {
        let mut conn = pool.acquire().await.map_err(CoreError::from_database_error)?;
        f(&mut conn).await.map_err(CoreError::from_database_error)
      }
      PgExec::Tx(tx) => {
        let mut guard = tx.lock().await;
        f(&mut guard).await.map_err(CoreError::from_database_error)
      }
    }
  }
}
