use async_trait::async_trait;
use pgvector::Vector;
use sqlx::Row;

use research_core::contracts::repositories::ResultRepository;
use research_core::error::CoreError;
use research_core::ids::TaskPk;
use research_core::models::ResearchResult;

use crate::exec::PgExec;

pub struct PgResultRepository {
  exec: PgExec,
}

impl PgResultRepository {
  pub fn new(exec: PgExec) -> Self {
    Self { exec }
  }
}

#[async_trait]
impl ResultRepository for PgResultRepository {
  async fn create(&self, result: &ResearchResult) -> Result<(), CoreError> {
    let task_id = result.task_id.inner();
    let synthesis = serde_json::to_value(&result.synthesis).map_err(|e| CoreError::Internal(e.to_string()))?;
    let sources = serde_json::to_value(&result.sources).map_err(|e| CoreError::Internal(e.to_string()))?;
    let query_analysis = result.query_analysis.clone();
    let detailed_analysis = result
      .detailed_analysis
      .as_ref()
      .map(serde_json::to_value)
      .transpose()
      .map_err(|e| CoreError::Internal(e.to_string()))?;
    let featured_media =
      serde_json::to_value(&result.featured_media).map_err(|e| CoreError::Internal(e.to_string()))?;
    let sources_used = result.sources_used as i32;
    let synthesis_embedding = result.synthesis_embedding.clone().map(Vector::from);
    let query_embedding = result.query_embedding.clone().map(Vector::from);

    self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"INSERT INTO research_results
                 (task_id, synthesis, sources, query_analysis, detailed_analysis,
                  featured_media, sources_used, synthesis_embedding, query_embedding)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT (task_id) DO UPDATE SET
                 synthesis = EXCLUDED.synthesis,
                 sources = EXCLUDED.sources,
                 query_analysis = EXCLUDED.query_analysis,
                 detailed_analysis = EXCLUDED.detailed_analysis,
                 featured_media = EXCLUDED.featured_media,
                 sources_used = EXCLUDED.sources_used,
                 synthesis_embedding = EXCLUDED.synthesis_embedding,
                 query_embedding = EXCLUDED.query_embedding"#,
          )
          .bind(task_id)
          .bind(&synthesis)
          .bind(&sources)
          .bind(&query_analysis)
          .bind(&detailed_analysis)
          .bind(&featured_media)
          .bind(sources_used)
          .bind(&synthesis_embedding)
          .bind(&query_embedding)
          .execute(conn)
          .await
          .map(|_| ())
        })
      })
      .await
  }

  async fn get_by_task_id(&self, task_id: TaskPk) -> Result<Option<ResearchResult>, CoreError> {
    let tid = task_id.inner();
    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT task_id, synthesis, sources, query_analysis, detailed_analysis,
                      featured_media, sources_used, synthesis_embedding, query_embedding
               FROM research_results WHERE task_id = $1"#,
          )
          .bind(tid)
          .fetch_optional(conn)
          .await
        })
      })
      .await?;

    let Some(row) = row else { return Ok(None) };
    let synthesis_json: serde_json::Value =
      row.try_get("synthesis").map_err(CoreError::from_database_error)?;
    let sources_json: serde_json::Value =
      row.try_get("sources").map_err(CoreError::from_database_error)?;
    let detailed_json: Option<serde_json::Value> = row
      .try_get("detailed_analysis")
      .map_err(CoreError::from_database_error)?;
    let featured_json: serde_json::Value = row
      .try_get("featured_media")
      .map_err(CoreError::from_database_error)?;
    let synthesis_embedding: Option<Vector> = row
      .try_get("synthesis_embedding")
      .map_err(CoreError::from_database_error)?;
    let query_embedding: Option<Vector> = row
      .try_get("query_embedding")
      .map_err(CoreError::from_database_error)?;

    Ok(Some(ResearchResult {
      task_id: TaskPk::new(row.try_get("task_id").map_err(CoreError::from_database_error)?),
      synthesis: serde_json::from_value(synthesis_json).map_err(|e| CoreError::Internal(e.to_string()))?,
      sources: serde_json::from_value(sources_json).map_err(|e| CoreError::Internal(e.to_string()))?,
      query_analysis: row
        .try_get("query_analysis")
        .map_err(CoreError::from_database_error)?,
      detailed_analysis: detailed_json
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| CoreError::Internal(e.to_string()))?,
      featured_media: serde_json::from_value(featured_json).map_err(|e| CoreError::Internal(e.to_string()))?,
      sources_used: row
        .try_get::<i32, _>("sources_used")
        .map_err(CoreError::from_database_error)? as u32,
      synthesis_embedding: synthesis_embedding.map(|v| v.to_vec()),
      query_embedding: query_embedding.map(|v| v.to_vec()),
    }))
  }

  async fn vector_search(
    &self,
    query_embedding: &[f32],
    task_ids: &[TaskPk],
    top_k: u32,
  ) -> Result<Vec<(TaskPk, String, f32)>, CoreError> {
    if task_ids.is_empty() {
      return Ok(Vec::new());
    }
    let ids: Vec<i64> = task_ids.iter().map(|t| t.inner()).collect();
    let vector = Vector::from(query_embedding.to_vec());
    let top_k = top_k as i64;

    let rows = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT task_id, synthesis->>'executive_summary' AS content,
                      (1 - (synthesis_embedding <=> $1))::real AS similarity
               FROM research_results
               WHERE task_id = ANY($2) AND synthesis_embedding IS NOT NULL
               ORDER BY synthesis_embedding <=> $1
               LIMIT $3"#,
          )
          .bind(&vector)
          .bind(&ids)
          .bind(top_k)
          .fetch_all(conn)
          .await
        })
      })
      .await?;

    rows
      .into_iter()
      .map(|row| {
        Ok((
          TaskPk::new(row.try_get("task_id").map_err(CoreError::from_database_error)?),
          row
            .try_get::<Option<String>, _>("content")
            .map_err(CoreError::from_database_error)?
            .unwrap_or_default(),
          row.try_get::<f32, _>("similarity").map_err(CoreError::from_database_error)?,
        ))
      })
      .collect()
  }
}
