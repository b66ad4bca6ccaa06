use async_trait::async_trait;
use pgvector::Vector;
use sqlx::Row;

use research_core::contracts::repositories::GraphRepository;
use research_core::error::CoreError;
use research_core::ids::{GraphNodePk, TaskPk};
use research_core::models::{CreateGraphNode, EdgeType, GraphEdge, GraphNode, NodeType};

use crate::exec::PgExec;

pub struct PgGraphRepository {
  exec: PgExec,
}

impl PgGraphRepository {
  pub fn new(exec: PgExec) -> Self {
    Self { exec }
  }
}

fn node_type_str(t: NodeType) -> &'static str {
  match t {
    NodeType::Topic => "topic",
    NodeType::Finding => "finding",
    NodeType::Source => "source",
  }
}

fn parse_node_type(s: &str) -> NodeType {
  match s {
    "finding" => NodeType::Finding,
    "source" => NodeType::Source,
    _ => NodeType::Topic,
  }
}

fn edge_type_str(t: EdgeType) -> &'static str {
  match t {
    EdgeType::RelatedTo => "related_to",
  }
}

fn row_to_node(row: sqlx::postgres::PgRow) -> Result<GraphNode, CoreError> {
  let node_type: String = row.try_get("node_type").map_err(CoreError::from_database_error)?;
  let embedding: Vector = row.try_get("embedding").map_err(CoreError::from_database_error)?;
  Ok(GraphNode {
    id: GraphNodePk::new(row.try_get("id").map_err(CoreError::from_database_error)?),
    task_id: TaskPk::new(row.try_get("task_id").map_err(CoreError::from_database_error)?),
    node_type: parse_node_type(&node_type),
    node_value: row.try_get("node_value").map_err(CoreError::from_database_error)?,
    properties: row.try_get("properties").map_err(CoreError::from_database_error)?,
    embedding: embedding.to_vec(),
    created_at: row.try_get("created_at").map_err(CoreError::from_database_error)?,
  })
}

#[async_trait]
impl GraphRepository for PgGraphRepository {
  async fn create_node(&self, data: &CreateGraphNode) -> Result<GraphNode, CoreError> {
    let task_id = data.task_id.inner();
    let node_type = node_type_str(data.node_type).to_string();
    let node_value = data.node_value.clone();
    let properties = data.properties.clone();
    let embedding = Vector::from(data.embedding.clone());

    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"INSERT INTO graph_nodes (task_id, node_type, node_value, properties, embedding)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id, task_id, node_type, node_value, properties, embedding, created_at"#,
          )
          .bind(task_id)
          .bind(&node_type)
          .bind(&node_value)
          .bind(&properties)
          .bind(&embedding)
          .fetch_one(conn)
          .await
        })
      })
      .await?;
    row_to_node(row)
  }

  async fn create_edge(&self, edge: &GraphEdge) -> Result<(), CoreError> {
    let source = edge.source_node_id.inner();
    let target = edge.target_node_id.inner();
    let edge_type = edge_type_str(edge.edge_type).to_string();
    let weight = edge.weight;
    let properties = edge.properties.clone();

    self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"INSERT INTO graph_edges (source_node_id, target_node_id, edge_type, weight, properties)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (source_node_id, target_node_id, edge_type) DO NOTHING"#,
          )
          .bind(source)
          .bind(target)
          .bind(&edge_type)
          .bind(weight)
          .bind(&properties)
          .execute(conn)
          .await
          .map(|_| ())
        })
      })
      .await
  }

  async fn nodes_for_task(&self, task_id: TaskPk) -> Result<Vec<GraphNode>, CoreError> {
    let tid = task_id.inner();
    let rows = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT id, task_id, node_type, node_value, properties, embedding, created_at
               FROM graph_nodes WHERE task_id = $1 ORDER BY id"#,
          )
          .bind(tid)
          .fetch_all(conn)
          .await
        })
      })
      .await?;
    rows.into_iter().map(row_to_node).collect()
  }

  async fn vector_search_nodes(
    &self,
    query_embedding: &[f32],
    task_ids: &[TaskPk],
    top_k: u32,
  ) -> Result<Vec<(GraphNode, f32)>, CoreError> {
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
            r#"SELECT id, task_id, node_type, node_value, properties, embedding, created_at,
                      (1 - (embedding <=> $1))::real AS similarity
               FROM graph_nodes
               WHERE task_id = ANY($2)
               ORDER BY embedding <=> $1
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
        let similarity: f32 = row.try_get("similarity").map_err(CoreError::from_database_error)?;
        Ok((row_to_node(row)?, similarity))
      })
      .collect()
  }

  async fn outgoing_edges(&self, node_id: GraphNodePk, limit: u32) -> Result<Vec<GraphEdge>, CoreError> {
    let nid = node_id.inner();
    let limit = limit as i64;
    let rows = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT source_node_id, target_node_id, edge_type, weight, properties, created_at
               FROM graph_edges WHERE source_node_id = $1
               ORDER BY weight DESC LIMIT $2"#,
          )
          .bind(nid)
          .bind(limit)
          .fetch_all(conn)
          .await
        })
      })
      .await?;

    rows
      .into_iter()
      .map(|row| {
        Ok(GraphEdge {
          source_node_id: GraphNodePk::new(
            row.try_get("source_node_id").map_err(CoreError::from_database_error)?,
          ),
          target_node_id: GraphNodePk::new(
            row.try_get("target_node_id").map_err(CoreError::from_database_error)?,
          ),
          edge_type: EdgeType::RelatedTo,
          weight: row.try_get("weight").map_err(CoreError::from_database_error)?,
          properties: row.try_get("properties").map_err(CoreError::from_database_error)?,
          created_at: row.try_get("created_at").map_err(CoreError::from_database_error)?,
        })
      })
      .collect()
  }
}
