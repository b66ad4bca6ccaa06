use research_ai::client::LlmClient;
use research_core::contracts::repositories::GraphRepository;
use research_core::contracts::unit_of_work::UnitOfWork;
use research_core::ids::TaskPk;
use research_core::models::{CreateGraphNode, EdgeType, GraphEdge, NodeType, ResearchResult, EDGE_SIMILARITY_THRESHOLD};
use research_pgvector::PgStore;
use std::time::Duration;

const EMBED_DEADLINE: Duration = Duration::from_secs(20);
const TOPIC_TRUNCATE_CHARS: usize = 300;

struct PendingNode {
  node_type: NodeType,
  value: String,
}

/// C7: for a completed task, creates a topic node, one finding node per key
/// finding, and a source node per top-M source, then wires `related_to`
/// edges between every pair exceeding the similarity threshold. All writes
/// land in one transaction keyed on the task id (§4.7).
pub async fn build_for_task(
  store: &PgStore,
  llm: &LlmClient,
  task_id: TaskPk,
  result: &ResearchResult,
  max_source_nodes: usize,
) -> anyhow::Result<()> {
  let mut pending = Vec::new();
  pending.push(PendingNode {
    node_type: NodeType::Topic,
    value: result.synthesis.executive_summary.chars().take(TOPIC_TRUNCATE_CHARS).collect(),
  });
  for finding in &result.synthesis.key_findings {
    pending.push(PendingNode { node_type: NodeType::Finding, value: finding.finding.clone() });
  }
  for source in result.sources.iter().take(max_source_nodes) {
    pending.push(PendingNode {
      node_type: NodeType::Source,
      value: format!("{}: {}", source.title, source.summary),
    });
  }

  let texts: Vec<String> = pending.iter().map(|p| p.value.clone()).collect();
  let embeddings = llm.embed(&texts, EMBED_DEADLINE).await?;

  let uow = store.unit_of_work().await?;
  let mut nodes = Vec::with_capacity(pending.len());
  for (node, embedding) in pending.into_iter().zip(embeddings.into_iter()) {
    let created = uow
      .graph()
      .create_node(&CreateGraphNode {
        task_id,
        node_type: node.node_type,
        node_value: node.value,
        properties: serde_json::Value::Null,
        embedding,
      })
      .await?;
    nodes.push(created);
  }

  for i in 0..nodes.len() {
    for j in (i + 1)..nodes.len() {
      let similarity = cosine_similarity(&nodes[i].embedding, &nodes[j].embedding);
      if similarity > EDGE_SIMILARITY_THRESHOLD {
        let edge = GraphEdge {
          source_node_id: nodes[i].id,
          target_node_id: nodes[j].id,
          edge_type: EdgeType::RelatedTo,
          weight: similarity,
          properties: serde_json::Value::Null,
          created_at: chrono::Utc::now(),
        };
        if edge.is_valid() {
          uow.graph().create_edge(&edge).await?;
        }
      }
    }
  }

  uow.commit().await?;
  Ok(())
}

/// Embeddings produced by `LlmClient::embed` are already L2-normalized, so
/// cosine similarity reduces to a plain dot product.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cosine_similarity_of_identical_unit_vectors_is_one() {
    let v = vec![0.6, 0.8];
    assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn cosine_similarity_of_orthogonal_vectors_is_zero() {
    let a = vec![1.0, 0.0];
    let b = vec![0.0, 1.0];
    assert!(cosine_similarity(&a, &b).abs() < 1e-6);
  }
}
