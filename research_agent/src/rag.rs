use std::collections::HashMap;
use std::time::Duration;

use research_ai::client::LlmClient;
use research_core::contracts::repositories::{GraphRepository, ResultRepository, TaskRepository};
use research_core::ids::{TaskPk, UserPk};
use research_pgvector::PgStore;
use serde::Serialize;
use serde_json::json;

const EMBED_DEADLINE: Duration = Duration::from_secs(20);
const RECENT_TASK_WINDOW: u32 = 20;
const GRAPH_NEIGHBOR_LIMIT: u32 = 5;
const CONTENT_DEDUP_PREFIX: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct RagItem {
  #[serde(rename = "type")]
  pub kind: &'static str,
  pub content: String,
  pub similarity: f32,
  pub final_score: f32,
  pub source: String,
  pub metadata: serde_json::Value,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub context: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RagResult {
  pub vector_results: Vec<RagItem>,
  pub graph_results: Vec<RagItem>,
  pub combined_results: Vec<RagItem>,
  pub sources: Vec<String>,
}

impl RagResult {
  fn empty() -> Self {
    Self { vector_results: Vec::new(), graph_results: Vec::new(), combined_results: Vec::new(), sources: Vec::new() }
  }
}

/// C8: hybrid retriever combining a vector branch over `ResearchResult`
/// synthesis embeddings and a graph branch over `GraphNode` embeddings,
/// merged by a boosted score and deduplicated by content prefix (§4.6).
/// Never mutates state.
pub async fn retrieve(
  store: &PgStore,
  llm: &LlmClient,
  query: &str,
  user_id: UserPk,
  top_k: u32,
  use_vector: bool,
  use_graph: bool,
) -> anyhow::Result<RagResult> {
  let tasks = store.tasks.list_by_user(user_id, RECENT_TASK_WINDOW).await?;
  if tasks.is_empty() {
    return Ok(RagResult::empty());
  }
  let task_ids: Vec<TaskPk> = tasks.iter().map(|t| t.id).collect();

  let query_embedding = if use_vector || use_graph {
    Some(llm.embed_one(query, EMBED_DEADLINE).await?)
  } else {
    None
  };

  let (vector_results, graph_results) = tokio::join!(
    vector_branch(store, query_embedding.as_deref(), &task_ids, top_k, use_vector),
    graph_branch(store, query_embedding.as_deref(), &task_ids, top_k, use_graph),
  );
  let vector_results = vector_results?;
  let graph_results = graph_results?;

  let mut combined: Vec<RagItem> = vector_results.iter().cloned().chain(graph_results.iter().cloned()).collect();
  combined.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap_or(std::cmp::Ordering::Equal));

  let mut seen_prefixes = std::collections::HashSet::new();
  combined.retain(|item| {
    let prefix: String = item.content.chars().take(CONTENT_DEDUP_PREFIX).collect();
    seen_prefixes.insert(prefix)
  });

  let mut sources = Vec::new();
  for item in &combined {
    if sources.len() >= top_k as usize {
      break;
    }
    if !sources.contains(&item.source) {
      sources.push(item.source.clone());
    }
  }

  crate::observability::metrics::RetrievalMetrics::merge_size(combined.len());
  Ok(RagResult { vector_results, graph_results, combined_results: combined, sources })
}

async fn vector_branch(
  store: &PgStore,
  query_embedding: Option<&[f32]>,
  task_ids: &[TaskPk],
  top_k: u32,
  enabled: bool,
) -> anyhow::Result<Vec<RagItem>> {
  if !enabled {
    return Ok(Vec::new());
  }
  let Some(embedding) = query_embedding else { return Ok(Vec::new()) };
  let hits = store.results.vector_search(embedding, task_ids, top_k).await?;
  Ok(
    hits
      .into_iter()
      .map(|(task_id, content, similarity)| RagItem {
        kind: "synthesis",
        content,
        similarity,
        final_score: similarity * 1.10,
        source: task_id.to_string(),
        metadata: json!({ "task_id": task_id.to_string() }),
        context: Vec::new(),
      })
      .collect(),
  )
}

async fn graph_branch(
  store: &PgStore,
  query_embedding: Option<&[f32]>,
  task_ids: &[TaskPk],
  top_k: u32,
  enabled: bool,
) -> anyhow::Result<Vec<RagItem>> {
  if !enabled {
    return Ok(Vec::new());
  }
  let Some(embedding) = query_embedding else { return Ok(Vec::new()) };
  let hits = store.graph.vector_search_nodes(embedding, task_ids, top_k).await?;

  let mut node_values_by_task: HashMap<TaskPk, HashMap<i64, String>> = HashMap::new();
  let mut items = Vec::with_capacity(hits.len());
  for (node, similarity) in hits {
    let values = match node_values_by_task.get(&node.task_id) {
      Some(map) => map,
      None => {
        let nodes = store.graph.nodes_for_task(node.task_id).await?;
        let map: HashMap<i64, String> = nodes.into_iter().map(|n| (n.id.inner(), n.node_value)).collect();
        node_values_by_task.insert(node.task_id, map);
        node_values_by_task.get(&node.task_id).unwrap()
      }
    };

    let edges = store.graph.outgoing_edges(node.id, GRAPH_NEIGHBOR_LIMIT).await?;
    let context: Vec<String> = edges
      .iter()
      .filter_map(|e| values.get(&e.target_node_id.inner()).cloned())
      .collect();

    items.push(RagItem {
      kind: "graph",
      content: node.node_value.clone(),
      similarity,
      final_score: similarity,
      source: node.task_id.to_string(),
      metadata: json!({ "task_id": node.task_id.to_string(), "node_type": node.node_type }),
      context,
    });
  }
  Ok(items)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(content: &str, final_score: f32, source: &str) -> RagItem {
    RagItem { kind: "synthesis", content: content.into(), similarity: final_score, final_score, source: source.into(), metadata: json!({}), context: Vec::new() }
  }

  #[test]
  fn dedup_keeps_higher_scored_duplicate_first() {
    let mut combined = vec![item("same prefix text here", 0.5, "a"), item("same prefix text here", 0.9, "b")];
    combined.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap());
    let mut seen = std::collections::HashSet::new();
    combined.retain(|i| seen.insert(i.content.chars().take(CONTENT_DEDUP_PREFIX).collect::<String>()));
    assert_eq!(combined.len(), 1);
    assert_eq!(combined[0].source, "b");
  }

  #[test]
  fn vector_boost_matches_spec_example() {
    let boosted = 0.80f32 * 1.10;
    assert!((boosted - 0.88).abs() < 1e-3);
  }
}
