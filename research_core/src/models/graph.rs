use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{GraphNodePk, TaskPk};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
  Topic,
  Finding,
  Source,
}

/// The only edge type the graph builder currently emits. Kept as an enum
/// (rather than collapsing to a bare string) so consumers switch on a closed
/// set per the tagged-variant design note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
  RelatedTo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
  pub id: GraphNodePk,
  pub task_id: TaskPk,
  pub node_type: NodeType,
  pub node_value: String,
  pub properties: Value,
  pub embedding: Vec<f32>,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGraphNode {
  pub task_id: TaskPk,
  pub node_type: NodeType,
  pub node_value: String,
  pub properties: Value,
  pub embedding: Vec<f32>,
}

/// Similarity threshold above which a `related_to` edge is created between
/// two nodes of the same task.
pub const EDGE_SIMILARITY_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
  pub source_node_id: GraphNodePk,
  pub target_node_id: GraphNodePk,
  pub edge_type: EdgeType,
  pub weight: f32,
  pub properties: Value,
  pub created_at: DateTime<Utc>,
}

impl GraphEdge {
  /// §3 invariant: no self-loops, weight in [0,1].
  pub fn is_valid(&self) -> bool {
    self.source_node_id != self.target_node_id && (0.0..=1.0).contains(&self.weight)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn self_loop_is_invalid() {
    let e = GraphEdge {
      source_node_id: GraphNodePk::new(1),
      target_node_id: GraphNodePk::new(1),
      edge_type: EdgeType::RelatedTo,
      weight: 0.8,
      properties: json!({}),
      created_at: Utc::now(),
    };
    assert!(!e.is_valid());
  }

  #[test]
  fn out_of_range_weight_is_invalid() {
    let e = GraphEdge {
      source_node_id: GraphNodePk::new(1),
      target_node_id: GraphNodePk::new(2),
      edge_type: EdgeType::RelatedTo,
      weight: 1.5,
      properties: json!({}),
      created_at: Utc::now(),
    };
    assert!(!e.is_valid());
  }
}
