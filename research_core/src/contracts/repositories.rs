use async_trait::async_trait;

use crate::error::CoreError;
use crate::ids::{ChatSessionPk, GraphNodePk, TaskId, TaskPk, UserPk};
use crate::models::{
  ChatMessage, ChatSession, CreateGraphNode, CreateResearchArtifact, CreateResearchTask,
  CreateUser, GraphEdge, GraphNode, ResearchArtifact, ResearchResult, ResearchShare,
  ResearchTask, TaskStatus, User, UserSession,
};

/// Repository contract for `User` (§4.9). Operations are explicit per the
/// spec: create, get-by-id, list, update, delete; no generic query builder.
#[async_trait]
pub trait UserRepository: Send + Sync {
  async fn create(&self, data: &CreateUser) -> Result<User, CoreError>;
  async fn get_by_id(&self, id: UserPk) -> Result<Option<User>, CoreError>;
  async fn get_by_email(&self, email: &str) -> Result<Option<User>, CoreError>;
}

/// Repository contract for `UserSession`, the bearer-token record the HTTP
/// facade's auth middleware resolves to a `User`.
#[async_trait]
pub trait SessionRepository: Send + Sync {
  async fn create(
    &self,
    user_id: UserPk,
    token_hash: &str,
    ttl: chrono::Duration,
  ) -> Result<UserSession, CoreError>;
  async fn get_by_token_hash(&self, token_hash: &str) -> Result<Option<UserSession>, CoreError>;
  async fn delete(&self, id: i64) -> Result<bool, CoreError>;
}

/// Repository contract for `ResearchTask`, the authoritative task record the
/// orchestrator (C5) mutates at every stage boundary.
#[async_trait]
pub trait TaskRepository: Send + Sync {
  async fn create(&self, data: &CreateResearchTask) -> Result<ResearchTask, CoreError>;
  async fn get_by_id(&self, id: TaskPk) -> Result<Option<ResearchTask>, CoreError>;
  async fn get_by_task_id(&self, task_id: &TaskId) -> Result<Option<ResearchTask>, CoreError>;
  async fn list_by_user(
    &self,
    user_id: UserPk,
    limit: u32,
  ) -> Result<Vec<ResearchTask>, CoreError>;

  /// Update status/progress/warnings/error_message/timestamps. Fire-and-forget
  /// from the orchestrator's perspective (§4.4 persistence discipline) — the
  /// caller decides the deadline, this method itself is a single statement.
  async fn update_status(
    &self,
    id: TaskPk,
    status: TaskStatus,
    progress: u8,
    warning: Option<&str>,
    error_message: Option<&str>,
  ) -> Result<(), CoreError>;

  /// Flip to `cancelled` iff current status is non-terminal; returns whether
  /// the transition happened.
  async fn cancel_if_active(&self, id: TaskPk) -> Result<bool, CoreError>;
}

/// Repository contract for `ResearchResult`, written once in the same
/// transaction as the task's terminal `completed` status (§4.4).
#[async_trait]
pub trait ResultRepository: Send + Sync {
  async fn create(&self, result: &ResearchResult) -> Result<(), CoreError>;
  async fn get_by_task_id(&self, task_id: TaskPk) -> Result<Option<ResearchResult>, CoreError>;

  /// Vector-nearest-neighbor search restricted to a set of owning tasks
  /// (C8 vector branch). Returns `(task_id, content, similarity)` triples
  /// ordered by similarity descending.
  async fn vector_search(
    &self,
    query_embedding: &[f32],
    task_ids: &[TaskPk],
    top_k: u32,
  ) -> Result<Vec<(TaskPk, String, f32)>, CoreError>;
}

#[async_trait]
pub trait ArtifactRepository: Send + Sync {
  async fn create(&self, data: &CreateResearchArtifact) -> Result<ResearchArtifact, CoreError>;
  async fn list_by_task(&self, task_id: TaskPk) -> Result<Vec<ResearchArtifact>, CoreError>;
  async fn delete(&self, id: i64) -> Result<bool, CoreError>;
}

#[async_trait]
pub trait ShareRepository: Send + Sync {
  async fn create(&self, share: &ResearchShare) -> Result<ResearchShare, CoreError>;
  async fn get_by_token(&self, token: &str) -> Result<Option<ResearchShare>, CoreError>;
  async fn revoke(&self, id: i64) -> Result<bool, CoreError>;
}

/// Repository contract for graph nodes/edges (C7 writer, C8 reader).
#[async_trait]
pub trait GraphRepository: Send + Sync {
  async fn create_node(&self, data: &CreateGraphNode) -> Result<GraphNode, CoreError>;
  async fn create_edge(&self, edge: &GraphEdge) -> Result<(), CoreError>;
  async fn nodes_for_task(&self, task_id: TaskPk) -> Result<Vec<GraphNode>, CoreError>;

  /// Vector-nearest-neighbor search over node embeddings restricted to a set
  /// of owning tasks (C8 graph branch).
  async fn vector_search_nodes(
    &self,
    query_embedding: &[f32],
    task_ids: &[TaskPk],
    top_k: u32,
  ) -> Result<Vec<(GraphNode, f32)>, CoreError>;

  /// Outgoing edges from a node, ordered by weight descending, capped at `limit`.
  async fn outgoing_edges(
    &self,
    node_id: GraphNodePk,
    limit: u32,
  ) -> Result<Vec<GraphEdge>, CoreError>;
}

#[async_trait]
pub trait ChatSessionRepository: Send + Sync {
  async fn create(&self, user_id: UserPk, title: &str) -> Result<ChatSession, CoreError>;
  async fn get_by_id(&self, id: ChatSessionPk) -> Result<Option<ChatSession>, CoreError>;
  async fn touch(&self, id: ChatSessionPk) -> Result<(), CoreError>;
}

#[async_trait]
pub trait ChatMessageRepository: Send + Sync {
  async fn create(&self, message: &ChatMessage) -> Result<ChatMessage, CoreError>;
  async fn recent_for_session(
    &self,
    session_id: ChatSessionPk,
    limit: u32,
  ) -> Result<Vec<ChatMessage>, CoreError>;
}
