pub mod artifact;
pub mod chat;
pub mod graph;
pub mod result;
pub mod task;
pub mod user;

pub use artifact::{CreateResearchArtifact, ResearchArtifact, ResearchShare, SharePermission};
pub use chat::{ChatMessage, ChatRole, ChatSession};
pub use graph::{
  CreateGraphNode, EdgeType, GraphEdge, GraphNode, NodeType, EDGE_SIMILARITY_THRESHOLD,
};
pub use result::{
  Contradiction, DetailedAnalysis, DetailedSection, ExtractionMethod, Finding, FindingCategory,
  MediaItem, MediaKind, ResearchResult, SourceSummary, Subsection, Synthesis, Theme,
};
pub use task::{
  CreateResearchTask, DepthConfig, ResearchDepth, ResearchTask, StageDeadlines, TaskStatus,
};
pub use user::{hash_password, verify_password, CreateUser, User, UserSession};
