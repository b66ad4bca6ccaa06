pub mod contracts;
pub mod error;
pub mod ids;
pub mod models;

pub use error::{CoreError, FetchError, LlmError, SearchError};
pub use ids::{ChatSessionPk, GraphNodePk, TaskId, TaskPk, UserPk};
