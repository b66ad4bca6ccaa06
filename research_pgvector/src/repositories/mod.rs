mod artifact;
mod chat;
mod graph;
mod result;
mod task;
mod user;

pub use artifact::{PgArtifactRepository, PgShareRepository};
pub use chat::{PgChatMessageRepository, PgChatSessionRepository};
pub use graph::PgGraphRepository;
pub use result::PgResultRepository;
pub use task::PgTaskRepository;
pub use user::{PgSessionRepository, PgUserRepository};
