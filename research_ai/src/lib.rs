mod adapters;
pub mod client;
pub mod ops;
pub mod sanitize;

pub use adapters::{OllamaAdapter, OpenaiAdapter};
pub use client::{ChatRole, ChatTurn, LlmBackend, LlmClient, EMBEDDING_DIM};
