pub mod chat;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod graph;
pub mod health;
pub mod observability;
pub mod orchestrator;
pub mod rag;
pub mod search;

pub use config::AppConfig;
pub use health::{start_health_server, HealthState};
pub use orchestrator::Orchestrator;
