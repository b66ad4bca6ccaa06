mod ollama;
mod openai;

pub use ollama::OllamaAdapter;
pub use openai::OpenaiAdapter;
