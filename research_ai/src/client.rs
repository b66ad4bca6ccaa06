use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use serde::de::DeserializeOwned;

use research_core::error::LlmError;

use crate::sanitize;

/// Embedding dimension the whole system is built around (§6). Fixed, not a
/// runtime-negotiated value — every stored vector column matches this width.
pub const EMBEDDING_DIM: usize = 384;

/// Texts longer than this are truncated before being handed to the
/// embedding endpoint (§6).
const EMBED_TRUNCATE_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
  User,
  Assistant,
  System,
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
  pub role: ChatRole,
  pub content: String,
}

impl ChatTurn {
  pub fn user(content: impl Into<String>) -> Self {
    Self { role: ChatRole::User, content: content.into() }
  }

  pub fn assistant(content: impl Into<String>) -> Self {
    Self { role: ChatRole::Assistant, content: content.into() }
  }

  pub fn system(content: impl Into<String>) -> Self {
    Self { role: ChatRole::System, content: content.into() }
  }
}

/// The black-box LLM backend contract (§6): a unary generation endpoint, a
/// streaming variant, a chat endpoint, and an embedding endpoint, plus a
/// catalog check used for liveness. Adapters implement this once per
/// backend (Ollama, OpenAI); `LlmClient` owns the cross-cutting concerns
/// (timeouts, retries, sanitization) on top.
#[allow(async_fn_in_trait)]
#[async_trait::async_trait]
pub trait LlmBackend: Send + Sync {
  async fn generate(
    &self,
    prompt: &str,
    system: Option<&str>,
    temperature: f32,
    max_tokens: u32,
  ) -> Result<String, LlmError>;

  async fn stream_generate(
    &self,
    prompt: &str,
    system: Option<&str>,
  ) -> Result<BoxStream<'static, Result<String, LlmError>>, LlmError>;

  async fn chat(&self, messages: &[ChatTurn], temperature: f32, max_tokens: u32) -> Result<String, LlmError>;

  async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

  /// Health = the model catalog contains the configured model (§6).
  async fn healthy(&self) -> bool;
}

/// The LLM interaction layer (C4). Wraps a backend with caller-supplied
/// deadlines, L2-normalized embeddings, and the structured-output retry
/// discipline in §4.3.
#[derive(Clone)]
pub struct LlmClient {
  backend: Arc<dyn LlmBackend>,
}

impl LlmClient {
  pub fn new(backend: Arc<dyn LlmBackend>) -> Self {
    Self { backend }
  }

  pub async fn generate(
    &self,
    prompt: &str,
    system: Option<&str>,
    temperature: f32,
    max_tokens: u32,
    deadline: Duration,
  ) -> Result<String, LlmError> {
    let started = std::time::Instant::now();
    let result = tokio::time::timeout(deadline, self.backend.generate(prompt, system, temperature, max_tokens))
      .await
      .map_err(|_| LlmError::Timeout(deadline.as_secs()))?;
    record_request_metrics("generate", started.elapsed(), result.is_ok());
    result
  }

  pub async fn stream_generate(
    &self,
    prompt: &str,
    system: Option<&str>,
  ) -> Result<BoxStream<'static, Result<String, LlmError>>, LlmError> {
    self.backend.stream_generate(prompt, system).await
  }

  pub async fn chat(
    &self,
    messages: &[ChatTurn],
    temperature: f32,
    max_tokens: u32,
    deadline: Duration,
  ) -> Result<String, LlmError> {
    let started = std::time::Instant::now();
    let result = tokio::time::timeout(deadline, self.backend.chat(messages, temperature, max_tokens))
      .await
      .map_err(|_| LlmError::Timeout(deadline.as_secs()))?;
    record_request_metrics("chat", started.elapsed(), result.is_ok());
    result
  }

  /// Embed one or more texts. Each is truncated to 512 characters, and the
  /// backend's output is L2-normalized so cosine similarity reduces to a
  /// dot product (§4.3, §6).
  pub async fn embed(&self, texts: &[String], deadline: Duration) -> Result<Vec<Vec<f32>>, LlmError> {
    let truncated: Vec<String> = texts
      .iter()
      .map(|t| t.chars().take(EMBED_TRUNCATE_CHARS).collect())
      .collect();
    let started = std::time::Instant::now();
    let outcome = tokio::time::timeout(deadline, self.backend.embed(&truncated)).await;
    let raw = match outcome {
      Ok(result) => {
        record_request_metrics("embed", started.elapsed(), result.is_ok());
        result?
      }
      Err(_) => {
        record_request_metrics("embed", started.elapsed(), false);
        return Err(LlmError::Timeout(deadline.as_secs()));
      }
    };
    Ok(raw.into_iter().map(|v| normalize(&v)).collect())
  }

  pub async fn embed_one(&self, text: &str, deadline: Duration) -> Result<Vec<f32>, LlmError> {
    let mut v = self.embed(&[text.to_string()], deadline).await?;
    v.pop().ok_or(LlmError::Empty)
  }

  pub async fn healthy(&self) -> bool {
    self.backend.healthy().await
  }

  /// §4.3(d): structured-output retry. Calls `prompt_for(attempt)` up to
  /// three times at rising temperature, sanitizing and parsing each
  /// response; the 2nd/3rd attempts should be given a simplified prompt by
  /// the caller. Returns the first successfully-parsed value, or the last
  /// error if all three attempts fail — callers are expected to fall back
  /// to a deterministic value built from their own input data at that point.
  pub async fn generate_structured<T, F>(
    &self,
    mut prompt_for: F,
    system: Option<&str>,
    max_tokens: u32,
    deadline: Duration,
  ) -> Result<T, LlmError>
  where
    T: DeserializeOwned,
    F: FnMut(usize) -> String,
  {
    let mut last_err = LlmError::Empty;
    for attempt in 0..3usize {
      if attempt > 0 {
        metrics::counter!("research_llm_retries_total", "operation" => "generate_structured").increment(1);
      }
      let temperature = 0.2 + 0.25 * attempt as f32;
      let prompt = prompt_for(attempt);
      let text = match self.generate(&prompt, system, temperature, max_tokens, deadline).await {
        Ok(t) => t,
        Err(e) => {
          last_err = e;
          continue;
        }
      };
      match sanitize::parse_sanitized::<T>(&text) {
        Ok(value) => return Ok(value),
        Err(e) => last_err = LlmError::Unparseable(e.to_string()),
      }
    }
    Err(last_err)
  }
}

/// Records against the global `metrics` recorder directly rather than going
/// through `research_agent::observability`: this crate sits below
/// `research_agent` in the workspace graph and can't depend on it. The
/// binary installs the recorder and pre-registers these metric names at
/// startup (see `research_agent::observability::metrics::register_metrics`).
fn record_request_metrics(operation: &str, duration: Duration, success: bool) {
  let status = if success { "success" } else { "failed" };
  metrics::counter!("research_llm_requests_total", "operation" => operation.to_string(), "status" => status)
    .increment(1);
  if success {
    metrics::histogram!("research_llm_request_duration_seconds", "operation" => operation.to_string())
      .record(duration.as_secs_f64());
  }
}

fn normalize(v: &[f32]) -> Vec<f32> {
  let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
  if norm <= f32::EPSILON {
    return v.to_vec();
  }
  v.iter().map(|x| x / norm).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalize_produces_unit_vector() {
    let v = normalize(&[3.0, 4.0]);
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-6);
  }

  #[test]
  fn normalize_handles_zero_vector() {
    let v = normalize(&[0.0, 0.0]);
    assert_eq!(v, vec![0.0, 0.0]);
  }
}
