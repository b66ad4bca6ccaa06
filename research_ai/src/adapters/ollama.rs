use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use research_core::error::LlmError;

use crate::client::{ChatRole, ChatTurn, LlmBackend};

/// Adapter for a local Ollama-compatible LLM service (§6): `/api/generate`
/// (unary + streaming), `/api/chat`, `/api/embed`, and `/api/tags` for the
/// liveness catalog check. This is the reference/default backend — the
/// "local large-language-model" the spec treats as a black box.
pub struct OllamaAdapter {
  pub host: String,
  pub model: String,
  pub embed_model: String,
  pub client: Client,
}

#[derive(Serialize)]
struct GenerateOptions {
  temperature: f32,
  num_predict: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
  model: &'a str,
  prompt: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  system: Option<&'a str>,
  stream: bool,
  options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateFrame {
  #[serde(default)]
  response: String,
}

#[derive(Serialize)]
struct OllamaMessage {
  role: String,
  content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
  model: &'a str,
  messages: Vec<OllamaMessage>,
  stream: bool,
  options: GenerateOptions,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
  content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
  message: ChatResponseMessage,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
  model: &'a str,
  input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
  embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct TagsResponse {
  models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
  name: String,
}

fn role_str(r: ChatRole) -> &'static str {
  match r {
    ChatRole::User => "user",
    ChatRole::Assistant => "assistant",
    ChatRole::System => "system",
  }
}

impl OllamaAdapter {
  pub fn new(host: impl Into<String>, model: impl Into<String>, embed_model: impl Into<String>) -> Self {
    Self {
      host: host.into(),
      model: model.into(),
      embed_model: embed_model.into(),
      client: Client::new(),
    }
  }

  pub fn new_local(model: impl Into<String>, embed_model: impl Into<String>) -> Self {
    Self::new("http://localhost:11434", model, embed_model)
  }
}

#[async_trait]
impl LlmBackend for OllamaAdapter {
  async fn generate(
    &self,
    prompt: &str,
    system: Option<&str>,
    temperature: f32,
    max_tokens: u32,
  ) -> Result<String, LlmError> {
    let request = GenerateRequest {
      model: &self.model,
      prompt,
      system,
      stream: false,
      options: GenerateOptions { temperature, num_predict: max_tokens },
    };
    let url = format!("{}/api/generate", self.host);
    let response = self
      .client
      .post(url)
      .json(&request)
      .send()
      .await
      .map_err(|e| LlmError::Transport(e.to_string()))?;
    let frame: GenerateFrame = response.json().await.map_err(|e| LlmError::Transport(e.to_string()))?;
    if frame.response.is_empty() {
      return Err(LlmError::Empty);
    }
    Ok(frame.response)
  }

  async fn stream_generate(
    &self,
    prompt: &str,
    system: Option<&str>,
  ) -> Result<BoxStream<'static, Result<String, LlmError>>, LlmError> {
    let request = GenerateRequest {
      model: &self.model,
      prompt,
      system,
      stream: true,
      options: GenerateOptions { temperature: 0.7, num_predict: 2048 },
    };
    let url = format!("{}/api/generate", self.host);
    let response = self
      .client
      .post(url)
      .json(&request)
      .send()
      .await
      .map_err(|e| LlmError::Transport(e.to_string()))?;

    // Newline-delimited JSON frames. A chunk of bytes may split a line
    // across two reads, so the partial tail rides along in the scan state.
    let byte_stream = response.bytes_stream();
    let stream = byte_stream.scan(String::new(), |buf, chunk| {
      let mut out = Vec::new();
      match chunk {
        Ok(bytes) => buf.push_str(&String::from_utf8_lossy(&bytes)),
        Err(e) => out.push(Err(LlmError::Transport(e.to_string()))),
      }
      while let Some(pos) = buf.find('\n') {
        let line: String = buf.drain(..=pos).collect();
        let line = line.trim();
        if line.is_empty() {
          continue;
        }
        match serde_json::from_str::<GenerateFrame>(line) {
          Ok(frame) if !frame.response.is_empty() => out.push(Ok(frame.response)),
          Ok(_) => {}
          Err(e) => out.push(Err(LlmError::Unparseable(e.to_string()))),
        }
      }
      futures::future::ready(Some(out))
    });

    Ok(stream.flat_map(futures::stream::iter).boxed())
  }

  async fn chat(&self, messages: &[ChatTurn], temperature: f32, max_tokens: u32) -> Result<String, LlmError> {
    let request = ChatRequest {
      model: &self.model,
      messages: messages
        .iter()
        .map(|m| OllamaMessage { role: role_str(m.role).to_string(), content: m.content.clone() })
        .collect(),
      stream: false,
      options: GenerateOptions { temperature, num_predict: max_tokens },
    };
    let url = format!("{}/api/chat", self.host);
    let response = self
      .client
      .post(url)
      .json(&request)
      .send()
      .await
      .map_err(|e| LlmError::Transport(e.to_string()))?;
    let parsed: ChatResponse = response.json().await.map_err(|e| LlmError::Transport(e.to_string()))?;
    Ok(parsed.message.content)
  }

  async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
    let request = EmbedRequest { model: &self.embed_model, input: texts };
    let url = format!("{}/api/embed", self.host);
    let response = self
      .client
      .post(url)
      .json(&request)
      .send()
      .await
      .map_err(|e| LlmError::Transport(e.to_string()))?;
    let parsed: EmbedResponse = response.json().await.map_err(|e| LlmError::Transport(e.to_string()))?;
    Ok(parsed.embeddings)
  }

  async fn healthy(&self) -> bool {
    let url = format!("{}/api/tags", self.host);
    let Ok(response) = self.client.get(url).send().await else {
      return false;
    };
    let Ok(tags) = response.json::<TagsResponse>().await else {
      return false;
    };
    tags.models.iter().any(|m| m.name == self.model || m.name.starts_with(&self.model))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn catalog_match_is_prefix_tolerant() {
    let tags = TagsResponse { models: vec![TagModel { name: "llama3.2:latest".into() }] };
    assert!(tags.models.iter().any(|m| m.name.starts_with("llama3.2")));
  }

  #[test]
  fn generate_request_serializes_expected_shape() {
    let req = GenerateRequest {
      model: "llama3.2",
      prompt: "hi",
      system: Some("sys"),
      stream: false,
      options: GenerateOptions { temperature: 0.2, num_predict: 100 },
    };
    let v: serde_json::Value = serde_json::to_value(&req).unwrap();
    assert_eq!(v["model"], "llama3.2");
    assert_eq!(v["options"]["num_predict"], 100);
  }

  #[ignore]
  #[tokio::test]
  async fn ollama_generate_live() {
    let adapter = OllamaAdapter::new_local("llama3.2", "nomic-embed-text");
    let text = adapter.generate("Say hello", None, 0.2, 64).await.unwrap();
    assert!(!text.is_empty());
  }
}
