use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use research_core::error::LlmError;

use crate::client::{ChatRole, ChatTurn, LlmBackend};

/// Alternate hosted-LLM backend (§6 allows swapping the black-box model).
/// Kept alongside `OllamaAdapter` so a deployment can point at OpenAI's
/// chat-completions and embeddings endpoints instead of a local model.
pub struct OpenaiAdapter {
  host: String,
  api_key: String,
  model: String,
  embed_model: String,
  client: Client,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
  model: &'a str,
  messages: Vec<OpenAIMessage>,
  temperature: f32,
  max_tokens: u32,
  stream: bool,
}

#[derive(Serialize, Clone)]
struct OpenAIMessage {
  role: &'static str,
  content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
  message: OpenAIMessageOut,
}

#[derive(Deserialize)]
struct OpenAIMessageOut {
  content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
  choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
  delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
  #[serde(default)]
  content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
  model: &'a str,
  input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
  data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
  embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ModelsResponse {
  data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
  id: String,
}

fn role_str(r: ChatRole) -> &'static str {
  match r {
    ChatRole::User => "user",
    ChatRole::Assistant => "assistant",
    ChatRole::System => "system",
  }
}

impl OpenaiAdapter {
  pub fn new(api_key: impl Into<String>, model: impl Into<String>, embed_model: impl Into<String>) -> Self {
    Self {
      host: "https://api.openai.com/v1".to_string(),
      api_key: api_key.into(),
      model: model.into(),
      embed_model: embed_model.into(),
      client: Client::new(),
    }
  }
}

#[async_trait]
impl LlmBackend for OpenaiAdapter {
  async fn generate(
    &self,
    prompt: &str,
    system: Option<&str>,
    temperature: f32,
    max_tokens: u32,
  ) -> Result<String, LlmError> {
    let mut messages = Vec::new();
    if let Some(s) = system {
      messages.push(OpenAIMessage { role: "system", content: s.to_string() });
    }
    messages.push(OpenAIMessage { role: "user", content: prompt.to_string() });
    self.chat_request(messages, temperature, max_tokens).await
  }

  async fn stream_generate(
    &self,
    prompt: &str,
    system: Option<&str>,
  ) -> Result<BoxStream<'static, Result<String, LlmError>>, LlmError> {
    let mut messages = Vec::new();
    if let Some(s) = system {
      messages.push(OpenAIMessage { role: "system", content: s.to_string() });
    }
    messages.push(OpenAIMessage { role: "user", content: prompt.to_string() });

    let request = ChatCompletionRequest {
      model: &self.model,
      messages,
      temperature: 0.7,
      max_tokens: 2048,
      stream: true,
    };
    let url = format!("{}/chat/completions", self.host);
    let response = self
      .client
      .post(url)
      .bearer_auth(&self.api_key)
      .json(&request)
      .send()
      .await
      .map_err(|e| LlmError::Transport(e.to_string()))?;

    let byte_stream = response.bytes_stream();
    let stream = byte_stream.scan(String::new(), |buf, chunk| {
      let mut out = Vec::new();
      match chunk {
        Ok(bytes) => buf.push_str(&String::from_utf8_lossy(&bytes)),
        Err(e) => out.push(Err(LlmError::Transport(e.to_string()))),
      }
      while let Some(pos) = buf.find('\n') {
        let line: String = buf.drain(..=pos).collect();
        let line = line.trim().strip_prefix("data: ").unwrap_or(line.trim()).to_string();
        if line.is_empty() || line == "[DONE]" {
          continue;
        }
        match serde_json::from_str::<StreamChunk>(&line) {
          Ok(frame) => {
            if let Some(content) = frame.choices.into_iter().next().and_then(|c| c.delta.content) {
              if !content.is_empty() {
                out.push(Ok(content));
              }
            }
          }
          Err(e) => out.push(Err(LlmError::Unparseable(e.to_string()))),
        }
      }
      futures::future::ready(Some(out))
    });

    Ok(stream.flat_map(futures::stream::iter).boxed())
  }

  async fn chat(&self, messages: &[ChatTurn], temperature: f32, max_tokens: u32) -> Result<String, LlmError> {
    let payload = messages
      .iter()
      .map(|m| OpenAIMessage { role: role_str(m.role), content: m.content.clone() })
      .collect();
    self.chat_request(payload, temperature, max_tokens).await
  }

  async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
    let request = EmbeddingRequest { model: &self.embed_model, input: texts };
    let url = format!("{}/embeddings", self.host);
    let response = self
      .client
      .post(url)
      .bearer_auth(&self.api_key)
      .json(&request)
      .send()
      .await
      .map_err(|e| LlmError::Transport(e.to_string()))?;
    let parsed: EmbeddingResponse = response.json().await.map_err(|e| LlmError::Transport(e.to_string()))?;
    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
  }

  async fn healthy(&self) -> bool {
    let url = format!("{}/models", self.host);
    let Ok(response) = self.client.get(url).bearer_auth(&self.api_key).send().await else {
      return false;
    };
    let Ok(models) = response.json::<ModelsResponse>().await else {
      return false;
    };
    models.data.iter().any(|m| m.id == self.model)
  }
}

impl OpenaiAdapter {
  async fn chat_request(
    &self,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    max_tokens: u32,
  ) -> Result<String, LlmError> {
    let request = ChatCompletionRequest { model: &self.model, messages, temperature, max_tokens, stream: false };
    let url = format!("{}/chat/completions", self.host);
    let response = self
      .client
      .post(url)
      .bearer_auth(&self.api_key)
      .json(&request)
      .send()
      .await
      .map_err(|e| LlmError::Transport(e.to_string()))?;
    let mut parsed: ChatCompletionResponse =
      response.json().await.map_err(|e| LlmError::Transport(e.to_string()))?;
    let content = parsed.choices.pop().ok_or(LlmError::Empty)?.message.content;
    if content.is_empty() {
      return Err(LlmError::Empty);
    }
    Ok(content)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn chat_request_serializes_messages_in_order() {
    let req = ChatCompletionRequest {
      model: "gpt-4o-mini",
      messages: vec![
        OpenAIMessage { role: "system", content: "sys".into() },
        OpenAIMessage { role: "user", content: "hi".into() },
      ],
      temperature: 0.3,
      max_tokens: 256,
      stream: false,
    };
    let v: serde_json::Value = serde_json::to_value(&req).unwrap();
    assert_eq!(v["messages"][0]["role"], "system");
    assert_eq!(v["messages"][1]["role"], "user");
  }

  #[ignore]
  #[tokio::test]
  async fn openai_generate_live() {
    let api_key = std::env::var("OPENAI_API_KEY").unwrap();
    let adapter = OpenaiAdapter::new(api_key, "gpt-4o-mini", "text-embedding-3-small");
    let text = adapter.generate("Say hello", None, 0.2, 64).await.unwrap();
    assert!(!text.is_empty());
  }
}
