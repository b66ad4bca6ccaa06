use std::time::Duration;

use futures::StreamExt;
use research_ai::client::LlmClient;
use research_core::contracts::repositories::{ChatMessageRepository, ChatSessionRepository};
use research_core::error::LlmError;
use research_core::ids::{ChatSessionPk, UserPk};
use research_core::models::{ChatMessage, ChatRole, ChatSession, ExtractionMethod, SourceSummary};
use research_pgvector::PgStore;
use tokio_stream::wrappers::ReceiverStream;

use crate::rag::{self, RagItem};

const CHAT_GENERATE_DEADLINE: Duration = Duration::from_secs(60);
const CHAT_MAX_TOKENS: u32 = 1024;
const CHAT_TEMPERATURE: f32 = 0.4;
const CONTEXT_ITEMS: usize = 5;
const HISTORY_TURNS: usize = 5;
const RAG_TOP_K: u32 = 8;

const SYSTEM_PROMPT: &str = "You are a research assistant. Cite sources inline using the numbering \
from the provided context. Use markdown for code blocks and tables. Be concise and precise; never \
invent a citation that is not present in the context.";

/// C9: either a fully-materialized turn or a live token stream plus the
/// sources to attach once the stream ends (§4.8).
pub enum ChatResponse {
  Complete { content: String, sources: Vec<SourceSummary> },
  Stream { chunks: ReceiverStream<Result<String, LlmError>>, sources: Vec<SourceSummary> },
}

pub struct ChatOutcome {
  pub response: ChatResponse,
  pub session_id: ChatSessionPk,
  pub context: Vec<RagItem>,
}

/// Processes one chat turn: retrieves context, assembles the fixed-structure
/// prompt, invokes the LLM unary or streamed, and persists both sides of the
/// turn. The session bump and message writes are not wrapped in a database
/// transaction — `UnitOfWork` exposes only tasks/results/graph (see
/// DESIGN.md) — so they run as sequential repository calls instead.
pub async fn process(
  store: &PgStore,
  llm: &LlmClient,
  message: &str,
  user_id: UserPk,
  session_id: Option<ChatSessionPk>,
  stream: bool,
) -> anyhow::Result<ChatOutcome> {
  let session = match session_id {
    Some(id) => store
      .chat_sessions
      .get_by_id(id)
      .await?
      .ok_or_else(|| anyhow::anyhow!("chat session not found"))?,
    None => {
      store
        .chat_sessions
        .create(user_id, &ChatSession::title_from_message(message))
        .await?
    }
  };

  let history = store.chat_messages.recent_for_session(session.id, HISTORY_TURNS as u32).await?;
  let rag_result = rag::retrieve(store, llm, message, user_id, RAG_TOP_K, true, true).await?;

  let prompt = build_prompt(&rag_result.combined_results, &history, message);
  let sources = sources_from_context(&rag_result.combined_results);

  store
    .chat_messages
    .create(&ChatMessage {
      id: 0,
      session_id: session.id,
      role: ChatRole::User,
      content: message.to_string(),
      sources: Vec::new(),
      created_at: chrono::Utc::now(),
    })
    .await?;

  crate::observability::metrics::RetrievalMetrics::chat_turn(if stream { "stream" } else { "unary" });

  let response = if stream {
    let live = llm.stream_generate(&prompt, Some(SYSTEM_PROMPT)).await?;
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let store = store.clone();
    let session_id = session.id;
    let persist_sources = sources.clone();
    tokio::spawn(async move {
      let mut live = Box::pin(live);
      let mut full = String::new();
      while let Some(chunk) = live.next().await {
        match &chunk {
          Ok(text) => full.push_str(text),
          Err(_) => {}
        }
        if tx.send(chunk).await.is_err() {
          return;
        }
      }
      let _ = store
        .chat_messages
        .create(&ChatMessage {
          id: 0,
          session_id,
          role: ChatRole::Assistant,
          content: full,
          sources: persist_sources,
          created_at: chrono::Utc::now(),
        })
        .await;
      let _ = store.chat_sessions.touch(session_id).await;
    });
    ChatResponse::Stream { chunks: ReceiverStream::new(rx), sources: sources.clone() }
  } else {
    let content = llm
      .generate(&prompt, Some(SYSTEM_PROMPT), CHAT_TEMPERATURE, CHAT_MAX_TOKENS, CHAT_GENERATE_DEADLINE)
      .await?;
    store
      .chat_messages
      .create(&ChatMessage {
        id: 0,
        session_id: session.id,
        role: ChatRole::Assistant,
        content: content.clone(),
        sources: sources.clone(),
        created_at: chrono::Utc::now(),
      })
      .await?;
    store.chat_sessions.touch(session.id).await?;
    ChatResponse::Complete { content, sources: sources.clone() }
  };

  Ok(ChatOutcome { response, session_id: session.id, context: rag_result.combined_results })
}

fn build_prompt(context: &[RagItem], history: &[ChatMessage], message: &str) -> String {
  let mut prompt = String::new();

  prompt.push_str("## Relevant Context\n\n");
  if context.is_empty() {
    prompt.push_str("(none)\n\n");
  } else {
    for (i, item) in context.iter().take(CONTEXT_ITEMS).enumerate() {
      prompt.push_str(&format!("[{}] {}\n\n", i + 1, item.content));
    }
  }

  prompt.push_str("## Conversation History\n\n");
  if history.is_empty() {
    prompt.push_str("(none)\n\n");
  } else {
    for turn in history.iter().rev().take(HISTORY_TURNS).rev() {
      let role = match turn.role {
        ChatRole::User => "User",
        ChatRole::Assistant => "Assistant",
        ChatRole::System => "System",
      };
      prompt.push_str(&format!("{role}: {}\n", turn.content));
    }
    prompt.push('\n');
  }

  prompt.push_str("## Current Question\n\n");
  prompt.push_str(message);
  prompt.push_str("\n\n## Your Response:\n");
  prompt
}

fn sources_from_context(context: &[RagItem]) -> Vec<SourceSummary> {
  context
    .iter()
    .take(CONTEXT_ITEMS)
    .map(|item| SourceSummary {
      url: item.source.clone(),
      title: item.content.chars().take(80).collect(),
      summary: item.content.clone(),
      word_count: item.content.split_whitespace().count(),
      extraction_method: ExtractionMethod::SnippetFallback,
      media: Vec::new(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(content: &str) -> RagItem {
    RagItem {
      kind: "synthesis",
      content: content.into(),
      similarity: 0.9,
      final_score: 0.9,
      source: "res_abc".into(),
      metadata: serde_json::json!({}),
      context: Vec::new(),
    }
  }

  #[test]
  fn prompt_has_fixed_section_order() {
    let prompt = build_prompt(&[item("some fact")], &[], "what is it?");
    let context_idx = prompt.find("## Relevant Context").unwrap();
    let history_idx = prompt.find("## Conversation History").unwrap();
    let question_idx = prompt.find("## Current Question").unwrap();
    let response_idx = prompt.find("## Your Response:").unwrap();
    assert!(context_idx < history_idx && history_idx < question_idx && question_idx < response_idx);
  }

  #[test]
  fn prompt_includes_the_current_message() {
    let prompt = build_prompt(&[], &[], "does this appear verbatim?");
    assert!(prompt.contains("does this appear verbatim?"));
  }

  #[test]
  fn sources_are_capped_at_five() {
    let context: Vec<RagItem> = (0..10).map(|i| item(&format!("fact {i}"))).collect();
    let sources = sources_from_context(&context);
    assert_eq!(sources.len(), 5);
  }
}
