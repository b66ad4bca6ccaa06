use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::config::SearchConfig;

/// One normalized hit (§4.1 contract). `engine`/`score` are carried through
/// when the upstream service supplies them; neither is required for the
/// pipeline to function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
  pub title: String,
  pub url: String,
  pub snippet: String,
  #[serde(default)]
  pub engine: Option<String>,
  #[serde(default)]
  pub score: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
  pub results: Vec<SearchResult>,
  pub query: String,
  pub response_time: f64,
  pub error: Option<String>,
}

#[derive(Deserialize)]
struct RawResultsPayload {
  #[serde(default)]
  results: Vec<SearchResult>,
}

#[derive(Serialize)]
struct JsonRpcRequest<'a, P> {
  jsonrpc: &'static str,
  id: u64,
  method: &'a str,
  params: P,
}

#[derive(Serialize)]
struct JsonRpcNotification<'a> {
  jsonrpc: &'static str,
  method: &'a str,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
  #[serde(default)]
  id: Option<u64>,
  #[serde(default)]
  result: Option<ToolCallResult>,
  #[serde(default)]
  error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ToolCallResult {
  #[serde(default)]
  content: Vec<ToolContentBlock>,
}

#[derive(Deserialize)]
struct ToolContentBlock {
  #[serde(default)]
  text: String,
}

/// C1: the web-search client. Primary transport is a fresh child process per
/// call speaking newline-delimited JSON-RPC 2.0 (§6); a direct HTTP GET is
/// the transparent fallback whenever the MCP sequence doesn't yield a
/// parseable result. Never raises — every method always returns a value.
#[derive(Clone)]
pub struct SearchClient {
  http: reqwest::Client,
  mcp_command: Vec<String>,
  http_url: String,
  pacing_delay: Duration,
}

impl SearchClient {
  pub fn new(config: &SearchConfig) -> Self {
    Self {
      http: reqwest::Client::new(),
      mcp_command: config.mcp_command.clone(),
      http_url: config.http_url.clone(),
      pacing_delay: Duration::from_millis(config.pacing_delay_ms),
    }
  }

  pub async fn search(
    &self,
    query: &str,
    category: &str,
    limit: u32,
    language: Option<&str>,
    time_range: Option<&str>,
  ) -> SearchResponse {
    let started = std::time::Instant::now();

    if let Some(results) = self.try_mcp(query, category, limit, language, time_range).await {
      return SearchResponse {
        results,
        query: query.to_string(),
        response_time: started.elapsed().as_secs_f64(),
        error: None,
      };
    }

    match self.try_http(query, category, limit, language, time_range).await {
      Ok(results) => SearchResponse {
        results,
        query: query.to_string(),
        response_time: started.elapsed().as_secs_f64(),
        error: None,
      },
      Err(e) => {
        tracing::warn!(query = %redact(query), error = %e, "search failed on both transports");
        SearchResponse {
          results: Vec::new(),
          query: query.to_string(),
          response_time: started.elapsed().as_secs_f64(),
          error: Some(e),
        }
      }
    }
  }

  /// Runs each query in sequence with a fixed pacing delay in between, so a
  /// batch of strategies never hammers the external service.
  pub async fn batch_search(
    &self,
    queries: &[String],
    limit_per_query: u32,
  ) -> BTreeMap<String, Vec<SearchResult>> {
    let mut out = BTreeMap::new();
    for (i, query) in queries.iter().enumerate() {
      if i > 0 {
        tokio::time::sleep(self.pacing_delay).await;
      }
      let response = self.search(query, "general", limit_per_query, None, None).await;
      out.insert(query.clone(), response.results);
    }
    out
  }

  pub fn extract_urls(results: &[SearchResult]) -> Vec<String> {
    results.iter().map(|r| r.url.clone()).collect()
  }

  pub fn format(results: &[SearchResult]) -> Vec<SearchResult> {
    results
      .iter()
      .map(|r| SearchResult {
        title: r.title.trim().to_string(),
        url: r.url.trim().to_string(),
        snippet: r.snippet.trim().to_string(),
        engine: r.engine.clone(),
        score: r.score,
      })
      .collect()
  }

  /// A lightweight search with a short deadline, used by the readiness
  /// probe (C12). Grounded in original_source `mcp_client.py::health_check`.
  pub async fn health_check(&self) -> bool {
    let result = tokio::time::timeout(Duration::from_secs(5), self.search("ping", "general", 1, None, None)).await;
    matches!(result, Ok(r) if r.error.is_none())
  }

  async fn try_mcp(
    &self,
    query: &str,
    category: &str,
    limit: u32,
    language: Option<&str>,
    time_range: Option<&str>,
  ) -> Option<Vec<SearchResult>> {
    let (program, args) = self.mcp_command.split_first()?;
    let mut child = Command::new(program)
      .args(args)
      .stdin(std::process::Stdio::piped())
      .stdout(std::process::Stdio::piped())
      .stderr(std::process::Stdio::null())
      .spawn()
      .ok()?;

    let mut stdin = child.stdin.take()?;
    let stdout = child.stdout.take()?;
    let mut lines = BufReader::new(stdout).lines();

    let init = JsonRpcRequest {
      jsonrpc: "2.0",
      id: 1,
      method: "initialize",
      params: serde_json::json!({
        "protocolVersion": "2024-11-05",
        "clientInfo": { "name": "research-agent", "version": env!("CARGO_PKG_VERSION") },
        "capabilities": {},
      }),
    };
    write_line(&mut stdin, &init).await.ok()?;
    let init_line = lines.next_line().await.ok()??;
    let init_response: JsonRpcResponse = serde_json::from_str(&init_line).ok()?;
    if init_response.id != Some(1) || init_response.error.is_some() {
      let _ = child.kill().await;
      return None;
    }

    let initialized = JsonRpcNotification { jsonrpc: "2.0", method: "notifications/initialized" };
    write_line(&mut stdin, &initialized).await.ok()?;

    let call = JsonRpcRequest {
      jsonrpc: "2.0",
      id: 2,
      method: "tools/call",
      params: serde_json::json!({
        "name": "search_web",
        "arguments": {
          "query": query,
          "category": category,
          "limit": limit,
          "language": language,
          "time_range": time_range,
        },
      }),
    };
    write_line(&mut stdin, &call).await.ok()?;
    let call_line = lines.next_line().await.ok()??;
    let _ = child.kill().await;

    let call_response: JsonRpcResponse = serde_json::from_str(&call_line).ok()?;
    if call_response.id != Some(2) || call_response.error.is_some() {
      return None;
    }
    let text = call_response.result?.content.into_iter().next()?.text;
    let payload: RawResultsPayload = serde_json::from_str(&text).ok()?;
    Some(Self::format(&payload.results))
  }

  async fn try_http(
    &self,
    query: &str,
    category: &str,
    limit: u32,
    language: Option<&str>,
    time_range: Option<&str>,
  ) -> Result<Vec<SearchResult>, String> {
    let mut request = self.http.get(&self.http_url).query(&[
      ("q", query),
      ("format", "json"),
      ("category_general", if category == "general" { "1" } else { "0" }),
      ("safesearch", "0"),
      ("limit", &limit.to_string()),
    ]);
    if let Some(lang) = language {
      request = request.query(&[("language", lang)]);
    }
    if let Some(range) = time_range {
      request = request.query(&[("time_range", range)]);
    }

    let response = request.send().await.map_err(|e| e.to_string())?;
    let payload: RawResultsPayload = response.json().await.map_err(|e| e.to_string())?;
    Ok(Self::format(&payload.results))
  }
}

async fn write_line<T: Serialize>(
  stdin: &mut tokio::process::ChildStdin,
  value: &T,
) -> Result<(), std::io::Error> {
  let mut line = serde_json::to_string(value)?;
  line.push('\n');
  stdin.write_all(line.as_bytes()).await
}

fn redact(query: &str) -> String {
  query.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn format_trims_whitespace() {
    let raw = vec![SearchResult {
      title: "  Title  ".into(),
      url: " https://example.com ".into(),
      snippet: " snippet ".into(),
      engine: None,
      score: None,
    }];
    let formatted = SearchClient::format(&raw);
    assert_eq!(formatted[0].title, "Title");
    assert_eq!(formatted[0].url, "https://example.com");
  }

  #[test]
  fn extract_urls_preserves_order() {
    let raw = vec![
      SearchResult { title: "a".into(), url: "https://a.example".into(), snippet: "".into(), engine: None, score: None },
      SearchResult { title: "b".into(), url: "https://b.example".into(), snippet: "".into(), engine: None, score: None },
    ];
    assert_eq!(SearchClient::extract_urls(&raw), vec!["https://a.example", "https://b.example"]);
  }

  #[tokio::test]
  async fn search_never_panics_when_both_transports_unreachable() {
    let config = SearchConfig {
      mcp_command: vec!["/nonexistent/binary-that-does-not-exist".into()],
      http_url: "http://127.0.0.1:1/unreachable".into(),
      pacing_delay_ms: 0,
    };
    let client = SearchClient::new(&config);
    let response = client.search("test query", "general", 5, None, None).await;
    assert!(response.results.is_empty());
    assert!(response.error.is_some());
  }
}
