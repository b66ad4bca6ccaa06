use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

use crate::config::FetchConfig;
use crate::extract::{extract_content, Content};
use research_core::models::ExtractionMethod;

const ALLOWED_CONTENT_TYPES: &[&str] = &["text/html", "text/plain", "application/xhtml+xml"];
const DEDUP_PREFIX_CHARS: usize = 1000;

/// C2: bounded-concurrency fetcher feeding the extractor (C3). A semaphore
/// caps in-flight requests at `max_concurrent`; `batch_fetch` never fails
/// the batch — a per-URL error materializes as a `Content` with
/// `method = Failed` rather than propagating (§4.2).
#[derive(Clone)]
pub struct Fetcher {
  client: reqwest::Client,
  semaphore: Arc<Semaphore>,
  max_content_size: usize,
}

impl Fetcher {
  pub fn new(config: &FetchConfig) -> Self {
    let client = reqwest::Client::builder()
      .user_agent(config.user_agent.clone())
      .timeout(Duration::from_secs(config.timeout_secs))
      .redirect(reqwest::redirect::Policy::limited(5))
      .build()
      .expect("fetcher http client configuration is always valid");
    Self {
      client,
      semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
      max_content_size: config.max_content_size,
    }
  }

  pub async fn fetch_and_extract(&self, url: &str) -> Content {
    let started = std::time::Instant::now();
    let content = self.fetch_and_extract_inner(url).await;
    crate::observability::metrics::FetchMetrics::attempt(content.error.is_none(), started.elapsed());
    content
  }

  async fn fetch_and_extract_inner(&self, url: &str) -> Content {
    let _permit = match self.semaphore.acquire().await {
      Ok(permit) => permit,
      Err(_) => return Content::failed(url, "fetcher shut down"),
    };

    let response = match self.client.get(url).send().await {
      Ok(r) => r,
      Err(e) => return Content::failed(url, e.to_string()),
    };

    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .unwrap_or("")
      .split(';')
      .next()
      .unwrap_or("")
      .trim()
      .to_lowercase();
    if !ALLOWED_CONTENT_TYPES.iter().any(|allowed| content_type.starts_with(allowed)) {
      return Content::failed(url, format!("unsupported content type: {content_type}"));
    }

    if let Some(len) = response.content_length() {
      if len as usize > self.max_content_size {
        return Content::failed(url, format!("content length {len} exceeds max_content_size"));
      }
    }

    let bytes = match response.bytes().await {
      Ok(b) => b,
      Err(e) => return Content::failed(url, e.to_string()),
    };
    if bytes.len() > self.max_content_size {
      return Content::failed(url, "content exceeded max_content_size during download");
    }

    let html = String::from_utf8_lossy(&bytes).into_owned();
    extract_content(url, &html)
  }

  /// Collapses duplicate URLs before fetching (each unique URL is fetched
  /// once), then expands back out so the result preserves the caller's
  /// input order including the duplicates.
  pub async fn batch_fetch(&self, urls: &[String]) -> Vec<Content> {
    let mut unique = Vec::new();
    let mut seen = HashSet::new();
    for url in urls {
      if seen.insert(url.clone()) {
        unique.push(url.clone());
      }
    }

    let fetched = futures::future::join_all(unique.iter().map(|url| {
      let this = self.clone();
      let url = url.clone();
      async move { (url.clone(), this.fetch_and_extract(&url).await) }
    }))
    .await;

    let by_url: HashMap<String, Content> = fetched.into_iter().collect();
    urls
      .iter()
      .map(|url| by_url.get(url).cloned().unwrap_or_else(|| Content::failed(url, "not fetched")))
      .collect()
  }
}

/// Drops items whose SHA-256 over the first 1000 characters of `text`
/// collides with an already-kept item. Items without text are always kept.
pub fn deduplicate(contents: Vec<Content>) -> Vec<Content> {
  let mut seen_hashes = HashSet::new();
  let mut kept = Vec::with_capacity(contents.len());
  for content in contents {
    if content.text.is_empty() {
      kept.push(content);
      continue;
    }
    let prefix: String = content.text.chars().take(DEDUP_PREFIX_CHARS).collect();
    let hash = hex::encode(Sha256::digest(prefix.as_bytes()));
    if seen_hashes.insert(hash) {
      kept.push(content);
    }
  }
  kept
}

/// Stable-sorts descending by a transparent score and truncates (§4.2):
/// has text +10; word_count>500 +5; >1000 +5 more; has title +2; primary
/// extractor +3 / structural +1; no error +5.
pub fn prioritize(mut contents: Vec<Content>, max_items: usize) -> Vec<Content> {
  contents.sort_by_key(|c| std::cmp::Reverse(score(c)));
  contents.truncate(max_items);
  contents
}

fn score(content: &Content) -> i32 {
  let mut score = 0;
  if !content.text.is_empty() {
    score += 10;
  }
  if content.word_count > 500 {
    score += 5;
  }
  if content.word_count > 1000 {
    score += 5;
  }
  if !content.title.is_empty() {
    score += 2;
  }
  match content.method {
    ExtractionMethod::Primary => score += 3,
    ExtractionMethod::Structural => score += 1,
    ExtractionMethod::SnippetFallback | ExtractionMethod::Failed => {}
  }
  if content.error.is_none() {
    score += 5;
  }
  score
}

#[cfg(test)]
mod tests {
  use super::*;

  fn content(text: &str, title: &str, word_count: usize, method: ExtractionMethod) -> Content {
    Content {
      url: "https://example.com".into(),
      title: title.into(),
      text: text.into(),
      media: Vec::new(),
      word_count,
      method,
      author: None,
      date: None,
      error: None,
    }
  }

  #[test]
  fn dedup_keeps_first_of_identical_prefix() {
    let a = content(&"x".repeat(1500), "A", 200, ExtractionMethod::Primary);
    let b = content(&"x".repeat(1500), "B", 200, ExtractionMethod::Primary);
    let deduped = deduplicate(vec![a, b]);
    assert_eq!(deduped.len(), 1);
    assert_eq!(deduped[0].title, "A");
  }

  #[test]
  fn dedup_keeps_items_without_text() {
    let a = Content::failed("https://a.example", "network error");
    let b = Content::failed("https://b.example", "network error");
    let deduped = deduplicate(vec![a, b]);
    assert_eq!(deduped.len(), 2);
  }

  #[test]
  fn prioritize_orders_by_score_descending() {
    let low = content("short text", "", 100, ExtractionMethod::Structural);
    let high = content(&"word ".repeat(1200), "Title", 1200, ExtractionMethod::Primary);
    let ranked = prioritize(vec![low, high.clone()], 2);
    assert_eq!(ranked[0].title, "Title");
  }

  #[test]
  fn prioritize_truncates_to_max_items() {
    let contents: Vec<Content> = (0..5).map(|i| content("text", &format!("t{i}"), 10, ExtractionMethod::Structural)).collect();
    let ranked = prioritize(contents, 3);
    assert_eq!(ranked.len(), 3);
  }

  #[test]
  fn adding_title_never_lowers_score() {
    let without_title = content("some text here", "", 10, ExtractionMethod::Primary);
    let with_title = content("some text here", "Title", 10, ExtractionMethod::Primary);
    assert!(score(&with_title) >= score(&without_title));
  }
}
