use research_core::models::{ExtractionMethod, MediaItem, MediaKind};
use scraper::{Html, Selector};
use url::Url;

const MAX_IMAGES: usize = 5;
const MAX_VIDEOS: usize = 3;
const MAX_VIDEO_IFRAMES: usize = 3;
const STRIP_TAGS: &[&str] = &["script", "style", "nav", "header", "footer", "aside"];
const PARAGRAPH_CANDIDATES: &[&str] = &["article", "main", "div", "section"];

/// The extracted shape the fetcher produces per URL (§4.2 `Content`).
#[derive(Debug, Clone)]
pub struct Content {
  pub url: String,
  pub title: String,
  pub text: String,
  pub media: Vec<MediaItem>,
  pub word_count: usize,
  pub method: ExtractionMethod,
  pub author: Option<String>,
  pub date: Option<String>,
  pub error: Option<String>,
}

impl Content {
  pub fn failed(url: &str, error: impl Into<String>) -> Self {
    Self {
      url: url.to_string(),
      title: String::new(),
      text: String::new(),
      media: Vec::new(),
      word_count: 0,
      method: ExtractionMethod::Failed,
      author: None,
      date: None,
      error: Some(error.into()),
    }
  }

  /// Synthesizes a `Content` from a search-result snippet when both fetch
  /// and extraction come back empty (§4.4 stage 3 snippet fallback).
  pub fn from_snippet(url: &str, title: &str, snippet: &str) -> Self {
    Self {
      url: url.to_string(),
      title: title.to_string(),
      text: snippet.to_string(),
      media: Vec::new(),
      word_count: snippet.split_whitespace().count(),
      method: ExtractionMethod::SnippetFallback,
      author: None,
      date: None,
      error: None,
    }
  }
}

/// Extracts title/text/media from raw HTML fetched from `url`. Tries the
/// primary (paragraph-density) extractor first; falls back to the
/// structural walk when it yields no text (§4.2).
pub fn extract_content(url: &str, html: &str) -> Content {
  let document = Html::parse_document(html);
  let base = Url::parse(url).ok();

  let title = extract_title(&document);
  let media = extract_media(&document, base.as_ref());

  let (text, method) = match primary_extract(&document) {
    Some(text) if !text.trim().is_empty() => (text, ExtractionMethod::Primary),
    _ => (structural_extract(&document), ExtractionMethod::Structural),
  };

  let word_count = text.split_whitespace().count();
  Content {
    url: url.to_string(),
    title,
    text,
    media,
    word_count,
    method,
    author: extract_meta(&document, "author"),
    date: extract_meta(&document, "date").or_else(|| extract_meta(&document, "article:published_time")),
    error: None,
  }
}

fn extract_title(document: &Html) -> String {
  let selector = Selector::parse("title").unwrap();
  document
    .select(&selector)
    .next()
    .map(|e| e.text().collect::<String>().trim().to_string())
    .unwrap_or_default()
}

fn extract_meta(document: &Html, name: &str) -> Option<String> {
  let selector = Selector::parse(&format!(r#"meta[name="{name}"], meta[property="{name}"]"#)).ok()?;
  document
    .select(&selector)
    .next()
    .and_then(|e| e.value().attr("content"))
    .map(|s| s.to_string())
}

/// Readability-style heuristic: score every paragraph-bearing container by
/// its total direct paragraph text length, and return the text of the
/// densest one. No text containers at all means this extractor yields
/// nothing and the structural fallback takes over.
fn primary_extract(document: &Html) -> Option<String> {
  let container_selector = Selector::parse(&PARAGRAPH_CANDIDATES.join(",")).ok()?;
  let paragraph_selector = Selector::parse("p").ok()?;

  let mut best: Option<(usize, String)> = None;
  for container in document.select(&container_selector) {
    let mut paragraphs = Vec::new();
    let mut total_len = 0usize;
    for p in container.select(&paragraph_selector) {
      let text: String = p.text().collect::<String>().trim().to_string();
      if text.is_empty() {
        continue;
      }
      total_len += text.len();
      paragraphs.push(text);
    }
    if total_len == 0 {
      continue;
    }
    let is_better = match &best {
      Some((best_len, _)) => total_len > *best_len,
      None => true,
    };
    if is_better {
      best = Some((total_len, paragraphs.join("\n\n")));
    }
  }
  best.map(|(_, text)| text)
}

/// Strips script/style/nav/header/footer/aside, prefers `main`/`article`/
/// `#content`, else concatenates all paragraphs, else falls back to the
/// whole body's text.
fn structural_extract(document: &Html) -> String {
  let strip_selector = Selector::parse(&STRIP_TAGS.join(",")).unwrap();
  let stripped: std::collections::HashSet<_> = document
    .select(&strip_selector)
    .flat_map(|e| e.descendants().map(|n| n.id()))
    .collect();

  for selector_str in ["main", "article", "#content"] {
    if let Ok(selector) = Selector::parse(selector_str) {
      if let Some(element) = document.select(&selector).next() {
        let text: String = element
          .text()
          .collect::<Vec<_>>()
          .join(" ")
          .split_whitespace()
          .collect::<Vec<_>>()
          .join(" ");
        if !text.trim().is_empty() {
          return text;
        }
      }
    }
  }

  let paragraph_selector = Selector::parse("p").unwrap();
  let paragraphs: Vec<String> = document
    .select(&paragraph_selector)
    .filter(|e| !stripped.contains(&e.id()))
    .map(|e| e.text().collect::<String>().trim().to_string())
    .filter(|s| !s.is_empty())
    .collect();
  if !paragraphs.is_empty() {
    return paragraphs.join("\n\n");
  }

  let body_selector = Selector::parse("body").unwrap();
  document
    .select(&body_selector)
    .next()
    .map(|e| e.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" "))
    .unwrap_or_default()
}

fn extract_media(document: &Html, base: Option<&Url>) -> Vec<MediaItem> {
  let mut media = Vec::new();

  if let Ok(selector) = Selector::parse("img") {
    for img in document.select(&selector) {
      if media.iter().filter(|m: &&MediaItem| m.kind == MediaKind::Image).count() >= MAX_IMAGES {
        break;
      }
      if let Some(src) = img.value().attr("src") {
        if let Some(resolved) = resolve_url(base, src) {
          media.push(MediaItem { url: resolved, kind: MediaKind::Image });
        }
      }
    }
  }

  if let Ok(selector) = Selector::parse("video source, video") {
    for video in document.select(&selector) {
      if media.iter().filter(|m: &&MediaItem| m.kind == MediaKind::Video).count() >= MAX_VIDEOS {
        break;
      }
      if let Some(src) = video.value().attr("src") {
        if let Some(resolved) = resolve_url(base, src) {
          media.push(MediaItem { url: resolved, kind: MediaKind::Video });
        }
      }
    }
  }

  if let Ok(selector) = Selector::parse("iframe") {
    let mut iframe_count = 0usize;
    for iframe in document.select(&selector) {
      if iframe_count >= MAX_VIDEO_IFRAMES {
        break;
      }
      let Some(src) = iframe.value().attr("src") else { continue };
      if !(src.contains("youtube") || src.contains("vimeo") || src.contains("player")) {
        continue;
      }
      if let Some(resolved) = resolve_url(base, src) {
        media.push(MediaItem { url: resolved, kind: MediaKind::Video });
        iframe_count += 1;
      }
    }
  }

  media
}

fn resolve_url(base: Option<&Url>, candidate: &str) -> Option<String> {
  match base {
    Some(base) => base.join(candidate).ok().map(|u| u.to_string()),
    None => Url::parse(candidate).ok().map(|u| u.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn primary_extractor_picks_densest_container() {
    let html = r#"
      <html><body>
        <div id="sidebar"><p>short</p></div>
        <article><p>This is a much longer paragraph with real content about the topic at hand.</p>
                  <p>And a second paragraph continuing the thought with more substance.</p></article>
      </body></html>
    "#;
    let content = extract_content("https://example.com/a", html);
    assert_eq!(content.method, ExtractionMethod::Primary);
    assert!(content.text.contains("much longer paragraph"));
    assert!(!content.text.contains("short"));
  }

  #[test]
  fn structural_fallback_strips_nav_and_footer() {
    let html = r#"
      <html><body>
        <nav>Home About Contact</nav>
        <div>Just some plain text with no paragraph tags at all in this body element.</div>
        <footer>Copyright 2024</footer>
      </body></html>
    "#;
    let content = extract_content("https://example.com/b", html);
    assert_eq!(content.method, ExtractionMethod::Structural);
  }

  #[test]
  fn media_resolves_relative_urls_against_source() {
    let html = r#"<html><body><img src="/images/pic.png"></body></html>"#;
    let content = extract_content("https://example.com/page", html);
    assert_eq!(content.media.len(), 1);
    assert_eq!(content.media[0].url, "https://example.com/images/pic.png");
  }

  #[test]
  fn media_caps_images_at_five() {
    let imgs = (0..10).map(|i| format!(r#"<img src="/img{i}.png">"#)).collect::<String>();
    let html = format!("<html><body>{imgs}</body></html>");
    let content = extract_content("https://example.com", &html);
    assert_eq!(content.media.len(), 5);
  }
}
