//! Higher-level operations composed on top of `LlmClient` (§4.3): the
//! query-analysis / summarization / synthesis pipeline the orchestrator
//! drives stage by stage. Every operation that expects structured output
//! goes through `LlmClient::generate_structured`'s sanitize-and-retry
//! discipline; every operation also has a deterministic fallback built from
//! its own input, so a misbehaving model degrades the result instead of
//! failing the pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use research_core::error::LlmError;
use research_core::models::{
  DetailedAnalysis, DetailedSection, Finding, FindingCategory, SourceSummary, Subsection, Synthesis,
};

use crate::client::LlmClient;

/// Output of `analyze_query`. Only `search_strategies` is load-bearing for
/// the orchestrator's search stage; the rest is informational context
/// threaded into `ResearchResult::query_analysis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnalysis {
  pub search_strategies: Vec<String>,
  #[serde(default)]
  pub topics: Vec<String>,
  #[serde(default)]
  pub entities: Vec<String>,
  #[serde(default)]
  pub intent: Option<String>,
}

impl QueryAnalysis {
  /// §4.4 stage 1 degrade-on-failure value: a single strategy equal to the
  /// raw query.
  pub fn degraded(query: &str) -> Self {
    Self { search_strategies: vec![query.to_string()], topics: vec![], entities: vec![], intent: None }
  }
}

fn first_sentence(text: &str) -> &str {
  let text = text.trim();
  let end = text.find(['.', '!', '?']).map(|i| i + 1).unwrap_or(text.len());
  &text[..end]
}

fn leading_sentences(text: &str, count: usize) -> String {
  let mut out = String::new();
  let mut remaining = text.trim();
  for _ in 0..count {
    if remaining.is_empty() {
      break;
    }
    let s = first_sentence(remaining);
    out.push_str(s.trim());
    out.push(' ');
    remaining = remaining[s.len()..].trim_start();
  }
  out.trim().to_string()
}

/// Break an LLM-authored query into ranked search strategies and topical
/// metadata. Falls back to `QueryAnalysis::degraded` on timeout or parse
/// failure (§4.4 stage 1).
pub async fn analyze_query(client: &LlmClient, query: &str, deadline: Duration) -> QueryAnalysis {
  let system = "You are a research assistant. Respond with a single JSON object only, \
    with keys search_strategies (array of 2-4 alternate search queries), topics (array), \
    entities (array), and intent (string). No prose outside the JSON.";
  let result = client
    .generate_structured::<QueryAnalysis, _>(
      |attempt| {
        if attempt == 0 {
          format!("Analyze this research query and propose search strategies: \"{query}\"")
        } else {
          format!("Return ONLY valid JSON analyzing the query: \"{query}\"")
        }
      },
      Some(system),
      512,
      deadline,
    )
    .await;
  match result {
    Ok(analysis) if !analysis.search_strategies.is_empty() => analysis,
    _ => QueryAnalysis::degraded(query),
  }
}

/// Summarize one fetched source, focused on `query`, bounded to roughly
/// `length_words` words (§4.4 stage 4). Falls back to a leading-sentence
/// extract of the raw text.
pub async fn summarize_content(
  client: &LlmClient,
  text: &str,
  query: &str,
  length_words: usize,
  deadline: Duration,
) -> String {
  let system = "You write focused research summaries. Respond with plain text only, no markdown headers.";
  let prompt = format!(
    "Summarize the following content in about {length_words} words, focused on answering: \"{query}\".\n\n{text}"
  );
  match client.generate(&prompt, Some(system), 0.3, (length_words as u32) * 2 + 64, deadline).await {
    Ok(summary) if !summary.trim().is_empty() => summary,
    _ => leading_sentences(text, 3),
  }
}

fn fallback_finding(source: &SourceSummary, index: usize) -> Finding {
  let rank = index as f32;
  Finding {
    headline: source.title.clone(),
    finding: first_sentence(&source.summary).to_string(),
    category: if index == 0 { FindingCategory::Primary } else { FindingCategory::Secondary },
    impact_score: (0.9 - rank * 0.1).max(0.1),
    confidence: (0.85 - rank * 0.1).max(0.1),
    supporting_sources: vec![(index + 1) as u32],
    statistics: BTreeMap::new(),
    keywords: vec![],
  }
}

/// §4.4 stage 5 fallback: a synthesis built deterministically from the first
/// N source summaries, used when `synthesize_research` times out or the
/// model's output fails validation after repair.
pub fn fallback_synthesis(sources: &[SourceSummary]) -> Synthesis {
  let executive_summary = leading_sentences(
    &sources.iter().map(|s| s.summary.clone()).collect::<Vec<_>>().join(" "),
    sources.len().min(5).max(1),
  );
  let key_findings: Vec<Finding> = sources.iter().enumerate().map(|(i, s)| fallback_finding(s, i)).collect();
  let pull_quote = sources.first().map(|s| first_sentence(&s.summary).to_string()).unwrap_or_default();
  Synthesis {
    executive_summary,
    key_findings,
    themes: vec![],
    contradictions: vec![],
    knowledge_gaps: vec![],
    recommendations: vec![],
    further_research: vec![],
    pull_quote,
    detailed_analysis: Some(DetailedAnalysis {
      sections: vec![DetailedSection {
        title: "Overview".to_string(),
        content: sources.iter().map(|s| s.summary.clone()).collect::<Vec<_>>().join("\n\n"),
        sources: (1..=sources.len() as u32).collect(),
        quotes: vec![],
        statistics: BTreeMap::new(),
        subsections: vec![],
      }],
    }),
  }
}

fn sources_block(sources: &[SourceSummary]) -> String {
  sources
    .iter()
    .enumerate()
    .map(|(i, s)| format!("[{}] {}\n{}", i + 1, s.title, s.summary))
    .collect::<Vec<_>>()
    .join("\n\n")
}

/// Synthesize a structured `Synthesis` across all summarized sources
/// (§4.4 stage 5, §4.5 schema). Falls back to `fallback_synthesis` on
/// timeout or parse failure; `repair_synthesis` still runs on the result
/// either way.
pub async fn synthesize_research(
  client: &LlmClient,
  query: &str,
  sources: &[SourceSummary],
  synthesis_detail: &str,
  deadline: Duration,
) -> Synthesis {
  let system = "You are a senior research analyst. Respond with a single JSON object matching the schema: \
    executive_summary (string, at least 100 characters), key_findings (array of objects with headline, \
    finding, category [primary|secondary|emerging|consideration], impact_score, confidence, \
    supporting_sources [1-based source indices], statistics, keywords), themes, contradictions, \
    knowledge_gaps, recommendations, further_research (string arrays), pull_quote (string), and \
    detailed_analysis ({ sections: [{title, content, sources, quotes?, statistics?, subsections?}] }). \
    No prose outside the JSON.";
  let block = sources_block(sources);
  let result = client
    .generate_structured::<Synthesis, _>(
      |attempt| {
        if attempt == 0 {
          format!(
            "Synthesize a {synthesis_detail} research report answering \"{query}\" from these sources:\n\n{block}"
          )
        } else {
          format!(
            "Return ONLY valid JSON. Synthesize findings for \"{query}\" from:\n\n{block}"
          )
        }
      },
      Some(system),
      4096,
      deadline,
    )
    .await;
  match result {
    Ok(synthesis) if synthesis.is_valid() => synthesis,
    _ => fallback_synthesis(sources),
  }
}

/// §4.4 stage 6: fill any still-missing required fields with deterministic
/// defaults after validation. Only called when `synthesis.is_valid()` is
/// false going in (e.g. a structured call returned a shape with too few
/// findings but an otherwise-usable executive summary).
pub fn repair_synthesis(mut synthesis: Synthesis, sources: &[SourceSummary]) -> Synthesis {
  if synthesis.executive_summary.chars().count() < 100 {
    let fallback = fallback_synthesis(sources);
    synthesis.executive_summary = fallback.executive_summary;
  }
  if synthesis.key_findings.len() < 3 {
    let missing = 3 - synthesis.key_findings.len();
    let start = synthesis.key_findings.len();
    for (offset, source) in sources.iter().skip(start).take(missing).enumerate() {
      synthesis.key_findings.push(fallback_finding(source, start + offset));
    }
  }
  if synthesis.detailed_analysis.is_none() {
    synthesis.detailed_analysis = fallback_synthesis(sources).detailed_analysis;
  }
  synthesis
}

/// §4.4 stage 6: convert a plain-string executive summary into 3-4
/// `<p>`-wrapped paragraphs. On failure, wraps the original once.
pub async fn reformat_executive_summary(client: &LlmClient, executive_summary: &str, deadline: Duration) -> String {
  if executive_summary.trim_start().starts_with("<p>") {
    return executive_summary.to_string();
  }
  let system = "Reformat the given text into 3-4 HTML <p> paragraphs. Respond with only the paragraphs, no other text.";
  let prompt = format!("Reformat into paragraphs:\n\n{executive_summary}");
  match client.generate(&prompt, Some(system), 0.2, 1024, deadline).await {
    Ok(text) if text.trim().starts_with("<p>") => text,
    _ => format!("<p>{executive_summary}</p>"),
  }
}

#[derive(Deserialize)]
struct OutlineResponse {
  outline: Vec<String>,
}

/// §4.4 stage 7: a 5-8 section outline for the detailed analysis. Falls
/// back to a fixed generic skeleton on failure.
pub async fn generate_analysis_outline(
  client: &LlmClient,
  query: &str,
  sources: &[SourceSummary],
  deadline: Duration,
) -> Vec<String> {
  let system = "Respond with a single JSON object {\"outline\": [string, ...]} containing 5 to 8 section titles. No prose.";
  let block = sources_block(sources);
  let result = client
    .generate_structured::<OutlineResponse, _>(
      |attempt| {
        if attempt == 0 {
          format!("Propose a detailed-analysis outline for \"{query}\" given:\n\n{block}")
        } else {
          format!("Return ONLY JSON {{\"outline\": [...]}} for \"{query}\"")
        }
      },
      Some(system),
      512,
      deadline,
    )
    .await;
  match result {
    Ok(o) if o.outline.len() >= 3 => o.outline,
    _ => vec![
      "Background".to_string(),
      "Key Developments".to_string(),
      "Analysis".to_string(),
      "Implications".to_string(),
      "Conclusion".to_string(),
    ],
  }
}

/// §4.4 stage 7: prose for one outline section. Falls back to a
/// concatenation of the source summaries.
pub async fn generate_section_content(
  client: &LlmClient,
  section_title: &str,
  query: &str,
  sources: &[SourceSummary],
  deadline: Duration,
) -> String {
  let system = "Write a detailed, well-organized section of a research report. Plain text or light markdown only.";
  let block = sources_block(sources);
  let prompt =
    format!("Write the \"{section_title}\" section of a research report answering \"{query}\", using:\n\n{block}");
  match client.generate(&prompt, Some(system), 0.4, 1536, deadline).await {
    Ok(content) if !content.trim().is_empty() => content,
    _ => sources.iter().map(|s| s.summary.clone()).collect::<Vec<_>>().join("\n\n"),
  }
}

#[derive(Deserialize, Default)]
struct QuotesAndStats {
  #[serde(default)]
  quotes: Vec<String>,
  #[serde(default)]
  statistics: BTreeMap<String, String>,
}

/// §4.4 stage 7: pull quotable lines and key statistics out of generated
/// section content. Falls back to empty collections.
pub async fn extract_quotes_and_stats(
  client: &LlmClient,
  section_content: &str,
  deadline: Duration,
) -> (Vec<String>, BTreeMap<String, String>) {
  let system =
    "Respond with a single JSON object {\"quotes\": [string, ...], \"statistics\": {key: value, ...}}. No prose.";
  let result = client
    .generate_structured::<QuotesAndStats, _>(
      |attempt| {
        if attempt == 0 {
          format!("Extract notable quotes and statistics from:\n\n{section_content}")
        } else {
          "Return ONLY JSON {\"quotes\": [...], \"statistics\": {}}".to_string()
        }
      },
      Some(system),
      768,
      deadline,
    )
    .await
    .unwrap_or_default();
  (result.quotes, result.statistics)
}

#[derive(Deserialize)]
struct SubsectionsResponse {
  subsections: Vec<Subsection>,
}

/// §4.4 stage 7: when a section's content exceeds a length threshold,
/// break it into up to two sub-sections. Falls back to none (the section
/// stands as a single block).
pub async fn generate_subsections(client: &LlmClient, section_content: &str, deadline: Duration) -> Vec<Subsection> {
  let system =
    "Respond with a single JSON object {\"subsections\": [{\"title\": string, \"content\": string}, ...]} \
    containing at most 2 entries. No prose.";
  let result = client
    .generate_structured::<SubsectionsResponse, _>(
      |attempt| {
        if attempt == 0 {
          format!("Split this section into up to 2 coherent sub-sections:\n\n{section_content}")
        } else {
          "Return ONLY JSON {\"subsections\": [...]}".to_string()
        }
      },
      Some(system),
      1024,
      deadline,
    )
    .await;
  match result {
    Ok(r) => r.subsections.into_iter().take(2).collect(),
    Err(_) => vec![],
  }
}

/// Length threshold (characters) past which a section is split into
/// sub-sections (§4.4 stage 7).
const SUBSECTION_THRESHOLD_CHARS: usize = 2000;

/// §4.4 stage 7 in full: outline, then per-section content + quotes/stats
/// + optional sub-sections. Best-effort — any stage failing just narrows
/// that section rather than aborting; the caller treats the whole stage
/// as optional and may discard the result on an overall timeout.
pub async fn generate_detailed_analysis_multistep(
  client: &LlmClient,
  query: &str,
  sources: &[SourceSummary],
  deadline: Duration,
) -> DetailedAnalysis {
  let outline = generate_analysis_outline(client, query, sources, deadline).await;
  let mut sections = Vec::with_capacity(outline.len());
  let all_source_indices: Vec<u32> = (1..=sources.len() as u32).collect();
  for title in &outline {
    let content = generate_section_content(client, title, query, sources, deadline).await;
    let (quotes, statistics) = extract_quotes_and_stats(client, &content, deadline).await;
    let subsections = if content.chars().count() > SUBSECTION_THRESHOLD_CHARS {
      generate_subsections(client, &content, deadline).await
    } else {
      vec![]
    };
    sections.push(DetailedSection {
      title: title.clone(),
      content,
      sources: all_source_indices.clone(),
      quotes,
      statistics,
      subsections,
    });
  }
  DetailedAnalysis { sections }
}

#[cfg(test)]
mod tests {
  use super::*;
  use research_core::models::{ExtractionMethod, MediaItem};

  fn source(title: &str, summary: &str) -> SourceSummary {
    SourceSummary {
      url: format!("https://example.com/{title}"),
      title: title.to_string(),
      summary: summary.to_string(),
      word_count: summary.split_whitespace().count(),
      extraction_method: ExtractionMethod::Primary,
      media: Vec::<MediaItem>::new(),
    }
  }

  #[test]
  fn degraded_analysis_uses_raw_query() {
    let a = QueryAnalysis::degraded("rust async runtimes");
    assert_eq!(a.search_strategies, vec!["rust async runtimes".to_string()]);
  }

  #[test]
  fn fallback_synthesis_is_valid() {
    let sources = vec![
      source("A", "First fact about A. Second fact about A."),
      source("B", "First fact about B."),
      source("C", "First fact about C."),
    ];
    let synthesis = fallback_synthesis(&sources);
    assert!(synthesis.is_valid());
    assert_eq!(synthesis.key_findings.len(), 3);
    assert!(synthesis.detailed_analysis.is_some());
  }

  #[test]
  fn fallback_findings_decay_with_index() {
    let sources = vec![source("A", "fact a"), source("B", "fact b")];
    let synthesis = fallback_synthesis(&sources);
    assert!(synthesis.key_findings[0].impact_score > synthesis.key_findings[1].impact_score);
  }

  #[test]
  fn repair_fills_missing_findings() {
    let sources = vec![
      source("A", "fact a"),
      source("B", "fact b"),
      source("C", "fact c"),
    ];
    let thin = Synthesis {
      executive_summary: "x".repeat(150),
      key_findings: vec![fallback_finding(&sources[0], 0)],
      themes: vec![],
      contradictions: vec![],
      knowledge_gaps: vec![],
      recommendations: vec![],
      further_research: vec![],
      pull_quote: String::new(),
      detailed_analysis: None,
    };
    let repaired = repair_synthesis(thin, &sources);
    assert!(repaired.key_findings.len() >= 3);
    assert!(repaired.detailed_analysis.is_some());
  }

  #[test]
  fn leading_sentences_joins_first_n() {
    let text = "One. Two. Three. Four.";
    assert_eq!(leading_sentences(text, 2), "One. Two.");
  }
}
