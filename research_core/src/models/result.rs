use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::TaskPk;

/// How a `SourceSummary`'s text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
  Primary,
  Structural,
  SnippetFallback,
  Failed,
}

/// A media item (image or video) collected during extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaItem {
  pub url: String,
  #[serde(rename = "type")]
  pub kind: MediaKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
  Image,
  Video,
}

/// One fetched-and-summarized source, ordered per the input search/fetch order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSummary {
  pub url: String,
  pub title: String,
  pub summary: String,
  pub word_count: usize,
  pub extraction_method: ExtractionMethod,
  pub media: Vec<MediaItem>,
}

/// Category of a `Finding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
  Primary,
  Secondary,
  Emerging,
  Consideration,
}

/// A single structured statement inside a synthesis. `supporting_sources` are
/// 1-based indices into the result's `sources` list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
  pub headline: String,
  pub finding: String,
  pub category: FindingCategory,
  pub impact_score: f32,
  pub confidence: f32,
  pub supporting_sources: Vec<u32>,
  pub statistics: BTreeMap<String, String>,
  pub keywords: Vec<String>,
}

impl Finding {
  /// §3 invariant: every index in `supporting_sources` is in `[1, sources_len]`.
  pub fn supporting_sources_in_bounds(&self, sources_len: usize) -> bool {
    self
      .supporting_sources
      .iter()
      .all(|&idx| idx >= 1 && (idx as usize) <= sources_len)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
  pub theme: String,
  pub description: String,
  pub sources: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
  pub point: String,
  pub viewpoints: Vec<String>,
  pub sources: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subsection {
  pub title: String,
  pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedSection {
  pub title: String,
  pub content: String,
  pub sources: Vec<u32>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub quotes: Vec<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub statistics: BTreeMap<String, String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub subsections: Vec<Subsection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedAnalysis {
  pub sections: Vec<DetailedSection>,
}

/// The LLM-generated structured research summary. See SPEC_FULL.md §4.5 for
/// the validation schema this struct is checked against after synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synthesis {
  pub executive_summary: String,
  pub key_findings: Vec<Finding>,
  #[serde(default)]
  pub themes: Vec<Theme>,
  #[serde(default)]
  pub contradictions: Vec<Contradiction>,
  #[serde(default)]
  pub knowledge_gaps: Vec<String>,
  #[serde(default)]
  pub recommendations: Vec<String>,
  #[serde(default)]
  pub further_research: Vec<String>,
  pub pull_quote: String,
  pub detailed_analysis: Option<DetailedAnalysis>,
}

impl Synthesis {
  /// §4.5 validity check, prior to repair.
  pub fn is_valid(&self) -> bool {
    self.executive_summary.chars().count() >= 100 && self.key_findings.len() >= 3
  }
}

/// A completed research task's full output. 1-1 with a `Completed` task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
  pub task_id: TaskPk,
  pub synthesis: Synthesis,
  pub sources: Vec<SourceSummary>,
  pub query_analysis: serde_json::Value,
  pub detailed_analysis: Option<DetailedAnalysis>,
  pub featured_media: Vec<MediaItem>,
  pub sources_used: u32,
  pub synthesis_embedding: Option<Vec<f32>>,
  pub query_embedding: Option<Vec<f32>>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn finding(supporting: Vec<u32>) -> Finding {
    Finding {
      headline: "h".into(),
      finding: "f".into(),
      category: FindingCategory::Primary,
      impact_score: 0.5,
      confidence: 0.5,
      supporting_sources: supporting,
      statistics: BTreeMap::new(),
      keywords: vec![],
    }
  }

  #[test]
  fn supporting_sources_bounds_check() {
    let f = finding(vec![1, 3]);
    assert!(f.supporting_sources_in_bounds(3));
    assert!(!f.supporting_sources_in_bounds(2));
    let f0 = finding(vec![0]);
    assert!(!f0.supporting_sources_in_bounds(5));
  }

  #[test]
  fn synthesis_validity_threshold() {
    let short = Synthesis {
      executive_summary: "too short".into(),
      key_findings: vec![finding(vec![1]); 3],
      themes: vec![],
      contradictions: vec![],
      knowledge_gaps: vec![],
      recommendations: vec![],
      further_research: vec![],
      pull_quote: String::new(),
      detailed_analysis: None,
    };
    assert!(!short.is_valid());

    let long = Synthesis {
      executive_summary: "x".repeat(100),
      ..short
    };
    assert!(long.is_valid());
  }
}
