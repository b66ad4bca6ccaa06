use std::time::Duration;

use research_ai::client::LlmClient;
use research_core::ids::TaskPk;
use research_core::models::{
  DepthConfig, ExtractionMethod, MediaItem, MediaKind, ResearchResult, ResearchTask,
  SourceSummary, StageDeadlines, TaskStatus,
};
use research_pgvector::PgStore;

use crate::extract::Content;
use crate::fetch::{self, Fetcher};
use crate::graph;
use crate::search::SearchClient;

/// Deadline for a single per-source summarization call. The §4.4 table
/// names a combined fetch-stage deadline but no separate per-source
/// budget; this constant is the orchestrator's own choice (see DESIGN.md).
const SUMMARIZE_CALL_DEADLINE: Duration = Duration::from_secs(45);
const EMBED_CALL_DEADLINE: Duration = Duration::from_secs(20);
const REFORMAT_DEADLINE: Duration = Duration::from_secs(30);
const MAX_FEATURED_MEDIA: usize = 5;
const MAX_GRAPH_SOURCE_NODES: usize = 10;

/// C5: the staged pipeline that turns a query into a `ResearchResult`.
/// Owns no task state itself — every stage boundary is persisted through
/// `PgStore` so the database stays the single source of truth (§9).
#[derive(Clone)]
pub struct Orchestrator {
  store: PgStore,
  llm: LlmClient,
  search: SearchClient,
  fetcher: Fetcher,
}

impl Orchestrator {
  pub fn new(store: PgStore, llm: LlmClient, search: SearchClient, fetcher: Fetcher) -> Self {
    Self { store, llm, search, fetcher }
  }

  /// Runs the full pipeline for `task`, persisting status at every stage
  /// boundary. Never panics; every failure path ends in a `failed` or
  /// `cancelled` task status rather than propagating.
  pub async fn run(&self, task: ResearchTask) {
    let task_id = task.id;
    if let Err(stage) = self.run_inner(&task).await {
      tracing::warn!(task_id = %task.task_id, stage = %stage, "research task did not complete");
    }
    let _ = task_id;
  }

  async fn run_inner(&self, task: &ResearchTask) -> Result<(), &'static str> {
    let depth_config = DepthConfig::for_depth(task.depth);
    let deadlines = StageDeadlines::for_depth(task.depth);
    let max_sources = task.max_sources.min(depth_config.max_sources) as usize;

    if self.is_cancelled(task.id).await {
      return Err("cancelled-before-start");
    }

    // Stage 1: analyze.
    let stage_started = std::time::Instant::now();
    self.persist_status(task.id, TaskStatus::Analyzing, 10, None, None);
    let analysis = research_ai::ops::analyze_query(&self.llm, &task.query, deadlines.analysis).await;
    let strategies: Vec<String> = analysis.search_strategies.iter().take(3).cloned().collect();
    crate::observability::metrics::StageMetrics::completed("analyze", stage_started.elapsed());

    if self.is_cancelled(task.id).await {
      return Err("cancelled-after-analyze");
    }

    // Stage 2: search.
    self.persist_status(task.id, TaskStatus::Searching, 25, None, None);
    let search_outcome =
      tokio::time::timeout(deadlines.search, self.search.batch_search(&strategies, max_sources as u32)).await;
    let results_by_query = match search_outcome {
      Ok(map) => map,
      Err(_) => {
        self.fail(task.id, "Search stage timed out with no results").await;
        return Err("search-timeout");
      }
    };

    let mut urls = Vec::new();
    let mut snippets: std::collections::HashMap<String, (String, String)> = std::collections::HashMap::new();
    for strategy in &strategies {
      let Some(results) = results_by_query.get(strategy) else { continue };
      for result in results {
        if !snippets.contains_key(&result.url) {
          urls.push(result.url.clone());
          snippets.insert(result.url.clone(), (result.title.clone(), result.snippet.clone()));
        }
      }
    }
    urls.truncate(max_sources);

    if urls.is_empty() {
      self.fail(task.id, "No search results found").await;
      return Err("search-empty");
    }

    if self.is_cancelled(task.id).await {
      return Err("cancelled-after-search");
    }

    // Stage 3: fetch.
    self.persist_status(task.id, TaskStatus::Fetching, 50, None, None);
    let fetched = match tokio::time::timeout(deadlines.fetch, self.fetcher.batch_fetch(&urls)).await {
      Ok(contents) => contents,
      Err(_) => {
        self.persist_status(task.id, TaskStatus::Fetching, 50, Some("Fetch stage timed out"), None);
        Vec::new()
      }
    };

    let mut contents: Vec<Content> = fetch::deduplicate(fetched).into_iter().filter(|c| !c.text.is_empty()).collect();
    if contents.is_empty() {
      contents = urls
        .iter()
        .filter_map(|url| {
          snippets
            .get(url)
            .map(|(title, snippet)| Content::from_snippet(url, title, snippet))
        })
        .filter(|c| !c.text.is_empty())
        .collect();
    }
    if contents.is_empty() {
      self.fail(task.id, "No content available from fetch or search snippets").await;
      return Err("fetch-empty");
    }
    let contents = fetch::prioritize(contents, max_sources);

    if self.is_cancelled(task.id).await {
      return Err("cancelled-after-fetch");
    }

    // Stage 4: per-source summarize.
    let mut sources = Vec::with_capacity(contents.len());
    let mut featured_media: Vec<MediaItem> = Vec::new();
    let total = contents.len().max(1);
    for (index, content) in contents.iter().enumerate() {
      let summary = research_ai::ops::summarize_content(
        &self.llm,
        &content.text,
        &task.query,
        depth_config.summarization_length,
        SUMMARIZE_CALL_DEADLINE,
      )
      .await;
      sources.push(SourceSummary {
        url: content.url.clone(),
        title: content.title.clone(),
        summary,
        word_count: content.word_count as u32,
        extraction_method: content.method,
        media: content.media.clone(),
      });
      collect_featured_media(&mut featured_media, &content.media);

      let progress = 50 + ((index + 1) * 20 / total) as u8;
      self.persist_status(task.id, TaskStatus::Fetching, progress.min(70), None, None);
    }

    if self.is_cancelled(task.id).await {
      return Err("cancelled-after-summarize");
    }

    // Stage 5: synthesize.
    self.persist_status(task.id, TaskStatus::Synthesizing, 85, None, None);
    let mut synthesis = research_ai::ops::synthesize_research(
      &self.llm,
      &task.query,
      &sources,
      depth_config.synthesis_detail,
      deadlines.synthesis,
    )
    .await;

    // Stage 6: repair and reformat.
    synthesis = research_ai::ops::repair_synthesis(synthesis, &sources);
    synthesis.executive_summary =
      research_ai::ops::reformat_executive_summary(&self.llm, &synthesis.executive_summary, REFORMAT_DEADLINE).await;

    if self.is_cancelled(task.id).await {
      return Err("cancelled-after-synthesize");
    }

    // Stage 7: best-effort detailed multi-step analysis.
    self.persist_status(task.id, TaskStatus::Generating, 90, None, None);
    match tokio::time::timeout(
      deadlines.detailed_analysis,
      research_ai::ops::generate_detailed_analysis_multistep(&self.llm, &task.query, &sources, deadlines.detailed_analysis),
    )
    .await
    {
      Ok(detailed) => synthesis.detailed_analysis = Some(detailed),
      Err(_) => {
        self.persist_status(task.id, TaskStatus::Generating, 95, Some("Detailed analysis timed out"), None);
      }
    }

    // Embeddings.
    let synthesis_embedding = self.llm.embed_one(&synthesis.executive_summary, EMBED_CALL_DEADLINE).await.ok();
    let query_embedding = self.llm.embed_one(&task.query, EMBED_CALL_DEADLINE).await.ok();

    let query_analysis = serde_json::to_value(&analysis).unwrap_or(serde_json::Value::Null);
    // `detailed_analysis` is denormalized onto the result for query
    // convenience alongside `synthesis.detailed_analysis`.
    let detailed_analysis = synthesis.detailed_analysis.clone();
    let result = ResearchResult {
      task_id: task.id,
      sources_used: sources.len() as u32,
      synthesis,
      sources,
      query_analysis,
      detailed_analysis,
      featured_media,
      synthesis_embedding,
      query_embedding,
    };

    if self.is_cancelled(task.id).await {
      return Err("cancelled-before-commit");
    }

    let commit_outcome = self.commit_result(task.id, &result).await;
    if let Err(e) = commit_outcome {
      tracing::error!(task_id = %task.task_id, error = %e, "failed to persist research result");
      self.fail(task.id, "Failed to persist research result").await;
      return Err("commit-failed");
    }

    if let Err(e) = graph::build_for_task(&self.store, &self.llm, task.id, &result, MAX_GRAPH_SOURCE_NODES).await {
      tracing::warn!(task_id = %task.task_id, error = %e, "graph build failed for completed task");
    }

    Ok(())
  }

  async fn commit_result(&self, task_id: TaskPk, result: &ResearchResult) -> anyhow::Result<()> {
    use research_core::contracts::unit_of_work::UnitOfWork;
    let uow = self.store.unit_of_work().await?;
    uow.results().create(result).await?;
    uow.tasks().update_status(task_id, TaskStatus::Completed, 100, None, None).await?;
    uow.commit().await?;
    crate::observability::metrics::PersistenceMetrics::task_status("completed");
    Ok(())
  }

  async fn fail(&self, task_id: TaskPk, message: &str) {
    crate::observability::metrics::PersistenceMetrics::task_status("failed");
    if let Err(e) = self
      .store
      .tasks
      .update_status(task_id, TaskStatus::Failed, 0, None, Some(message))
      .await
    {
      tracing::warn!(error = %e, "failed to persist task failure");
    }
  }

  async fn is_cancelled(&self, task_id: TaskPk) -> bool {
    matches!(
      self.store.tasks.get_by_id(task_id).await,
      Ok(Some(task)) if task.status == TaskStatus::Cancelled
    )
  }

  /// Fire-and-forget status persistence (§4.4): bounded by a short
  /// deadline of its own, never awaited by the caller, and a failure here
  /// only logs a warning rather than interrupting the stage.
  fn persist_status(&self, task_id: TaskPk, status: TaskStatus, progress: u8, warning: Option<&str>, error_message: Option<&str>) {
    let store = self.store.clone();
    let warning = warning.map(|s| s.to_string());
    let error_message = error_message.map(|s| s.to_string());
    tokio::spawn(async move {
      let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        store.tasks.update_status(task_id, status, progress, warning.as_deref(), error_message.as_deref()),
      )
      .await;
      match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "status update failed"),
        Err(_) => tracing::warn!("status update timed out"),
      }
    });
  }
}

/// Collects up to five featured media items across all sources, deduplicated
/// by URL, preferring images over videos (§4.4 stage 4).
fn collect_featured_media(featured: &mut Vec<MediaItem>, candidates: &[MediaItem]) {
  for candidate in candidates {
    if featured.len() >= MAX_FEATURED_MEDIA {
      break;
    }
    if featured.iter().any(|m| m.url == candidate.url) {
      continue;
    }
    featured.push(candidate.clone());
  }
  featured.sort_by_key(|m| match m.kind {
    MediaKind::Image => 0,
    MediaKind::Video => 1,
  });
  featured.truncate(MAX_FEATURED_MEDIA);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn featured_media_prefers_images_and_caps_at_five() {
    let mut featured = Vec::new();
    let candidates: Vec<MediaItem> = (0..8)
      .map(|i| MediaItem {
        url: format!("https://example.com/{i}.jpg"),
        kind: if i % 2 == 0 { MediaKind::Image } else { MediaKind::Video },
      })
      .collect();
    collect_featured_media(&mut featured, &candidates);
    assert_eq!(featured.len(), 5);
    assert!(matches!(featured[0].kind, MediaKind::Image));
  }

  #[test]
  fn featured_media_dedupes_by_url() {
    let mut featured = Vec::new();
    let dup = MediaItem { url: "https://example.com/a.jpg".into(), kind: MediaKind::Image };
    collect_featured_media(&mut featured, &[dup.clone(), dup.clone()]);
    assert_eq!(featured.len(), 1);
    let _ = ExtractionMethod::Primary;
  }
}
