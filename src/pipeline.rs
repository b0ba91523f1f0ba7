use anyhow::{Context, Result};
use chrono::Local;
use log::{info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ScrapeConfig;
use crate::merge::{merge_pages, MergeSummary};
use crate::orchestrator::{BatchOrchestrator, RunSummary};
use crate::session::{HttpSession, PageSession};

#[derive(Debug)]
pub struct PipelineReport {
    pub run: RunSummary,
    pub merge: MergeSummary,
    pub duration: Duration,
}

impl PipelineReport {
    pub fn describe(&self) -> String {
        let corpus = match &self.merge.corpus_path {
            Some(path) => path.display().to_string(),
            None => "none".to_string(),
        };
        format!(
            "Scrape finished ({:?}) in {:.1}s: saved {} pages, merged {} unique pages, corpus: {}",
            self.run.outcome,
            self.duration.as_secs_f64(),
            self.run.saved.len(),
            self.merge.merged,
            corpus
        )
    }
}

/// One full acquisition run against the live portal: fetch every page, then merge into
/// today's corpus.
pub async fn run_scrape(config: Arc<ScrapeConfig>) -> Result<PipelineReport> {
    let mut sessions = HttpSession::pool(config.concurrency, config.page_timeout)
        .context("starting page sessions")?;
    info!("[PIPELINE] Opened {} page sessions", sessions.len());
    run_with_sessions(config, &mut sessions).await
}

pub async fn run_with_sessions<S: PageSession>(
    config: Arc<ScrapeConfig>,
    sessions: &mut [S],
) -> Result<PipelineReport> {
    let started = Instant::now();
    info!("🚀 [PIPELINE] Starting scrape run");

    let orchestrator = BatchOrchestrator::new(Arc::clone(&config));
    let run = orchestrator.run(sessions).await?;

    let corpus_path = config.corpus_path(Local::now().date_naive());
    let merge = merge_pages(&config.raw_pages_dir(), &corpus_path)?;
    if merge.corpus_path.is_none() {
        warn!("⚠️ [PIPELINE] No corpus was written for this run");
    }

    let report = PipelineReport { run, merge, duration: started.elapsed() };
    info!("🏁 [PIPELINE] {}", report.describe());
    Ok(report)
}
