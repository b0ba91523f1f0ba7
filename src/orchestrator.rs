use anyhow::{bail, Context, Result};
use chrono::Local;
use futures::future::join_all;
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ScrapeConfig;
use crate::fetcher::{FetchStatus, PageFetcher};
use crate::merge::{content_hash, list_page_files, page_file_name};
use crate::session::PageSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Not dispatched yet.
    Pending,
    /// Dispatched. A page keeps this state if its batch was cut short by a stop signal.
    InFlight,
    Succeeded,
    StoppedByRecordsEnd,
    StoppedByDuplicate,
    StoppedByShortContent,
    /// Loaded, but the listing layout was not recognised.
    Anomalous,
    FailedPermanently,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every page up to the configured maximum was processed.
    Completed,
    StoppedByRecordsEnd { page: u32 },
    StoppedByDuplicate { page: u32 },
    StoppedByShortContent { page: u32 },
}

#[derive(Debug)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub pages: BTreeMap<u32, PageState>,
    /// Pages whose text was written to the raw-page directory, in page order.
    pub saved: Vec<u32>,
}

impl RunSummary {
    pub fn state_of(&self, page: u32) -> PageState {
        self.pages.get(&page).copied().unwrap_or(PageState::Pending)
    }
}

/// Drives fetch+extract over pages `1..=max_pages` in fixed-size batches and writes each
/// accepted page to its own file.
pub struct BatchOrchestrator {
    config: Arc<ScrapeConfig>,
    fetcher: PageFetcher,
}

impl BatchOrchestrator {
    pub fn new(config: Arc<ScrapeConfig>) -> Self {
        let fetcher = PageFetcher::new(Arc::clone(&config));
        Self { config, fetcher }
    }

    /// Runs until `max_pages` or a stop signal. Each session serves one batch slot.
    pub async fn run<S: PageSession>(&self, sessions: &mut [S]) -> Result<RunSummary> {
        if sessions.is_empty() {
            bail!("at least one page session is required");
        }
        let raw_dir = self.config.raw_pages_dir();
        fs::create_dir_all(&raw_dir)
            .with_context(|| format!("creating raw page directory {}", raw_dir.display()))?;
        self.set_aside_stale_pages(&raw_dir)?;

        let slots = sessions.len().min(self.config.concurrency.max(1));
        let max_pages = self.config.max_pages;
        let mut pages = BTreeMap::new();
        let mut saved = Vec::new();
        let mut last_hash: Option<String> = None;
        let mut outcome = RunOutcome::Completed;
        let mut next = 1u32;

        'batches: while next <= max_pages {
            let batch_end = next.saturating_add(slots as u32 - 1).min(max_pages);
            let batch: Vec<u32> = (next..=batch_end).collect();
            for page in &batch {
                pages.insert(*page, PageState::InFlight);
            }
            info!("🚀 [BATCH] Fetching pages {} to {}", next, batch_end);

            let results = join_all(
                sessions
                    .iter_mut()
                    .zip(batch.iter().copied())
                    .map(|(session, page)| self.fetcher.fetch_page(session, page)),
            )
            .await;
            next = batch_end + 1;

            for result in results {
                let page = result.page_number;
                match result.status {
                    FetchStatus::NoMoreRecords => {
                        info!("🛑 [BATCH] Stopping: 'no records' on page {}", page);
                        pages.insert(page, PageState::StoppedByRecordsEnd);
                        outcome = RunOutcome::StoppedByRecordsEnd { page };
                        break 'batches;
                    }
                    FetchStatus::Success { text, content_len } => {
                        let hash = content_hash(&text);
                        if last_hash.as_deref() == Some(hash.as_str()) {
                            info!("🛑 [BATCH] Stopping: page {} repeats the previous page", page);
                            pages.insert(page, PageState::StoppedByDuplicate);
                            outcome = RunOutcome::StoppedByDuplicate { page };
                            break 'batches;
                        }
                        if content_len < self.config.min_content_len {
                            info!(
                                "🛑 [BATCH] Stopping: page {} has only {} bytes of tender content",
                                page, content_len
                            );
                            pages.insert(page, PageState::StoppedByShortContent);
                            outcome = RunOutcome::StoppedByShortContent { page };
                            break 'batches;
                        }
                        match self.persist(page, &text) {
                            Ok(path) => {
                                info!("[BATCH] Saved page {} to {}", page, path.display());
                                pages.insert(page, PageState::Succeeded);
                                saved.push(page);
                                last_hash = Some(hash);
                            }
                            Err(e) => {
                                error!("❌ [BATCH] Could not save page {}: {:#}", page, e);
                                pages.insert(page, PageState::FailedPermanently);
                            }
                        }
                    }
                    FetchStatus::Anomalous(reason) => {
                        warn!("⚠️ [BATCH] Skipping page {}: {}", page, reason);
                        pages.insert(page, PageState::Anomalous);
                    }
                    FetchStatus::PermanentFailure(e) => {
                        warn!("⚠️ [BATCH] Skipping page {}: {}", page, e);
                        pages.insert(page, PageState::FailedPermanently);
                    }
                }
            }
        }

        info!(
            "[BATCH] Fetching finished ({:?}). Saved {} page files.",
            outcome,
            saved.len()
        );
        Ok(RunSummary { outcome, pages, saved })
    }

    /// Moves page files left by an earlier run out of `raw_dir` so they cannot reach this
    /// run's corpus.
    fn set_aside_stale_pages(&self, raw_dir: &Path) -> Result<()> {
        let stale = list_page_files(raw_dir)?;
        if stale.is_empty() {
            return Ok(());
        }
        let target = self
            .config
            .stale_pages_dir()
            .join(Local::now().format("%Y%m%d_%H%M%S").to_string());
        fs::create_dir_all(&target)
            .with_context(|| format!("creating stale page directory {}", target.display()))?;
        for path in &stale {
            let Some(name) = path.file_name() else { continue };
            let dest = target.join(name);
            fs::rename(path, &dest)
                .with_context(|| format!("moving {} to {}", path.display(), dest.display()))?;
        }
        warn!(
            "⚠️ [BATCH] Moved {} leftover page files to {}",
            stale.len(),
            target.display()
        );
        Ok(())
    }

    fn persist(&self, page: u32, text: &str) -> Result<PathBuf> {
        let path = self.config.raw_pages_dir().join(page_file_name(page));
        fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }
}
