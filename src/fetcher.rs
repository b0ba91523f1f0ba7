use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::config::ScrapeConfig;
use crate::error::{FetchError, PermanentFetchError};
use crate::extract::{render_page, ExtractOutcome, Extractor};
use crate::session::PageSession;

#[derive(Debug)]
pub enum FetchStatus {
    /// Tagged text of every tender on the page, and the combined length of the field values
    /// that were actually scraped.
    Success { text: String, content_len: usize },
    /// The portal reported that the result set is exhausted.
    NoMoreRecords,
    /// The page loaded but its layout was not recognised. Skipped, not retried.
    Anomalous(String),
    PermanentFailure(PermanentFetchError),
}

#[derive(Debug)]
pub struct PageFetchResult {
    pub page_number: u32,
    pub status: FetchStatus,
}

pub struct PageFetcher {
    config: Arc<ScrapeConfig>,
    extractor: Extractor,
}

impl PageFetcher {
    pub fn new(config: Arc<ScrapeConfig>) -> Self {
        let extractor = Extractor::new(&config.landing_url);
        Self { config, extractor }
    }

    /// Fetches and extracts one listing page, retrying transient failures with exponential backoff.
    pub async fn fetch_page<S>(&self, session: &mut S, page_number: u32) -> PageFetchResult
    where
        S: PageSession + ?Sized,
    {
        let url = self.config.page_url(page_number);
        let retry_limit = self.config.retry_limit.max(1);
        let mut last_error = FetchError::EmptyBody;

        for attempt in 1..=retry_limit {
            info!("📄 [FETCH] Page {} (attempt {}/{})", page_number, attempt, retry_limit);

            match self.load(session, &url).await {
                Ok(markup) => {
                    let status = match self.extractor.extract(&markup) {
                        ExtractOutcome::Records(rows) => {
                            info!("✅ [FETCH] Page {} parsed: {} tenders", page_number, rows.len());
                            FetchStatus::Success {
                                text: render_page(&rows),
                                content_len: rows.iter().map(|row| row.record.known_content_len()).sum(),
                            }
                        }
                        ExtractOutcome::NoRecords => {
                            info!("[FETCH] Page {} reports no records", page_number);
                            FetchStatus::NoMoreRecords
                        }
                        ExtractOutcome::UnexpectedLayout(reason) => {
                            warn!("⚠️ [FETCH] Page {} has an unexpected layout: {}", page_number, reason);
                            FetchStatus::Anomalous(reason)
                        }
                    };
                    return PageFetchResult { page_number, status };
                }
                Err(e) => {
                    warn!("⚠️ [FETCH] Page {} attempt {} failed: {}", page_number, attempt, e);
                    last_error = e;
                }
            }

            if attempt < retry_limit {
                let delay = backoff_delay(self.config.backoff_base, attempt);
                info!("[FETCH] Retrying page {} in {:?}", page_number, delay);
                sleep(delay).await;
            }
        }

        error!("❌ [FETCH] Page {} failed after {} attempts", page_number, retry_limit);
        PageFetchResult {
            page_number,
            status: FetchStatus::PermanentFailure(PermanentFetchError {
                page_number,
                attempts: retry_limit,
                last: last_error,
            }),
        }
    }

    /// Landing page first, then the listing page, then the loaded markup.
    async fn load<S>(&self, session: &mut S, url: &str) -> Result<String, FetchError>
    where
        S: PageSession + ?Sized,
    {
        self.navigate(session, &self.config.landing_url).await?;
        self.navigate(session, url).await?;
        let markup = session.content().await?;
        if markup.trim().is_empty() {
            return Err(FetchError::EmptyBody);
        }
        Ok(markup)
    }

    async fn navigate<S>(&self, session: &mut S, url: &str) -> Result<(), FetchError>
    where
        S: PageSession + ?Sized,
    {
        match timeout(self.config.page_timeout, session.goto(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
                timeout: self.config.page_timeout,
            }),
        }
    }
}

/// `base`, `2 * base`, `4 * base`, ... for attempts 1, 2, 3, ...
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
}
