use log::{info, warn};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_LISTING_URL: &str = "https://eprocure.gov.in/eprocure/app?component=%24TablePages.linkPage&page=FrontEndAdvancedSearchResult&service=direct&session=T&sp=AFrontEndAdvancedSearchResult%2Ctable&sp={page}";
const DEFAULT_LANDING_URL: &str = "https://eprocure.gov.in/eprocure/app";

pub const RAW_PAGES_DIR: &str = "RawPages";
pub const STALE_PAGES_DIR: &str = "StalePages";
pub const FILTERED_DIR: &str = "Filtered Tenders";
pub const CORPUS_PREFIX: &str = "Final_Tender_List_";

/// Which tender date the date-range filter compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Published,
    Closing,
}

impl FromStr for DateField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "published" | "publish" | "start" => Ok(DateField::Published),
            "closing" | "close" | "end" => Ok(DateField::Closing),
            other => Err(format!("unknown date field '{}'", other)),
        }
    }
}

/// Run-wide settings. Built once at startup and shared read-only as `Arc<ScrapeConfig>`.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    /// Listing URL with a `{page}` placeholder.
    pub listing_url: String,
    /// Visited before every listing page so the portal hands out a fresh session.
    pub landing_url: String,
    pub max_pages: u32,
    pub retry_limit: u32,
    pub concurrency: usize,
    pub page_timeout: Duration,
    pub backoff_base: Duration,
    /// Minimum combined length of scraped field values; a page below it ends the run.
    pub min_content_len: usize,
    pub data_dir: PathBuf,
    pub date_formats: Vec<String>,
    pub date_field: DateField,
    pub host: String,
    pub port: u16,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            listing_url: DEFAULT_LISTING_URL.to_string(),
            landing_url: DEFAULT_LANDING_URL.to_string(),
            max_pages: 150,
            retry_limit: 3,
            concurrency: 10,
            page_timeout: Duration::from_millis(20_000),
            backoff_base: Duration::from_millis(2_000),
            min_content_len: 50,
            data_dir: PathBuf::from("scraped_data"),
            date_formats: vec!["%d-%b-%Y".to_string(), "%d-%m-%Y".to_string()],
            date_field: DateField::Published,
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ScrapeConfig {
    /// Loads settings from the environment (and `.env` when present), falling back to defaults.
    pub fn from_env() -> Self {
        if dotenv::dotenv().is_ok() {
            info!("[CONFIG] Loaded .env file");
        }
        let defaults = Self::default();

        let date_formats = match env::var("TENDER_DATE_FORMATS") {
            Ok(raw) => {
                let formats: Vec<String> = raw
                    .split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect();
                if formats.is_empty() { defaults.date_formats.clone() } else { formats }
            }
            Err(_) => defaults.date_formats.clone(),
        };

        let config = Self {
            listing_url: env::var("TENDER_LISTING_URL").unwrap_or(defaults.listing_url),
            landing_url: env::var("TENDER_LANDING_URL").unwrap_or(defaults.landing_url),
            max_pages: env_or("TENDER_MAX_PAGES", defaults.max_pages),
            retry_limit: env_or("TENDER_RETRY_LIMIT", defaults.retry_limit).max(1),
            concurrency: env_or("TENDER_CONCURRENCY", defaults.concurrency).max(1),
            page_timeout: Duration::from_millis(env_or(
                "TENDER_PAGE_TIMEOUT_MS",
                defaults.page_timeout.as_millis() as u64,
            )),
            backoff_base: Duration::from_millis(env_or(
                "TENDER_BACKOFF_BASE_MS",
                defaults.backoff_base.as_millis() as u64,
            )),
            min_content_len: env_or("TENDER_MIN_CONTENT_LEN", defaults.min_content_len),
            data_dir: env::var("TENDER_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            date_formats,
            date_field: env_or("TENDER_DATE_FIELD", defaults.date_field),
            host: env::var("TENDER_HOST").unwrap_or(defaults.host),
            port: env_or("TENDER_PORT", defaults.port),
        };

        info!(
            "[CONFIG] max_pages={} concurrency={} retry_limit={} timeout={:?} data_dir={}",
            config.max_pages,
            config.concurrency,
            config.retry_limit,
            config.page_timeout,
            config.data_dir.display()
        );
        config
    }

    pub fn page_url(&self, page_number: u32) -> String {
        self.listing_url.replace("{page}", &page_number.to_string())
    }

    pub fn raw_pages_dir(&self) -> PathBuf {
        self.data_dir.join(RAW_PAGES_DIR)
    }

    /// Where page files left over from an interrupted run are moved before a new run starts.
    pub fn stale_pages_dir(&self) -> PathBuf {
        self.data_dir.join(STALE_PAGES_DIR)
    }

    pub fn filtered_dir(&self) -> PathBuf {
        self.data_dir.join(FILTERED_DIR)
    }

    /// Corpus path for the given calendar day, e.g. `Final_Tender_List_2025-04-10.txt`.
    pub fn corpus_path(&self, day: chrono::NaiveDate) -> PathBuf {
        self.data_dir
            .join(format!("{}{}.txt", CORPUS_PREFIX, day.format("%Y-%m-%d")))
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                warn!("⚠️ [CONFIG] Ignoring {}='{}': {}", key, raw, e);
                default
            }
        },
        Err(_) => default,
    }
}
