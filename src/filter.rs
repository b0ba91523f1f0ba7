use anyhow::Result;
use chrono::NaiveDate;
use log::{debug, info, warn};
use regex::{Regex, RegexBuilder};
use std::path::Path;

use crate::config::{DateField, ScrapeConfig};
use crate::corpus::CorpusParser;
use crate::tender::{TenderRecord, UNKNOWN};

const BOUND_FORMAT: &str = "%Y-%m-%d";

/// Operator input for one filter run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterCriteria {
    pub keywords: Vec<String>,
    pub use_regex: bool,
    pub state: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl FilterCriteria {
    /// Builds criteria from raw form-style input. Blank values mean "no constraint"; a date
    /// bound that is not `YYYY-MM-DD` is ignored with a warning.
    pub fn from_inputs(
        keywords: Vec<String>,
        use_regex: bool,
        state: Option<&str>,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            use_regex,
            state: state.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string),
            start_date: parse_bound("start", start_date),
            end_date: parse_bound("end", end_date),
        }
    }

    /// Splits a comma-separated keyword string, dropping blanks.
    pub fn parse_keyword_list(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn parse_bound(which: &str, raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match NaiveDate::parse_from_str(raw, BOUND_FORMAT) {
        Ok(date) => Some(date),
        Err(e) => {
            warn!("⚠️ [FILTER] Ignoring {} date '{}': {}", which, raw, e);
            None
        }
    }
}

/// Keyword predicate compiled once per run.
enum KeywordMatcher {
    Any,
    Literal(Vec<String>),
    /// Patterns in input order; a malformed one fails any record that reaches it.
    Patterns(Vec<Result<Regex, String>>),
}

impl KeywordMatcher {
    fn compile(criteria: &FilterCriteria) -> Self {
        if criteria.keywords.is_empty() {
            return KeywordMatcher::Any;
        }
        if !criteria.use_regex {
            return KeywordMatcher::Literal(
                criteria.keywords.iter().map(|k| k.to_lowercase()).collect(),
            );
        }
        let patterns = criteria
            .keywords
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        warn!("⚠️ [FILTER] Invalid regex '{}': {}", pattern, e);
                        pattern.clone()
                    })
            })
            .collect();
        KeywordMatcher::Patterns(patterns)
    }

    fn matches(&self, text: &str) -> bool {
        match self {
            KeywordMatcher::Any => true,
            KeywordMatcher::Literal(keywords) => {
                let text = text.to_lowercase();
                keywords.iter().any(|k| text.contains(k.as_str()))
            }
            KeywordMatcher::Patterns(patterns) => {
                for pattern in patterns {
                    match pattern {
                        Ok(re) if re.is_match(text) => return true,
                        Ok(_) => {}
                        Err(bad) => {
                            debug!("[FILTER] Record rejected by malformed pattern '{}'", bad);
                            return false;
                        }
                    }
                }
                false
            }
        }
    }
}

/// Slices a corpus by keyword/regex, state and date range. Stateless between runs.
pub struct FilterEngine {
    parser: CorpusParser,
    date_formats: Vec<String>,
    date_field: DateField,
}

impl FilterEngine {
    pub fn new(config: &ScrapeConfig) -> Self {
        Self {
            parser: CorpusParser::new(),
            date_formats: config.date_formats.clone(),
            date_field: config.date_field,
        }
    }

    /// Records of `corpus` that satisfy every criterion, in corpus order.
    pub fn run(&self, corpus: &str, criteria: &FilterCriteria) -> Vec<TenderRecord> {
        let records = self.parser.parse(corpus);
        self.apply(records, criteria)
    }

    pub fn run_file(&self, path: &Path, criteria: &FilterCriteria) -> Result<Vec<TenderRecord>> {
        let records = self.parser.parse_file(path)?;
        if records.is_empty() {
            warn!("⚠️ [FILTER] No tender blocks found in {}", path.display());
        }
        Ok(self.apply(records, criteria))
    }

    fn apply(&self, records: Vec<TenderRecord>, criteria: &FilterCriteria) -> Vec<TenderRecord> {
        let matcher = KeywordMatcher::compile(criteria);
        let processed = records.len();
        let matched: Vec<TenderRecord> = records
            .into_iter()
            .filter(|record| self.matches(record, criteria, &matcher))
            .collect();
        info!("[FILTER] Processed {} tenders, {} matched", processed, matched.len());
        matched
    }

    fn matches(&self, record: &TenderRecord, criteria: &FilterCriteria, matcher: &KeywordMatcher) -> bool {
        if let Some(state) = &criteria.state {
            if !record.state.to_lowercase().contains(&state.to_lowercase()) {
                return false;
            }
        }

        if criteria.start_date.is_some() || criteria.end_date.is_some() {
            // Unparseable dates never exclude a record.
            if let Some(date) = self.record_date(record) {
                if criteria.start_date.map_or(false, |start| date < start) {
                    return false;
                }
                if criteria.end_date.map_or(false, |end| date > end) {
                    return false;
                }
            }
        }

        matcher.matches(&record.search_text())
    }

    /// The configured date field parsed with the first matching format.
    fn record_date(&self, record: &TenderRecord) -> Option<NaiveDate> {
        let raw = match self.date_field {
            DateField::Published => record.start_date.as_str(),
            DateField::Closing => record.end_date.as_str(),
        };
        if raw == UNKNOWN {
            return None;
        }
        let date_part = raw.split_whitespace().next().unwrap_or(raw);
        let parsed = self.date_formats.iter().find_map(|format| {
            NaiveDate::parse_from_str(date_part, format)
                .or_else(|_| NaiveDate::parse_from_str(raw, format))
                .ok()
        });
        if parsed.is_none() {
            debug!("[FILTER] Could not parse date '{}'; date bounds skipped", raw);
        }
        parsed
    }
}
