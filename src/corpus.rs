use anyhow::{Context, Result};
use log::{debug, info};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CORPUS_PREFIX;
use crate::tender::{StateGazetteer, TenderRecord, BLOCK_END, BLOCK_START, UNKNOWN};

/// Inner text of every delimited block, markers removed and trimmed. Text outside any
/// block is ignored.
pub fn split_blocks(text: &str) -> Vec<&str> {
    text.split(BLOCK_START)
        .skip(1)
        .map(|piece| match piece.find(BLOCK_END) {
            Some(end) => &piece[..end],
            None => piece,
        })
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .collect()
}

/// Re-reads tagged corpus text into records. Tags are matched case-insensitively and may
/// span lines; absent tags leave the field as [`UNKNOWN`].
pub struct CorpusParser {
    date: Regex,
    title: Regex,
    id: Regex,
    link: Regex,
    department: Regex,
    gazetteer: StateGazetteer,
}

impl CorpusParser {
    pub fn new() -> Self {
        Self {
            date: tag_regex("Date"),
            title: tag_regex("Title"),
            id: tag_regex("ID"),
            link: tag_regex("Link"),
            department: tag_regex("Department"),
            gazetteer: StateGazetteer::new(),
        }
    }

    pub fn parse(&self, text: &str) -> Vec<TenderRecord> {
        let records: Vec<TenderRecord> = split_blocks(text)
            .into_iter()
            .map(|block| self.parse_block(block))
            .collect();
        debug!("[CORPUS] Parsed {} blocks", records.len());
        records
    }

    pub fn parse_block(&self, block: &str) -> TenderRecord {
        let mut dates = self
            .date
            .captures_iter(block)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string());
        let mut record = TenderRecord::default();

        if let Some(date) = dates.next() {
            record.start_date = non_empty(date);
        }
        if let Some(date) = dates.next() {
            record.end_date = non_empty(date);
        }
        if let Some(date) = dates.next() {
            record.opening_date = non_empty(date);
        }
        record.title = first_tag(&self.title, block);
        record.tender_id = first_tag(&self.id, block);
        record.link = first_tag(&self.link, block);
        record.department = first_tag(&self.department, block);
        if let Some(state) = self.gazetteer.infer(&record.department) {
            record.state = state.to_string();
        }
        record
    }

    pub fn parse_file(&self, path: &Path) -> Result<Vec<TenderRecord>> {
        let bytes = fs::read(path).with_context(|| format!("reading corpus {}", path.display()))?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(self.parse(&text))
    }
}

impl Default for CorpusParser {
    fn default() -> Self {
        Self::new()
    }
}

fn tag_regex(tag: &str) -> Regex {
    Regex::new(&format!(r"(?is)<{0}>\s*(.*?)\s*</{0}>", tag)).unwrap()
}

fn first_tag(re: &Regex, block: &str) -> String {
    re.captures(block)
        .and_then(|caps| caps.get(1))
        .map(|m| non_empty(m.as_str().trim().to_string()))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn non_empty(value: String) -> String {
    if value.is_empty() { UNKNOWN.to_string() } else { value }
}

/// Newest `Final_Tender_List_<date>.txt` in `data_dir`, by its dated filename.
pub fn latest_corpus(data_dir: &Path) -> Result<Option<PathBuf>> {
    if !data_dir.is_dir() {
        return Ok(None);
    }
    let mut corpora: Vec<PathBuf> = fs::read_dir(data_dir)
        .with_context(|| format!("listing {}", data_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with(CORPUS_PREFIX) && n.ends_with(".txt"))
        })
        .collect();
    corpora.sort();
    let latest = corpora.pop();
    if let Some(path) = &latest {
        info!("[CORPUS] Using latest corpus {}", path.display());
    }
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CORPUS: &str = "\
--- TENDER START ---
1.
<Date>04-Apr-2025 10:00 AM</Date>
<Date>20-Apr-2025 05:00 PM</Date>
<Date>21-Apr-2025 11:00 AM</Date>
<Title>Resurfacing of
  district roads</Title>
<ID>2025_PWD_11_1</ID>
<Link>https://portal.test/detail/1</Link>
<Department>Public Works Department|Government of Kerala</Department>
--- TENDER END ---

--- TENDER START ---
2.
<date>05-Apr-2025</date>
<TITLE>Hospital linen</TITLE>
--- TENDER END ---
";

    #[test]
    fn splits_blocks_on_markers() {
        let blocks = split_blocks(CORPUS);
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].starts_with("1."));
        assert!(!blocks[1].contains(BLOCK_END));
        assert!(split_blocks("no markers here").is_empty());
    }

    #[test]
    fn parses_multiline_tags_and_derives_state() {
        let records = CorpusParser::new().parse(CORPUS);
        let first = &records[0];

        assert_eq!(first.start_date, "04-Apr-2025 10:00 AM");
        assert_eq!(first.end_date, "20-Apr-2025 05:00 PM");
        assert_eq!(first.opening_date, "21-Apr-2025 11:00 AM");
        assert_eq!(first.title, "Resurfacing of\n  district roads");
        assert_eq!(first.tender_id, "2025_PWD_11_1");
        assert_eq!(first.link, "https://portal.test/detail/1");
        assert_eq!(first.state, "Kerala");
    }

    #[test]
    fn missing_tags_become_unknown() {
        let records = CorpusParser::new().parse(CORPUS);
        let second = &records[1];

        assert_eq!(second.start_date, "05-Apr-2025");
        assert_eq!(second.title, "Hospital linen");
        assert_eq!(second.end_date, UNKNOWN);
        assert_eq!(second.tender_id, UNKNOWN);
        assert_eq!(second.department, UNKNOWN);
        assert_eq!(second.state, UNKNOWN);
        assert_eq!(second.link, UNKNOWN);
    }

    #[test]
    fn latest_corpus_picks_newest_dated_file() {
        let dir = TempDir::new().unwrap();
        for name in [
            "Final_Tender_List_2025-04-09.txt",
            "Final_Tender_List_2025-04-11.txt",
            "Final_Tender_List_2025-04-10.txt",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), "x").unwrap();
        }

        let latest = latest_corpus(dir.path()).unwrap().unwrap();

        assert_eq!(latest.file_name().unwrap(), "Final_Tender_List_2025-04-11.txt");
        assert!(latest_corpus(&dir.path().join("missing")).unwrap().is_none());
    }
}
