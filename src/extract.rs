use log::{debug, warn};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::tender::{TenderRecord, UNKNOWN};

/// Phrases the portal shows instead of the listing table once the result set is exhausted.
const EMPTY_RESULT_PHRASES: &[&str] = &["no records found", "no tenders available"];
const MIN_COLUMNS: usize = 6;

/// A listing row turned into a record, together with the row's serial-number text.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRow {
    pub serial_no: String,
    pub record: TenderRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractOutcome {
    /// At least one row was extracted.
    Records(Vec<ExtractedRow>),
    /// The portal explicitly reported an empty result set.
    NoRecords,
    /// Neither listing rows nor an empty-result phrase were found.
    UnexpectedLayout(String),
}

/// Joins extracted rows into the tagged page text that gets persisted and merged.
pub fn render_page(rows: &[ExtractedRow]) -> String {
    rows.iter()
        .map(|row| row.record.to_tagged_block(&row.serial_no))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Turns one listing page into tender records. Built once and shared by all fetch slots.
pub struct Extractor {
    table: Selector,
    rows: Selector,
    cells: Selector,
    anchor: Selector,
    bracket: Regex,
    strict_id: Regex,
    corpus_markup: Regex,
    link_base: Option<Url>,
}

impl Extractor {
    /// `link_base` resolves relative hrefs found in title cells.
    pub fn new(link_base: &str) -> Self {
        let link_base = match Url::parse(link_base) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("⚠️ [EXTRACT] Invalid link base '{}': {}. Links stay relative.", link_base, e);
                None
            }
        };
        Self {
            table: Selector::parse("table#table").unwrap(),
            rows: Selector::parse(r#"tr[id*="informal"]"#).unwrap(),
            cells: Selector::parse("td").unwrap(),
            anchor: Selector::parse("a").unwrap(),
            bracket: Regex::new(r"\[(.*?)\]").unwrap(),
            strict_id: Regex::new(r"^20\d{2}_\w+_\d+_\d+$").unwrap(),
            corpus_markup: Regex::new(
                r"(?i)</?\s*(?:date|title|id|link|department)\s*>|-{3}\s*tender\s+(?:start|end)\s*-{3}",
            )
            .unwrap(),
            link_base,
        }
    }

    pub fn extract(&self, markup: &str) -> ExtractOutcome {
        let doc = Html::parse_document(markup);

        let table = match doc.select(&self.table).next() {
            Some(table) => table,
            None => {
                return if has_empty_phrase(&doc) {
                    ExtractOutcome::NoRecords
                } else {
                    ExtractOutcome::UnexpectedLayout("listing table not found".to_string())
                };
            }
        };

        let rows: Vec<ElementRef> = table.select(&self.rows).collect();
        debug!("[EXTRACT] Found {} listing rows", rows.len());
        if rows.is_empty() {
            return if has_empty_phrase(&doc) {
                ExtractOutcome::NoRecords
            } else {
                ExtractOutcome::UnexpectedLayout("listing table has no tender rows".to_string())
            };
        }

        let extracted: Vec<ExtractedRow> = rows
            .into_iter()
            .filter_map(|row| self.extract_row(row))
            .collect();

        if extracted.is_empty() {
            ExtractOutcome::UnexpectedLayout("no row had enough columns".to_string())
        } else {
            ExtractOutcome::Records(extracted)
        }
    }

    fn extract_row(&self, row: ElementRef) -> Option<ExtractedRow> {
        let cols: Vec<ElementRef> = row.select(&self.cells).collect();
        if cols.len() < MIN_COLUMNS {
            debug!("[EXTRACT] Skipping row with {} columns", cols.len());
            return None;
        }

        let title_cell = cols[4];
        let cell_text = cell_lines(title_cell);
        let brackets: Vec<&str> = self
            .bracket
            .captures_iter(&cell_text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
            .collect();

        let tender_id = brackets.iter().copied().find(|b| self.strict_id.is_match(b));
        let id_bracket = tender_id.map(|id| format!("[{}]", id));
        let is_id = |text: &str| {
            tender_id.map_or(false, |id| text == id) || id_bracket.as_deref() == Some(text)
        };

        let anchor = title_cell.select(&self.anchor).next();
        let title = anchor
            .map(text_of)
            .filter(|text| !text.is_empty() && !is_id(text.as_str()))
            .or_else(|| {
                brackets
                    .iter()
                    .copied()
                    .find(|b| !b.is_empty() && !is_id(*b))
                    .map(str::to_string)
            })
            .or_else(|| {
                cell_text
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty() && !is_id(*line))
                    .map(str::to_string)
            });

        let link = anchor
            .and_then(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty() && *href != "#")
            .map(|href| self.resolve_link(href));

        let record = TenderRecord {
            start_date: self.field(text_of(cols[1])),
            end_date: self.field(text_of(cols[2])),
            opening_date: self.field(text_of(cols[3])),
            title: self.field(title.unwrap_or_default()),
            tender_id: tender_id.map_or_else(|| UNKNOWN.to_string(), str::to_string),
            department: self.field(text_of(cols[5])),
            link: self.field(link.unwrap_or_default()),
            ..TenderRecord::default()
        };

        Some(ExtractedRow {
            serial_no: self.field(text_of(cols[0])),
            record,
        })
    }

    /// Drops corpus tags and block markers from cell text so a value can never close its own
    /// tag or block when the corpus is re-read.
    fn field(&self, text: String) -> String {
        let text = if self.corpus_markup.is_match(&text) {
            let stripped = self.corpus_markup.replace_all(&text, " ");
            stripped.split_whitespace().collect::<Vec<_>>().join(" ")
        } else {
            text
        };
        or_unknown(text)
    }

    fn resolve_link(&self, href: &str) -> String {
        match &self.link_base {
            Some(base) => match base.join(href) {
                Ok(url) => url.to_string(),
                Err(_) => href.to_string(),
            },
            None => href.to_string(),
        }
    }
}

fn has_empty_phrase(doc: &Html) -> bool {
    let text = doc.root_element().text().collect::<Vec<_>>().join(" ").to_lowercase();
    EMPTY_RESULT_PHRASES.iter().any(|phrase| text.contains(phrase))
}

/// Trimmed text nodes joined by single spaces.
fn text_of(element: ElementRef) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trimmed text nodes, one per line.
fn cell_lines(element: ElementRef) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn or_unknown(text: String) -> String {
    if text.is_empty() { UNKNOWN.to_string() } else { text }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn listing_row(serial: &str, title_cell: &str, department: &str) -> String {
        format!(
            r#"<tr class="even" id="informal_{serial}">
                <td>{serial}.</td>
                <td>10-Apr-2025 10:00 AM</td>
                <td>25-Apr-2025 03:00 PM</td>
                <td>26-Apr-2025 03:30 PM</td>
                <td>{title_cell}</td>
                <td>{department}</td>
            </tr>"#
        )
    }

    pub(crate) fn listing_page(rows: &[String]) -> String {
        format!(
            r#"<html><body><table id="table" class="list_table">
                <tr class="list_header"><td>S.No</td><td>e-Published Date</td></tr>
                {}
            </table></body></html>"#,
            rows.join("\n")
        )
    }

    fn extractor() -> Extractor {
        Extractor::new("https://portal.test/eprocure/app")
    }

    fn only_record(outcome: ExtractOutcome) -> TenderRecord {
        match outcome {
            ExtractOutcome::Records(rows) => {
                assert_eq!(rows.len(), 1);
                rows.into_iter().next().unwrap().record
            }
            other => panic!("expected records, got {:?}", other),
        }
    }

    #[test]
    fn extracts_title_id_link_and_dates() {
        let row = listing_row(
            "1",
            r#"<a href="?page=Detail&amp;id=42">Supply of road rollers</a> [Ref/2025/17] [2025_PWD_12345_1]"#,
            "Public Works Department||Kerala",
        );
        let record = only_record(extractor().extract(&listing_page(&[row])));

        assert_eq!(record.title, "Supply of road rollers");
        assert_eq!(record.tender_id, "2025_PWD_12345_1");
        assert_eq!(record.start_date, "10-Apr-2025 10:00 AM");
        assert_eq!(record.end_date, "25-Apr-2025 03:00 PM");
        assert_eq!(record.opening_date, "26-Apr-2025 03:30 PM");
        assert_eq!(record.department, "Public Works Department||Kerala");
        assert_eq!(record.link, "https://portal.test/eprocure/app?page=Detail&id=42");
        assert_eq!(record.state, UNKNOWN);
    }

    #[test]
    fn id_is_unknown_when_no_bracket_matches_strict_pattern() {
        let row = listing_row("1", "[Repair of culverts] [PWD/2025/77] [2025_PWD]", "Roads Wing");
        let record = only_record(extractor().extract(&listing_page(&[row])));

        assert_eq!(record.tender_id, UNKNOWN);
        assert_eq!(record.title, "Repair of culverts");
        assert_eq!(record.link, UNKNOWN);
    }

    #[test]
    fn link_text_equal_to_id_bracket_falls_back_to_other_bracket() {
        let row = listing_row(
            "3",
            r#"<a href="/detail/3">[2024_NHAI_998_2]</a><br/>[Widening of NH-66]"#,
            "NHAI",
        );
        let record = only_record(extractor().extract(&listing_page(&[row])));

        assert_eq!(record.tender_id, "2024_NHAI_998_2");
        assert_eq!(record.title, "Widening of NH-66");
        assert_eq!(record.link, "https://portal.test/detail/3");
    }

    #[test]
    fn title_falls_back_to_first_line_that_is_not_the_id() {
        let row = listing_row("4", "[2025_RLY_1_1]<br/>Track renewal works", "Railways");
        let record = only_record(extractor().extract(&listing_page(&[row])));

        assert_eq!(record.tender_id, "2025_RLY_1_1");
        assert_eq!(record.title, "Track renewal works");
    }

    #[test]
    fn short_rows_are_skipped_without_failing_the_page() {
        let short = r#"<tr id="informal_9"><td>9.</td><td>only two</td></tr>"#.to_string();
        let good = listing_row("1", "<a>Bridge painting</a>", "Works");
        match extractor().extract(&listing_page(&[short, good])) {
            ExtractOutcome::Records(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].serial_no, "1.");
            }
            other => panic!("expected records, got {:?}", other),
        }
    }

    #[test]
    fn distinguishes_empty_result_from_unexpected_layout() {
        let empty = "<html><body><p>No Records Found</p></body></html>";
        assert_eq!(extractor().extract(empty), ExtractOutcome::NoRecords);

        let odd = "<html><body><div>Service temporarily unavailable</div></body></html>";
        assert!(matches!(
            extractor().extract(odd),
            ExtractOutcome::UnexpectedLayout(_)
        ));

        let table_only = r#"<html><body><table id="table"><tr><td>x</td></tr></table>
            <span>No Tenders Available</span></body></html>"#;
        assert_eq!(extractor().extract(table_only), ExtractOutcome::NoRecords);
    }

    #[test]
    fn cell_text_cannot_break_out_of_its_tag_or_block() {
        let row = listing_row(
            "5",
            "<a>Pipes &lt;/Title&gt; and valves</a>",
            "Water Board --- TENDER END --- Kerala",
        );
        let record = only_record(extractor().extract(&listing_page(&[row])));
        assert_eq!(record.title, "Pipes and valves");
        assert_eq!(record.department, "Water Board Kerala");

        let text = record.to_tagged_block("5.");
        let reparsed = crate::corpus::CorpusParser::new().parse(&text);
        assert_eq!(reparsed.len(), 1);
        assert_eq!(reparsed[0].title, "Pipes and valves");
        assert_eq!(reparsed[0].department, "Water Board Kerala");
        assert_eq!(reparsed[0].state, "Kerala");
    }

    #[test]
    fn rendered_page_round_trips_through_block_markers() {
        let rows = vec![
            listing_row("1", "<a>First</a>", "Dept A"),
            listing_row("2", "<a>Second</a>", "Dept B"),
        ];
        let outcome = extractor().extract(&listing_page(&rows));
        let ExtractOutcome::Records(extracted) = outcome else {
            panic!("expected records");
        };
        let text = render_page(&extracted);
        assert_eq!(text.matches(crate::tender::BLOCK_START).count(), 2);
        assert!(text.contains("<Title>Second</Title>"));
    }
}
