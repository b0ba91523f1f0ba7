use regex::Regex;
use serde::{Deserialize, Serialize};

/// Placeholder for any field the source did not provide.
pub const UNKNOWN: &str = "unknown";

pub const BLOCK_START: &str = "--- TENDER START ---";
pub const BLOCK_END: &str = "--- TENDER END ---";

/// Region names used to infer a tender's state from its department text.
pub const INDIAN_STATES: &[&str] = &[
    "Andhra Pradesh",
    "Arunachal Pradesh",
    "Assam",
    "Bihar",
    "Chhattisgarh",
    "Goa",
    "Gujarat",
    "Haryana",
    "Himachal Pradesh",
    "Jharkhand",
    "Karnataka",
    "Kerala",
    "Madhya Pradesh",
    "Maharashtra",
    "Manipur",
    "Meghalaya",
    "Mizoram",
    "Nagaland",
    "Odisha",
    "Punjab",
    "Rajasthan",
    "Sikkim",
    "Tamil Nadu",
    "Telangana",
    "Tripura",
    "Uttar Pradesh",
    "Uttarakhand",
    "West Bengal",
    "Andaman and Nicobar Islands",
    "Chandigarh",
    "Dadra and Nagar Haveli and Daman and Diu",
    "Delhi",
    "Jammu and Kashmir",
    "Ladakh",
    "Lakshadweep",
    "Puducherry",
];

/// One listing entry. Every field is always populated; missing data is [`UNKNOWN`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderRecord {
    pub start_date: String,
    pub end_date: String,
    pub opening_date: String,
    pub title: String,
    pub tender_id: String,
    pub department: String,
    pub state: String,
    pub link: String,
}

impl Default for TenderRecord {
    fn default() -> Self {
        Self {
            start_date: UNKNOWN.to_string(),
            end_date: UNKNOWN.to_string(),
            opening_date: UNKNOWN.to_string(),
            title: UNKNOWN.to_string(),
            tender_id: UNKNOWN.to_string(),
            department: UNKNOWN.to_string(),
            state: UNKNOWN.to_string(),
            link: UNKNOWN.to_string(),
        }
    }
}

impl TenderRecord {
    /// Renders the record as one delimited corpus block. Tag order is fixed so the corpus
    /// parser can re-read it: three dates, title, id, link, department.
    pub fn to_tagged_block(&self, serial_no: &str) -> String {
        format!(
            "{}\n{}\n<Date>{}</Date>\n<Date>{}</Date>\n<Date>{}</Date>\n<Title>{}</Title>\n<ID>{}</ID>\n<Link>{}</Link>\n<Department>{}</Department>\n{}",
            BLOCK_START,
            serial_no,
            self.start_date,
            self.end_date,
            self.opening_date,
            self.title,
            self.tender_id,
            self.link,
            self.department,
            BLOCK_END,
        )
    }

    /// Combined length of the scraped field values that are not [`UNKNOWN`]. `state` is derived
    /// from `department`, so it is not counted.
    pub fn known_content_len(&self) -> usize {
        [
            &self.start_date,
            &self.end_date,
            &self.opening_date,
            &self.title,
            &self.tender_id,
            &self.department,
            &self.link,
        ]
        .iter()
        .filter(|value| value.as_str() != UNKNOWN)
        .map(|value| value.trim().len())
        .sum()
    }

    /// Text the keyword predicate searches: title, id, department, state and link.
    pub fn search_text(&self) -> String {
        [
            self.title.as_str(),
            self.tender_id.as_str(),
            self.department.as_str(),
            self.state.as_str(),
            self.link.as_str(),
        ]
        .join(" ")
    }
}

/// Case-insensitive, word-bounded state lookup over [`INDIAN_STATES`]. First listed match wins.
pub struct StateGazetteer {
    patterns: Vec<(&'static str, Regex)>,
}

impl StateGazetteer {
    pub fn new() -> Self {
        let patterns = INDIAN_STATES
            .iter()
            .map(|name| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(name));
                (*name, Regex::new(&pattern).expect("escaped state name is a valid regex"))
            })
            .collect();
        Self { patterns }
    }

    pub fn infer(&self, department: &str) -> Option<&'static str> {
        if department == UNKNOWN {
            return None;
        }
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(department))
            .map(|(name, _)| *name)
    }
}

impl Default for StateGazetteer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_record_is_all_unknown() {
        let record = TenderRecord::default();
        let json = serde_json::to_value(&record).unwrap();
        let fields = json.as_object().unwrap();
        assert_eq!(fields.len(), 8);
        assert!(fields.values().all(|v| v == UNKNOWN));
    }

    #[test]
    fn gazetteer_matches_case_insensitively_on_word_boundaries() {
        let gazetteer = StateGazetteer::new();
        assert_eq!(
            gazetteer.infer("Public Works Department||GOVERNMENT OF KERALA"),
            Some("Kerala")
        );
        assert_eq!(gazetteer.infer("Govt of Tamil Nadu, Chennai"), Some("Tamil Nadu"));
        assert_eq!(gazetteer.infer("Goalpara Municipal Board"), None);
        assert_eq!(gazetteer.infer(UNKNOWN), None);
    }

    #[test]
    fn first_listed_state_wins() {
        let gazetteer = StateGazetteer::new();
        assert_eq!(
            gazetteer.infer("Bihar and Assam joint railway works"),
            Some("Assam")
        );
    }

    #[test]
    fn known_content_len_ignores_unknown_fields() {
        assert_eq!(TenderRecord::default().known_content_len(), 0);
        let record = TenderRecord {
            title: "Road repair".to_string(),
            state: "Kerala".to_string(),
            ..TenderRecord::default()
        };
        assert_eq!(record.known_content_len(), "Road repair".len());
    }

    #[test]
    fn tagged_block_keeps_fixed_tag_order() {
        let record = TenderRecord {
            title: "Road repair".to_string(),
            tender_id: "2025_PWD_1234_1".to_string(),
            ..TenderRecord::default()
        };
        let block = record.to_tagged_block("1.");
        let title_at = block.find("<Title>").unwrap();
        let id_at = block.find("<ID>").unwrap();
        let link_at = block.find("<Link>").unwrap();
        let dept_at = block.find("<Department>").unwrap();
        assert!(block.starts_with(BLOCK_START));
        assert!(block.ends_with(BLOCK_END));
        assert!(title_at < id_at && id_at < link_at && link_at < dept_at);
    }
}
