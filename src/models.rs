//! Core data models used throughout Farsight.
//!
//! These types cover the three flows of the system: filings and their
//! parsed content, XBRL fact definitions and observed values, and the
//! intermediate products of answering a question.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Periodic report form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilingType {
    #[serde(rename = "10-K")]
    TenK,
    #[serde(rename = "10-Q")]
    TenQ,
}

impl FilingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilingType::TenK => "10-K",
            FilingType::TenQ => "10-Q",
        }
    }
}

impl fmt::Display for FilingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "10-K" => Ok(FilingType::TenK),
            "10-Q" => Ok(FilingType::TenQ),
            other => Err(format!(
                "Invalid filing type '{}'. Must be 10-K or 10-Q",
                other
            )),
        }
    }
}

/// Deterministic document id for a filing.
///
/// A missing quarter is written as `4` so that an annual report and the
/// fiscal-year facts reported in it resolve to the same id. Dashes are
/// dropped from the form name.
///
/// ```rust
/// use farsight::models::generate_document_id;
///
/// assert_eq!(generate_document_id("AAPL", 2023, Some(2), "10-Q"), "AAPL_2023_2_10Q");
/// assert_eq!(generate_document_id("AAPL", 2023, None, "10-K"), "AAPL_2023_4_10K");
/// ```
pub fn generate_document_id(
    ticker: &str,
    year: i32,
    quarter: Option<u32>,
    filing_type: &str,
) -> String {
    format!(
        "{}_{}_{}_{}",
        ticker,
        year,
        quarter.unwrap_or(4),
        filing_type.replace('-', "")
    )
}

/// Calendar quarter (1-4) of a month (1-12).
pub fn quarter_of_month(month: u32) -> u32 {
    (month.saturating_sub(1)) / 3 + 1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub ticker: String,
    pub name: Option<String>,
}

/// Identity and filing date of one stored filing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: String,
    pub ticker: String,
    pub year: i32,
    pub quarter: Option<u32>,
    pub filing_type: FilingType,
    pub filing_date: Option<NaiveDate>,
}

impl DocumentMetadata {
    pub fn new(
        ticker: &str,
        year: i32,
        quarter: Option<u32>,
        filing_type: FilingType,
        filing_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            document_id: generate_document_id(ticker, year, quarter, filing_type.as_str()),
            ticker: ticker.to_string(),
            year,
            quarter,
            filing_type,
            filing_date,
        }
    }
}

/// Fields read from the SGML header of a full-submission filing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilingHeader {
    pub company_name: Option<String>,
    pub cik: Option<String>,
    pub sic: Option<String>,
    pub fiscal_year_end: Option<String>,
    pub filed_as_of: Option<NaiveDate>,
    pub period_of_report: Option<NaiveDate>,
}

impl FilingHeader {
    /// Filing date, falling back to the period of report.
    pub fn filing_date(&self) -> Option<NaiveDate> {
        self.filed_as_of.or(self.period_of_report)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub section: Option<String>,
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub chunk_id: String,
    pub document_id: String,
    pub table_html: String,
    /// Header rows first, then body rows, with spans already expanded.
    pub table_data: Vec<Vec<String>>,
    pub caption: Option<String>,
    pub section: String,
    pub page_number: Option<u32>,
}

/// Output of the segmenter for one filing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub document_id: String,
    pub metadata: DocumentMetadata,
    pub header: FilingHeader,
    pub text_chunks: Vec<TextChunk>,
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Table,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Table => "table",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ContentType::Text),
            "table" => Some(ContentType::Table),
            _ => None,
        }
    }
}

/// The unit that is embedded and searched: a text chunk or a table
/// flattened to `(content, content_type, location)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub content_type: ContentType,
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactType {
    Monetary,
    Shares,
    Other,
}

impl FactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::Monetary => "monetary",
            FactType::Shares => "shares",
            FactType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "monetary" => FactType::Monetary,
            "shares" => FactType::Shares,
            _ => FactType::Other,
        }
    }
}

/// A financial metric definition such as `us-gaap:Revenues`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub fact_id: String,
    pub label: String,
    pub description: String,
    pub taxonomy: String,
    pub fact_type: FactType,
    pub period_type: Option<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Fact {
    /// Text the embedding is computed from.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.label, self.description)
    }
}

/// One reported observation of a [`Fact`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactValue {
    pub fact_id: String,
    pub ticker: String,
    pub value: f64,
    pub document_id: String,
    pub filing_type: String,
    pub accession_number: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub fiscal_year: Option<i32>,
    pub fiscal_period: Option<String>,
    pub unit: String,
    pub decimals: Option<i32>,
    pub form: String,
}

/// Structured intent extracted from a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub query: String,
    pub companies: Vec<String>,
    pub years: Vec<i32>,
    pub quarters: Vec<u32>,
    pub topics: Vec<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl QueryAnalysis {
    pub fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            companies: Vec::new(),
            years: Vec::new(),
            quarters: Vec::new(),
            topics: Vec::new(),
            embedding: None,
        }
    }
}

/// A stored document chosen for a query, with its selection score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentReference {
    pub document_id: String,
    pub ticker: String,
    pub year: i32,
    pub quarter: Option<u32>,
    pub filing_type: FilingType,
    pub relevance_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevantChunk {
    pub chunk: DocumentChunk,
    pub relevance_score: f32,
}

/// A fact value paired with the description of its fact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactMatch {
    pub value: FactValue,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub filing_type: String,
    pub company: String,
    pub year: i32,
    pub quarter: Option<u32>,
    pub location: String,
    pub content: String,
    pub content_type: String,
    pub fact_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedResponse {
    pub response: String,
    pub citations: Vec<Citation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_is_deterministic() {
        let a = generate_document_id("AAPL", 2023, Some(2), "10-Q");
        let b = generate_document_id("AAPL", 2023, Some(2), "10-Q");
        assert_eq!(a, b);
        assert_eq!(a, "AAPL_2023_2_10Q");
    }

    #[test]
    fn test_document_id_changes_with_each_field() {
        let base = generate_document_id("AAPL", 2023, Some(2), "10-Q");
        assert_ne!(base, generate_document_id("MSFT", 2023, Some(2), "10-Q"));
        assert_ne!(base, generate_document_id("AAPL", 2022, Some(2), "10-Q"));
        assert_ne!(base, generate_document_id("AAPL", 2023, Some(3), "10-Q"));
        assert_ne!(base, generate_document_id("AAPL", 2023, Some(2), "10-K"));
    }

    #[test]
    fn test_missing_quarter_is_four() {
        assert_eq!(
            generate_document_id("TEST", 2023, None, "10-K"),
            generate_document_id("TEST", 2023, Some(4), "10-K")
        );
    }

    #[test]
    fn test_quarter_of_month() {
        assert_eq!(quarter_of_month(1), 1);
        assert_eq!(quarter_of_month(3), 1);
        assert_eq!(quarter_of_month(5), 2);
        assert_eq!(quarter_of_month(9), 3);
        assert_eq!(quarter_of_month(12), 4);
    }

    #[test]
    fn test_filing_type_parse() {
        assert_eq!("10-K".parse::<FilingType>().unwrap(), FilingType::TenK);
        assert_eq!("10-Q".parse::<FilingType>().unwrap(), FilingType::TenQ);
        assert!("8-K".parse::<FilingType>().is_err());
        assert_eq!(
            serde_json::to_string(&FilingType::TenQ).unwrap(),
            "\"10-Q\""
        );
    }

    #[test]
    fn test_header_filing_date_fallback() {
        let period = NaiveDate::from_ymd_opt(2023, 9, 30).unwrap();
        let header = FilingHeader {
            period_of_report: Some(period),
            ..Default::default()
        };
        assert_eq!(header.filing_date(), Some(period));
    }
}
