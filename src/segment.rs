//! Document Segmenter.
//!
//! Turns the raw markup of a filing into section-labelled [`TextChunk`]s
//! and structured [`Table`]s. Segmentation is pure parsing with no I/O and
//! is deterministic for identical input.
//!
//! # Text strategy
//!
//! The primary pass walks the innermost block elements (`div`, `p`,
//! `h1`..`h6`) in document order. A block whose text matches a section
//! heading pattern (`ITEM 7. ...`, `PART II`, `Risk Factors`, ...) starts a
//! new section; other blocks accumulate into the current section until
//! the buffer passes [`MAX_CHUNK_CHARS`]. Tables, scripts, styles, and
//! images never contribute text.
//!
//! When the primary pass yields nothing, three fallbacks run in order:
//!
//! 1. container elements whose `id`/`class` name a section or item
//! 2. a regex scan for `ITEM n` / `PART n` headings in the flattened text
//! 3. fixed-size windows over the flattened text
//!
//! Every emitted chunk is cleaned (reference markers and `(continued)`
//! artifacts removed, whitespace collapsed) and dropped if shorter than
//! [`MIN_CHUNK_CHARS`].

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use crate::models::{DocumentMetadata, FilingHeader, ParsedDocument, Table, TextChunk};

/// Buffered section text is flushed once it passes this many characters.
pub const MAX_CHUNK_CHARS: usize = 1500;
/// Chunks shorter than this after cleanup are discarded.
pub const MIN_CHUNK_CHARS: usize = 50;
/// Blocks longer than this are never treated as headings.
const MAX_HEADING_CHARS: usize = 120;
/// Bytes of a filing searched for header fields when there is no
/// `<SEC-HEADER>` block.
const HEADER_SCAN_BYTES: usize = 20_000;

const BLOCK_TAGS: &[&str] = &["div", "p", "h1", "h2", "h3", "h4", "h5", "h6"];
const SKIPPED_TAGS: &[&str] = &["script", "style", "meta", "link", "img", "table", "head"];
const SECTION_HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4"];

const SECTION_PATTERNS: &[&str] = &[
    r"(?i)^ITEM\s+\d+[A-Z]?\.?\s*[-\x{2013}\x{2014}]?\s*[A-Z0-9\s,\.]*",
    r"(?i)^PART\s+[IVX]+\b",
    r"(?i)^Notes?\s+to\s+Consolidated\s+Financial\s+Statements?",
    r"(?i)^Management[\x{2019}']s\s+Discussion\s+and\s+Analysis",
    r"(?i)^Risk\s+Factors?",
    r"(?i)^Business",
    r"(?i)^Financial\s+Statements?\s+and\s+Supplementary\s+Data",
];

struct Patterns {
    sections: Vec<Regex>,
    heading_scan: Regex,
    toc: Regex,
    navigation: Regex,
    reference_marker: Regex,
    continued: Regex,
    toc_marker: Regex,
    whitespace: Regex,
    table_header: Regex,
    table_title: Regex,
}

struct HeaderPatterns {
    block: Regex,
    filed_as_of: Regex,
    company_name: Regex,
    cik: Regex,
    sic: Regex,
    fiscal_year_end: Regex,
    period_of_report: Regex,
}

struct Selectors {
    row: Selector,
    caption: Selector,
    container: Selector,
}

pub struct Segmenter {
    patterns: Patterns,
    header: HeaderPatterns,
    selectors: Selectors,
}

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| anyhow!("invalid pattern {}: {}", pattern, e))
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector {}: {:?}", css, e))
}

impl Segmenter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            patterns: Patterns {
                sections: SECTION_PATTERNS
                    .iter()
                    .map(|p| regex(p))
                    .collect::<Result<_>>()?,
                heading_scan: regex(r"(?i)\b(?:ITEM\s+\d+[A-Z]?|PART\s+[IVX]+)\b\.?")?,
                toc: regex(r"(?i)table of contents|index to financial statements")?,
                navigation: regex(r"(?i)next|previous|page|top")?,
                reference_marker: regex(r"\[\s*\d+\s*\]")?,
                continued: regex(r"(?i)\(\s*continued\s*\)")?,
                toc_marker: regex(r"(?i)\(\s*table\s+of\s+contents\s*\)")?,
                whitespace: regex(r"\s+")?,
                table_header: regex(
                    r"(?i)in\s+millions|in\s+thousands|year\s+ended|three\s+months\s+ended",
                )?,
                table_title: regex(r"(?i)table\s+\d+|schedule\s+\d+")?,
            },
            header: HeaderPatterns {
                block: regex(r"(?is)<SEC-HEADER>(.*?)</SEC-HEADER>")?,
                filed_as_of: regex(r"FILED AS OF DATE:\s*(\d{8})")?,
                company_name: regex(r"(?m)COMPANY CONFORMED NAME:[ \t]*(.*?)[ \t]*$")?,
                cik: regex(r"CENTRAL INDEX KEY:\s*(\d+)")?,
                sic: regex(r"STANDARD INDUSTRIAL CLASSIFICATION:[^\[\n]*\[(\d+)\]")?,
                fiscal_year_end: regex(r"FISCAL YEAR END:\s*(\d{4})")?,
                period_of_report: regex(r"CONFORMED PERIOD OF REPORT:\s*(\d{8})")?,
            },
            selectors: Selectors {
                row: selector("tr")?,
                caption: selector("caption")?,
                container: selector(
                    r#"section, [id*="item"], [id*="Item"], [id*="ITEM"], [id*="section"], [class*="section"], [class*="item"]"#,
                )?,
            },
        })
    }

    /// Segment one filing.
    ///
    /// A missing filing date in `metadata` is filled from the SGML header.
    pub fn segment(&self, content: &str, mut metadata: DocumentMetadata) -> ParsedDocument {
        let header = self.parse_header(content);
        if metadata.filing_date.is_none() {
            metadata.filing_date = header.filing_date();
        }

        let document_id = metadata.document_id.clone();
        let html = Html::parse_document(content);
        let text_chunks = self.extract_text_chunks(&html, &document_id);
        let tables = self.extract_tables(&html, &document_id);

        info!(
            document_id = %document_id,
            text_chunks = text_chunks.len(),
            tables = tables.len(),
            "segmented filing"
        );

        ParsedDocument {
            document_id,
            metadata,
            header,
            text_chunks,
            tables,
        }
    }

    /// Read the SGML header fields of a full-submission filing.
    pub fn parse_header(&self, content: &str) -> FilingHeader {
        let p = &self.header;
        let region = match p.block.captures(content).and_then(|c| c.get(1)) {
            Some(m) => m.as_str(),
            None => prefix(content, HEADER_SCAN_BYTES),
        };

        let capture = |re: &Regex| {
            re.captures(region)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let date = |re: &Regex| {
            capture(re).and_then(|s| NaiveDate::parse_from_str(&s, "%Y%m%d").ok())
        };

        FilingHeader {
            company_name: capture(&p.company_name),
            cik: capture(&p.cik),
            sic: capture(&p.sic),
            fiscal_year_end: capture(&p.fiscal_year_end),
            filed_as_of: date(&p.filed_as_of),
            period_of_report: date(&p.period_of_report),
        }
    }

    // ============ Text ============

    fn extract_text_chunks(&self, html: &Html, document_id: &str) -> Vec<TextChunk> {
        let mut builder = ChunkBuilder::new(self, document_id);

        let mut blocks = Vec::new();
        collect_blocks(html.root_element(), &mut blocks);
        self.chunk_blocks(&blocks, &mut builder);
        if !builder.chunks.is_empty() {
            return builder.chunks;
        }

        debug!(document_id, "no block sections found; trying containers");
        self.chunk_containers(html, &mut builder);
        if !builder.chunks.is_empty() {
            return builder.chunks;
        }

        let flattened = self.collapse(&visible_text(html.root_element()));

        debug!(document_id, "no containers found; scanning for headings");
        self.chunk_heading_scan(&flattened, &mut builder);
        if !builder.chunks.is_empty() {
            return builder.chunks;
        }

        debug!(document_id, "no headings found; using fixed windows");
        builder.emit(&flattened, None);
        builder.chunks
    }

    fn chunk_blocks(&self, blocks: &[String], builder: &mut ChunkBuilder<'_>) {
        let mut section = "Header".to_string();
        let mut buffer: Vec<String> = Vec::new();
        let mut buffered = 0usize;

        for raw in blocks {
            let text = self.collapse(raw);
            if text.is_empty() {
                continue;
            }

            if self.is_section_heading(&text) {
                builder.emit(&buffer.join(" "), Some(&section));
                buffer.clear();
                buffered = 0;
                section = text;
                continue;
            }

            if self.patterns.toc.is_match(&text) {
                continue;
            }
            if text.chars().count() < 20 && self.patterns.navigation.is_match(&text) {
                continue;
            }

            buffered += text.len() + usize::from(!buffer.is_empty());
            buffer.push(text);
            if buffered > MAX_CHUNK_CHARS {
                builder.emit(&buffer.join(" "), Some(&section));
                buffer.clear();
                buffered = 0;
            }
        }

        builder.emit(&buffer.join(" "), Some(&section));
    }

    fn chunk_containers(&self, html: &Html, builder: &mut ChunkBuilder<'_>) {
        let container = &self.selectors.container;
        for element in html.select(container) {
            let nested = element
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|a| container.matches(&a));
            if nested {
                continue;
            }

            let text = self.collapse(&visible_text(element));
            let label = element
                .value()
                .attr("id")
                .or_else(|| element.value().attr("class"))
                .map(str::to_string)
                .unwrap_or_else(|| prefix(&text, 80).trim().to_string());
            builder.emit(&text, Some(&label));
        }
    }

    fn chunk_heading_scan(&self, text: &str, builder: &mut ChunkBuilder<'_>) {
        let headings: Vec<_> = self.patterns.heading_scan.find_iter(text).collect();
        if headings.is_empty() {
            return;
        }

        builder.emit(&text[..headings[0].start()], Some("Header"));
        for (i, heading) in headings.iter().enumerate() {
            let end = headings.get(i + 1).map_or(text.len(), |next| next.start());
            let label = heading.as_str().trim_end_matches('.').to_string();
            builder.emit(&text[heading.start()..end], Some(&label));
        }
    }

    fn is_section_heading(&self, text: &str) -> bool {
        text.chars().count() <= MAX_HEADING_CHARS
            && self.patterns.sections.iter().any(|re| re.is_match(text))
    }

    fn collapse(&self, text: &str) -> String {
        self.patterns.whitespace.replace_all(text, " ").trim().to_string()
    }

    fn clean(&self, text: &str) -> String {
        let p = &self.patterns;
        let text = p.reference_marker.replace_all(text, "");
        let text = p.continued.replace_all(&text, " ");
        let text = p.toc_marker.replace_all(&text, " ");
        self.collapse(&text)
    }

    // ============ Tables ============

    fn extract_tables(&self, html: &Html, document_id: &str) -> Vec<Table> {
        let mut tables = Vec::new();
        let mut section = "Unknown Section".to_string();

        for node in html.root_element().descendants() {
            let Some(element) = ElementRef::wrap(node) else {
                continue;
            };
            let name = element.value().name();

            if SECTION_HEADING_TAGS.contains(&name) {
                let text = self.collapse(&visible_text(element));
                if self.is_section_heading(&text) {
                    section = text;
                }
                continue;
            }

            if name != "table" || inside_table(element) {
                continue;
            }

            let chunk_id = format!("{}_table_{}", document_id, tables.len());
            if let Some(table) = self.parse_table(element, chunk_id, document_id, &section) {
                tables.push(table);
            }
        }

        tables
    }

    fn parse_table(
        &self,
        table: ElementRef<'_>,
        chunk_id: String,
        document_id: &str,
        section: &str,
    ) -> Option<Table> {
        let rows: Vec<ElementRef<'_>> = table
            .select(&self.selectors.row)
            .filter(|row| nearest_table(*row) == Some(table))
            .collect();
        if rows.len() < 2 {
            return None;
        }

        let header_count = rows
            .iter()
            .take_while(|row| {
                row_cells(**row).any(|c| c.value().name() == "th")
                    || self.patterns.table_header.is_match(&visible_text(**row))
            })
            .count();

        let grid = self.expand_spans(&rows);
        let body = &grid[header_count.min(grid.len())..];
        if body.iter().all(|row| row.iter().all(|cell| cell.is_empty())) {
            return None;
        }

        Some(Table {
            chunk_id,
            document_id: document_id.to_string(),
            table_html: table.html(),
            table_data: grid.into_iter().filter(|row| !row.is_empty()).collect(),
            caption: self.table_title(table),
            section: section.to_string(),
            page_number: None,
        })
    }

    /// Lay the rows out as a grid, repeating each cell across its
    /// `colspan` and down its `rowspan`.
    fn expand_spans(&self, rows: &[ElementRef<'_>]) -> Vec<Vec<String>> {
        // Per column: (text, rows still to fill).
        let mut carried: Vec<Option<(String, usize)>> = Vec::new();
        let mut grid = Vec::with_capacity(rows.len());

        for row in rows {
            let mut out: Vec<String> = Vec::new();
            let mut col = 0usize;

            for cell in row_cells(*row) {
                fill_carried(&mut carried, &mut out, &mut col);
                let text = self.clean(&visible_text(cell));
                let colspan = span(cell, "colspan");
                let rowspan = span(cell, "rowspan");
                for _ in 0..colspan {
                    if rowspan > 1 {
                        if carried.len() <= col {
                            carried.resize(col + 1, None);
                        }
                        carried[col] = Some((text.clone(), rowspan - 1));
                    }
                    out.push(text.clone());
                    col += 1;
                }
            }
            fill_carried(&mut carried, &mut out, &mut col);
            grid.push(out);
        }

        grid
    }

    fn table_title(&self, table: ElementRef<'_>) -> Option<String> {
        if let Some(caption) = table.select(&self.selectors.caption).next() {
            let text = self.collapse(&visible_text(caption));
            if !text.is_empty() {
                return Some(text);
            }
        }

        table
            .prev_siblings()
            .filter_map(ElementRef::wrap)
            .take(2)
            .map(|sibling| self.collapse(&visible_text(sibling)))
            .find(|text| self.patterns.table_title.is_match(text))
    }
}

/// Accumulates finished chunks with sequential ids.
struct ChunkBuilder<'a> {
    segmenter: &'a Segmenter,
    document_id: &'a str,
    chunks: Vec<TextChunk>,
}

impl<'a> ChunkBuilder<'a> {
    fn new(segmenter: &'a Segmenter, document_id: &'a str) -> Self {
        Self {
            segmenter,
            document_id,
            chunks: Vec::new(),
        }
    }

    /// Clean `text`, split it into windows no longer than
    /// [`MAX_CHUNK_CHARS`], and keep the windows that are long enough.
    fn emit(&mut self, text: &str, section: Option<&str>) {
        let cleaned = self.segmenter.clean(text);
        for window in split_windows(&cleaned, MAX_CHUNK_CHARS) {
            if window.chars().count() < MIN_CHUNK_CHARS {
                continue;
            }
            self.chunks.push(TextChunk {
                chunk_id: format!("{}_text_{}", self.document_id, self.chunks.len()),
                document_id: self.document_id.to_string(),
                text: window.to_string(),
                section: section.map(str::to_string),
                page_number: None,
            });
        }
    }
}

// ============ Tree helpers ============

/// Push the text of every innermost block element under `element`, in
/// document order. Returns whether anything below `element` was pushed.
fn collect_blocks(element: ElementRef<'_>, out: &mut Vec<String>) -> bool {
    let before = out.len();
    for child in element.children().filter_map(ElementRef::wrap) {
        if !SKIPPED_TAGS.contains(&child.value().name()) {
            collect_blocks(child, out);
        }
    }
    if out.len() > before {
        return true;
    }

    if BLOCK_TAGS.contains(&element.value().name()) {
        let text = visible_text(element);
        if !text.trim().is_empty() {
            out.push(text);
            return true;
        }
    }
    false
}

/// Text under `element`, skipping tables and non-content elements.
fn visible_text(element: ElementRef<'_>) -> String {
    let mut buf = String::new();
    push_visible_text(element, &mut buf);
    buf
}

fn push_visible_text(element: ElementRef<'_>, buf: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => buf.push_str(text),
            Node::Element(el) if !SKIPPED_TAGS.contains(&el.name()) => {
                if let Some(child) = ElementRef::wrap(child) {
                    let name = el.name();
                    let separated = BLOCK_TAGS.contains(&name)
                        || matches!(name, "br" | "tr" | "td" | "th" | "li");
                    push_visible_text(child, buf);
                    if separated {
                        buf.push(' ');
                    }
                }
            }
            _ => {}
        }
    }
}

/// Copy cells still spanning down from earlier rows into `out`,
/// starting at `col`.
fn fill_carried(carried: &mut [Option<(String, usize)>], out: &mut Vec<String>, col: &mut usize) {
    while let Some(Some((text, remaining))) = carried.get_mut(*col) {
        out.push(text.clone());
        *remaining -= 1;
        if *remaining == 0 {
            carried[*col] = None;
        }
        *col += 1;
    }
}

fn row_cells<'a>(row: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| matches!(c.value().name(), "td" | "th"))
}

fn nearest_table(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "table")
}

fn inside_table(element: ElementRef<'_>) -> bool {
    nearest_table(element).is_some()
}

fn span(cell: ElementRef<'_>, attr: &str) -> usize {
    cell.value()
        .attr(attr)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n >= 1)
        .unwrap_or(1)
        .min(1000)
}

/// Longest prefix of at most `max_bytes` that ends on a char boundary.
fn prefix(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Split `text` into pieces of at most `max` bytes, breaking at the last
/// space inside each window when there is one.
fn split_windows(text: &str, max: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        if rest.len() <= max {
            pieces.push(rest);
            break;
        }
        let window = prefix(rest, max);
        let cut = if rest[window.len()..].starts_with(' ') {
            window.len()
        } else {
            match window.rfind(' ') {
                Some(pos) if pos > 0 => pos,
                _ => window.len().max(rest.chars().next().map_or(1, char::len_utf8)),
            }
        };
        pieces.push(rest[..cut].trim());
        rest = rest[cut..].trim_start();
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FilingType;

    fn metadata() -> DocumentMetadata {
        DocumentMetadata::new("TEST", 2023, None, FilingType::TenK, None)
    }

    fn segment(html: &str) -> ParsedDocument {
        Segmenter::new().unwrap().segment(html, metadata())
    }

    fn paragraph(words: usize) -> String {
        (0..words)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    const FILING: &str = r#"<SEC-HEADER>
ACCESSION NUMBER:		0000000000-24-000001
CONFORMED PERIOD OF REPORT:	20231231
FILED AS OF DATE:		20240215
COMPANY CONFORMED NAME:			TEST CORP
CENTRAL INDEX KEY:			0000000042
STANDARD INDUSTRIAL CLASSIFICATION:	SERVICES-PREPACKAGED SOFTWARE [7372]
FISCAL YEAR END:			1231
</SEC-HEADER>
<html><body>
<p>Table of Contents</p>
<h2>ITEM 1. BUSINESS</h2>
<p>Test Corp designs and sells widgets to customers around the world through direct and indirect channels [1].</p>
<p>Next page</p>
<h2>ITEM 1A. RISK FACTORS</h2>
<div><p>Our business is subject to many risks, including supply chain disruption (continued) and competition.</p></div>
<h2>ITEM 8. FINANCIAL STATEMENTS AND SUPPLEMENTARY DATA</h2>
<p>Table 1</p>
<table>
  <tr><th>(in millions)</th><th colspan="2">Year Ended</th></tr>
  <tr><td rowspan="2">Revenue</td><td>100</td><td>90</td></tr>
  <tr><td>110</td><td>95</td></tr>
</table>
<table><tr><td>single row</td></tr></table>
</body></html>"#;

    #[test]
    fn test_segmentation_is_deterministic() {
        let segmenter = Segmenter::new().unwrap();
        let a = segmenter.segment(FILING, metadata());
        let b = segmenter.segment(FILING, metadata());
        assert_eq!(a, b);
    }

    #[test]
    fn test_sections_follow_headings() {
        let parsed = segment(FILING);
        let sections: Vec<_> = parsed
            .text_chunks
            .iter()
            .map(|c| c.section.as_deref().unwrap())
            .collect();
        assert_eq!(sections, vec!["ITEM 1. BUSINESS", "ITEM 1A. RISK FACTORS"]);
        assert_eq!(parsed.text_chunks[0].chunk_id, "TEST_2023_4_10K_text_0");
        assert_eq!(parsed.text_chunks[1].chunk_id, "TEST_2023_4_10K_text_1");
    }

    #[test]
    fn test_cleanup_removes_artifacts_and_navigation() {
        let parsed = segment(FILING);
        let business = &parsed.text_chunks[0].text;
        assert!(!business.contains("[1]"));
        assert!(!business.contains("Next page"));
        assert!(!business.contains("Table of Contents"));
        let risks = &parsed.text_chunks[1].text;
        assert!(!risks.to_lowercase().contains("continued"));
        assert!(risks.contains("disruption and competition"));
    }

    #[test]
    fn test_every_chunk_meets_minimum_length() {
        let html = format!(
            "<html><body><h2>ITEM 1. BUSINESS</h2><p>Too short.</p>\
             <h2>ITEM 2. PROPERTIES</h2><p>{}</p></body></html>",
            paragraph(30)
        );
        let parsed = segment(&html);
        assert_eq!(parsed.text_chunks.len(), 1);
        assert_eq!(parsed.text_chunks[0].section.as_deref(), Some("ITEM 2. PROPERTIES"));
        assert!(parsed
            .text_chunks
            .iter()
            .all(|c| c.text.chars().count() >= MIN_CHUNK_CHARS));
    }

    #[test]
    fn test_long_sections_are_split() {
        let paragraphs: String = (0..10).map(|_| format!("<p>{}</p>", paragraph(60))).collect();
        let html = format!("<html><body><h2>ITEM 7. MD&amp;A</h2>{}</body></html>", paragraphs);
        let parsed = segment(&html);
        assert!(parsed.text_chunks.len() > 1);
        assert!(parsed
            .text_chunks
            .iter()
            .all(|c| c.section.as_deref() == Some("ITEM 7. MD&A")));
        assert!(parsed
            .text_chunks
            .iter()
            .all(|c| c.text.len() <= MAX_CHUNK_CHARS));
    }

    #[test]
    fn test_text_before_first_heading_is_header_section() {
        let html = format!("<html><body><p>{}</p></body></html>", paragraph(20));
        let parsed = segment(&html);
        assert_eq!(parsed.text_chunks.len(), 1);
        assert_eq!(parsed.text_chunks[0].section.as_deref(), Some("Header"));
    }

    #[test]
    fn test_long_paragraph_starting_with_business_is_not_a_heading() {
        let text = format!("Business conditions remained difficult. {}", paragraph(40));
        let html = format!("<html><body><h2>ITEM 7. MD&amp;A</h2><p>{}</p></body></html>", text);
        let parsed = segment(&html);
        assert_eq!(parsed.text_chunks[0].section.as_deref(), Some("ITEM 7. MD&A"));
    }

    #[test]
    fn test_table_extraction() {
        let parsed = segment(FILING);
        assert_eq!(parsed.tables.len(), 1);
        let table = &parsed.tables[0];
        assert_eq!(table.chunk_id, "TEST_2023_4_10K_table_0");
        assert_eq!(table.caption.as_deref(), Some("Table 1"));
        assert_eq!(
            table.section,
            "ITEM 8. FINANCIAL STATEMENTS AND SUPPLEMENTARY DATA"
        );
        assert_eq!(
            table.table_data,
            vec![
                vec!["(in millions)", "Year Ended", "Year Ended"],
                vec!["Revenue", "100", "90"],
                vec!["Revenue", "110", "95"],
            ]
        );
        assert!(table.table_html.starts_with("<table"));
    }

    #[test]
    fn test_nested_tables_are_not_extracted_twice() {
        let html = r#"<html><body><table>
            <tr><td>Outer</td><td><table><tr><td>a</td></tr><tr><td>b</td></tr></table></td></tr>
            <tr><td>Row</td><td>2</td></tr>
        </table></body></html>"#;
        let parsed = segment(html);
        assert_eq!(parsed.tables.len(), 1);
        assert_eq!(parsed.tables[0].table_data.len(), 2);
    }

    #[test]
    fn test_tables_do_not_leak_into_text() {
        let parsed = segment(FILING);
        assert!(parsed.text_chunks.iter().all(|c| !c.text.contains("Revenue")));
    }

    #[test]
    fn test_parse_header() {
        let header = Segmenter::new().unwrap().parse_header(FILING);
        assert_eq!(header.company_name.as_deref(), Some("TEST CORP"));
        assert_eq!(header.cik.as_deref(), Some("0000000042"));
        assert_eq!(header.sic.as_deref(), Some("7372"));
        assert_eq!(header.fiscal_year_end.as_deref(), Some("1231"));
        assert_eq!(header.filed_as_of, NaiveDate::from_ymd_opt(2024, 2, 15));
        assert_eq!(header.period_of_report, NaiveDate::from_ymd_opt(2023, 12, 31));
    }

    #[test]
    fn test_filing_date_filled_from_header() {
        let parsed = segment(FILING);
        assert_eq!(parsed.metadata.filing_date, NaiveDate::from_ymd_opt(2024, 2, 15));
    }

    #[test]
    fn test_container_fallback() {
        let html = format!(
            r#"<html><body><section id="item7">{}</section></body></html>"#,
            paragraph(20)
        );
        let parsed = segment(&html);
        assert_eq!(parsed.text_chunks.len(), 1);
        assert_eq!(parsed.text_chunks[0].section.as_deref(), Some("item7"));
    }

    #[test]
    fn test_heading_scan_fallback_on_plain_text() {
        let text = format!(
            "ITEM 1. Business {} ITEM 7. Management discussion {}",
            paragraph(20),
            paragraph(20)
        );
        let parsed = segment(&text);
        let sections: Vec<_> = parsed
            .text_chunks
            .iter()
            .map(|c| c.section.as_deref().unwrap())
            .collect();
        assert_eq!(sections, vec!["ITEM 1", "ITEM 7"]);
    }

    #[test]
    fn test_fixed_window_fallback() {
        let parsed = segment(&paragraph(600));
        assert!(parsed.text_chunks.len() > 1);
        assert!(parsed.text_chunks.iter().all(|c| c.section.is_none()));
    }

    #[test]
    fn test_split_windows_breaks_on_spaces() {
        assert_eq!(split_windows("aaa bbb ccc", 7), vec!["aaa bbb", "ccc"]);
        assert_eq!(split_windows("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert!(split_windows("   ", 4).is_empty());
    }
}
