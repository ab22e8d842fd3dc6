//! Filing Client for SEC EDGAR.
//!
//! Resolves a `(ticker, year, quarter, filing_type)` tuple to a filing in
//! the submissions index, downloads the full submission text, and pulls
//! the XBRL company-facts payload for a ticker.
//!
//! Endpoints used:
//!
//! | Purpose | URL |
//! |---------|-----|
//! | Ticker → CIK | `https://www.sec.gov/files/company_tickers.json` |
//! | Filing index | `https://data.sec.gov/submissions/CIK{cik}.json` |
//! | Filing text | `https://www.sec.gov/Archives/edgar/data/{cik}/{accession}/{accession}.txt` |
//! | XBRL facts | `https://data.sec.gov/api/xbrl/companyfacts/CIK{cik}.json` |
//!
//! Every request is preceded by a fixed pause (`edgar.request_delay_ms`)
//! to stay under the registry's request-rate policy. Nothing is retried.
//!
//! Ticker → CIK lookups are cached in memory and in `cik_cache.json`
//! under the download directory. The cache is never authoritative: a
//! missing or unreadable file only costs a fresh lookup.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::EdgarConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    generate_document_id, quarter_of_month, DocumentMetadata, Fact, FactType, FactValue,
    FilingType,
};

const TICKER_LOOKUP_URL: &str = "https://www.sec.gov/files/company_tickers.json";
const SUBMISSIONS_URL: &str = "https://data.sec.gov/submissions";
const ARCHIVE_URL: &str = "https://www.sec.gov/Archives/edgar/data";
const COMPANY_FACTS_URL: &str = "https://data.sec.gov/api/xbrl/companyfacts";

/// Taxonomy namespaces read from the company-facts payload.
pub const SUPPORTED_TAXONOMIES: &[&str] = &["us-gaap", "ifrs-full", "dei", "srt"];

// ============ Registry payloads ============

/// One entry of `company_tickers.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerEntry {
    pub cik_str: u64,
    pub ticker: String,
    #[serde(default)]
    pub title: String,
}

/// Submissions index for one company.
#[derive(Debug, Clone, Deserialize)]
pub struct CompanySubmissions {
    #[serde(default)]
    pub name: String,
    pub filings: SubmissionFilings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionFilings {
    pub recent: RecentFilings,
}

/// Column-oriented list of recent filings; index `i` of each vector
/// describes the same filing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentFilings {
    #[serde(default)]
    pub accession_number: Vec<String>,
    #[serde(default)]
    pub filing_date: Vec<String>,
    #[serde(default)]
    pub form: Vec<String>,
}

/// A filing chosen from the submissions index.
#[derive(Debug, Clone, PartialEq)]
pub struct FilingRef {
    pub url: String,
    pub accession_number: String,
    pub filing_date: NaiveDate,
}

/// XBRL company-facts payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CompanyFactsPayload {
    #[serde(rename = "entityName", default)]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub facts: HashMap<String, HashMap<String, ConceptFacts>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConceptFacts {
    pub label: Option<String>,
    pub description: Option<String>,
    /// Data points kept as raw JSON so one bad point cannot sink the batch.
    #[serde(default)]
    pub units: HashMap<String, Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
struct DataPoint {
    start: Option<String>,
    end: Option<String>,
    val: f64,
    accn: Option<String>,
    fy: Option<i32>,
    fp: Option<String>,
    form: Option<String>,
    /// An integer precision, or the string `INF` for exact values.
    decimals: Option<serde_json::Value>,
}

/// Facts and values extracted from one company-facts payload.
#[derive(Debug, Clone, Default)]
pub struct XbrlFacts {
    pub company_name: Option<String>,
    pub facts: Vec<Fact>,
    pub values: Vec<FactValue>,
    /// Data points dropped because they were malformed or incomplete.
    pub skipped: usize,
}

/// A downloaded filing with its derived metadata.
#[derive(Debug, Clone)]
pub struct DownloadedFiling {
    pub content: String,
    pub metadata: DocumentMetadata,
    pub accession_number: String,
}

// ============ Filing source seam ============

/// Where filings and XBRL facts come from.
#[async_trait]
pub trait FilingSource: Send + Sync {
    async fn download_filing(
        &self,
        ticker: &str,
        year: i32,
        quarter: Option<u32>,
        filing_type: FilingType,
    ) -> PipelineResult<DownloadedFiling>;

    async fn download_xbrl_facts(&self, ticker: &str) -> PipelineResult<XbrlFacts>;
}

// ============ EDGAR client ============

pub struct EdgarClient {
    http: reqwest::Client,
    request_delay: Duration,
    cache_path: PathBuf,
    cik_cache: Mutex<HashMap<String, String>>,
}

impl EdgarClient {
    /// Build a client and load any existing CIK cache.
    pub fn new(config: &EdgarConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.download_dir)?;
        let cache_path = config.download_dir.join("cik_cache.json");
        let cik_cache = load_cik_cache(&cache_path);

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            request_delay: Duration::from_millis(config.request_delay_ms),
            cache_path,
            cik_cache: Mutex::new(cik_cache),
        })
    }

    async fn get(&self, url: &str) -> PipelineResult<reqwest::Response> {
        tokio::time::sleep(self.request_delay).await;
        debug!(url, "EDGAR request");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(PipelineError::registry)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PipelineError::NotFound(format!("{} returned 404", url)));
        }
        if !status.is_success() {
            return Err(PipelineError::registry(anyhow::anyhow!(
                "{} returned HTTP {}",
                url,
                status
            )));
        }
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> PipelineResult<T> {
        self.get(url)
            .await?
            .json::<T>()
            .await
            .map_err(PipelineError::registry)
    }

    /// Zero-padded 10-digit CIK for `ticker`.
    pub async fn resolve_cik(&self, ticker: &str) -> PipelineResult<String> {
        let key = ticker.to_uppercase();
        if let Some(cik) = self.cik_cache.lock().await.get(&key) {
            return Ok(cik.clone());
        }

        let entries: HashMap<String, TickerEntry> = self.get_json(TICKER_LOOKUP_URL).await?;
        let cik = find_cik(entries.values(), &key)
            .ok_or_else(|| PipelineError::NotFound(format!("CIK not found for ticker {}", ticker)))?;
        info!(ticker = %key, cik = %cik, "resolved CIK");

        let mut cache = self.cik_cache.lock().await;
        cache.insert(key, cik.clone());
        self.save_cik_cache(&cache).await;
        Ok(cik)
    }

    async fn save_cik_cache(&self, cache: &HashMap<String, String>) {
        let result = match serde_json::to_vec(cache) {
            Ok(bytes) => tokio::fs::write(&self.cache_path, bytes)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(path = %self.cache_path.display(), error = %e, "failed to save CIK cache");
        }
    }

    /// Filing index for a company.
    pub async fn get_company_filings(&self, ticker: &str) -> PipelineResult<CompanySubmissions> {
        let cik = self.resolve_cik(ticker).await?;
        let url = format!("{}/CIK{}.json", SUBMISSIONS_URL, cik);
        info!(ticker, url = %url, "fetching company filings");
        self.get_json(&url).await
    }

    /// Locate the newest filing matching the request.
    pub async fn find_filing_url(
        &self,
        ticker: &str,
        year: i32,
        quarter: Option<u32>,
        filing_type: FilingType,
    ) -> PipelineResult<FilingRef> {
        let submissions = self.get_company_filings(ticker).await?;
        let cik = self.resolve_cik(ticker).await?;
        find_filing(&submissions.filings.recent, &cik, ticker, year, quarter, filing_type)
    }
}

#[async_trait]
impl FilingSource for EdgarClient {
    async fn download_filing(
        &self,
        ticker: &str,
        year: i32,
        quarter: Option<u32>,
        filing_type: FilingType,
    ) -> PipelineResult<DownloadedFiling> {
        info!(ticker, year, ?quarter, %filing_type, "downloading filing");
        let filing = self.find_filing_url(ticker, year, quarter, filing_type).await?;
        let content = self
            .get(&filing.url)
            .await?
            .text()
            .await
            .map_err(PipelineError::registry)?;

        // A quarterly report without a requested quarter takes the one it was filed in.
        let quarter = match filing_type {
            FilingType::TenQ => quarter.or(Some(quarter_of_month(filing.filing_date.month()))),
            FilingType::TenK => quarter,
        };

        Ok(DownloadedFiling {
            content,
            metadata: DocumentMetadata::new(
                ticker,
                year,
                quarter,
                filing_type,
                Some(filing.filing_date),
            ),
            accession_number: filing.accession_number,
        })
    }

    async fn download_xbrl_facts(&self, ticker: &str) -> PipelineResult<XbrlFacts> {
        let cik = self.resolve_cik(ticker).await?;
        let url = format!("{}/CIK{}.json", COMPANY_FACTS_URL, cik);
        info!(ticker, url = %url, "fetching XBRL company facts");
        let payload: CompanyFactsPayload = self.get_json(&url).await?;
        let facts = parse_company_facts(ticker, &payload);
        info!(
            ticker,
            facts = facts.facts.len(),
            values = facts.values.len(),
            skipped = facts.skipped,
            "parsed XBRL facts"
        );
        Ok(facts)
    }
}

// ============ Pure helpers ============

fn load_cik_cache(path: &std::path::Path) -> HashMap<String, String> {
    let Ok(bytes) = std::fs::read(path) else {
        return HashMap::new();
    };
    match serde_json::from_slice::<HashMap<String, String>>(&bytes) {
        Ok(cache) => {
            info!(entries = cache.len(), "loaded CIK cache");
            cache
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable CIK cache");
            HashMap::new()
        }
    }
}

/// Pad a CIK to the 10 digits the submissions API expects.
pub fn pad_cik(cik: &str) -> String {
    format!("{:0>10}", cik)
}

fn find_cik<'a>(entries: impl Iterator<Item = &'a TickerEntry>, ticker: &str) -> Option<String> {
    entries
        .filter(|e| e.ticker.eq_ignore_ascii_case(ticker))
        .map(|e| pad_cik(&e.cik_str.to_string()))
        .next()
}

/// Full-submission text URL for a filing.
pub fn filing_text_url(cik: &str, accession_number: &str) -> String {
    let cik_number = cik.trim_start_matches('0');
    format!(
        "{}/{}/{}/{}.txt",
        ARCHIVE_URL,
        if cik_number.is_empty() { "0" } else { cik_number },
        accession_number.replace('-', ""),
        accession_number
    )
}

/// Pick the newest filing of `filing_type` filed in calendar `year`,
/// and in `quarter` when one is given.
pub fn find_filing(
    recent: &RecentFilings,
    cik: &str,
    ticker: &str,
    year: i32,
    quarter: Option<u32>,
    filing_type: FilingType,
) -> PipelineResult<FilingRef> {
    let count = recent
        .form
        .len()
        .min(recent.filing_date.len())
        .min(recent.accession_number.len());

    let mut best: Option<(NaiveDate, &str)> = None;
    for i in 0..count {
        if recent.form[i] != filing_type.as_str() {
            continue;
        }
        let date = match NaiveDate::parse_from_str(&recent.filing_date[i], "%Y-%m-%d") {
            Ok(d) => d,
            Err(_) => {
                warn!(date = %recent.filing_date[i], "could not parse filing date");
                continue;
            }
        };
        if date.year() != year {
            continue;
        }
        if let Some(q) = quarter {
            if quarter_of_month(date.month()) != q {
                continue;
            }
        }
        if best.map_or(true, |(d, _)| date > d) {
            best = Some((date, recent.accession_number[i].as_str()));
        }
    }

    let (filing_date, accession_number) = best.ok_or_else(|| {
        PipelineError::NotFound(format!(
            "No {} filing found for {} in {}{}",
            filing_type,
            ticker,
            year,
            quarter.map(|q| format!(" Q{}", q)).unwrap_or_default()
        ))
    })?;

    Ok(FilingRef {
        url: filing_text_url(cik, accession_number),
        accession_number: accession_number.to_string(),
        filing_date,
    })
}

fn infer_fact_type(units: &HashMap<String, Vec<serde_json::Value>>) -> FactType {
    if units.keys().any(|u| u.contains("USD")) {
        FactType::Monetary
    } else if units.keys().any(|u| u == "shares") {
        FactType::Shares
    } else {
        FactType::Other
    }
}

/// `FY` has no quarter; `Q1`..`Q4` map to their number.
fn parse_fiscal_period(fp: &str) -> Result<Option<u32>, String> {
    if fp == "FY" {
        return Ok(None);
    }
    fp.strip_prefix('Q')
        .and_then(|q| q.parse::<u32>().ok())
        .filter(|q| (1..=4).contains(q))
        .map(Some)
        .ok_or_else(|| format!("unsupported fiscal period '{}'", fp))
}

/// Turn a company-facts payload into fact definitions and values.
///
/// Emits one [`Fact`] per concept in a supported taxonomy and one
/// [`FactValue`] per data point per unit. Malformed points are skipped
/// and counted.
pub fn parse_company_facts(ticker: &str, payload: &CompanyFactsPayload) -> XbrlFacts {
    let mut out = XbrlFacts {
        company_name: payload.entity_name.clone(),
        ..Default::default()
    };

    let mut taxonomies: Vec<&String> = payload
        .facts
        .keys()
        .filter(|t| SUPPORTED_TAXONOMIES.contains(&t.as_str()))
        .collect();
    taxonomies.sort();

    for taxonomy in taxonomies {
        let concepts = &payload.facts[taxonomy];
        let mut names: Vec<&String> = concepts.keys().collect();
        names.sort();

        for name in names {
            let concept = &concepts[name];
            let fact_id = format!("{}:{}", taxonomy, name);
            let has_duration = concept
                .units
                .values()
                .flatten()
                .any(|p| p.get("start").map_or(false, |s| !s.is_null()));

            out.facts.push(Fact {
                fact_id: fact_id.clone(),
                label: concept
                    .label
                    .clone()
                    .unwrap_or_else(|| "No label available".to_string()),
                description: concept
                    .description
                    .clone()
                    .unwrap_or_else(|| "No description available".to_string()),
                taxonomy: taxonomy.clone(),
                fact_type: infer_fact_type(&concept.units),
                period_type: Some(if has_duration { "duration" } else { "instant" }.to_string()),
                embedding: None,
            });

            let mut units: Vec<&String> = concept.units.keys().collect();
            units.sort();
            for unit in units {
                for raw in &concept.units[unit] {
                    match fact_value_from_point(ticker, &fact_id, unit, raw) {
                        Ok(value) => out.values.push(value),
                        Err(reason) => {
                            debug!(fact_id = %fact_id, reason = %reason, "skipping data point");
                            out.skipped += 1;
                        }
                    }
                }
            }
        }
    }

    if out.skipped > 0 {
        warn!(ticker, skipped = out.skipped, "skipped malformed XBRL data points");
    }
    out
}

fn fact_value_from_point(
    ticker: &str,
    fact_id: &str,
    unit: &str,
    raw: &serde_json::Value,
) -> Result<FactValue, String> {
    let point: DataPoint = serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
    let fiscal_year = point.fy.ok_or("missing fiscal year")?;
    let fiscal_period = point.fp.ok_or("missing fiscal period")?;
    let form = point.form.ok_or("missing form")?;
    let quarter = parse_fiscal_period(&fiscal_period)?;

    Ok(FactValue {
        fact_id: fact_id.to_string(),
        ticker: ticker.to_string(),
        value: point.val,
        document_id: generate_document_id(ticker, fiscal_year, quarter, &form),
        filing_type: form.clone(),
        accession_number: point.accn,
        start_date: point.start,
        end_date: point.end,
        fiscal_year: Some(fiscal_year),
        fiscal_period: Some(fiscal_period),
        unit: unit.to_string(),
        decimals: point
            .decimals
            .as_ref()
            .and_then(|d| d.as_i64())
            .map(|d| d as i32),
        form,
    })
}
