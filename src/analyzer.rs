//! Query Analyzer.
//!
//! One JSON-mode chat call turns a question into companies (as tickers),
//! years, quarters, and topics. The analysis is then embedded through
//! [`EmbeddingService::embed_query_analysis`].
//!
//! Extraction never fails: a model error or unparseable reply yields an
//! analysis with every list empty, which downstream stages treat as a
//! question that cannot be grounded in a specific filing.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::embedding::EmbeddingService;
use crate::llm::{extract_json_object, ChatModel, ChatRequest};
use crate::models::QueryAnalysis;

const SYSTEM_PROMPT: &str = "You are a financial analysis assistant that extracts key \
information from queries about company financial filings.";

/// Reply shape requested from the model. Every field is optional so a
/// partial reply still yields whatever it did contain.
#[derive(Debug, Default, Deserialize)]
struct Extraction {
    #[serde(default)]
    companies: Vec<serde_json::Value>,
    #[serde(default)]
    years: Vec<serde_json::Value>,
    #[serde(default)]
    quarters: Vec<serde_json::Value>,
    #[serde(default)]
    topics: Vec<serde_json::Value>,
}

pub struct QueryAnalyzer {
    llm: Arc<dyn ChatModel>,
    embeddings: Arc<EmbeddingService>,
}

impl QueryAnalyzer {
    pub fn new(llm: Arc<dyn ChatModel>, embeddings: Arc<EmbeddingService>) -> Self {
        Self { llm, embeddings }
    }

    /// Extract intent from `query` and attach its embedding.
    pub async fn analyze(&self, query: &str) -> QueryAnalysis {
        let mut analysis = self.extract(query).await;
        analysis.embedding = Some(self.embeddings.embed_query_analysis(&analysis).await);
        info!(
            companies = ?analysis.companies,
            years = ?analysis.years,
            quarters = ?analysis.quarters,
            topics = ?analysis.topics,
            "analyzed query"
        );
        analysis
    }

    /// The structured fields only, without an embedding.
    pub async fn extract(&self, query: &str) -> QueryAnalysis {
        let request = ChatRequest::new(SYSTEM_PROMPT, extraction_prompt(query)).json();
        let reply = match self.llm.complete(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "query analysis failed; continuing with empty intent");
                return QueryAnalysis::empty(query);
            }
        };

        match parse_extraction(query, &reply) {
            Some(analysis) => analysis,
            None => {
                warn!(reply = %reply, "query analysis reply was not valid JSON; continuing with empty intent");
                QueryAnalysis::empty(query)
            }
        }
    }
}

fn extraction_prompt(query: &str) -> String {
    format!(
        "Analyze the following query about company financial filings (10-K/10-Q) and extract:\n\
         1. Company names or tickers mentioned\n\
         2. Years mentioned or implied\n\
         3. Quarters mentioned or implied (1, 2, 3, or 4)\n\
         4. Main topics or financial metrics of interest\n\
         5. Convert all company names to their ticker symbol (e.g. Apple -> AAPL)\n\n\
         Query: {}\n\n\
         Respond with a JSON object containing the following keys:\n\
         - companies: list of ticker symbols\n\
         - years: list of years as integers\n\
         - quarters: list of quarters as integers\n\
         - topics: list of main topics or financial metrics\n\n\
         If any information is not present or cannot be inferred, provide an empty list for that key.",
        query
    )
}

/// Read the model's reply into an analysis.
///
/// Values of the wrong JSON type inside a list are dropped one by one;
/// numbers sent as strings (`"2023"`) are accepted.
fn parse_extraction(query: &str, reply: &str) -> Option<QueryAnalysis> {
    let value = extract_json_object(reply)?;
    let extraction: Extraction = serde_json::from_value(value).ok()?;

    Some(QueryAnalysis {
        query: query.to_string(),
        companies: extraction
            .companies
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
        years: extraction
            .years
            .iter()
            .filter_map(as_integer)
            .filter_map(|y| i32::try_from(y).ok())
            .collect(),
        quarters: extraction
            .quarters
            .iter()
            .filter_map(as_integer)
            .filter_map(|q| u32::try_from(q).ok())
            .filter(|q| (1..=4).contains(q))
            .collect(),
        topics: extraction
            .topics
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
        embedding: None,
    })
}

fn as_integer(value: &serde_json::Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}
