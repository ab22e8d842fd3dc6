//! Response Generator.
//!
//! Builds one prompt from the question, the retrieved chunks, and the
//! retrieved fact values, and asks the chat model for a reply shaped as
//!
//! ```text
//! ANSWER: <prose citing sources as [n]>
//! SOURCES:
//! [1] <description naming a document id or fact id>
//! [2] ...
//! ```
//!
//! Context entries are numbered from 1, chunks first and then facts.
//! Each SOURCES entry becomes a [`Citation`] by its leading `[n]`, or
//! failing that by the first context whose document id (chunks) or fact
//! id (facts) appears in the entry. Entries that match neither are
//! dropped. A reply without `SOURCES:` is rejected.

use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::llm::{ChatModel, ChatRequest};
use crate::models::{Citation, FactMatch, FormattedResponse, RelevantChunk};
use crate::store::Store;

const SYSTEM_PROMPT: &str = "You are a financial analysis assistant that answers questions \
about company financial filings (10-K/10-Q) using only the context you are given.";

const SOURCES_MARKER: &str = "SOURCES:";
const ANSWER_MARKER: &str = "ANSWER:";
const CITATION_CONTENT_CHARS: usize = 200;

#[derive(Serialize)]
struct ChunkContext<'a> {
    index: usize,
    content: &'a str,
    #[serde(rename = "type")]
    content_type: &'a str,
    location: &'a str,
    document_id: &'a str,
}

#[derive(Serialize)]
struct FactContext<'a> {
    index: usize,
    value: f64,
    unit: &'a str,
    fiscal_period: String,
    description: &'a str,
    fact_id: &'a str,
    document_id: &'a str,
}

/// A numbered prompt entry a source line can point at.
enum Source<'a> {
    Chunk(&'a RelevantChunk),
    Fact(&'a FactMatch),
}

impl Source<'_> {
    fn mentioned_in(&self, line: &str) -> bool {
        match self {
            Source::Chunk(c) => line.contains(&c.chunk.document_id),
            Source::Fact(f) => line.contains(&f.value.fact_id),
        }
    }
}

pub struct ResponseGenerator {
    llm: Arc<dyn ChatModel>,
    store: Arc<dyn Store>,
    source_index: Regex,
}

impl ResponseGenerator {
    pub fn new(llm: Arc<dyn ChatModel>, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        Ok(Self {
            llm,
            store,
            source_index: Regex::new(r"^\s*\[(\d+)\]")?,
        })
    }

    pub async fn generate_response(
        &self,
        query: &str,
        chunks: &[RelevantChunk],
        facts: &[FactMatch],
    ) -> PipelineResult<FormattedResponse> {
        let prompt = build_prompt(query, chunks, facts)?;
        let reply = self
            .llm
            .complete(&ChatRequest::new(SYSTEM_PROMPT, prompt))
            .await
            .map_err(PipelineError::language)?;

        let (answer, source_lines) = split_reply(&reply)?;

        let sources: Vec<Source<'_>> = chunks
            .iter()
            .map(Source::Chunk)
            .chain(facts.iter().map(Source::Fact))
            .collect();

        let mut cited = HashSet::new();
        let mut citations = Vec::new();
        for line in &source_lines {
            let Some(index) = self.resolve(line, &sources) else {
                warn!(source = %line, "source entry matches no context; dropping it");
                continue;
            };
            if !cited.insert(index) {
                continue;
            }
            citations.push(self.citation(&sources[index]).await?);
        }

        info!(
            sources = source_lines.len(),
            citations = citations.len(),
            "generated response"
        );
        Ok(FormattedResponse {
            response: answer,
            citations,
        })
    }

    /// Zero-based context index a source line refers to.
    fn resolve(&self, line: &str, sources: &[Source<'_>]) -> Option<usize> {
        let explicit = self
            .source_index
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .filter(|n| (1..=sources.len()).contains(n))
            .map(|n| n - 1);

        explicit.or_else(|| sources.iter().position(|s| s.mentioned_in(line)))
    }

    async fn citation(&self, source: &Source<'_>) -> PipelineResult<Citation> {
        match source {
            Source::Chunk(c) => {
                let document = self
                    .store
                    .get_document(&c.chunk.document_id)
                    .await
                    .map_err(PipelineError::storage)?;
                let (filing_type, company, year, quarter) = match document {
                    Some(d) => (d.filing_type.to_string(), d.ticker, d.year, d.quarter),
                    None => ("Unknown".to_string(), "Unknown".to_string(), 0, None),
                };
                Ok(Citation {
                    document_id: c.chunk.document_id.clone(),
                    filing_type,
                    company,
                    year,
                    quarter,
                    location: c.chunk.location.clone(),
                    content: excerpt(&c.chunk.content),
                    content_type: c.chunk.content_type.as_str().to_string(),
                    fact_id: None,
                })
            }
            Source::Fact(f) => {
                let v = &f.value;
                Ok(Citation {
                    document_id: v.document_id.clone(),
                    filing_type: v.form.clone(),
                    company: v.ticker.clone(),
                    year: v.fiscal_year.unwrap_or(0),
                    quarter: v
                        .fiscal_period
                        .as_deref()
                        .and_then(|p| p.strip_prefix('Q'))
                        .and_then(|q| q.parse().ok()),
                    location: format!("XBRL Fact: {}", v.fact_id),
                    content: format!("{}: {} {}", f.description, v.value, v.unit),
                    content_type: "fact".to_string(),
                    fact_id: Some(v.fact_id.clone()),
                })
            }
        }
    }
}

fn fiscal_period_label(m: &FactMatch) -> String {
    let period = m.value.fiscal_period.as_deref().unwrap_or("");
    match m.value.fiscal_year {
        Some(year) => format!("{} {}", period, year).trim().to_string(),
        None => period.to_string(),
    }
}

fn build_prompt(
    query: &str,
    chunks: &[RelevantChunk],
    facts: &[FactMatch],
) -> PipelineResult<String> {
    let chunk_contexts: Vec<ChunkContext<'_>> = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| ChunkContext {
            index: i + 1,
            content: &c.chunk.content,
            content_type: c.chunk.content_type.as_str(),
            location: &c.chunk.location,
            document_id: &c.chunk.document_id,
        })
        .collect();

    let fact_contexts: Vec<FactContext<'_>> = facts
        .iter()
        .enumerate()
        .map(|(i, f)| FactContext {
            index: chunks.len() + i + 1,
            value: f.value.value,
            unit: &f.value.unit,
            fiscal_period: fiscal_period_label(f),
            description: &f.description,
            fact_id: &f.value.fact_id,
            document_id: &f.value.document_id,
        })
        .collect();

    let chunk_json =
        serde_json::to_string_pretty(&chunk_contexts).map_err(PipelineError::language)?;
    let fact_json =
        serde_json::to_string_pretty(&fact_contexts).map_err(PipelineError::language)?;

    Ok(format!(
        "Answer the following question using only the context below.\n\n\
         Question: {query}\n\n\
         Document excerpts:\n{chunk_json}\n\n\
         XBRL financial facts:\n{fact_json}\n\n\
         When a fact value and a document excerpt cover the same data point, prefer the fact \
         value. Cite context entries inline as [n] using their index. If the context does not \
         contain enough information, say so clearly.\n\n\
         Reply in exactly this format:\n\
         ANSWER: <your answer with [n] citations>\n\
         SOURCES:\n\
         [n] <document_id or fact_id of the entry> - <short description>\n\
         (one line per cited entry)"
    ))
}

/// Split a reply into the answer text and its non-empty source lines.
fn split_reply(reply: &str) -> PipelineResult<(String, Vec<String>)> {
    let at = reply.find(SOURCES_MARKER).ok_or_else(|| {
        PipelineError::MalformedResponse(format!(
            "response has no {} section",
            SOURCES_MARKER
        ))
    })?;

    let answer = reply[..at].trim();
    let answer = answer.strip_prefix(ANSWER_MARKER).unwrap_or(answer).trim();
    let sources = reply[at + SOURCES_MARKER.len()..]
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    Ok((answer.to_string(), sources))
}

fn excerpt(content: &str) -> String {
    if content.chars().count() <= CITATION_CONTENT_CHARS {
        return content.to_string();
    }
    let cut: String = content.chars().take(CITATION_CONTENT_CHARS).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedChatModel;
    use crate::models::FilingType;
    use crate::store::test_support::{chunk, fact_value, metadata};
    use crate::store::InMemoryStore;

    async fn generator(reply: &str) -> (ResponseGenerator, Arc<ScriptedChatModel>) {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_document(&metadata("TEST", 2023, None, FilingType::TenK))
            .await
            .unwrap();
        let llm = Arc::new(ScriptedChatModel::new().reply(reply));
        (ResponseGenerator::new(llm.clone(), store).unwrap(), llm)
    }

    fn chunks() -> Vec<RelevantChunk> {
        vec![
            RelevantChunk {
                chunk: chunk("TEST_2023_4_10K", 0, "Revenue grew 12% on services demand."),
                relevance_score: 0.9,
            },
            RelevantChunk {
                chunk: chunk("TEST_2023_4_10K", 1, "Supply constraints remain a risk."),
                relevance_score: 0.5,
            },
        ]
    }

    fn facts() -> Vec<FactMatch> {
        vec![FactMatch {
            value: fact_value("us-gaap:Revenues", "TEST", 2023, "FY", 383.0),
            description: "Amount of revenue recognized".to_string(),
        }]
    }

    #[tokio::test]
    async fn test_citations_follow_source_indices() {
        let (gen, _) = generator(
            "ANSWER: Revenue was 383 [3], up on services [1].\n\nSOURCES:\n\
             [1] TEST_2023_4_10K - MD&A\n[3] us-gaap:Revenues - annual revenue",
        )
        .await;
        let response = gen
            .generate_response("What was revenue?", &chunks(), &facts())
            .await
            .unwrap();

        assert_eq!(response.response, "Revenue was 383 [3], up on services [1].");
        assert_eq!(response.citations.len(), 2);

        let text = &response.citations[0];
        assert_eq!(text.document_id, "TEST_2023_4_10K");
        assert_eq!(text.company, "TEST");
        assert_eq!(text.filing_type, "10-K");
        assert_eq!(text.year, 2023);
        assert_eq!(text.content_type, "text");
        assert!(text.fact_id.is_none());

        let fact = &response.citations[1];
        assert_eq!(fact.fact_id.as_deref(), Some("us-gaap:Revenues"));
        assert_eq!(fact.content_type, "fact");
        assert_eq!(fact.quarter, None);
        assert_eq!(fact.content, "Amount of revenue recognized: 383 USD");
    }

    #[tokio::test]
    async fn test_substring_fallback_and_dropped_sources() {
        let (gen, _) = generator(
            "ANSWER: See filing.\nSOURCES:\nFrom us-gaap:Revenues in the annual report\n\
             [9] something that does not exist\nan unrelated note",
        )
        .await;
        let response = gen
            .generate_response("q", &chunks(), &facts())
            .await
            .unwrap();

        assert_eq!(response.citations.len(), 1);
        assert_eq!(response.citations[0].fact_id.as_deref(), Some("us-gaap:Revenues"));
    }

    #[tokio::test]
    async fn test_repeated_sources_cite_once() {
        let (gen, _) = generator("ANSWER: x [1]\nSOURCES:\n[1] a\n[1] again").await;
        let response = gen.generate_response("q", &chunks(), &[]).await.unwrap();
        assert_eq!(response.citations.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_sources_is_malformed() {
        let (gen, _) = generator("Revenue was large.").await;
        let err = gen
            .generate_response("q", &chunks(), &facts())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_model_failure_is_upstream_error() {
        let store = Arc::new(InMemoryStore::new());
        let gen = ResponseGenerator::new(Arc::new(ScriptedChatModel::new().fail("503")), store)
            .unwrap();
        let err = gen.generate_response("q", &chunks(), &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Upstream { .. }));
    }

    #[tokio::test]
    async fn test_prompt_carries_contexts() {
        let (gen, llm) = generator("ANSWER: ok\nSOURCES:\n").await;
        gen.generate_response("What was revenue?", &chunks(), &facts())
            .await
            .unwrap();

        let requests = llm.requests.lock().unwrap();
        let prompt = &requests[0].user;
        assert!(prompt.contains("Question: What was revenue?"));
        assert!(prompt.contains("\"document_id\": \"TEST_2023_4_10K\""));
        assert!(prompt.contains("\"fact_id\": \"us-gaap:Revenues\""));
        assert!(prompt.contains("\"fiscal_period\": \"FY 2023\""));
        assert!(prompt.contains("\"index\": 3"));
        assert!(prompt.contains("prefer the fact value"));
    }

    #[test]
    fn test_excerpt_truncates_long_content() {
        let long = "a".repeat(300);
        assert_eq!(excerpt(&long).len(), CITATION_CONTENT_CHARS + 3);
        assert_eq!(excerpt("short"), "short");
    }
}
