//! Content Retriever.
//!
//! Two independent paths feed the Response Generator:
//!
//! - **Chunks**: nearest-neighbour search restricted to the selected
//!   documents, cut to `top_k`, then optionally reordered by the chat
//!   model.
//! - **Facts**: nearest-neighbour search over the whole fact catalog,
//!   followed by a value lookup for every combination of the question's
//!   companies and years with all four quarters and both forms.

use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingService;
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{extract_json_object, ChatModel, ChatRequest};
use crate::models::{
    generate_document_id, DocumentReference, Fact, FactMatch, FilingType, QueryAnalysis,
    RelevantChunk,
};
use crate::store::{ChunkFilter, Store};

const RERANK_SYSTEM_PROMPT: &str = "You are a financial analysis assistant that helps rank \
document chunks by relevance to a query. Focus on financial metrics, company performance, and \
specific data points that answer the query.";

/// Facts similar to the question plus the values found for them.
#[derive(Debug, Clone, Default)]
pub struct FactRetrieval {
    pub facts: Vec<(Fact, f32)>,
    pub values: Vec<FactMatch>,
}

#[derive(Debug, Deserialize)]
struct Ranking {
    #[serde(default)]
    ranking: Vec<serde_json::Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

pub struct ContentRetriever {
    embeddings: Arc<EmbeddingService>,
    llm: Arc<dyn ChatModel>,
    store: Arc<dyn Store>,
    config: RetrievalConfig,
}

impl ContentRetriever {
    pub fn new(
        embeddings: Arc<EmbeddingService>,
        llm: Arc<dyn ChatModel>,
        store: Arc<dyn Store>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embeddings,
            llm,
            store,
            config,
        }
    }

    async fn query_vector(&self, analysis: &QueryAnalysis) -> Vec<f32> {
        match &analysis.embedding {
            Some(v) => v.clone(),
            None => self.embeddings.embed_query_analysis(analysis).await,
        }
    }

    /// Most relevant chunks of the selected documents.
    ///
    /// No selected documents means no chunks.
    pub async fn retrieve_content(
        &self,
        analysis: &QueryAnalysis,
        references: &[DocumentReference],
    ) -> PipelineResult<Vec<RelevantChunk>> {
        if references.is_empty() {
            debug!("no documents selected; skipping chunk search");
            return Ok(Vec::new());
        }

        let vector = self.query_vector(analysis).await;
        let filter = ChunkFilter::documents(
            references.iter().map(|r| r.document_id.clone()).collect(),
        );
        let mut chunks: Vec<RelevantChunk> = self
            .embeddings
            .search_by_embedding(&vector, self.config.top_k, &filter)
            .await?
            .into_iter()
            .map(|(chunk, relevance_score)| RelevantChunk {
                chunk,
                relevance_score,
            })
            .collect();

        chunks.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        chunks.truncate(self.config.top_k);

        if self.config.rerank && chunks.len() > 1 {
            chunks = self.rerank(&analysis.query, chunks).await;
        }

        info!(chunks = chunks.len(), "retrieved content");
        Ok(chunks)
    }

    /// Reorder `chunks` by the chat model's judgement.
    ///
    /// Ranked chunks score `1 - position / ranked`; chunks the model left
    /// out follow at 0.0. Any failure returns `chunks` unchanged.
    pub async fn rerank(&self, query: &str, chunks: Vec<RelevantChunk>) -> Vec<RelevantChunk> {
        let request = ChatRequest::new(
            RERANK_SYSTEM_PROMPT,
            rerank_prompt(query, &chunks, self.config.rerank_content_chars),
        )
        .json();

        let reply = match self.llm.complete(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "reranking failed; keeping similarity order");
                return chunks;
            }
        };

        let Some(ranking) = parse_ranking(&reply, chunks.len()) else {
            warn!(reply = %reply, "invalid ranking from model; keeping similarity order");
            return chunks;
        };

        apply_ranking(chunks, &ranking)
    }

    /// Facts similar to the question and their values for the question's
    /// companies and years.
    pub async fn retrieve_facts(&self, analysis: &QueryAnalysis) -> PipelineResult<FactRetrieval> {
        let vector = self.query_vector(analysis).await;
        let facts: Vec<(Fact, f32)> = self
            .embeddings
            .search_facts(&vector, self.config.fact_top_k)
            .await?
            .into_iter()
            .filter(|(_, score)| *score >= self.config.fact_min_similarity)
            .collect();

        let mut values = Vec::new();
        for ticker in &analysis.companies {
            for &year in &analysis.years {
                for quarter in 1..=4u32 {
                    for filing_type in [FilingType::TenK, FilingType::TenQ] {
                        let document_id =
                            generate_document_id(ticker, year, Some(quarter), filing_type.as_str());
                        for (fact, _) in &facts {
                            let found = self
                                .store
                                .fact_values(&fact.fact_id, &document_id)
                                .await
                                .map_err(PipelineError::storage)?;
                            values.extend(found.into_iter().map(|value| FactMatch {
                                value,
                                description: fact.description.clone(),
                            }));
                        }
                    }
                }
            }
        }

        info!(facts = facts.len(), values = values.len(), "retrieved facts");
        Ok(FactRetrieval { facts, values })
    }
}

fn rerank_prompt(query: &str, chunks: &[RelevantChunk], content_chars: usize) -> String {
    let listing: Vec<String> = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let content: String = c.chunk.content.chars().take(content_chars).collect();
            format!(
                "Chunk {}:\nType: {}\nLocation: {}\nContent: {}...\n",
                i + 1,
                c.chunk.content_type.as_str(),
                c.chunk.location,
                content
            )
        })
        .collect();

    format!(
        "Rerank these document chunks by their relevance to the following query.\n\n\
         Query: {}\n\n\
         When evaluating relevance, consider:\n\
         1. Direct answers to the query\n\
         2. Contextual information that helps understand the answer\n\
         3. Financial data that supports the query's intent\n\
         4. Recency and specificity of information\n\n\
         Here are the chunks:\n\n{}\n\
         Respond with a JSON object with a \"ranking\" key holding the 1-based chunk numbers \
         from most to least relevant, and a \"reasoning\" key with a brief explanation.\n\
         Example: {{\"ranking\": [3, 1, 2], \"reasoning\": \"Chunk 3 answers the question directly.\"}}",
        query,
        listing.join("\n")
    )
}

/// Zero-based chunk positions from the model's reply, in ranked order.
/// Out-of-range and repeated entries are dropped.
fn parse_ranking(reply: &str, len: usize) -> Option<Vec<usize>> {
    let value = extract_json_object(reply)?;
    let ranking: Ranking = serde_json::from_value(value).ok()?;
    if let Some(reasoning) = &ranking.reasoning {
        debug!(reasoning = %reasoning, "rerank reasoning");
    }

    let mut seen = HashSet::new();
    let order: Vec<usize> = ranking
        .ranking
        .iter()
        .filter_map(|v| v.as_u64())
        .filter(|n| (1..=len as u64).contains(n))
        .map(|n| n as usize - 1)
        .filter(|i| seen.insert(*i))
        .collect();
    Some(order)
}

fn apply_ranking(chunks: Vec<RelevantChunk>, order: &[usize]) -> Vec<RelevantChunk> {
    let ranked = order.len();
    let mut slots: Vec<Option<RelevantChunk>> = chunks.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(slots.len());

    for (position, &index) in order.iter().enumerate() {
        if let Some(mut chunk) = slots.get_mut(index).and_then(Option::take) {
            chunk.relevance_score = 1.0 - position as f32 / ranked as f32;
            out.push(chunk);
        }
    }
    for mut chunk in slots.into_iter().flatten() {
        chunk.relevance_score = 0.0;
        out.push(chunk);
    }
    out
}
