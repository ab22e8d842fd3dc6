//! Embedding Service.
//!
//! Wraps an [`EmbeddingProvider`] with the policies the pipeline relies on:
//! inputs are truncated to a character budget, and a failed call degrades
//! to an all-zero vector instead of an error. Document and fact embedding
//! persist through the [`Store`] as they go, so a failure part way through
//! leaves the earlier items stored.

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{BatchReport, PipelineError, PipelineResult};
use crate::llm::{ChatModel, ChatRequest};
use crate::models::{ContentType, DocumentChunk, Fact, ParsedDocument, QueryAnalysis};
use crate::store::{ChunkFilter, Store};

use super::EmbeddingProvider;

const EXPANSION_SYSTEM_PROMPT: &str = "You are a financial data expert. Enhance the user's query \
by adding synonyms and related terms for financial concepts, metrics, time periods, and company \
names. Keep the response concise and limited to the expanded query.";

pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn ChatModel>,
    store: Arc<dyn Store>,
    max_chars: usize,
    concurrency: usize,
}

impl EmbeddingService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn ChatModel>,
        store: Arc<dyn Store>,
        max_chars: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            provider,
            llm,
            store,
            max_chars,
            concurrency: concurrency.max(1),
        }
    }

    /// Embed `text`, never failing.
    ///
    /// Input longer than the character budget is cut at a char boundary.
    /// Any provider error, or a response of the wrong length, yields a
    /// zero vector of the configured dimensionality.
    pub async fn generate_embedding(&self, text: &str) -> Vec<f32> {
        let dims = self.provider.dims();
        let input = truncate_chars(text, self.max_chars);
        if input.len() < text.len() {
            debug!(
                max_chars = self.max_chars,
                original_bytes = text.len(),
                kept_bytes = input.len(),
                "truncated embedding input"
            );
        }

        match self.provider.embed(&[input.to_string()]).await {
            Ok(mut vectors) if vectors.len() == 1 && vectors[0].len() == dims => vectors.remove(0),
            Ok(vectors) => {
                warn!(
                    returned = vectors.len(),
                    dims, "embedding response had unexpected shape; using zero vector"
                );
                vec![0.0; dims]
            }
            Err(e) => {
                warn!(error = %e, "embedding failed; using zero vector");
                vec![0.0; dims]
            }
        }
    }

    /// Embed every chunk and table of a parsed filing and store each one
    /// with its vector.
    pub async fn embed_document(&self, parsed: &ParsedDocument) -> BatchReport {
        let chunks = to_document_chunks(parsed);
        let mut report = BatchReport::default();

        for chunk in &chunks {
            let embedding = self.generate_embedding(&chunk.content).await;
            match self.store.upsert_chunk(chunk, &embedding).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!(chunk_id = %chunk.chunk_id, error = %e, "failed to store chunk");
                    report.failed += 1;
                }
            }
        }

        info!(
            document_id = %parsed.document_id,
            stored = report.succeeded,
            failed = report.failed,
            "embedded document"
        );
        report
    }

    /// Embedding of a fact's label and description.
    pub async fn embed_fact(&self, fact: &Fact) -> Vec<f32> {
        self.generate_embedding(&fact.embedding_text()).await
    }

    /// Embed and persist facts that have no embedding yet.
    ///
    /// Facts run concurrently up to the configured limit. A fact whose
    /// embedding comes back all zeros is counted as failed and left
    /// unembedded so a later run can fill it in.
    ///
    /// Per-fact futures are boxed; the unboxed stream is not `Send` for
    /// every borrow of `self`.
    pub async fn embed_facts(&self, facts: &[Fact]) -> BatchReport {
        let pending: Vec<BoxFuture<'_, FactOutcome>> = facts
            .iter()
            .map(|fact| self.embed_one_fact(fact).boxed())
            .collect();
        let outcomes: Vec<FactOutcome> = stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = BatchReport::default();
        for outcome in outcomes {
            match outcome {
                FactOutcome::Embedded => report.succeeded += 1,
                FactOutcome::AlreadyEmbedded => report.skipped += 1,
                FactOutcome::Failed => report.failed += 1,
            }
        }

        info!(
            embedded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            "embedded facts"
        );
        report
    }

    async fn embed_one_fact(&self, fact: &Fact) -> FactOutcome {
        if fact.embedding.is_some() {
            return FactOutcome::AlreadyEmbedded;
        }
        match self.store.get_fact(&fact.fact_id).await {
            Ok(Some(stored)) if stored.embedding.is_some() => {
                return FactOutcome::AlreadyEmbedded;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(fact_id = %fact.fact_id, error = %e, "failed to read fact");
                return FactOutcome::Failed;
            }
        }

        let embedding = self.embed_fact(fact).await;
        if embedding.iter().all(|v| *v == 0.0) {
            return FactOutcome::Failed;
        }

        let mut stored = fact.clone();
        stored.embedding = Some(embedding);
        match self.store.upsert_fact(&stored).await {
            Ok(()) => FactOutcome::Embedded,
            Err(e) => {
                warn!(fact_id = %fact.fact_id, error = %e, "failed to store fact embedding");
                FactOutcome::Failed
            }
        }
    }

    /// Nearest chunks to `vector`, delegated to the store.
    pub async fn search_by_embedding(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> PipelineResult<Vec<(DocumentChunk, f32)>> {
        self.store
            .search_chunks(vector, top_k, filter)
            .await
            .map_err(PipelineError::storage)
    }

    /// Nearest embedded facts to `vector`, delegated to the store.
    pub async fn search_facts(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> PipelineResult<Vec<(Fact, f32)>> {
        self.store
            .search_facts(vector, top_k)
            .await
            .map_err(PipelineError::storage)
    }

    /// Embed a question after expanding it with financial synonyms.
    ///
    /// If the expansion call fails the original question is used on its own.
    pub async fn embed_query_analysis(&self, analysis: &QueryAnalysis) -> Vec<f32> {
        let request = ChatRequest::new(
            EXPANSION_SYSTEM_PROMPT,
            format!(
                "Original query: {}\n\nEnhance this query with relevant synonyms and related terms to improve semantic search.",
                analysis.query
            ),
        );

        let text = match self.llm.complete(&request).await {
            Ok(expanded) => format!(
                "Original Query: {}\nEnhanced Query: {}",
                analysis.query,
                expanded.trim()
            ),
            Err(e) => {
                warn!(error = %e, "query expansion failed; embedding the original query");
                analysis.query.clone()
            }
        };

        self.generate_embedding(&text).await
    }
}

enum FactOutcome {
    Embedded,
    AlreadyEmbedded,
    Failed,
}

/// Longest prefix of `text` holding at most `max_chars` characters.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Flatten a parsed filing into embeddable chunks: text chunks first,
/// then tables rendered as pipe-separated rows.
pub fn to_document_chunks(parsed: &ParsedDocument) -> Vec<DocumentChunk> {
    let mut chunks = Vec::with_capacity(parsed.text_chunks.len() + parsed.tables.len());

    for text in &parsed.text_chunks {
        chunks.push(DocumentChunk {
            chunk_id: text.chunk_id.clone(),
            document_id: text.document_id.clone(),
            content: text.text.clone(),
            content_type: ContentType::Text,
            location: format!("Section: {}", text.section.as_deref().unwrap_or("Unknown")),
        });
    }

    for table in &parsed.tables {
        let title = table.caption.as_deref().unwrap_or("Untitled");
        let mut content = format!("Table: {}\n", title);
        for row in &table.table_data {
            content.push_str(&row.join(" | "));
            content.push('\n');
        }
        chunks.push(DocumentChunk {
            chunk_id: table.chunk_id.clone(),
            document_id: table.document_id.clone(),
            content,
            content_type: ContentType::Table,
            location: format!("Section: {}, Table: {}", table.section, title),
        });
    }

    chunks
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Bag-of-words vectors: each lowercase word bumps one bucket.
    pub struct HashingProvider {
        pub dims: usize,
        pub calls: AtomicUsize,
    }

    impl HashingProvider {
        pub fn new(dims: usize) -> Self {
            Self {
                dims,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn vector(&self, text: &str) -> Vec<f32> {
            let mut v = vec![0.0; self.dims];
            for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
                let bucket = word
                    .to_lowercase()
                    .bytes()
                    .fold(0usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
                v[bucket % self.dims] += 1.0;
            }
            v
        }
    }

    #[async_trait]
    impl EmbeddingProvider for HashingProvider {
        fn model_name(&self) -> &str {
            "hashing"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| self.vector(t)).collect())
        }
    }

    pub struct FailingProvider {
        pub dims: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            anyhow::bail!("connection refused")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FailingProvider, HashingProvider};
    use super::*;
    use crate::llm::testing::ScriptedChatModel;
    use crate::models::{DocumentMetadata, FactType, FilingHeader, FilingType, Table, TextChunk};
    use crate::store::InMemoryStore;
    use std::sync::atomic::Ordering;

    fn service_with(
        provider: Arc<dyn EmbeddingProvider>,
        llm: ScriptedChatModel,
        store: Arc<InMemoryStore>,
    ) -> EmbeddingService {
        EmbeddingService::new(provider, Arc::new(llm), store, 28000, 4)
    }

    fn parsed() -> ParsedDocument {
        let metadata = DocumentMetadata::new("TEST", 2023, None, FilingType::TenK, None);
        let id = metadata.document_id.clone();
        ParsedDocument {
            document_id: id.clone(),
            metadata,
            header: FilingHeader::default(),
            text_chunks: vec![TextChunk {
                chunk_id: format!("{}_text_0", id),
                document_id: id.clone(),
                text: "Revenue increased due to strong product demand".to_string(),
                section: Some("Business".to_string()),
                page_number: None,
            }],
            tables: vec![Table {
                chunk_id: format!("{}_table_0", id),
                document_id: id.clone(),
                table_html: String::new(),
                table_data: vec![
                    vec!["".to_string(), "2023".to_string()],
                    vec!["Revenue".to_string(), "100".to_string()],
                ],
                caption: None,
                section: "Financial Statements".to_string(),
                page_number: None,
            }],
        }
    }

    fn fact(id: &str) -> Fact {
        Fact {
            fact_id: id.to_string(),
            label: "Revenues".to_string(),
            description: "Total revenue".to_string(),
            taxonomy: "us-gaap".to_string(),
            fact_type: FactType::Monetary,
            period_type: None,
            embedding: None,
        }
    }

    #[tokio::test]
    async fn test_failed_embedding_returns_zero_vector() {
        let service = service_with(
            Arc::new(FailingProvider { dims: 3072 }),
            ScriptedChatModel::new(),
            Arc::new(InMemoryStore::new()),
        );
        let v = service.generate_embedding("anything").await;
        assert_eq!(v.len(), 3072);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_matching_response_passes_through() {
        let provider = Arc::new(HashingProvider::new(8));
        let service = service_with(
            provider.clone(),
            ScriptedChatModel::new(),
            Arc::new(InMemoryStore::new()),
        );
        assert_eq!(
            service.generate_embedding("revenue").await,
            provider.vector("revenue")
        );
    }

    #[test]
    fn test_truncate_counts_characters() {
        let text = "ab\u{00e9}cd";
        assert_eq!(truncate_chars(text, 2), "ab");
        assert_eq!(truncate_chars(text, 3), "ab\u{00e9}");
        assert_eq!(truncate_chars(text, 5), text);
        assert_eq!(truncate_chars(text, 100), text);
        // Multi-byte characters count once each.
        assert_eq!(truncate_chars("\u{00e9}\u{00e9}\u{00e9}", 2), "\u{00e9}\u{00e9}");
    }

    #[test]
    fn test_to_document_chunks_formats_text_and_tables() {
        let chunks = to_document_chunks(&parsed());
        assert_eq!(chunks.len(), 2);

        assert_eq!(chunks[0].content_type, ContentType::Text);
        assert_eq!(chunks[0].location, "Section: Business");

        assert_eq!(chunks[1].content_type, ContentType::Table);
        assert_eq!(chunks[1].content, "Table: Untitled\n | 2023\nRevenue | 100\n");
        assert_eq!(
            chunks[1].location,
            "Section: Financial Statements, Table: Untitled"
        );
    }

    #[tokio::test]
    async fn test_embed_document_stores_every_chunk() {
        let store = Arc::new(InMemoryStore::new());
        let doc = parsed();
        store.insert_document(&doc.metadata).await.unwrap();
        let service = service_with(
            Arc::new(HashingProvider::new(16)),
            ScriptedChatModel::new(),
            store.clone(),
        );

        let report = service.embed_document(&doc).await;
        assert_eq!(report.succeeded, 2);

        let hits = store
            .search_chunks(&HashingProvider::new(16).vector("revenue demand"), 5, &ChunkFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_embed_facts_skips_embedded_facts() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(HashingProvider::new(16));
        let service = service_with(provider.clone(), ScriptedChatModel::new(), store.clone());

        let mut already = fact("us-gaap:Assets");
        already.embedding = Some(vec![1.0; 16]);
        store.upsert_fact(&already).await.unwrap();
        store.upsert_fact(&fact("us-gaap:Revenues")).await.unwrap();

        let report = service
            .embed_facts(&[fact("us-gaap:Assets"), fact("us-gaap:Revenues")])
            .await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let revenues = store.get_fact("us-gaap:Revenues").await.unwrap().unwrap();
        assert!(revenues.embedding.is_some());
    }

    #[tokio::test]
    async fn test_embed_facts_leaves_failed_facts_unembedded() {
        let store = Arc::new(InMemoryStore::new());
        store.upsert_fact(&fact("us-gaap:Revenues")).await.unwrap();
        let service = service_with(
            Arc::new(FailingProvider { dims: 16 }),
            ScriptedChatModel::new(),
            store.clone(),
        );

        let report = service.embed_facts(&[fact("us-gaap:Revenues")]).await;
        assert_eq!(report.failed, 1);
        let stored = store.get_fact("us-gaap:Revenues").await.unwrap().unwrap();
        assert!(stored.embedding.is_none());
    }

    #[tokio::test]
    async fn test_embed_query_analysis_uses_expansion() {
        let provider = Arc::new(HashingProvider::new(32));
        let llm = ScriptedChatModel::new().reply("sales turnover top line");
        let service = service_with(provider.clone(), llm, Arc::new(InMemoryStore::new()));

        let analysis = QueryAnalysis::empty("What was revenue?");
        let v = service.embed_query_analysis(&analysis).await;
        let expected = provider.vector(
            "Original Query: What was revenue?\nEnhanced Query: sales turnover top line",
        );
        assert_eq!(v, expected);
    }

    #[tokio::test]
    async fn test_embed_query_analysis_falls_back_to_query() {
        let provider = Arc::new(HashingProvider::new(32));
        let llm = ScriptedChatModel::new().fail("timeout");
        let service = service_with(provider.clone(), llm, Arc::new(InMemoryStore::new()));

        let analysis = QueryAnalysis::empty("What was revenue?");
        let v = service.embed_query_analysis(&analysis).await;
        assert_eq!(v, provider.vector("What was revenue?"));
    }
}
