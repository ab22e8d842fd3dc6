//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap` and `Vec` behind `tokio::sync::RwLock`. Search is
//! brute-force cosine similarity over every stored vector.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embedding::cosine_similarity;
use crate::models::{
    Company, DocumentChunk, DocumentMetadata, Fact, FactValue, FilingType, ParsedDocument,
    Table, TextChunk,
};

use super::{rank, ChunkFilter, Store};

struct StoredChunk {
    chunk: DocumentChunk,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Inner {
    companies: HashMap<String, Company>,
    facts_ingested: HashSet<String>,
    documents: HashMap<String, DocumentMetadata>,
    text_chunks: Vec<TextChunk>,
    tables: Vec<Table>,
    chunks: Vec<StoredChunk>,
    facts: HashMap<String, Fact>,
    fact_values: Vec<FactValue>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_company(&self, company: &Company) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .companies
            .entry(company.ticker.clone())
            .or_insert_with(|| company.clone());
        if entry.name.is_none() {
            entry.name = company.name.clone();
        }
        Ok(())
    }

    async fn mark_facts_ingested(&self, company: &Company) -> Result<()> {
        self.upsert_company(company).await?;
        self.inner
            .write()
            .await
            .facts_ingested
            .insert(company.ticker.clone());
        Ok(())
    }

    async fn facts_ingested(&self, ticker: &str) -> Result<bool> {
        Ok(self.inner.read().await.facts_ingested.contains(ticker))
    }

    async fn insert_document(&self, metadata: &DocumentMetadata) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.documents.contains_key(&metadata.document_id) {
            bail!("document {} already exists", metadata.document_id);
        }
        inner
            .documents
            .insert(metadata.document_id.clone(), metadata.clone());
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentMetadata>> {
        Ok(self.inner.read().await.documents.get(document_id).cloned())
    }

    async fn find_documents(
        &self,
        ticker: &str,
        year: i32,
        filing_type: Option<FilingType>,
    ) -> Result<Vec<DocumentMetadata>> {
        let inner = self.inner.read().await;
        let mut docs: Vec<DocumentMetadata> = inner
            .documents
            .values()
            .filter(|d| d.ticker == ticker && d.year == year)
            .filter(|d| filing_type.map_or(true, |ft| d.filing_type == ft))
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        Ok(docs)
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.documents.remove(document_id).is_none() {
            return Ok(false);
        }
        inner.text_chunks.retain(|c| c.document_id != document_id);
        inner.tables.retain(|t| t.document_id != document_id);
        inner.chunks.retain(|c| c.chunk.document_id != document_id);
        inner.fact_values.retain(|v| v.document_id != document_id);
        Ok(true)
    }

    async fn save_parsed_document(&self, parsed: &ParsedDocument) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.documents.contains_key(&parsed.document_id) {
            bail!("document {} does not exist", parsed.document_id);
        }
        inner
            .text_chunks
            .retain(|c| c.document_id != parsed.document_id);
        inner.tables.retain(|t| t.document_id != parsed.document_id);
        inner.text_chunks.extend(parsed.text_chunks.iter().cloned());
        inner.tables.extend(parsed.tables.iter().cloned());
        Ok(())
    }

    async fn upsert_chunk(&self, chunk: &DocumentChunk, embedding: &[f32]) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.chunks.retain(|c| c.chunk.chunk_id != chunk.chunk_id);
        inner.chunks.push(StoredChunk {
            chunk: chunk.clone(),
            vector: embedding.to_vec(),
        });
        Ok(())
    }

    async fn search_chunks(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<(DocumentChunk, f32)>> {
        let inner = self.inner.read().await;
        let scored = inner
            .chunks
            .iter()
            .filter(|c| filter.allows(&c.chunk.document_id))
            .map(|c| (c.chunk.clone(), cosine_similarity(query_vec, &c.vector)))
            .collect();
        Ok(rank(scored, top_k))
    }

    async fn upsert_fact(&self, fact: &Fact) -> Result<()> {
        let mut inner = self.inner.write().await;
        let kept = inner
            .facts
            .get(&fact.fact_id)
            .and_then(|existing| existing.embedding.clone());
        let mut stored = fact.clone();
        if stored.embedding.is_none() {
            stored.embedding = kept;
        }
        inner.facts.insert(fact.fact_id.clone(), stored);
        Ok(())
    }

    async fn get_fact(&self, fact_id: &str) -> Result<Option<Fact>> {
        Ok(self.inner.read().await.facts.get(fact_id).cloned())
    }

    async fn insert_fact_value(&self, value: &FactValue) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let duplicate = inner.fact_values.iter().any(|v| {
            v.fact_id == value.fact_id
                && v.ticker == value.ticker
                && v.fiscal_year == value.fiscal_year
                && v.fiscal_period == value.fiscal_period
                && v.filing_type == value.filing_type
        });
        if duplicate {
            return Ok(false);
        }
        inner.fact_values.push(value.clone());
        Ok(true)
    }

    async fn fact_values(&self, fact_id: &str, document_id: &str) -> Result<Vec<FactValue>> {
        let inner = self.inner.read().await;
        Ok(inner
            .fact_values
            .iter()
            .filter(|v| v.fact_id == fact_id && v.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn search_facts(&self, query_vec: &[f32], top_k: usize) -> Result<Vec<(Fact, f32)>> {
        let inner = self.inner.read().await;
        let scored = inner
            .facts
            .values()
            .filter_map(|f| {
                let vector = f.embedding.as_ref()?;
                Some((f.clone(), cosine_similarity(query_vec, vector)))
            })
            .collect();
        Ok(rank(scored, top_k))
    }
}
