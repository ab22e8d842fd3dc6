//! Document Store abstraction.
//!
//! The [`Store`] trait covers everything the pipeline persists: companies,
//! filings, their parsed text and tables, embedded chunks, and XBRL facts
//! with their observed values. Nearest-neighbour search is part of the
//! trait so each backend can decide how to rank.
//!
//! Two backends ship with the crate:
//! - [`SqliteStore`]: the production backend, brute-force cosine over
//!   embedding blobs.
//! - [`InMemoryStore`]: `RwLock`-guarded maps for tests.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert_company`](Store::upsert_company) | Create a company or fill in its name |
//! | [`mark_facts_ingested`](Store::mark_facts_ingested) | Record that a company's XBRL facts are stored |
//! | [`insert_document`](Store::insert_document) | Record a filing |
//! | [`save_parsed_document`](Store::save_parsed_document) | Persist text chunks and tables |
//! | [`delete_document`](Store::delete_document) | Remove a filing and everything derived from it |
//! | [`upsert_chunk`](Store::upsert_chunk) | Store an embedded chunk |
//! | [`search_chunks`](Store::search_chunks) | Cosine search over chunks |
//! | [`upsert_fact`](Store::upsert_fact) | Create or refresh a fact definition |
//! | [`insert_fact_value`](Store::insert_fact_value) | Record a value unless it is a duplicate |
//! | [`search_facts`](Store::search_facts) | Cosine search over embedded facts |

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Company, DocumentChunk, DocumentMetadata, Fact, FactValue, FilingType, ParsedDocument,
};

/// Restricts a chunk search.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    /// Only chunks belonging to one of these documents. `None` searches all.
    pub document_ids: Option<Vec<String>>,
}

impl ChunkFilter {
    pub fn documents(ids: Vec<String>) -> Self {
        Self {
            document_ids: Some(ids),
        }
    }

    pub(crate) fn allows(&self, document_id: &str) -> bool {
        match &self.document_ids {
            Some(ids) => ids.iter().any(|id| id == document_id),
            None => true,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a company, or set its name if it was unknown.
    async fn upsert_company(&self, company: &Company) -> Result<()>;

    /// Upsert the company and flag its XBRL facts as stored. Call only
    /// once every fact and value has been written.
    async fn mark_facts_ingested(&self, company: &Company) -> Result<()>;

    /// Whether [`mark_facts_ingested`](Store::mark_facts_ingested) has run
    /// for this ticker. A company row created by a filing alone does not count.
    async fn facts_ingested(&self, ticker: &str) -> Result<bool>;

    /// Record a filing. Fails if the id already exists.
    async fn insert_document(&self, metadata: &DocumentMetadata) -> Result<()>;

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentMetadata>>;

    /// Filings for a company and year, optionally narrowed by form.
    async fn find_documents(
        &self,
        ticker: &str,
        year: i32,
        filing_type: Option<FilingType>,
    ) -> Result<Vec<DocumentMetadata>>;

    /// Remove a filing with its chunks, tables, embeddings, and the fact
    /// values recorded against its id. Returns whether it existed.
    async fn delete_document(&self, document_id: &str) -> Result<bool>;

    /// Persist the text chunks and tables of a parsed filing as one unit.
    async fn save_parsed_document(&self, parsed: &ParsedDocument) -> Result<()>;

    /// Store a chunk together with its embedding.
    async fn upsert_chunk(&self, chunk: &DocumentChunk, embedding: &[f32]) -> Result<()>;

    /// Most similar chunks first, as `(chunk, cosine similarity)`.
    async fn search_chunks(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<(DocumentChunk, f32)>>;

    /// Insert a fact or refresh its label and description. An existing
    /// embedding is kept when `fact.embedding` is `None`.
    async fn upsert_fact(&self, fact: &Fact) -> Result<()>;

    async fn get_fact(&self, fact_id: &str) -> Result<Option<Fact>>;

    /// Insert unless a value with the same
    /// `(fact_id, ticker, fiscal_year, fiscal_period, filing_type)` exists.
    /// Returns whether a row was written.
    async fn insert_fact_value(&self, value: &FactValue) -> Result<bool>;

    async fn fact_values(&self, fact_id: &str, document_id: &str) -> Result<Vec<FactValue>>;

    /// Most similar embedded facts first. Facts without an embedding are
    /// never returned.
    async fn search_facts(&self, query_vec: &[f32], top_k: usize) -> Result<Vec<(Fact, f32)>>;
}

/// Sort `(item, score)` pairs by descending score and keep `top_k`.
pub(crate) fn rank<T>(mut scored: Vec<(T, f32)>, top_k: usize) -> Vec<(T, f32)> {
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}
