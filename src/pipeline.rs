//! Ingestion and query flows over a typed component aggregate.
//!
//! [`Components`] owns one instance of every stage and is built once,
//! either from a [`Config`] for real use or from injected parts in tests.
//! Each step of a flow reports failures as a [`StepError`] that names the
//! step, so callers can tell the user which part of the pipeline failed.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::analyzer::QueryAnalyzer;
use crate::config::Config;
use crate::db;
use crate::edgar::{EdgarClient, FilingSource};
use crate::embedding::{create_provider, EmbeddingProvider, EmbeddingService};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{create_chat_model, ChatModel};
use crate::migrate;
use crate::models::{
    generate_document_id, Citation, Company, DocumentMetadata, FactValue, FilingType,
    ParsedDocument,
};
use crate::responder::ResponseGenerator;
use crate::retriever::ContentRetriever;
use crate::segment::Segmenter;
use crate::selector::DocumentSelector;
use crate::store::{SqliteStore, Store};

pub const NOTHING_RELEVANT: &str = "No relevant content found for the query";

/// A named step of the ingestion or query flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CheckingDocument,
    DownloadingFacts,
    StoringFacts,
    DownloadingFiling,
    StoringDocument,
    DeletingDocument,
    SelectingDocuments,
    RetrievingContent,
    RetrievingFacts,
    GeneratingResponse,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::CheckingDocument => "checking for existing document",
            Step::DownloadingFacts => "downloading XBRL facts",
            Step::StoringFacts => "storing XBRL facts",
            Step::DownloadingFiling => "downloading filing",
            Step::StoringDocument => "processing filing",
            Step::DeletingDocument => "deleting document",
            Step::SelectingDocuments => "selecting documents",
            Step::RetrievingContent => "retrieving content",
            Step::RetrievingFacts => "retrieving facts",
            Step::GeneratingResponse => "generating response",
        };
        f.write_str(name)
    }
}

/// A pipeline failure and the step it happened in.
///
/// Failures outside any step (request validation, an empty retrieval)
/// carry no step and display the bare message.
#[derive(Debug)]
pub struct StepError {
    pub step: Option<Step>,
    pub error: PipelineError,
}

impl StepError {
    fn at(step: Step) -> impl FnOnce(PipelineError) -> StepError {
        move |error| {
            error!(step = %step, error = %error, "pipeline step failed");
            StepError {
                step: Some(step),
                error,
            }
        }
    }

    fn bare(error: PipelineError) -> Self {
        Self { step: None, error }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let detail = match &self.error {
            PipelineError::NotFound(m) | PipelineError::InvalidRequest(m) => m.clone(),
            other => other.to_string(),
        };
        match self.step {
            Some(step) => write!(f, "Error {}: {}", step, detail),
            None => f.write_str(&detail),
        }
    }
}

impl std::error::Error for StepError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub type StepResult<T> = std::result::Result<T, StepError>;

/// Result of `POST /process`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessOutcome {
    pub document_id: String,
    pub ticker: String,
    pub year: i32,
    pub quarter: Option<u32>,
    pub filing_type: FilingType,
    pub filing_date: Option<NaiveDate>,
    pub status: String,
    /// False when the filing had already been ingested.
    #[serde(skip)]
    pub created: bool,
}

impl ProcessOutcome {
    fn from_metadata(metadata: DocumentMetadata, created: bool) -> Self {
        Self {
            document_id: metadata.document_id,
            ticker: metadata.ticker,
            year: metadata.year,
            quarter: metadata.quarter,
            filing_type: metadata.filing_type,
            filing_date: metadata.filing_date,
            status: "success".to_string(),
            created,
        }
    }
}

/// Result of `POST /query`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub response: String,
    pub citations: Vec<Citation>,
    pub documents_used: Vec<String>,
    pub facts_used: Vec<FactValue>,
}

pub struct Components {
    pub store: Arc<dyn Store>,
    pub filings: Arc<dyn FilingSource>,
    pub segmenter: Segmenter,
    pub embeddings: Arc<EmbeddingService>,
    pub analyzer: QueryAnalyzer,
    pub selector: DocumentSelector,
    pub retriever: ContentRetriever,
    pub responder: ResponseGenerator,
}

impl Components {
    /// Wire every stage from already-built external clients.
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        filings: Arc<dyn FilingSource>,
        provider: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn ChatModel>,
    ) -> anyhow::Result<Self> {
        let embeddings = Arc::new(EmbeddingService::new(
            provider,
            llm.clone(),
            store.clone(),
            config.embedding.max_chars,
            config.embedding.concurrency,
        ));

        Ok(Self {
            segmenter: Segmenter::new()?,
            analyzer: QueryAnalyzer::new(llm.clone(), embeddings.clone()),
            selector: DocumentSelector::new(store.clone()),
            retriever: ContentRetriever::new(
                embeddings.clone(),
                llm.clone(),
                store.clone(),
                config.retrieval.clone(),
            ),
            responder: ResponseGenerator::new(llm, store.clone())?,
            embeddings,
            filings,
            store,
        })
    }

    /// Connect to the database, apply the schema, and build the real
    /// EDGAR and OpenAI clients.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        Self::new(
            config,
            Arc::new(SqliteStore::new(pool)),
            Arc::new(EdgarClient::new(&config.edgar)?),
            create_provider(&config.embedding)?,
            create_chat_model(&config.llm)?,
        )
    }

    /// Ingest one filing.
    ///
    /// A filing that is already stored is returned as it is. Until a
    /// company's XBRL facts are stored, each of its filings pulls them in.
    pub async fn process_filing(
        &self,
        ticker: &str,
        year: i32,
        quarter: Option<u32>,
        filing_type: FilingType,
    ) -> StepResult<ProcessOutcome> {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(StepError::bare(PipelineError::InvalidRequest(
                "ticker must not be empty".to_string(),
            )));
        }
        if let Some(q) = quarter {
            if !(1..=4).contains(&q) {
                return Err(StepError::bare(PipelineError::InvalidRequest(format!(
                    "Quarter must be between 1 and 4, got {}",
                    q
                ))));
            }
        }
        // Annual reports are keyed without a quarter.
        let quarter = match filing_type {
            FilingType::TenK => {
                if let Some(q) = quarter {
                    debug!(ticker = %ticker, year, quarter = q, "ignoring quarter for 10-K");
                }
                None
            }
            FilingType::TenQ => quarter,
        };

        // A 10-Q without a quarter only gets its id once the filing date is known.
        if filing_type == FilingType::TenK || quarter.is_some() {
            let document_id = generate_document_id(&ticker, year, quarter, filing_type.as_str());
            if let Some(existing) = self.existing(&document_id).await? {
                return Ok(ProcessOutcome::from_metadata(existing, false));
            }
        }

        if !self
            .store
            .facts_ingested(&ticker)
            .await
            .map_err(PipelineError::storage)
            .map_err(StepError::at(Step::CheckingDocument))?
        {
            self.ingest_facts(&ticker).await?;
        }

        let filing = self
            .filings
            .download_filing(&ticker, year, quarter, filing_type)
            .await
            .map_err(StepError::at(Step::DownloadingFiling))?;

        if let Some(existing) = self.existing(&filing.metadata.document_id).await? {
            return Ok(ProcessOutcome::from_metadata(existing, false));
        }

        let parsed = self.segmenter.segment(&filing.content, filing.metadata);
        self.store_document(&ticker, &parsed)
            .await
            .map_err(StepError::at(Step::StoringDocument))?;

        let report = self.embeddings.embed_document(&parsed).await;
        if report.failed > 0 {
            warn!(
                document_id = %parsed.document_id,
                failed = report.failed,
                "some chunks could not be stored"
            );
        }

        info!(
            document_id = %parsed.document_id,
            accession_number = %filing.accession_number,
            text_chunks = parsed.text_chunks.len(),
            tables = parsed.tables.len(),
            "processed filing"
        );
        Ok(ProcessOutcome::from_metadata(parsed.metadata, true))
    }

    async fn existing(&self, document_id: &str) -> StepResult<Option<DocumentMetadata>> {
        let found = self
            .store
            .get_document(document_id)
            .await
            .map_err(PipelineError::storage)
            .map_err(StepError::at(Step::CheckingDocument))?;
        if found.is_some() {
            info!(document_id, "filing already processed");
        }
        Ok(found)
    }

    async fn ingest_facts(&self, ticker: &str) -> StepResult<()> {
        let xbrl = self
            .filings
            .download_xbrl_facts(ticker)
            .await
            .map_err(StepError::at(Step::DownloadingFacts))?;

        // The marker goes last so a partial write is retried on the next filing.
        let store_facts = async {
            for fact in &xbrl.facts {
                self.store.upsert_fact(fact).await?;
            }
            let mut inserted = 0usize;
            for value in &xbrl.values {
                if self.store.insert_fact_value(value).await? {
                    inserted += 1;
                }
            }
            self.store
                .mark_facts_ingested(&Company {
                    ticker: ticker.to_string(),
                    name: xbrl.company_name.clone(),
                })
                .await?;
            Ok::<usize, anyhow::Error>(inserted)
        };
        let inserted = store_facts
            .await
            .map_err(PipelineError::storage)
            .map_err(StepError::at(Step::StoringFacts))?;

        let report = self.embeddings.embed_facts(&xbrl.facts).await;
        info!(
            ticker,
            facts = xbrl.facts.len(),
            values = inserted,
            skipped_points = xbrl.skipped,
            embedded = report.succeeded,
            embed_failed = report.failed,
            "ingested XBRL facts"
        );
        Ok(())
    }

    async fn store_document(
        &self,
        ticker: &str,
        parsed: &ParsedDocument,
    ) -> PipelineResult<()> {
        let store = async {
            self.store
                .upsert_company(&Company {
                    ticker: ticker.to_string(),
                    name: parsed.header.company_name.clone(),
                })
                .await?;
            self.store.insert_document(&parsed.metadata).await?;
            self.store.save_parsed_document(parsed).await
        };
        store.await.map_err(PipelineError::storage)
    }

    /// Remove a stored filing with its chunks, tables, embeddings and the
    /// fact values recorded against it. Facts themselves are shared across
    /// filings and stay.
    pub async fn delete_document(&self, document_id: &str) -> StepResult<()> {
        let deleted = self
            .store
            .delete_document(document_id)
            .await
            .map_err(PipelineError::storage)
            .map_err(StepError::at(Step::DeletingDocument))?;
        if !deleted {
            return Err(StepError::bare(PipelineError::NotFound(format!(
                "Document {} not found",
                document_id
            ))));
        }
        info!(document_id, "deleted document");
        Ok(())
    }

    /// Answer a question from stored filings and facts.
    pub async fn answer_query(&self, query: &str) -> StepResult<QueryOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(StepError::bare(PipelineError::InvalidRequest(
                "query must not be empty".to_string(),
            )));
        }

        let analysis = self.analyzer.analyze(query).await;

        let selected = self
            .selector
            .select_documents(&analysis)
            .await
            .map_err(StepError::at(Step::SelectingDocuments))?;

        let chunks = self
            .retriever
            .retrieve_content(&analysis, &selected)
            .await
            .map_err(StepError::at(Step::RetrievingContent))?;

        let facts = self
            .retriever
            .retrieve_facts(&analysis)
            .await
            .map_err(StepError::at(Step::RetrievingFacts))?;

        if chunks.is_empty() && facts.facts.is_empty() && facts.values.is_empty() {
            info!(query, "nothing relevant found");
            return Err(StepError::bare(PipelineError::NotFound(
                NOTHING_RELEVANT.to_string(),
            )));
        }

        let formatted = self
            .responder
            .generate_response(query, &chunks, &facts.values)
            .await
            .map_err(StepError::at(Step::GeneratingResponse))?;

        Ok(QueryOutcome {
            response: formatted.response,
            citations: formatted.citations,
            documents_used: selected.into_iter().map(|r| r.document_id).collect(),
            facts_used: facts.values.into_iter().map(|m| m.value).collect(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeFilings;
    use super::*;
    use crate::edgar::XbrlFacts;
    use crate::embedding::service::testing::HashingProvider;
    use crate::llm::testing::ScriptedChatModel;
    use crate::store::test_support::{fact, fact_value};
    use crate::models::{DocumentChunk, Fact};
    use crate::store::{ChunkFilter, InMemoryStore};
    use std::sync::atomic::{AtomicBool, Ordering};

    const FILING: &str = r#"<html><body>
        <div>Item 7. Management's Discussion and Analysis</div>
        <div>Revenue increased twelve percent year over year, driven by strong demand for
        services and wearables across every geographic segment of the business.</div>
        </body></html>"#;

    fn filed() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 11, 3).unwrap()
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        filings: Arc<FakeFilings>,
        components: Components,
    }

    fn harness(filings: FakeFilings, llm: ScriptedChatModel) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let filings = Arc::new(filings);
        let mut config = Config::with_db_path("/unused.sqlite");
        config.retrieval.rerank = false;
        let components = Components::new(
            &config,
            store.clone(),
            filings.clone(),
            Arc::new(HashingProvider::new(32)),
            Arc::new(llm),
        )
        .unwrap();
        Harness {
            store,
            filings,
            components,
        }
    }

    fn revenue_facts() -> XbrlFacts {
        XbrlFacts {
            company_name: Some("Test Corp".to_string()),
            facts: vec![fact("us-gaap:Revenues", None)],
            values: vec![fact_value("us-gaap:Revenues", "TEST", 2023, "FY", 383.0)],
            skipped: 0,
        }
    }

    #[tokio::test]
    async fn test_process_is_idempotent() {
        let h = harness(
            FakeFilings::default()
                .with_filing("TEST", 2023, None, FilingType::TenK, FILING, filed())
                .with_facts("TEST", revenue_facts()),
            ScriptedChatModel::new(),
        );

        let first = h
            .components
            .process_filing("test", 2023, None, FilingType::TenK)
            .await
            .unwrap();
        assert!(first.created);
        assert_eq!(first.document_id, "TEST_2023_4_10K");
        assert_eq!(first.status, "success");
        assert_eq!(first.filing_date, Some(filed()));

        let second = h
            .components
            .process_filing("TEST", 2023, None, FilingType::TenK)
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.document_id, first.document_id);
        assert_eq!(second.status, "success");
        assert_eq!(h.filings.filing_downloads.load(Ordering::SeqCst), 1);
        assert_eq!(h.filings.fact_downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_filing_ingests_company_facts() {
        let h = harness(
            FakeFilings::default()
                .with_filing("TEST", 2023, None, FilingType::TenK, FILING, filed())
                .with_facts("TEST", revenue_facts()),
            ScriptedChatModel::new(),
        );
        h.components
            .process_filing("TEST", 2023, None, FilingType::TenK)
            .await
            .unwrap();

        assert!(h.store.facts_ingested("TEST").await.unwrap());
        let stored = h.store.get_fact("us-gaap:Revenues").await.unwrap().unwrap();
        assert_eq!(stored.embedding.map(|e| e.len()), Some(32));
        let values = h
            .store
            .fact_values("us-gaap:Revenues", "TEST_2023_4_10K")
            .await
            .unwrap();
        assert_eq!(values.len(), 1);
    }

    /// Delegates to an in-memory store but fails the first fact write.
    struct FailFirstFact {
        inner: InMemoryStore,
        failed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Store for FailFirstFact {
        async fn upsert_company(&self, company: &Company) -> anyhow::Result<()> {
            self.inner.upsert_company(company).await
        }
        async fn mark_facts_ingested(&self, company: &Company) -> anyhow::Result<()> {
            self.inner.mark_facts_ingested(company).await
        }
        async fn facts_ingested(&self, ticker: &str) -> anyhow::Result<bool> {
            self.inner.facts_ingested(ticker).await
        }
        async fn insert_document(&self, metadata: &DocumentMetadata) -> anyhow::Result<()> {
            self.inner.insert_document(metadata).await
        }
        async fn get_document(&self, document_id: &str) -> anyhow::Result<Option<DocumentMetadata>> {
            self.inner.get_document(document_id).await
        }
        async fn find_documents(
            &self,
            ticker: &str,
            year: i32,
            filing_type: Option<FilingType>,
        ) -> anyhow::Result<Vec<DocumentMetadata>> {
            self.inner.find_documents(ticker, year, filing_type).await
        }
        async fn delete_document(&self, document_id: &str) -> anyhow::Result<bool> {
            self.inner.delete_document(document_id).await
        }
        async fn save_parsed_document(&self, parsed: &ParsedDocument) -> anyhow::Result<()> {
            self.inner.save_parsed_document(parsed).await
        }
        async fn upsert_chunk(&self, chunk: &DocumentChunk, embedding: &[f32]) -> anyhow::Result<()> {
            self.inner.upsert_chunk(chunk, embedding).await
        }
        async fn search_chunks(
            &self,
            query_vec: &[f32],
            top_k: usize,
            filter: &ChunkFilter,
        ) -> anyhow::Result<Vec<(DocumentChunk, f32)>> {
            self.inner.search_chunks(query_vec, top_k, filter).await
        }
        async fn upsert_fact(&self, fact: &Fact) -> anyhow::Result<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inner.upsert_fact(fact).await
        }
        async fn get_fact(&self, fact_id: &str) -> anyhow::Result<Option<Fact>> {
            self.inner.get_fact(fact_id).await
        }
        async fn insert_fact_value(&self, value: &FactValue) -> anyhow::Result<bool> {
            self.inner.insert_fact_value(value).await
        }
        async fn fact_values(&self, fact_id: &str, document_id: &str) -> anyhow::Result<Vec<FactValue>> {
            self.inner.fact_values(fact_id, document_id).await
        }
        async fn search_facts(&self, query_vec: &[f32], top_k: usize) -> anyhow::Result<Vec<(Fact, f32)>> {
            self.inner.search_facts(query_vec, top_k).await
        }
    }

    #[tokio::test]
    async fn test_failed_fact_storage_is_retried_on_next_filing() {
        let store = Arc::new(FailFirstFact {
            inner: InMemoryStore::new(),
            failed: AtomicBool::new(false),
        });
        let filings = Arc::new(
            FakeFilings::default()
                .with_filing("TEST", 2023, None, FilingType::TenK, FILING, filed())
                .with_facts("TEST", revenue_facts()),
        );
        let components = Components::new(
            &Config::with_db_path("/unused.sqlite"),
            store.clone(),
            filings.clone(),
            Arc::new(HashingProvider::new(32)),
            Arc::new(ScriptedChatModel::new()),
        )
        .unwrap();

        let err = components
            .process_filing("TEST", 2023, None, FilingType::TenK)
            .await
            .unwrap_err();
        assert_eq!(err.step, Some(Step::StoringFacts));
        assert!(!store.facts_ingested("TEST").await.unwrap());

        components
            .process_filing("TEST", 2023, None, FilingType::TenK)
            .await
            .unwrap();
        assert_eq!(filings.fact_downloads.load(Ordering::SeqCst), 2);
        assert!(store.facts_ingested("TEST").await.unwrap());
        assert!(store.get_fact("us-gaap:Revenues").await.unwrap().is_some());
        let values = store
            .fact_values("us-gaap:Revenues", "TEST_2023_4_10K")
            .await
            .unwrap();
        assert_eq!(values.len(), 1);
    }

    #[tokio::test]
    async fn test_company_from_filing_alone_still_gets_facts() {
        let h = harness(
            FakeFilings::default()
                .with_filing("TEST", 2023, None, FilingType::TenK, FILING, filed())
                .with_facts("TEST", revenue_facts()),
            ScriptedChatModel::new(),
        );
        h.store
            .upsert_company(&Company {
                ticker: "TEST".to_string(),
                name: None,
            })
            .await
            .unwrap();

        h.components
            .process_filing("TEST", 2023, None, FilingType::TenK)
            .await
            .unwrap();
        assert_eq!(h.filings.fact_downloads.load(Ordering::SeqCst), 1);
        assert!(h.store.get_fact("us-gaap:Revenues").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_annual_report_ignores_quarter() {
        let h = harness(
            FakeFilings::default().with_filing("TEST", 2023, None, FilingType::TenK, FILING, filed()),
            ScriptedChatModel::new(),
        );
        let outcome = h
            .components
            .process_filing("TEST", 2023, Some(2), FilingType::TenK)
            .await
            .unwrap();
        assert_eq!(outcome.document_id, "TEST_2023_4_10K");
        assert_eq!(outcome.quarter, None);
    }

    #[tokio::test]
    async fn test_delete_document_removes_filing() {
        let h = harness(
            FakeFilings::default().with_filing("TEST", 2023, None, FilingType::TenK, FILING, filed()),
            ScriptedChatModel::new(),
        );
        h.components
            .process_filing("TEST", 2023, None, FilingType::TenK)
            .await
            .unwrap();

        h.components.delete_document("TEST_2023_4_10K").await.unwrap();
        assert!(h.store.get_document("TEST_2023_4_10K").await.unwrap().is_none());
        let hits = h
            .store
            .search_chunks(&[1.0; 32], 10, &ChunkFilter::default())
            .await
            .unwrap();
        assert!(hits.is_empty());

        let err = h
            .components
            .delete_document("TEST_2023_4_10K")
            .await
            .unwrap_err();
        assert!(err.step.is_none());
        assert!(matches!(err.error, PipelineError::NotFound(_)));

        // Reprocessing after a delete downloads the filing again.
        let again = h
            .components
            .process_filing("TEST", 2023, None, FilingType::TenK)
            .await
            .unwrap();
        assert!(again.created);
        assert_eq!(h.filings.filing_downloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_filing_names_download_step() {
        let h = harness(FakeFilings::default(), ScriptedChatModel::new());
        let err = h
            .components
            .process_filing("TEST", 2021, None, FilingType::TenK)
            .await
            .unwrap_err();
        assert_eq!(err.step, Some(Step::DownloadingFiling));
        assert!(matches!(err.error, PipelineError::NotFound(_)));
        assert!(err.to_string().starts_with("Error downloading filing: "));
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_quarter() {
        let h = harness(FakeFilings::default(), ScriptedChatModel::new());
        let err = h
            .components
            .process_filing("TEST", 2023, Some(5), FilingType::TenQ)
            .await
            .unwrap_err();
        assert!(err.step.is_none());
        assert!(matches!(err.error, PipelineError::InvalidRequest(_)));
        assert_eq!(h.filings.filing_downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_query_without_grounding_is_not_found() {
        let llm = ScriptedChatModel::new()
            .reply(r#"{"companies": [], "years": [], "quarters": [], "topics": []}"#)
            .reply("expanded");
        let h = harness(FakeFilings::default(), llm);

        let err = h
            .components
            .answer_query("What is the meaning of life?")
            .await
            .unwrap_err();
        assert!(matches!(err.error, PipelineError::NotFound(_)));
        assert_eq!(err.to_string(), NOTHING_RELEVANT);
    }

    #[tokio::test]
    async fn test_empty_query_is_invalid() {
        let h = harness(FakeFilings::default(), ScriptedChatModel::new());
        let err = h.components.answer_query("   ").await.unwrap_err();
        assert!(matches!(err.error, PipelineError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_query_answers_from_processed_filing() {
        let llm = ScriptedChatModel::new()
            .reply(r#"{"companies": ["TEST"], "years": [2023], "quarters": [], "topics": ["revenue"]}"#)
            .reply("revenue sales growth")
            .reply("ANSWER: Revenue was 383 [2], up twelve percent [1].\nSOURCES:\n[1] TEST_2023_4_10K\nus-gaap:Revenues annual revenue");
        let h = harness(
            FakeFilings::default()
                .with_filing("TEST", 2023, None, FilingType::TenK, FILING, filed())
                .with_facts("TEST", revenue_facts()),
            llm,
        );
        h.components
            .process_filing("TEST", 2023, None, FilingType::TenK)
            .await
            .unwrap();

        let outcome = h
            .components
            .answer_query("How did TEST revenue change in 2023?")
            .await
            .unwrap();

        assert_eq!(outcome.documents_used, vec!["TEST_2023_4_10K"]);
        assert_eq!(outcome.facts_used.len(), 1);
        assert_eq!(outcome.facts_used[0].value, 383.0);
        assert_eq!(outcome.citations.len(), 2);
        assert_eq!(outcome.citations[0].content_type, "text");
        assert_eq!(outcome.citations[1].fact_id.as_deref(), Some("us-gaap:Revenues"));
        assert!(outcome.response.starts_with("Revenue was 383"));
    }
}
