//! Document Selector.
//!
//! Maps a [`QueryAnalysis`] to the stored filings that can ground an
//! answer. For every `(company, year)` pair:
//!
//! | Filing | Relevance |
//! |--------|-----------|
//! | 10-K for the year | 1.0 |
//! | 10-Q for each requested quarter except Q4 | 0.9 |
//! | every 10-Q for the year, when no quarter was requested | 0.8 |
//!
//! Q4 has no 10-Q; the annual report covers it. A question naming no year
//! is read as asking about the current calendar year. The result is sorted by
//! descending relevance. An empty result means the question cannot be
//! grounded in a stored filing; it is never an error by itself.

use chrono::Datelike;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::models::{DocumentMetadata, DocumentReference, FilingType, QueryAnalysis};
use crate::store::Store;

const ANNUAL_RELEVANCE: f32 = 1.0;
const REQUESTED_QUARTER_RELEVANCE: f32 = 0.9;
const ANY_QUARTER_RELEVANCE: f32 = 0.8;

pub struct DocumentSelector {
    store: Arc<dyn Store>,
}

impl DocumentSelector {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn select_documents(
        &self,
        analysis: &QueryAnalysis,
    ) -> PipelineResult<Vec<DocumentReference>> {
        if analysis.companies.is_empty() {
            debug!("no companies in query; nothing to select");
            return Ok(Vec::new());
        }

        let years = if analysis.years.is_empty() {
            let current = chrono::Utc::now().year();
            debug!(year = current, "no years in query; using the current year");
            vec![current]
        } else {
            analysis.years.clone()
        };

        let mut references = Vec::new();
        for ticker in &analysis.companies {
            for &year in &years {
                let annual = self.find(ticker, year, FilingType::TenK).await?;
                references.extend(annual.iter().map(|d| reference(d, ANNUAL_RELEVANCE)));

                let quarterly = self.find(ticker, year, FilingType::TenQ).await?;
                if analysis.quarters.is_empty() {
                    references.extend(
                        quarterly
                            .iter()
                            .map(|d| reference(d, ANY_QUARTER_RELEVANCE)),
                    );
                    continue;
                }
                for &quarter in analysis.quarters.iter().filter(|q| **q != 4) {
                    references.extend(
                        quarterly
                            .iter()
                            .filter(|d| d.quarter == Some(quarter))
                            .map(|d| reference(d, REQUESTED_QUARTER_RELEVANCE)),
                    );
                }
            }
        }

        // Stable sort keeps discovery order among equal scores.
        references.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        info!(selected = references.len(), "selected documents");
        Ok(references)
    }

    async fn find(
        &self,
        ticker: &str,
        year: i32,
        filing_type: FilingType,
    ) -> PipelineResult<Vec<DocumentMetadata>> {
        self.store
            .find_documents(ticker, year, Some(filing_type))
            .await
            .map_err(PipelineError::storage)
    }
}

fn reference(metadata: &DocumentMetadata, relevance_score: f32) -> DocumentReference {
    DocumentReference {
        document_id: metadata.document_id.clone(),
        ticker: metadata.ticker.clone(),
        year: metadata.year,
        quarter: metadata.quarter,
        filing_type: metadata.filing_type,
        relevance_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::metadata;
    use crate::store::InMemoryStore;

    async fn store_with(docs: &[DocumentMetadata]) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for doc in docs {
            store.insert_document(doc).await.unwrap();
        }
        store
    }

    fn analysis(companies: &[&str], years: &[i32], quarters: &[u32]) -> QueryAnalysis {
        QueryAnalysis {
            companies: companies.iter().map(|c| c.to_string()).collect(),
            years: years.to_vec(),
            quarters: quarters.to_vec(),
            ..QueryAnalysis::empty("q")
        }
    }

    #[tokio::test]
    async fn test_annual_ranks_before_requested_quarters() {
        let store = store_with(&[
            metadata("TEST", 2023, Some(2), FilingType::TenQ),
            metadata("TEST", 2023, Some(1), FilingType::TenQ),
            metadata("TEST", 2023, None, FilingType::TenK),
        ])
        .await;
        let selector = DocumentSelector::new(store);

        let refs = selector
            .select_documents(&analysis(&["TEST"], &[2023], &[1, 2]))
            .await
            .unwrap();

        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].filing_type, FilingType::TenK);
        assert_eq!(refs[0].relevance_score, 1.0);
        assert!(refs[1..].iter().all(|r| r.relevance_score == 0.9));
        let mut quarters: Vec<_> = refs[1..].iter().filter_map(|r| r.quarter).collect();
        quarters.sort();
        assert_eq!(quarters, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fourth_quarter_is_covered_by_annual() {
        let store = store_with(&[
            metadata("TEST", 2023, None, FilingType::TenK),
            metadata("TEST", 2023, Some(3), FilingType::TenQ),
        ])
        .await;
        let refs = DocumentSelector::new(store)
            .select_documents(&analysis(&["TEST"], &[2023], &[4]))
            .await
            .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].filing_type, FilingType::TenK);
    }

    #[tokio::test]
    async fn test_no_quarters_selects_every_quarterly_filing() {
        let store = store_with(&[
            metadata("TEST", 2023, Some(1), FilingType::TenQ),
            metadata("TEST", 2023, Some(3), FilingType::TenQ),
            metadata("TEST", 2022, Some(1), FilingType::TenQ),
        ])
        .await;
        let refs = DocumentSelector::new(store)
            .select_documents(&analysis(&["TEST"], &[2023], &[]))
            .await
            .unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| r.relevance_score == 0.8 && r.year == 2023));
    }

    #[tokio::test]
    async fn test_empty_intent_selects_nothing() {
        let store = store_with(&[metadata("TEST", 2023, None, FilingType::TenK)]).await;
        let selector = DocumentSelector::new(store);

        let refs = selector
            .select_documents(&QueryAnalysis::empty("What is going on?"))
            .await
            .unwrap();
        assert!(refs.is_empty());
    }

    #[tokio::test]
    async fn test_no_years_defaults_to_current_year() {
        let current = chrono::Utc::now().year();
        let store = store_with(&[
            metadata("TEST", current, None, FilingType::TenK),
            metadata("TEST", current - 1, None, FilingType::TenK),
        ])
        .await;

        let refs = DocumentSelector::new(store)
            .select_documents(&analysis(&["TEST"], &[], &[]))
            .await
            .unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].year, current);
        assert_eq!(refs[0].relevance_score, 1.0);
    }

    #[tokio::test]
    async fn test_unknown_company_selects_nothing() {
        let store = store_with(&[metadata("TEST", 2023, None, FilingType::TenK)]).await;
        let refs = DocumentSelector::new(store)
            .select_documents(&analysis(&["NOPE"], &[2023], &[]))
            .await
            .unwrap();
        assert!(refs.is_empty());
    }
}
