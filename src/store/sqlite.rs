//! SQLite-backed [`Store`] implementation.
//!
//! Embeddings are kept as little-endian `f32` blobs next to the rows they
//! describe. Similarity search loads the candidate vectors and ranks them
//! in process.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{
    Company, ContentType, DocumentChunk, DocumentMetadata, Fact, FactType, FactValue, FilingType,
    ParsedDocument,
};

use super::{rank, ChunkFilter, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_document(row: &SqliteRow) -> Result<DocumentMetadata> {
    let filing_type: String = row.try_get("filing_type")?;
    let filing_date: Option<String> = row.try_get("filing_date")?;
    let quarter: Option<i64> = row.try_get("quarter")?;
    Ok(DocumentMetadata {
        document_id: row.try_get("id")?,
        ticker: row.try_get("ticker")?,
        year: row.try_get::<i64, _>("year")? as i32,
        quarter: quarter.map(|q| q as u32),
        filing_type: filing_type
            .parse::<FilingType>()
            .map_err(|e| anyhow::anyhow!(e))?,
        filing_date: filing_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
    })
}

fn row_to_chunk(row: &SqliteRow) -> Result<DocumentChunk> {
    let content_type: String = row.try_get("content_type")?;
    Ok(DocumentChunk {
        chunk_id: row.try_get("chunk_id")?,
        document_id: row.try_get("document_id")?,
        content: row.try_get("content")?,
        content_type: ContentType::parse(&content_type)
            .ok_or_else(|| anyhow::anyhow!("unknown content type '{}'", content_type))?,
        location: row.try_get("location")?,
    })
}

fn row_to_fact(row: &SqliteRow) -> Result<Fact> {
    let fact_type: String = row.try_get("fact_type")?;
    let embedding: Option<Vec<u8>> = row.try_get("embedding")?;
    Ok(Fact {
        fact_id: row.try_get("fact_id")?,
        label: row.try_get("label")?,
        description: row.try_get("description")?,
        taxonomy: row.try_get("taxonomy")?,
        fact_type: FactType::parse(&fact_type),
        period_type: row.try_get("period_type")?,
        embedding: embedding.map(|b| blob_to_vec(&b)),
    })
}

fn row_to_fact_value(row: &SqliteRow) -> Result<FactValue> {
    Ok(FactValue {
        fact_id: row.try_get("fact_id")?,
        ticker: row.try_get("ticker")?,
        value: row.try_get("value")?,
        document_id: row.try_get("document_id")?,
        filing_type: row.try_get("filing_type")?,
        accession_number: row.try_get("accession_number")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        fiscal_year: row
            .try_get::<Option<i64>, _>("fiscal_year")?
            .map(|y| y as i32),
        fiscal_period: row.try_get("fiscal_period")?,
        unit: row.try_get("unit")?,
        decimals: row.try_get::<Option<i64>, _>("decimals")?.map(|d| d as i32),
        form: row.try_get("form")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_company(&self, company: &Company) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO companies (ticker, name, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(ticker) DO UPDATE SET
                name = COALESCE(companies.name, excluded.name)
            "#,
        )
        .bind(&company.ticker)
        .bind(&company.name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_facts_ingested(&self, company: &Company) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO companies (ticker, name, created_at, facts_ingested_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(ticker) DO UPDATE SET
                name = COALESCE(companies.name, excluded.name),
                facts_ingested_at = excluded.facts_ingested_at
            "#,
        )
        .bind(&company.ticker)
        .bind(&company.name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn facts_ingested(&self, ticker: &str) -> Result<bool> {
        let marked: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT facts_ingested_at FROM companies WHERE ticker = ?")
                .bind(ticker)
                .fetch_optional(&self.pool)
                .await?;
        Ok(matches!(marked, Some((Some(_),))))
    }

    async fn insert_document(&self, metadata: &DocumentMetadata) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO documents (id, ticker, year, quarter, filing_type, filing_date, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&metadata.document_id)
        .bind(&metadata.ticker)
        .bind(metadata.year as i64)
        .bind(metadata.quarter.map(|q| q as i64))
        .bind(metadata.filing_type.as_str())
        .bind(metadata.filing_date.map(|d| d.format("%Y-%m-%d").to_string()))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentMetadata>> {
        let row = sqlx::query(
            "SELECT id, ticker, year, quarter, filing_type, filing_date FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn find_documents(
        &self,
        ticker: &str,
        year: i32,
        filing_type: Option<FilingType>,
    ) -> Result<Vec<DocumentMetadata>> {
        let rows = sqlx::query(
            r#"
            SELECT id, ticker, year, quarter, filing_type, filing_date
            FROM documents
            WHERE ticker = ? AND year = ? AND (? IS NULL OR filing_type = ?)
            ORDER BY id
            "#,
        )
        .bind(ticker)
        .bind(year as i64)
        .bind(filing_type.map(|f| f.as_str()))
        .bind(filing_type.map(|f| f.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        for sql in [
            "DELETE FROM document_chunks WHERE document_id = ?",
            "DELETE FROM text_chunks WHERE document_id = ?",
            "DELETE FROM tables WHERE document_id = ?",
            "DELETE FROM fact_values WHERE document_id = ?",
        ] {
            sqlx::query(sql).bind(document_id).execute(&mut *tx).await?;
        }

        let deleted = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn save_parsed_document(&self, parsed: &ParsedDocument) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM text_chunks WHERE document_id = ?")
            .bind(&parsed.document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tables WHERE document_id = ?")
            .bind(&parsed.document_id)
            .execute(&mut *tx)
            .await?;

        for (i, chunk) in parsed.text_chunks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO text_chunks (chunk_id, document_id, ordinal, section, text, page_number)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.document_id)
            .bind(i as i64)
            .bind(&chunk.section)
            .bind(&chunk.text)
            .bind(chunk.page_number.map(|p| p as i64))
            .execute(&mut *tx)
            .await?;
        }

        for (i, table) in parsed.tables.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO tables (chunk_id, document_id, ordinal, section, caption,
                                    table_html, table_data_json, page_number)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&table.chunk_id)
            .bind(&table.document_id)
            .bind(i as i64)
            .bind(&table.section)
            .bind(&table.caption)
            .bind(&table.table_html)
            .bind(serde_json::to_string(&table.table_data)?)
            .bind(table.page_number.map(|p| p as i64))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_chunk(&self, chunk: &DocumentChunk, embedding: &[f32]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO document_chunks (chunk_id, document_id, content, content_type,
                                         location, embedding, dims, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                content = excluded.content,
                content_type = excluded.content_type,
                location = excluded.location,
                embedding = excluded.embedding,
                dims = excluded.dims
            "#,
        )
        .bind(&chunk.chunk_id)
        .bind(&chunk.document_id)
        .bind(&chunk.content)
        .bind(chunk.content_type.as_str())
        .bind(&chunk.location)
        .bind(vec_to_blob(embedding))
        .bind(embedding.len() as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn search_chunks(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<(DocumentChunk, f32)>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT chunk_id, document_id, content, content_type, location, embedding \
             FROM document_chunks",
        );
        if let Some(ids) = &filter.document_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            qb.push(" WHERE document_id IN (");
            let mut separated = qb.separated(", ");
            for id in ids {
                separated.push_bind(id);
            }
            separated.push_unseparated(")");
        }

        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let sim = cosine_similarity(query_vec, &blob_to_vec(&blob));
            scored.push((row_to_chunk(row)?, sim));
        }
        Ok(rank(scored, top_k))
    }

    async fn upsert_fact(&self, fact: &Fact) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO facts (fact_id, label, description, taxonomy, fact_type, period_type, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fact_id) DO UPDATE SET
                label = excluded.label,
                description = excluded.description,
                taxonomy = excluded.taxonomy,
                fact_type = excluded.fact_type,
                period_type = excluded.period_type,
                embedding = COALESCE(excluded.embedding, facts.embedding)
            "#,
        )
        .bind(&fact.fact_id)
        .bind(&fact.label)
        .bind(&fact.description)
        .bind(&fact.taxonomy)
        .bind(fact.fact_type.as_str())
        .bind(&fact.period_type)
        .bind(fact.embedding.as_deref().map(vec_to_blob))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_fact(&self, fact_id: &str) -> Result<Option<Fact>> {
        let row = sqlx::query(
            r#"
            SELECT fact_id, label, description, taxonomy, fact_type, period_type, embedding
            FROM facts WHERE fact_id = ?
            "#,
        )
        .bind(fact_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_fact).transpose()
    }

    async fn insert_fact_value(&self, value: &FactValue) -> Result<bool> {
        // NULL-safe duplicate check; the UNIQUE constraint alone treats NULLs as distinct.
        let inserted = sqlx::query(
            r#"
            INSERT INTO fact_values (fact_id, ticker, value, document_id, filing_type,
                                     accession_number, start_date, end_date, fiscal_year,
                                     fiscal_period, unit, decimals, form)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM fact_values
                WHERE fact_id = ? AND ticker = ? AND fiscal_year IS ?
                  AND fiscal_period IS ? AND filing_type = ?
            )
            "#,
        )
        .bind(&value.fact_id)
        .bind(&value.ticker)
        .bind(value.value)
        .bind(&value.document_id)
        .bind(&value.filing_type)
        .bind(&value.accession_number)
        .bind(&value.start_date)
        .bind(&value.end_date)
        .bind(value.fiscal_year.map(|y| y as i64))
        .bind(&value.fiscal_period)
        .bind(&value.unit)
        .bind(value.decimals.map(|d| d as i64))
        .bind(&value.form)
        .bind(&value.fact_id)
        .bind(&value.ticker)
        .bind(value.fiscal_year.map(|y| y as i64))
        .bind(&value.fiscal_period)
        .bind(&value.filing_type)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    async fn fact_values(&self, fact_id: &str, document_id: &str) -> Result<Vec<FactValue>> {
        let rows = sqlx::query(
            r#"
            SELECT fact_id, ticker, value, document_id, filing_type, accession_number,
                   start_date, end_date, fiscal_year, fiscal_period, unit, decimals, form
            FROM fact_values
            WHERE fact_id = ? AND document_id = ?
            ORDER BY id
            "#,
        )
        .bind(fact_id)
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_fact_value).collect()
    }

    async fn search_facts(&self, query_vec: &[f32], top_k: usize) -> Result<Vec<(Fact, f32)>> {
        let rows = sqlx::query(
            r#"
            SELECT fact_id, label, description, taxonomy, fact_type, period_type, embedding
            FROM facts WHERE embedding IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let fact = row_to_fact(row)?;
            let sim = fact
                .embedding
                .as_deref()
                .map(|v| cosine_similarity(query_vec, v))
                .unwrap_or(0.0);
            scored.push((fact, sim));
        }
        Ok(rank(scored, top_k))
    }
}
