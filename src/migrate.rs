use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS companies (
            ticker TEXT PRIMARY KEY,
            name TEXT,
            created_at INTEGER NOT NULL,
            facts_ingested_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            ticker TEXT NOT NULL,
            year INTEGER NOT NULL,
            quarter INTEGER,
            filing_type TEXT NOT NULL,
            filing_date TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (ticker) REFERENCES companies(ticker)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS text_chunks (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            section TEXT,
            text TEXT NOT NULL,
            page_number INTEGER,
            UNIQUE(document_id, ordinal),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tables (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            section TEXT NOT NULL,
            caption TEXT,
            table_html TEXT NOT NULL,
            table_data_json TEXT NOT NULL DEFAULT '[]',
            page_number INTEGER,
            UNIQUE(document_id, ordinal),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per embedded unit; the vector lives beside its content.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            content TEXT NOT NULL,
            content_type TEXT NOT NULL,
            location TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS facts (
            fact_id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            description TEXT NOT NULL,
            taxonomy TEXT NOT NULL,
            fact_type TEXT NOT NULL,
            period_type TEXT,
            embedding BLOB
        )
        "#,
    )
    .execute(pool)
    .await?;

    // document_id is derived from the row's own fields and may name a
    // filing that was never ingested, so it has no foreign key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fact_values (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fact_id TEXT NOT NULL,
            ticker TEXT NOT NULL,
            value REAL NOT NULL,
            document_id TEXT NOT NULL,
            filing_type TEXT NOT NULL,
            accession_number TEXT,
            start_date TEXT,
            end_date TEXT,
            fiscal_year INTEGER,
            fiscal_period TEXT,
            unit TEXT NOT NULL,
            decimals INTEGER,
            form TEXT NOT NULL,
            UNIQUE(fact_id, ticker, fiscal_year, fiscal_period, filing_type),
            FOREIGN KEY (fact_id) REFERENCES facts(fact_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_ticker_year ON documents(ticker, year)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_document_id ON document_chunks(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fact_values_lookup ON fact_values(fact_id, document_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
