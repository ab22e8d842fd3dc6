//! # Farsight
//!
//! Retrieval-augmented question answering over SEC 10-K and 10-Q filings.
//!
//! Filings are downloaded from EDGAR, segmented into sections and tables,
//! embedded, and stored in SQLite together with the company's XBRL facts.
//! Questions are answered by extracting the companies and periods they
//! ask about, selecting matching filings, retrieving the closest chunks
//! and fact values, and asking a chat model for a cited answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌──────────┐
//! │  EDGAR   │──▶│ Segmenter │──▶│ Embedding │──▶│  SQLite  │
//! │  client  │   │ HTML→text │   │  service  │   │  store   │
//! └──────────┘   └───────────┘   └───────────┘   └────┬─────┘
//!                                                     │
//!   question ─▶ analyzer ─▶ selector ─▶ retriever ◀───┘
//!                                          │
//!                                          ▼
//!                                      responder ─▶ answer + citations
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline error type |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`models`] | Core data types |
//! | [`store`] | Document store trait and backends |
//! | [`edgar`] | EDGAR filing and XBRL client |
//! | [`segment`] | Filing HTML segmentation |
//! | [`embedding`] | Embedding providers and the embedding service |
//! | [`llm`] | Chat model abstraction |
//! | [`analyzer`] | Query analysis |
//! | [`selector`] | Document selection |
//! | [`retriever`] | Chunk and fact retrieval |
//! | [`responder`] | Answer generation with citations |
//! | [`pipeline`] | Ingestion and query flows |
//! | [`server`] | HTTP server |

pub mod analyzer;
pub mod config;
pub mod db;
pub mod edgar;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod responder;
pub mod retriever;
pub mod segment;
pub mod selector;
pub mod server;
pub mod store;
