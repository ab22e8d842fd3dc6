//! # Farsight CLI (`farsight`)
//!
//! ## Usage
//!
//! ```bash
//! farsight --config ./config/farsight.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `farsight init` | Create the SQLite database and run schema migrations |
//! | `farsight process <TICKER> <YEAR> <TYPE>` | Download, segment, and embed one filing |
//! | `farsight query "<question>"` | Answer a question from processed filings |
//! | `farsight delete <DOCUMENT_ID>` | Remove a processed filing and its chunks |
//! | `farsight segment <FILE>` | Segment a local filing without touching the network or database |
//! | `farsight serve` | Start the HTTP server |
//! | `farsight completions <SHELL>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! farsight init
//! farsight process AAPL 2023 10-K
//! farsight process AAPL 2023 10-Q --quarter 2
//! farsight query "What was Apple's revenue in 2023?"
//! farsight serve
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use farsight::config;
use farsight::migrate;
use farsight::models::{DocumentMetadata, FilingType};
use farsight::pipeline::{Components, QueryOutcome};
use farsight::segment::Segmenter;
use farsight::server;

/// Retrieval-augmented question answering over SEC 10-K/10-Q filings.
#[derive(Parser)]
#[command(name = "farsight", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/farsight.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it again leaves existing data untouched.
    Init,

    /// Ingest one filing from EDGAR.
    ///
    /// The first filing of a company also downloads and embeds its XBRL facts.
    Process {
        /// Ticker symbol (e.g. `AAPL`).
        ticker: String,
        /// Calendar year the filing was filed in.
        year: i32,
        /// `10-K` or `10-Q`.
        filing_type: FilingType,
        /// Quarter (1-4). A 10-Q without one takes the quarter it was filed in.
        #[arg(long)]
        quarter: Option<u32>,
    },

    /// Answer a question from processed filings.
    Query {
        query: String,
        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Remove a processed filing with its chunks, tables and fact values.
    Delete {
        /// Document id, e.g. `AAPL_2023_4_10K`.
        document_id: String,
    },

    /// Segment a local filing and print its sections and tables.
    Segment {
        file: PathBuf,
        #[arg(long, default_value = "LOCAL")]
        ticker: String,
        #[arg(long)]
        year: i32,
        #[arg(long, default_value = "10-K")]
        filing_type: FilingType,
        #[arg(long)]
        quarter: Option<u32>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print shell completions.
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "farsight", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Segment {
            file,
            ticker,
            year,
            filing_type,
            quarter,
        } => {
            let content = std::fs::read_to_string(file)?;
            let metadata =
                DocumentMetadata::new(&ticker.to_uppercase(), *year, *quarter, *filing_type, None);
            print_segments(&Segmenter::new()?, &content, metadata);
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Process {
            ticker,
            year,
            filing_type,
            quarter,
        } => {
            let components = Components::from_config(&cfg).await?;
            let outcome = components
                .process_filing(&ticker, year, quarter, filing_type)
                .await?;
            if outcome.created {
                println!("Processed {}", outcome.document_id);
            } else {
                println!("Already processed {}", outcome.document_id);
            }
            if let Some(date) = outcome.filing_date {
                println!("  filed: {}", date);
            }
        }
        Commands::Query { query, json } => {
            let components = Components::from_config(&cfg).await?;
            let outcome = components.answer_query(&query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_answer(&outcome);
            }
        }
        Commands::Delete { document_id } => {
            let components = Components::from_config(&cfg).await?;
            components.delete_document(&document_id).await?;
            println!("Deleted {}", document_id);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } | Commands::Segment { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

fn print_segments(segmenter: &Segmenter, content: &str, metadata: DocumentMetadata) {
    let parsed = segmenter.segment(content, metadata);

    println!("Document: {}", parsed.document_id);
    if let Some(name) = &parsed.header.company_name {
        println!("Company:  {}", name);
    }
    if let Some(date) = parsed.metadata.filing_date {
        println!("Filed:    {}", date);
    }
    println!(
        "Chunks:   {} text, {} tables",
        parsed.text_chunks.len(),
        parsed.tables.len()
    );
    println!();

    for chunk in &parsed.text_chunks {
        let preview: String = chunk.text.chars().take(80).collect();
        println!(
            "[{}] {} ({} chars)\n    {}",
            chunk.chunk_id,
            chunk.section.as_deref().unwrap_or("-"),
            chunk.text.chars().count(),
            preview
        );
    }
    for table in &parsed.tables {
        println!(
            "[{}] {} / {} ({} rows)",
            table.chunk_id,
            table.section,
            table.caption.as_deref().unwrap_or("Untitled"),
            table.table_data.len()
        );
    }
}

fn print_answer(outcome: &QueryOutcome) {
    println!("{}", outcome.response);
    if outcome.citations.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for (i, c) in outcome.citations.iter().enumerate() {
        let period = match c.quarter {
            Some(q) => format!("Q{} {}", q, c.year),
            None => c.year.to_string(),
        };
        println!(
            "  [{}] {} {} {} ({}) {}",
            i + 1,
            c.company,
            c.filing_type,
            period,
            c.content_type,
            c.location
        );
    }
}
