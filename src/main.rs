//! # docstill CLI
//!
//! The `docstill` binary drives the ingestion pipeline and retrieval path.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docstill init` | Create the SQLite database and run schema migrations |
//! | `docstill ingest <file.pdf>` | Register a PDF and run the pipeline to EMBEDDED |
//! | `docstill work` | Drain due jobs without ingesting anything new |
//! | `docstill ask <document-id> <query>` | Answer a question from one document |
//! | `docstill status [document-id]` | Show document lifecycle and chunk counts |
//!
//! ```bash
//! docstill --config ./config/docstill.toml init
//! docstill ingest ./manuals/widget.pdf
//! docstill ask 6f8a... "how is the widget calibrated?"
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlx::Row;
use std::path::PathBuf;

use docstill::config::{self, Config};
use docstill::embedding::OpenAiEmbedder;
use docstill::extract::PdfExtractor;
use docstill::generation::OpenAiGenerator;
use docstill::ranker::Decision;
use docstill::{db, migrate, pipeline, retrieve, state};

/// docstill — single-document RAG ingestion and retrieval over SQLite.
#[derive(Parser)]
#[command(
    name = "docstill",
    about = "docstill — PDF ingestion pipeline and retrieval ranking for single-document RAG",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docstill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema (idempotent).
    Init,

    /// Register a PDF and run the pipeline until the queue is drained.
    Ingest {
        /// Path to the PDF file.
        file: PathBuf,
    },

    /// Drain due jobs from the queue (retry driver).
    Work,

    /// Answer a question from one document's content.
    Ask {
        /// Document id returned by `ingest`.
        document_id: String,

        /// The question to answer.
        query: String,

        /// Print the per-candidate ranking trace.
        #[arg(long)]
        trace: bool,
    },

    /// Show document lifecycle status and chunk counts.
    Status {
        /// Restrict to one document.
        document_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docstill=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Ingest { file } => run_ingest(&config, &file).await,
        Commands::Work => run_work(&config).await,
        Commands::Ask {
            document_id,
            query,
            trace,
        } => run_ask(&config, &document_id, &query, trace).await,
        Commands::Status { document_id } => run_status(&config, document_id.as_deref()).await,
    }
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("database initialized at {}", config.db.path.display());
    Ok(())
}

async fn run_ingest(config: &Config, file: &PathBuf) -> Result<()> {
    let pool = db::connect(config).await?;
    let document_id = pipeline::upload_document(&pool, config, file).await?;
    println!("registered document {}", document_id);

    let extractor = PdfExtractor;
    let embedder = OpenAiEmbedder::new(&config.embedding)?;
    let summary = pipeline::drain(&pool, config, &extractor, &embedder).await?;

    let status = state::current_status(&pool, &document_id).await?;
    println!("ingest {}", document_id);
    println!("  jobs processed: {}", summary.processed);
    println!("  jobs failed: {}", summary.failed);
    println!("  status: {}", status);

    pool.close().await;
    Ok(())
}

async fn run_work(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let extractor = PdfExtractor;
    let embedder = OpenAiEmbedder::new(&config.embedding)?;
    let summary = pipeline::drain(&pool, config, &extractor, &embedder).await?;

    println!("work");
    println!("  jobs processed: {}", summary.processed);
    println!("  jobs failed: {}", summary.failed);

    pool.close().await;
    Ok(())
}

async fn run_ask(config: &Config, document_id: &str, query: &str, show_trace: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let embedder = OpenAiEmbedder::new(&config.embedding)?;
    let generator = OpenAiGenerator::new(&config.generation)?;

    let result = retrieve::answer_query(
        &pool,
        &config.retrieval,
        &embedder,
        &generator,
        document_id,
        query,
    )
    .await?;

    println!("{}", result.answer);

    if show_trace {
        println!();
        println!("ranking trace ({} candidates):", result.trace.len());
        for record in &result.trace {
            match record.decision {
                Decision::Accepted { final_score } => println!(
                    "  accept {} page={} section={} sim={:.3} score={:.3}",
                    record.chunk_id, record.page_start, record.section, record.similarity, final_score
                ),
                Decision::Rejected(reason) => println!(
                    "  reject {} page={} section={} sim={:.3} reason={}",
                    record.chunk_id,
                    record.page_start,
                    record.section,
                    record.similarity,
                    reason.as_str()
                ),
            }
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_status(config: &Config, document_id: Option<&str>) -> Result<()> {
    let pool = db::connect(config).await?;

    let rows = match document_id {
        Some(id) => {
            sqlx::query(
                r#"
                SELECT d.id, d.name, d.status,
                       COUNT(c.id) AS chunk_count,
                       SUM(CASE WHEN c.status = 'EMBEDDED' THEN 1 ELSE 0 END) AS embedded_count
                FROM documents d
                LEFT JOIN chunks c ON c.document_id = d.id
                WHERE d.id = ?
                GROUP BY d.id
                "#,
            )
            .bind(id)
            .fetch_all(&pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT d.id, d.name, d.status,
                       COUNT(c.id) AS chunk_count,
                       SUM(CASE WHEN c.status = 'EMBEDDED' THEN 1 ELSE 0 END) AS embedded_count
                FROM documents d
                LEFT JOIN chunks c ON c.document_id = d.id
                GROUP BY d.id
                ORDER BY d.created_at
                "#,
            )
            .fetch_all(&pool)
            .await?
        }
    };

    if rows.is_empty() {
        println!("no documents");
    }

    for row in &rows {
        let id: String = row.get("id");
        let name: String = row.get("name");
        let status: String = row.get("status");
        let chunk_count: i64 = row.get("chunk_count");
        let embedded_count: Option<i64> = row.get("embedded_count");

        println!("{} [{}] {}", id, status, name);
        println!(
            "  chunks: {} ({} embedded)",
            chunk_count,
            embedded_count.unwrap_or(0)
        );
    }

    pool.close().await;
    Ok(())
}
