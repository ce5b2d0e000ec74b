//! Ingestion pipeline: upload registration, the three stage handlers, and
//! the queue worker that drives them.
//!
//! Every stage reads its document, checks the exact expected pre-state,
//! does its work, and writes the post-state. Off-state deliveries are
//! handled per stage: extraction skips with a warning, processing is a
//! silent no-op, embedding hard-fails (it is the terminal producer and a
//! misrouted job there must be visible). Any unhandled stage error moves
//! the document to FAILED and is re-signaled to the job runner, whose
//! retry policy decides what happens next. Stages key their writes by
//! content hash or explicit id, never by position, so redelivered jobs
//! converge instead of duplicating.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chunker;
use crate::clean;
use crate::config::Config;
use crate::embed;
use crate::embedding::EmbeddingProvider;
use crate::errors::PipelineError;
use crate::extract::TextExtractor;
use crate::models::{Document, Page};
use crate::queue::{self, JobType};
use crate::state::{self, DocumentStatus};

/// Register an uploaded file and enqueue its extraction job.
///
/// The file is copied into the storage directory under a collision-proof
/// name; the original path is left untouched. Returns the new document id.
pub async fn upload_document(pool: &SqlitePool, config: &Config, source: &Path) -> Result<String> {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid file name: {}", source.display()))?
        .to_string();

    std::fs::create_dir_all(&config.storage.dir)?;
    let stored_name = format!("{}-{}", Uuid::new_v4(), name);
    let stored_path = config.storage.dir.join(&stored_name);
    std::fs::copy(source, &stored_path)
        .with_context(|| format!("failed to store {}", source.display()))?;

    let document_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO documents (id, name, storage_path, mime_type, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&document_id)
    .bind(&name)
    .bind(stored_path.to_string_lossy().as_ref())
    .bind("application/pdf")
    .bind(DocumentStatus::Uploaded.as_str())
    .bind(now)
    .execute(pool)
    .await?;

    queue::enqueue(
        pool,
        JobType::Extract,
        &document_id,
        config.queue.pipeline_max_attempts,
        config.queue.backoff_secs,
    )
    .await?;

    info!(document_id, name, "document registered");
    Ok(document_id)
}

async fn load_document(pool: &SqlitePool, document_id: &str) -> Result<Document> {
    let row = sqlx::query(
        "SELECT id, name, storage_path, mime_type, status, created_at FROM documents WHERE id = ?",
    )
    .bind(document_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Document::from_row(&row),
        None => Err(PipelineError::DocumentNotFound(document_id.to_string()).into()),
    }
}

/// Extraction stage: UPLOADED → PROCESSING → EXTRACTED.
pub async fn run_extract_stage(
    pool: &SqlitePool,
    config: &Config,
    extractor: &dyn TextExtractor,
    document_id: &str,
) -> Result<()> {
    let document = load_document(pool, document_id).await?;

    if document.status != DocumentStatus::Uploaded {
        warn!(
            document_id,
            status = %document.status,
            "extraction skipped: document not in UPLOADED"
        );
        return Ok(());
    }

    state::advance(pool, document_id, DocumentStatus::Uploaded, DocumentStatus::Processing).await?;

    let result = extract_pages(pool, extractor, &document).await;

    match result {
        Ok(page_count) => {
            state::advance(
                pool,
                document_id,
                DocumentStatus::Processing,
                DocumentStatus::Extracted,
            )
            .await?;

            queue::enqueue(
                pool,
                JobType::Process,
                document_id,
                config.queue.pipeline_max_attempts,
                config.queue.backoff_secs,
            )
            .await?;

            info!(document_id, pages = page_count, "document extracted");
            Ok(())
        }
        Err(err) => {
            error!(document_id, error = %err, "extraction failed");
            state::mark_failed(pool, document_id).await?;
            Err(err)
        }
    }
}

async fn extract_pages(
    pool: &SqlitePool,
    extractor: &dyn TextExtractor,
    document: &Document,
) -> Result<usize> {
    let bytes = std::fs::read(&document.storage_path)
        .with_context(|| format!("file not found at {}", document.storage_path))?;

    let pages = extractor.extract(&bytes)?;
    if pages.is_empty() {
        return Err(PipelineError::NoTextExtracted.into());
    }

    let mut tx = pool.begin().await?;
    for page in &pages {
        sqlx::query(
            r#"
            INSERT INTO pages (id, document_id, page_number, raw_text, raw_hash)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(document_id, page_number) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&document.id)
        .bind(page.page_number)
        .bind(&page.raw_text)
        .bind(clean::text_hash(&page.raw_text))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(pages.len())
}

/// Processing stage: EXTRACTED → CLEANED → CHUNKED.
pub async fn run_process_stage(
    pool: &SqlitePool,
    config: &Config,
    document_id: &str,
) -> Result<()> {
    let document = load_document(pool, document_id).await?;

    if document.status != DocumentStatus::Extracted {
        // Safe under redelivery: a job that already ran converges here.
        info!(
            document_id,
            status = %document.status,
            "processing skipped: document not in EXTRACTED"
        );
        return Ok(());
    }

    let result = clean_and_chunk(pool, config, document_id).await;

    match result {
        Ok(chunk_count) => {
            queue::enqueue(
                pool,
                JobType::Embed,
                document_id,
                config.queue.embed_max_attempts,
                config.queue.backoff_secs,
            )
            .await?;

            info!(document_id, chunks = chunk_count, "document chunked");
            Ok(())
        }
        Err(err) => {
            error!(document_id, error = %err, "processing failed");
            state::mark_failed(pool, document_id).await?;
            Err(err)
        }
    }
}

async fn clean_and_chunk(pool: &SqlitePool, config: &Config, document_id: &str) -> Result<usize> {
    let pages = load_pages(pool, document_id).await?;
    if pages.is_empty() {
        return Err(PipelineError::NoPages(document_id.to_string()).into());
    }

    // Cleaning writes are populate-once: a page already cleaned by an
    // earlier delivery keeps its text and hash.
    for page in &pages {
        if page.cleaned_text.is_some() {
            continue;
        }
        let cleaned = clean::clean(&page.raw_text);
        let hash = clean::text_hash(&cleaned);
        sqlx::query(
            "UPDATE pages SET cleaned_text = ?, clean_hash = ? WHERE id = ? AND cleaned_text IS NULL",
        )
        .bind(&cleaned)
        .bind(&hash)
        .bind(&page.id)
        .execute(pool)
        .await?;
    }

    state::advance(pool, document_id, DocumentStatus::Extracted, DocumentStatus::Cleaned).await?;

    let pages = load_pages(pool, document_id).await?;
    let drafts = chunker::build_chunks(&pages, config.chunking.max_tokens);
    let inserted = chunker::insert_chunks(pool, document_id, &drafts).await?;

    // Zero chunks is valid output (a document with no non-empty
    // paragraphs); the stage still advances.
    state::advance(pool, document_id, DocumentStatus::Cleaned, DocumentStatus::Chunked).await?;

    info!(document_id, drafts = drafts.len(), inserted, "chunks persisted");
    Ok(drafts.len())
}

async fn load_pages(pool: &SqlitePool, document_id: &str) -> Result<Vec<Page>> {
    let rows = sqlx::query(
        r#"
        SELECT id, document_id, page_number, raw_text, raw_hash, cleaned_text, clean_hash
        FROM pages
        WHERE document_id = ?
        ORDER BY page_number
        "#,
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Page {
            id: row.get("id"),
            document_id: row.get("document_id"),
            page_number: row.get("page_number"),
            raw_text: row.get("raw_text"),
            raw_hash: row.get("raw_hash"),
            cleaned_text: row.get("cleaned_text"),
            clean_hash: row.get("clean_hash"),
        })
        .collect())
}

/// Embedding stage: CHUNKED → EMBEDDED.
///
/// The hard gate is deliberate: this is the terminal producer, and a
/// misrouted or premature job must surface instead of being swallowed.
pub async fn run_embed_stage(
    pool: &SqlitePool,
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    document_id: &str,
) -> Result<()> {
    let document = load_document(pool, document_id).await?;

    if document.status != DocumentStatus::Chunked {
        return Err(PipelineError::NotReady {
            document_id: document_id.to_string(),
            expected: DocumentStatus::Chunked.as_str(),
            actual: document.status.to_string(),
        }
        .into());
    }

    let result =
        embed::embed_pending_chunks(pool, embedder, document_id, config.embedding.batch_size).await;

    match result {
        Ok(outcome) => {
            if outcome.remaining_pending == 0 {
                state::advance(
                    pool,
                    document_id,
                    DocumentStatus::Chunked,
                    DocumentStatus::Embedded,
                )
                .await?;
                info!(document_id, embedded = outcome.embedded, "document embedded");
            } else {
                warn!(
                    document_id,
                    remaining = outcome.remaining_pending,
                    "pending chunks remain after embedding run"
                );
            }
            Ok(())
        }
        Err(err) => {
            // Prior batches stay committed; only the document-level state
            // reflects the failure.
            error!(document_id, error = %err, "embedding failed");
            state::mark_failed(pool, document_id).await?;
            Err(err)
        }
    }
}

/// Outcome of one [`drain`] run.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainSummary {
    pub processed: u64,
    pub failed: u64,
}

/// Claim and run due jobs until none remain.
///
/// A failing job is requeued with backoff (or dead-lettered) and does not
/// stop the drain; its document is already FAILED by the stage handler.
pub async fn drain(
    pool: &SqlitePool,
    config: &Config,
    extractor: &dyn TextExtractor,
    embedder: &dyn EmbeddingProvider,
) -> Result<DrainSummary> {
    let mut summary = DrainSummary::default();

    while let Some(job) = queue::claim_due(pool).await? {
        let outcome = match job.job_type {
            JobType::Extract => {
                run_extract_stage(pool, config, extractor, &job.document_id).await
            }
            JobType::Process => run_process_stage(pool, config, &job.document_id).await,
            JobType::Embed => run_embed_stage(pool, config, embedder, &job.document_id).await,
        };

        match outcome {
            Ok(()) => {
                queue::complete(pool, job.id).await?;
                summary.processed += 1;
            }
            Err(err) => {
                error!(
                    job_id = job.id,
                    job_type = job.job_type.as_str(),
                    document_id = job.document_id,
                    attempt = job.attempts,
                    error = %err,
                    "job failed"
                );
                queue::fail(pool, &job, &err.to_string()).await?;
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
