//! Batched, transactional embedding writer.
//!
//! Selects PENDING chunks that have no embedding row for the active model
//! yet — the second condition is what makes the stage resumable: a run
//! that died halfway is picked up where it stopped instead of re-billing
//! already-embedded chunks. Each batch commits atomically; a failing
//! batch rolls back alone and never claws back earlier batches.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::embedding::{vec_to_blob, EmbeddingProvider};
use crate::errors::PipelineError;
use crate::models::ChunkStatus;

/// Result of one writer run over a document.
#[derive(Debug, Clone, Copy)]
pub struct EmbedOutcome {
    /// Chunks embedded and committed by this run.
    pub embedded: u64,
    /// PENDING chunks left after this run (0 means the document may advance).
    pub remaining_pending: i64,
}

struct PendingChunk {
    id: String,
    chunk_text: String,
}

/// Embed all pending chunks of a document in fixed-size batches.
pub async fn embed_pending_chunks(
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
    document_id: &str,
    batch_size: usize,
) -> Result<EmbedOutcome> {
    let model_name = provider.model_name().to_string();
    let pending = find_pending_chunks(pool, document_id, &model_name).await?;

    let mut embedded = 0u64;

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.chunk_text.clone()).collect();

        let vectors = provider
            .embed(&texts)
            .await
            .with_context(|| format!("embedding batch failed for document {}", document_id))?;

        // A count mismatch means the vectors cannot be aligned with their
        // chunks; writing anything would store wrong vectors. Abort the job.
        if vectors.len() != batch.len() {
            return Err(PipelineError::EmbeddingCountMismatch {
                sent: batch.len(),
                got: vectors.len(),
            }
            .into());
        }

        commit_batch(pool, &model_name, batch, &vectors).await?;
        embedded += batch.len() as u64;
    }

    let remaining_pending: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ? AND status = ?")
            .bind(document_id)
            .bind(ChunkStatus::Pending.as_str())
            .fetch_one(pool)
            .await?;

    info!(
        document_id,
        embedded, remaining_pending, "embedding writer finished"
    );

    Ok(EmbedOutcome {
        embedded,
        remaining_pending,
    })
}

/// PENDING chunks with no embedding row for the active model, in chunk order.
async fn find_pending_chunks(
    pool: &SqlitePool,
    document_id: &str,
    model_name: &str,
) -> Result<Vec<PendingChunk>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id, c.chunk_text
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model_name = ?
        WHERE c.document_id = ? AND c.status = 'PENDING' AND e.id IS NULL
        ORDER BY c.chunk_index
        "#,
    )
    .bind(model_name)
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PendingChunk {
            id: row.get("id"),
            chunk_text: row.get("chunk_text"),
        })
        .collect())
}

/// Commit one batch atomically: embedding rows (insert-if-absent on
/// `(chunk_id, model_name)`) plus the chunk status flips.
async fn commit_batch(
    pool: &SqlitePool,
    model_name: &str,
    batch: &[PendingChunk],
    vectors: &[Vec<f32>],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    for (chunk, vector) in batch.iter().zip(vectors.iter()) {
        sqlx::query(
            r#"
            INSERT INTO embeddings (id, chunk_id, model_name, vector, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id, model_name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&chunk.id)
        .bind(model_name)
        .bind(vec_to_blob(vector))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE chunks SET status = ? WHERE id = ?")
            .bind(ChunkStatus::Embedded.as_str())
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}
