//! Read-only retrieval path: query → embed → rank → prompt → answer.
//!
//! Runs against a single document and only ever sees chunks already
//! committed as EMBEDDED, so it needs no locking and may run while other
//! documents are mid-ingestion. It never fails silently: a failed query
//! embedding is an explicit error, and an empty ranking still invokes the
//! generator with the no-information prompt.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::errors::PipelineError;
use crate::generation::GenerationProvider;
use crate::prompt;
use crate::ranker::{self, CandidateOutcome};
use crate::state;

/// Answer plus the per-candidate ranking trace.
#[derive(Debug)]
pub struct RetrievalResult {
    pub answer: String,
    pub selected_chunks: usize,
    pub trace: Vec<CandidateOutcome>,
}

/// Answer a query against one document's embedded chunks.
pub async fn answer_query(
    pool: &SqlitePool,
    config: &RetrievalConfig,
    embedder: &dyn EmbeddingProvider,
    generator: &dyn GenerationProvider,
    document_id: &str,
    query: &str,
) -> Result<RetrievalResult> {
    // Fails with "document not found" before any provider call.
    state::current_status(pool, document_id).await?;

    let query_vector = embed_query(embedder, query).await?;

    let candidates = ranker::fetch_candidates(
        pool,
        document_id,
        embedder.model_name(),
        &query_vector,
        config,
    )
    .await?;

    let now = chrono::Utc::now().timestamp();
    let outcome = ranker::rank(candidates, now, config);

    info!(
        document_id,
        selected = outcome.selected.len(),
        considered = outcome.trace.len(),
        "ranking complete"
    );

    let rendered = prompt::render(&outcome.selected, query);
    let answer = generator
        .generate(&rendered)
        .await
        .context("answer generation failed")?;

    Ok(RetrievalResult {
        answer,
        selected_chunks: outcome.selected.len(),
        trace: outcome.trace,
    })
}

/// Embed the query; exactly one vector is expected, zero is a hard failure.
async fn embed_query(embedder: &dyn EmbeddingProvider, query: &str) -> Result<Vec<f32>> {
    let vectors = embedder
        .embed(&[query.to_string()])
        .await
        .context("query embedding failed")?;

    let first = vectors
        .into_iter()
        .next()
        .filter(|v| !v.is_empty())
        .ok_or(PipelineError::EmptyQueryEmbedding)?;

    Ok(first)
}
