//! Fatal pipeline error taxonomy.
//!
//! Orchestration code propagates `anyhow::Error`; the variants here mark
//! the failures the job runner must be able to tell apart — input errors,
//! misrouted jobs, and provider protocol violations. Transient provider
//! and store errors stay as plain error chains: the core performs no
//! internal retry, the queue's attempt count and backoff own that.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// Embedding-stage gate: the terminal producer must not silently
    /// swallow a misrouted job.
    #[error("document {document_id} not ready: expected {expected}, found {actual}")]
    NotReady {
        document_id: String,
        expected: &'static str,
        actual: String,
    },

    #[error("no text extracted from document")]
    NoTextExtracted,

    #[error("no pages found for document {0}")]
    NoPages(String),

    /// Provider returned a different number of vectors than texts sent.
    /// Protocol violation, not a transient: aborts the job with no
    /// partial writes for the offending batch.
    #[error("embedding count mismatch: sent {sent} texts, got {got} vectors")]
    EmbeddingCountMismatch { sent: usize, got: usize },

    #[error("embedding provider returned no vector for the query")]
    EmptyQueryEmbedding,
}
