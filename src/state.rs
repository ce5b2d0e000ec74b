//! Document lifecycle state machine.
//!
//! Every pipeline stage gates on an exact pre-state and writes its
//! post-state through [`advance`], which consults a single transition
//! table. Statuses never regress; the only backward edge is into
//! `FAILED`, reachable from any non-terminal state.

use anyhow::{bail, Result};
use sqlx::SqlitePool;

/// Lifecycle states of a document, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Extracted,
    Cleaned,
    Chunked,
    Embedded,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "UPLOADED",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Extracted => "EXTRACTED",
            DocumentStatus::Cleaned => "CLEANED",
            DocumentStatus::Chunked => "CHUNKED",
            DocumentStatus::Embedded => "EMBEDDED",
            DocumentStatus::Failed => "FAILED",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Embedded | DocumentStatus::Failed)
    }

    /// Whether `from → to` is a legal lifecycle transition.
    ///
    /// Forward edges follow the pipeline; any non-terminal state may fail.
    pub fn can_transition(from: DocumentStatus, to: DocumentStatus) -> bool {
        use DocumentStatus::*;
        match (from, to) {
            (Uploaded, Processing) => true,
            (Processing, Extracted) => true,
            (Extracted, Cleaned) => true,
            (Cleaned, Chunked) => true,
            (Chunked, Embedded) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UPLOADED" => Ok(DocumentStatus::Uploaded),
            "PROCESSING" => Ok(DocumentStatus::Processing),
            "EXTRACTED" => Ok(DocumentStatus::Extracted),
            "CLEANED" => Ok(DocumentStatus::Cleaned),
            "CHUNKED" => Ok(DocumentStatus::Chunked),
            "EMBEDDED" => Ok(DocumentStatus::Embedded),
            "FAILED" => Ok(DocumentStatus::Failed),
            other => bail!("unknown document status: {}", other),
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read a document's current status.
pub async fn current_status(pool: &SqlitePool, document_id: &str) -> Result<DocumentStatus> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM documents WHERE id = ?")
        .bind(document_id)
        .fetch_optional(pool)
        .await?;

    match status {
        Some(s) => s.parse(),
        None => bail!("document not found: {}", document_id),
    }
}

/// Transition a document from `from` to `to`, enforcing the transition table.
///
/// The UPDATE is conditioned on the expected pre-state, so a concurrent
/// writer that already moved the document on leaves this a no-op; the
/// returned flag reports whether this call performed the write.
pub async fn advance(
    pool: &SqlitePool,
    document_id: &str,
    from: DocumentStatus,
    to: DocumentStatus,
) -> Result<bool> {
    if !DocumentStatus::can_transition(from, to) {
        bail!("illegal document transition {} -> {}", from, to);
    }

    let result = sqlx::query("UPDATE documents SET status = ? WHERE id = ? AND status = ?")
        .bind(to.as_str())
        .bind(document_id)
        .bind(from.as_str())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Move a document to FAILED from whatever non-terminal state it is in.
///
/// Stage handlers call this before re-signaling an error to the job
/// runner. A document already in a terminal state is left untouched.
pub async fn mark_failed(pool: &SqlitePool, document_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE documents SET status = 'FAILED' WHERE id = ? AND status NOT IN ('EMBEDDED', 'FAILED')",
    )
    .bind(document_id)
    .execute(pool)
    .await?;

    Ok(())
}
