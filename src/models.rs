//! Core data models for the ingestion and retrieval pipeline.
//!
//! These types mirror the SQLite schema created by [`crate::migrate`]. Rows
//! are mapped by hand with `sqlx::Row::get`, keeping the column contracts
//! explicit at each query site.

use anyhow::{bail, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::state::DocumentStatus;

/// A registered document, one row per uploaded file.
///
/// `status` is only ever mutated through state-machine transitions
/// (see [`crate::state`]).
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub storage_path: String,
    pub mime_type: String,
    pub status: DocumentStatus,
    pub created_at: i64,
}

impl Document {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.get("status");
        Ok(Self {
            id: row.get("id"),
            name: row.get("name"),
            storage_path: row.get("storage_path"),
            mime_type: row.get("mime_type"),
            status: status.parse()?,
            created_at: row.get("created_at"),
        })
    }
}

/// One extracted page of a document, unique per `(document_id, page_number)`.
///
/// `cleaned_text`/`clean_hash` are populated exactly once by the cleaning
/// stage; the row is immutable after that.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: String,
    pub document_id: String,
    pub page_number: i64,
    pub raw_text: String,
    pub raw_hash: String,
    pub cleaned_text: Option<String>,
    pub clean_hash: Option<String>,
}

/// Raw page text as produced by the extractor boundary, before any rows exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page_number: i64,
    pub raw_text: String,
}

/// Embedding lifecycle of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Embedded,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "PENDING",
            ChunkStatus::Embedded => "EMBEDDED",
            ChunkStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for ChunkStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(ChunkStatus::Pending),
            "EMBEDDED" => Ok(ChunkStatus::Embedded),
            "FAILED" => Ok(ChunkStatus::Failed),
            other => bail!("unknown chunk status: {}", other),
        }
    }
}
