//! Paragraph-accumulating document chunker.
//!
//! Walks a document's cleaned pages in page order, packing whole
//! paragraphs into chunks up to a soft token ceiling. A single paragraph
//! larger than the ceiling is never split mid-paragraph — truncating a
//! semantic unit costs more than an oversized chunk.
//!
//! Each chunk's hash is derived from its identity fields, and persistence
//! is keyed on `(document_id, chunk_hash)` with insert-if-absent, so
//! re-chunking identical cleaned input converges instead of duplicating.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{ChunkStatus, Page};
use crate::tokens;

/// A chunk produced by [`build_chunks`], before it has a row id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub page_start: i64,
    pub page_end: i64,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub chunk_hash: String,
    pub token_count: i64,
}

/// Split cleaned pages into an ordered sequence of chunk drafts.
///
/// `max_tokens` is a soft ceiling: the buffer is flushed *before* a
/// paragraph that would push it past the limit, but the paragraph itself
/// is always appended whole. Pages must arrive ordered by page number.
/// Zero non-empty paragraphs yield zero chunks, which is valid output.
pub fn build_chunks(pages: &[Page], max_tokens: i64) -> Vec<ChunkDraft> {
    let mut chunks = Vec::new();

    let Some(first) = pages.first() else {
        return chunks;
    };

    let mut index: i64 = 0;
    let mut buffer = String::new();
    let mut buffer_tokens: i64 = 0;
    let mut start_page = first.page_number;

    for page in pages {
        let cleaned = page.cleaned_text.as_deref().unwrap_or("");

        for paragraph in cleaned.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }

            let paragraph_tokens = tokens::estimate(paragraph);

            if buffer_tokens + paragraph_tokens > max_tokens && !buffer.is_empty() {
                chunks.push(draft(
                    &buffer,
                    start_page,
                    page.page_number,
                    index,
                    buffer_tokens,
                ));
                index += 1;
                buffer.clear();
                buffer_tokens = 0;
                start_page = page.page_number;
            }

            buffer.push_str(paragraph);
            buffer.push_str("\n\n");
            buffer_tokens += paragraph_tokens;
        }
    }

    if !buffer.is_empty() {
        let last_page = pages[pages.len() - 1].page_number;
        chunks.push(draft(&buffer, start_page, last_page, index, buffer_tokens));
    }

    chunks
}

fn draft(
    buffer: &str,
    page_start: i64,
    page_end: i64,
    chunk_index: i64,
    token_count: i64,
) -> ChunkDraft {
    let chunk_text = buffer.trim().to_string();
    let chunk_hash = chunk_identity_hash(page_start, page_end, chunk_index, &chunk_text);

    ChunkDraft {
        page_start,
        page_end,
        chunk_index,
        chunk_text,
        chunk_hash,
        token_count,
    }
}

/// Hash of the identity string `(page_start, page_end, chunk_index, text)`.
pub fn chunk_identity_hash(
    page_start: i64,
    page_end: i64,
    chunk_index: i64,
    chunk_text: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}:", page_start, page_end, chunk_index).as_bytes());
    hasher.update(chunk_text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Persist chunk drafts with insert-if-absent semantics.
///
/// Rows whose `(document_id, chunk_hash)` already exist are left
/// untouched. Returns the number of rows actually inserted.
pub async fn insert_chunks(
    pool: &SqlitePool,
    document_id: &str,
    drafts: &[ChunkDraft],
) -> Result<u64> {
    let now = chrono::Utc::now().timestamp();
    let mut inserted = 0u64;

    let mut tx = pool.begin().await?;

    for draft in drafts {
        let result = sqlx::query(
            r#"
            INSERT INTO chunks
                (id, document_id, page_start, page_end, chunk_index, section_title,
                 chunk_text, chunk_hash, token_count, status, created_at)
            VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id, chunk_hash) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(document_id)
        .bind(draft.page_start)
        .bind(draft.page_end)
        .bind(draft.chunk_index)
        .bind(&draft.chunk_text)
        .bind(&draft.chunk_hash)
        .bind(draft.token_count)
        .bind(ChunkStatus::Pending.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: i64, cleaned: &str) -> Page {
        Page {
            id: format!("page-{}", number),
            document_id: "doc".to_string(),
            page_number: number,
            raw_text: cleaned.to_string(),
            raw_hash: crate::clean::text_hash(cleaned),
            cleaned_text: Some(cleaned.to_string()),
            clean_hash: Some(crate::clean::text_hash(cleaned)),
        }
    }

    // ~25 tokens per paragraph with the 4-chars-per-token estimate.
    fn paragraph(tag: &str) -> String {
        format!("{} {}", tag, "word ".repeat(19)).trim().to_string()
    }

    #[test]
    fn small_document_yields_one_chunk() {
        let pages = vec![page(1, "First paragraph.\n\nSecond paragraph.")];
        let chunks = build_chunks(&pages, 500);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].page_start, 1);
        assert_eq!(chunks[0].page_end, 1);
        assert!(chunks[0].chunk_text.contains("First paragraph."));
        assert!(chunks[0].chunk_text.contains("Second paragraph."));
    }

    #[test]
    fn empty_pages_yield_zero_chunks() {
        assert!(build_chunks(&[], 500).is_empty());
        assert!(build_chunks(&[page(1, ""), page(2, "  \n\n ")], 500).is_empty());
    }

    #[test]
    fn buffer_flushes_before_exceeding_ceiling() {
        let text = (0..8)
            .map(|i| paragraph(&format!("p{}", i)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = build_chunks(&[page(1, &text)], 60);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                chunk.token_count <= 60,
                "chunk over ceiling: {}",
                chunk.token_count
            );
        }
    }

    #[test]
    fn chunk_indices_are_contiguous_from_zero() {
        let text = (0..10)
            .map(|i| paragraph(&format!("p{}", i)))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = build_chunks(&[page(1, &text)], 50);

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as i64);
        }
    }

    #[test]
    fn oversized_paragraph_is_never_split() {
        let big = "x".repeat(4000); // ~1000 tokens
        let pages = vec![page(1, &big)];
        let chunks = build_chunks(&pages, 500);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_text, big);
        assert!(chunks[0].token_count > 500);
    }

    #[test]
    fn chunk_spanning_pages_records_both() {
        let pages = vec![
            page(1, &paragraph("alpha")),
            page(2, &paragraph("beta")),
            page(3, &paragraph("gamma")),
        ];
        // All three paragraphs fit into one chunk.
        let chunks = build_chunks(&pages, 500);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page_start, 1);
        assert_eq!(chunks[0].page_end, 3);
    }

    #[test]
    fn flush_resets_start_page_to_triggering_page() {
        let pages = vec![page(1, &paragraph("alpha")), page(2, &paragraph("beta"))];
        // Ceiling forces a flush when the page-2 paragraph arrives.
        let chunks = build_chunks(&pages, 30);

        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].page_start, chunks[0].page_end), (1, 2));
        assert_eq!((chunks[1].page_start, chunks[1].page_end), (2, 2));
    }

    #[test]
    fn identical_input_produces_identical_hashes() {
        let pages = vec![page(1, "One.\n\nTwo.\n\nThree.")];
        let first = build_chunks(&pages, 500);
        let second = build_chunks(&pages, 500);

        assert_eq!(first, second);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.chunk_hash, b.chunk_hash);
        }
    }

    #[test]
    fn hash_covers_position_not_just_text() {
        let same_text = "Repeated content.";
        let a = chunk_identity_hash(1, 1, 0, same_text);
        let b = chunk_identity_hash(2, 2, 1, same_text);
        assert_ne!(a, b);
    }
}
