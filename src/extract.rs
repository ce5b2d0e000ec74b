//! PDF text extraction boundary.
//!
//! The pipeline treats extraction as a black box: bytes in, ordered page
//! texts out. [`TextExtractor`] is the injectable seam; production uses
//! [`PdfExtractor`] backed by `pdf-extract`, tests substitute a fixture
//! implementation.

use anyhow::Result;

use crate::errors::PipelineError;
use crate::models::PageText;

/// Extracts ordered page texts from raw document bytes.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>>;
}

/// `pdf-extract`-backed extractor.
///
/// `pdf-extract` renders the whole document with form feeds at page
/// breaks; pages are recovered by splitting on `\f`. Pages with no text
/// are dropped and the remaining pages are renumbered contiguously from 1.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Vec<PageText>> {
        let text = pdf_extract::extract_text_from_mem(bytes)?;
        let pages = split_pages(&text);

        if pages.is_empty() {
            return Err(PipelineError::NoTextExtracted.into());
        }

        Ok(pages)
    }
}

fn split_pages(text: &str) -> Vec<PageText> {
    text.split('\u{c}')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(i, raw)| PageText {
            page_number: i as i64 + 1,
            raw_text: raw.to_string(),
        })
        .collect()
}
