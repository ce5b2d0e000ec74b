//! Retrieval ranking engine.
//!
//! Turns a query vector plus a noisy similarity search into a bounded,
//! diverse, fresh context selection. The pipeline is deterministic end to
//! end: candidate shortlist (floor + cap) → first-come diversity quotas →
//! logarithmic freshness re-ranking → token-budget packing. Every
//! candidate considered leaves one immutable trace record saying what
//! happened to it and why.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::RetrievalConfig;
use crate::embedding::{blob_to_vec, cosine_similarity};

/// Bucket used for chunks without a section title.
pub const UNKNOWN_SECTION: &str = "UNKNOWN";

/// A chunk surviving the similarity shortlist, ready for ranking.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk_id: String,
    pub chunk_text: String,
    pub section_title: Option<String>,
    pub page_start: i64,
    pub chunk_index: i64,
    pub token_count: i64,
    pub created_at: i64,
    pub similarity: f64,
}

impl Candidate {
    fn section_bucket(&self) -> &str {
        self.section_title.as_deref().unwrap_or(UNKNOWN_SECTION)
    }
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Its starting page already filled the per-page quota.
    PageQuota,
    /// Its section bucket already filled the per-section quota.
    SectionQuota,
    /// Accepting it would exceed the prompt token budget.
    TokenLimit,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::PageQuota => "page quota",
            RejectReason::SectionQuota => "section quota",
            RejectReason::TokenLimit => "token limit",
        }
    }
}

/// Final decision on one candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Accepted { final_score: f64 },
    Rejected(RejectReason),
}

/// One immutable trace record per candidate considered.
#[derive(Debug, Clone)]
pub struct CandidateOutcome {
    pub chunk_id: String,
    pub page_start: i64,
    pub section: String,
    pub similarity: f64,
    pub decision: Decision,
}

/// A candidate accepted into the context, with its freshness-adjusted score.
#[derive(Debug, Clone)]
pub struct SelectedChunk {
    pub chunk_id: String,
    pub chunk_text: String,
    pub section_title: Option<String>,
    pub page_start: i64,
    pub token_count: i64,
    pub final_score: f64,
}

/// Ranked context plus the diagnostic trace.
#[derive(Debug, Clone)]
pub struct RankingOutcome {
    /// Accepted chunks, in acceptance order.
    pub selected: Vec<SelectedChunk>,
    pub trace: Vec<CandidateOutcome>,
}

/// Fetch similarity-search candidates for one document and model.
///
/// One explicit parameterized query with pinned columns; similarity is
/// computed in Rust over the stored vectors, then the floor and cap are
/// applied by [`shortlist`]. Only chunks already committed as EMBEDDED
/// for the active model are visible.
pub async fn fetch_candidates(
    pool: &SqlitePool,
    document_id: &str,
    model_name: &str,
    query_vector: &[f32],
    config: &RetrievalConfig,
) -> Result<Vec<Candidate>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id, c.chunk_text, c.section_title, c.page_start, c.chunk_index,
               c.token_count, c.created_at, e.vector
        FROM chunks c
        INNER JOIN embeddings e ON e.chunk_id = c.id
        WHERE c.document_id = ? AND c.status = 'EMBEDDED' AND e.model_name = ?
        "#,
    )
    .bind(document_id)
    .bind(model_name)
    .fetch_all(pool)
    .await?;

    let scored: Vec<Candidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("vector");
            let vector = blob_to_vec(&blob);
            Candidate {
                chunk_id: row.get("id"),
                chunk_text: row.get("chunk_text"),
                section_title: row.get("section_title"),
                page_start: row.get("page_start"),
                chunk_index: row.get("chunk_index"),
                token_count: row.get("token_count"),
                created_at: row.get("created_at"),
                similarity: cosine_similarity(query_vector, &vector) as f64,
            }
        })
        .collect();

    Ok(shortlist(
        scored,
        config.similarity_floor,
        config.candidate_limit,
    ))
}

/// Apply the similarity floor and candidate cap.
///
/// Below-floor candidates are excluded before any further ranking and do
/// not appear in the trace. Ordering is similarity descending with
/// chunk-index ascending as the deterministic tie-break.
pub fn shortlist(mut scored: Vec<Candidate>, floor: f64, cap: usize) -> Vec<Candidate> {
    scored.retain(|c| c.similarity >= floor);
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_index.cmp(&b.chunk_index))
    });
    scored.truncate(cap);
    scored
}

/// Run diversity, freshness, and token packing over shortlisted candidates.
///
/// `now` anchors the freshness computation; callers pass the current time
/// and tests pass a fixed instant.
pub fn rank(candidates: Vec<Candidate>, now: i64, config: &RetrievalConfig) -> RankingOutcome {
    let mut trace = Vec::with_capacity(candidates.len());

    // Diversity: first-come, first-served over the similarity order. The
    // single best-matching page must not monopolize the context.
    let mut page_counts: std::collections::HashMap<i64, usize> = std::collections::HashMap::new();
    let mut section_counts: std::collections::HashMap<String, usize> =
        std::collections::HashMap::new();
    let mut survivors = Vec::new();

    for candidate in candidates {
        let page_count = page_counts.get(&candidate.page_start).copied().unwrap_or(0);
        if page_count >= config.max_per_page {
            trace.push(outcome(&candidate, Decision::Rejected(RejectReason::PageQuota)));
            continue;
        }

        let section = candidate.section_bucket().to_string();
        let section_count = section_counts.get(&section).copied().unwrap_or(0);
        if section_count >= config.max_per_section {
            trace.push(outcome(
                &candidate,
                Decision::Rejected(RejectReason::SectionQuota),
            ));
            continue;
        }

        page_counts.insert(candidate.page_start, page_count + 1);
        section_counts.insert(section, section_count + 1);
        survivors.push(candidate);
    }

    // Freshness: a mild recency bias that can reorder but never excludes.
    let mut scored: Vec<(Candidate, f64)> = survivors
        .into_iter()
        .map(|c| {
            let score = c.similarity - freshness_penalty(now, c.created_at, config.freshness_weight);
            (c, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    // Token packing: a rejected chunk does not end the walk — a later,
    // smaller chunk may still fit.
    let mut running = config.prompt_overhead_tokens;
    let mut selected = Vec::new();

    for (candidate, final_score) in scored {
        if running + candidate.token_count <= config.token_budget {
            running += candidate.token_count;
            trace.push(outcome(&candidate, Decision::Accepted { final_score }));
            selected.push(SelectedChunk {
                chunk_id: candidate.chunk_id,
                chunk_text: candidate.chunk_text,
                section_title: candidate.section_title,
                page_start: candidate.page_start,
                token_count: candidate.token_count,
                final_score,
            });
        } else {
            trace.push(outcome(
                &candidate,
                Decision::Rejected(RejectReason::TokenLimit),
            ));
        }
    }

    RankingOutcome { selected, trace }
}

/// `ln(age_days + 1) * weight`, age clamped to zero for future timestamps.
fn freshness_penalty(now: i64, created_at: i64, weight: f64) -> f64 {
    let age_days = ((now - created_at).max(0) as f64) / 86_400.0;
    (age_days + 1.0).ln() * weight
}

fn outcome(candidate: &Candidate, decision: Decision) -> CandidateOutcome {
    CandidateOutcome {
        chunk_id: candidate.chunk_id.clone(),
        page_start: candidate.page_start,
        section: candidate.section_bucket().to_string(),
        similarity: candidate.similarity,
        decision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn candidate(id: &str, page: i64, similarity: f64) -> Candidate {
        Candidate {
            chunk_id: id.to_string(),
            chunk_text: format!("text for {}", id),
            section_title: None,
            page_start: page,
            chunk_index: 0,
            token_count: 100,
            created_at: NOW,
            similarity,
        }
    }

    fn config() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    fn accepted_ids(outcome: &RankingOutcome) -> Vec<&str> {
        outcome.selected.iter().map(|s| s.chunk_id.as_str()).collect()
    }

    // ---- shortlist ----

    #[test]
    fn shortlist_applies_floor_before_ranking() {
        let scored = vec![
            candidate("high", 1, 0.9),
            candidate("floor", 2, 0.5),
            candidate("below", 3, 0.49),
        ];
        let kept = shortlist(scored, 0.5, 30);
        let ids: Vec<&str> = kept.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["high", "floor"]);
    }

    #[test]
    fn shortlist_caps_candidates() {
        let scored: Vec<Candidate> = (0..40)
            .map(|i| candidate(&format!("c{}", i), i, 0.9 - i as f64 * 0.001))
            .collect();
        assert_eq!(shortlist(scored, 0.5, 30).len(), 30);
    }

    #[test]
    fn shortlist_orders_by_similarity_descending() {
        let scored = vec![
            candidate("mid", 1, 0.7),
            candidate("top", 2, 0.9),
            candidate("low", 3, 0.6),
        ];
        let kept = shortlist(scored, 0.5, 30);
        let ids: Vec<&str> = kept.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["top", "mid", "low"]);
    }

    // ---- diversity ----

    #[test]
    fn page_quota_caps_one_chunk_per_page() {
        // Six of ten candidates share page 4; similarity rank is irrelevant.
        // Distinct section titles keep the section quota out of the picture.
        let mut candidates = Vec::new();
        for i in 0..6 {
            let mut c = candidate(&format!("same{}", i), 4, 0.95 - i as f64 * 0.01);
            c.section_title = Some(format!("same-sec{}", i));
            candidates.push(c);
        }
        for i in 0..4 {
            let mut c = candidate(&format!("other{}", i), 10 + i, 0.7);
            c.section_title = Some(format!("other-sec{}", i));
            candidates.push(c);
        }

        let result = rank(candidates, NOW, &config());
        let from_page_4 = result
            .selected
            .iter()
            .filter(|s| s.page_start == 4)
            .count();
        assert_eq!(from_page_4, 1);
        assert_eq!(result.selected.len(), 5);

        let page_rejections = result
            .trace
            .iter()
            .filter(|t| t.decision == Decision::Rejected(RejectReason::PageQuota))
            .count();
        assert_eq!(page_rejections, 5);
    }

    #[test]
    fn section_quota_caps_two_per_bucket() {
        let mut candidates: Vec<Candidate> = (0..4)
            .map(|i| {
                let mut c = candidate(&format!("auth{}", i), i, 0.9 - i as f64 * 0.01);
                c.section_title = Some("Authentication".to_string());
                c
            })
            .collect();
        candidates.push(candidate("plain", 50, 0.6));

        let result = rank(candidates, NOW, &config());
        let auth_accepted = result
            .selected
            .iter()
            .filter(|s| s.section_title.as_deref() == Some("Authentication"))
            .count();
        assert_eq!(auth_accepted, 2);
    }

    #[test]
    fn untitled_chunks_share_the_unknown_bucket() {
        // Three untitled candidates on distinct pages: the third hits the
        // UNKNOWN section quota even though pages differ.
        let candidates = vec![
            candidate("a", 1, 0.9),
            candidate("b", 2, 0.8),
            candidate("c", 3, 0.7),
        ];
        let result = rank(candidates, NOW, &config());
        assert_eq!(result.selected.len(), 2);
        let third = result.trace.iter().find(|t| t.chunk_id == "c").unwrap();
        assert_eq!(third.decision, Decision::Rejected(RejectReason::SectionQuota));
        assert_eq!(third.section, UNKNOWN_SECTION);
    }

    // ---- freshness ----

    #[test]
    fn freshness_penalty_grows_logarithmically() {
        assert!(freshness_penalty(NOW, NOW, 0.1).abs() < 1e-9);
        let ten_days = freshness_penalty(NOW, NOW - 10 * 86_400, 0.1);
        let hundred_days = freshness_penalty(NOW, NOW - 100 * 86_400, 0.1);
        assert!(ten_days > 0.0);
        assert!(hundred_days < ten_days * 3.0); // log, not linear
    }

    #[test]
    fn freshness_reorders_but_never_excludes() {
        let mut old = candidate("old", 1, 0.80);
        old.created_at = NOW - 365 * 86_400;
        old.section_title = Some("A".to_string());
        let mut new = candidate("new", 2, 0.78);
        new.created_at = NOW;
        new.section_title = Some("B".to_string());

        // Penalty at one year ≈ ln(366) * 0.1 ≈ 0.59, so the newer chunk
        // overtakes, but the old one still lands in the selection.
        let result = rank(vec![old, new], NOW, &config());
        assert_eq!(accepted_ids(&result), vec!["new", "old"]);
    }

    // ---- token packing ----

    #[test]
    fn budget_never_exceeded_including_overhead() {
        let cfg = config();
        let mut candidates = Vec::new();
        for i in 0..8 {
            let mut c = candidate(&format!("c{}", i), i, 0.9 - i as f64 * 0.01);
            c.section_title = Some(format!("s{}", i));
            c.token_count = 400;
            candidates.push(c);
        }

        let result = rank(candidates, NOW, &cfg);
        let total: i64 = result.selected.iter().map(|s| s.token_count).sum();
        assert!(cfg.prompt_overhead_tokens + total <= cfg.token_budget);
        assert_eq!(result.selected.len(), 3); // 300 + 3 * 400 = 1500
    }

    #[test]
    fn later_smaller_chunk_fits_after_a_rejection() {
        let mut big = candidate("big", 1, 0.9);
        big.token_count = 1000;
        big.section_title = Some("A".to_string());
        let mut huge = candidate("huge", 2, 0.85);
        huge.token_count = 900;
        huge.section_title = Some("B".to_string());
        let mut small = candidate("small", 3, 0.8);
        small.token_count = 150;
        small.section_title = Some("C".to_string());

        let result = rank(vec![big, huge, small], NOW, &config());
        assert_eq!(accepted_ids(&result), vec!["big", "small"]);

        let huge_outcome = result
            .trace
            .iter()
            .find(|t| t.chunk_id == "huge")
            .unwrap();
        assert_eq!(
            huge_outcome.decision,
            Decision::Rejected(RejectReason::TokenLimit)
        );
    }

    // ---- trace & determinism ----

    #[test]
    fn every_candidate_gets_exactly_one_trace_record() {
        let mut candidates = Vec::new();
        for i in 0..10 {
            let mut c = candidate(&format!("c{}", i), i % 3, 0.9 - i as f64 * 0.01);
            c.section_title = Some(format!("s{}", i % 2));
            candidates.push(c);
        }

        let result = rank(candidates, NOW, &config());
        assert_eq!(result.trace.len(), 10);
        let mut ids: Vec<&str> = result.trace.iter().map(|t| t.chunk_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn ranking_is_deterministic() {
        let make = || {
            (0..12)
                .map(|i| {
                    let mut c = candidate(&format!("c{}", i), i % 4, 0.9 - (i % 5) as f64 * 0.02);
                    c.section_title = Some(format!("s{}", i % 3));
                    c.created_at = NOW - (i as i64) * 86_400;
                    c
                })
                .collect::<Vec<_>>()
        };

        let first = rank(shortlist(make(), 0.5, 30), NOW, &config());
        let second = rank(shortlist(make(), 0.5, 30), NOW, &config());
        assert_eq!(accepted_ids(&first), accepted_ids(&second));
        assert_eq!(first.trace.len(), second.trace.len());
    }

    #[test]
    fn empty_candidates_yield_empty_selection() {
        let result = rank(Vec::new(), NOW, &config());
        assert!(result.selected.is_empty());
        assert!(result.trace.is_empty());
    }
}
