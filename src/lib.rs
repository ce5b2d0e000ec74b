//! # docstill
//!
//! A single-document RAG backend: a multi-stage ingestion pipeline that
//! turns PDF bytes into deduplicated, embedded chunks in SQLite, and a
//! retrieval ranking engine that turns a query into a bounded, diverse,
//! fresh context for grounded answer generation.
//!
//! ## Architecture
//!
//! ```text
//! upload ──▶ jobs queue ──▶ extract ─▶ clean ─▶ chunk ─▶ embed
//!                              UPLOADED → … → EMBEDDED
//!
//! query ──▶ embed ──▶ similarity search ──▶ diversity ──▶ freshness
//!                                   ──▶ token packing ──▶ prompt ──▶ answer
//! ```
//!
//! Ingestion is driven by at-least-once jobs; every stage gates on an
//! exact document status and keys its writes by content hash or explicit
//! id, so redelivered jobs converge instead of duplicating. Retrieval is
//! read-only and fully deterministic given the stored data and a query
//! vector.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`state`] | Document lifecycle state machine |
//! | [`extract`] | PDF text extraction boundary |
//! | [`clean`] | Canonical text cleaning |
//! | [`tokens`] | Cheap token estimation |
//! | [`chunker`] | Paragraph-accumulating chunker |
//! | [`embed`] | Batched embedding writer |
//! | [`embedding`] | Embedding provider + vector utilities |
//! | [`generation`] | Answer-generation provider |
//! | [`ranker`] | Retrieval ranking engine |
//! | [`prompt`] | Grounded prompt assembly |
//! | [`retrieve`] | Retrieval orchestration |
//! | [`pipeline`] | Stage handlers and the queue worker |
//! | [`queue`] | SQLite-backed job queue |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod clean;
pub mod config;
pub mod db;
pub mod embed;
pub mod embedding;
pub mod errors;
pub mod extract;
pub mod generation;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod queue;
pub mod ranker;
pub mod retrieve;
pub mod state;
pub mod tokens;
