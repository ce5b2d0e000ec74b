use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory uploaded files are copied into before extraction.
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Soft per-chunk token ceiling; single oversized paragraphs may exceed it.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> i64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_generation_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_batch_size() -> usize {
    50
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Similarity-search candidate cap before ranking.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    /// Candidates below this cosine similarity are excluded outright.
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f64,
    #[serde(default = "default_max_per_page")]
    pub max_per_page: usize,
    #[serde(default = "default_max_per_section")]
    pub max_per_section: usize,
    /// Weight on `ln(age_days + 1)` in the freshness penalty.
    #[serde(default = "default_freshness_weight")]
    pub freshness_weight: f64,
    /// Fixed token cost of the prompt scaffolding, seeded into the budget.
    #[serde(default = "default_prompt_overhead_tokens")]
    pub prompt_overhead_tokens: i64,
    #[serde(default = "default_token_budget")]
    pub token_budget: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_limit: default_candidate_limit(),
            similarity_floor: default_similarity_floor(),
            max_per_page: default_max_per_page(),
            max_per_section: default_max_per_section(),
            freshness_weight: default_freshness_weight(),
            prompt_overhead_tokens: default_prompt_overhead_tokens(),
            token_budget: default_token_budget(),
        }
    }
}

fn default_candidate_limit() -> usize {
    30
}
fn default_similarity_floor() -> f64 {
    0.5
}
fn default_max_per_page() -> usize {
    1
}
fn default_max_per_section() -> usize {
    2
}
fn default_freshness_weight() -> f64 {
    0.1
}
fn default_prompt_overhead_tokens() -> i64 {
    300
}
fn default_token_budget() -> i64 {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Attempts for extraction/processing jobs.
    #[serde(default = "default_pipeline_attempts")]
    pub pipeline_max_attempts: i64,
    /// Attempts for embedding jobs (billable provider calls).
    #[serde(default = "default_embed_attempts")]
    pub embed_max_attempts: i64,
    /// Exponential backoff base delay in seconds.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            pipeline_max_attempts: default_pipeline_attempts(),
            embed_max_attempts: default_embed_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

fn default_pipeline_attempts() -> i64 {
    5
}
fn default_embed_attempts() -> i64 {
    1
}
fn default_backoff_secs() -> i64 {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens <= 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    if !(0.0..=1.0).contains(&config.retrieval.similarity_floor) {
        anyhow::bail!("retrieval.similarity_floor must be in [0.0, 1.0]");
    }

    if config.retrieval.max_per_page == 0 || config.retrieval.max_per_section == 0 {
        anyhow::bail!("retrieval diversity quotas must be >= 1");
    }

    if config.retrieval.prompt_overhead_tokens >= config.retrieval.token_budget {
        anyhow::bail!("retrieval.prompt_overhead_tokens must be below retrieval.token_budget");
    }

    if config.queue.pipeline_max_attempts < 1 || config.queue.embed_max_attempts < 1 {
        anyhow::bail!("queue max attempts must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config("[db]\npath = \"/tmp/docstill.sqlite\"\n");
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.chunking.max_tokens, 500);
        assert_eq!(config.embedding.batch_size, 50);
        assert_eq!(config.retrieval.candidate_limit, 30);
        assert!((config.retrieval.similarity_floor - 0.5).abs() < 1e-9);
        assert_eq!(config.retrieval.max_per_page, 1);
        assert_eq!(config.retrieval.max_per_section, 2);
        assert_eq!(config.retrieval.prompt_overhead_tokens, 300);
        assert_eq!(config.retrieval.token_budget, 1500);
    }

    #[test]
    fn rejects_invalid_similarity_floor() {
        let file = write_config(
            "[db]\npath = \"/tmp/docstill.sqlite\"\n[retrieval]\nsimilarity_floor = 1.5\n",
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn rejects_overhead_at_or_above_budget() {
        let file = write_config(
            "[db]\npath = \"/tmp/d.sqlite\"\n[retrieval]\nprompt_overhead_tokens = 1500\n",
        );
        assert!(load_config(file.path()).is_err());
    }
}
