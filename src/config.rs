use std::time::Duration;

/// 全部配置来自环境变量（.env 在 main 中加载），带默认值，不在代码里硬编码散落
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub similarity_threshold: f64,
    pub parse_confidence_threshold: f64,
    pub match_top_k: usize,
    pub embed_timeout: Duration,
    pub reasoning_timeout: Duration,
    pub parse_timeout: Duration,
    pub batch_concurrency: usize,
    pub batch_pause: Duration,
    pub max_input_len: usize,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://carbon.db?mode=rwc".to_string()),
            chat_model: std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embedding_dimension: env_or("EMBEDDING_DIMENSION", 1536),
            similarity_threshold: env_or("SIMILARITY_THRESHOLD", 0.6),
            parse_confidence_threshold: env_or("PARSE_CONFIDENCE_THRESHOLD", 0.3),
            match_top_k: env_or("MATCH_TOP_K", 5),
            embed_timeout: Duration::from_secs(env_or("EMBED_TIMEOUT_SECS", 10)),
            reasoning_timeout: Duration::from_secs(env_or("REASONING_TIMEOUT_SECS", 20)),
            parse_timeout: Duration::from_secs(env_or("PARSE_TIMEOUT_SECS", 15)),
            batch_concurrency: env_or("BATCH_CONCURRENCY", 5),
            batch_pause: Duration::from_millis(env_or("BATCH_PAUSE_MS", 500)),
            max_input_len: env_or("MAX_INPUT_LEN", 2000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://carbon.db?mode=rwc".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: 1536,
            similarity_threshold: 0.6,
            parse_confidence_threshold: 0.3,
            match_top_k: 5,
            embed_timeout: Duration::from_secs(10),
            reasoning_timeout: Duration::from_secs(20),
            parse_timeout: Duration::from_secs(15),
            batch_concurrency: 5,
            batch_pause: Duration::from_millis(500),
            max_input_len: 2000,
        }
    }
}
