use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use civic_retrieval::{RetrievalConfig, ScoringStrategy};
use tracing::warn;

const DEFAULT_STAFF_API_KEY: &str = "dev-civic-staff-key";
const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
];

/// Service settings, read from `CIVIC_*` environment variables.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub kb_root: PathBuf,
    /// `None` keeps everything in memory.
    pub database_url: Option<String>,
    pub bind: String,
    pub staff_api_key: String,
    pub chat_retrieval: RetrievalConfig,
    pub staff_retrieval: RetrievalConfig,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    pub allowed_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            kb_root: PathBuf::from("kb"),
            database_url: None,
            bind: "0.0.0.0:8080".to_string(),
            staff_api_key: DEFAULT_STAFF_API_KEY.to_string(),
            chat_retrieval: RetrievalConfig::chat(),
            staff_retrieval: RetrievalConfig::staff(),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 120,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|origin| origin.to_string())
                .collect(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let strategy = match env::var("CIVIC_SCORING") {
            Ok(value) => ScoringStrategy::parse(&value).unwrap_or_else(|| {
                warn!(value = %value, "unknown CIVIC_SCORING, using embedding");
                ScoringStrategy::Embedding
            }),
            Err(_) => ScoringStrategy::Embedding,
        };

        let mut chat_retrieval = defaults.chat_retrieval.with_strategy(strategy);
        chat_retrieval.top_k = env_parse("CIVIC_CHAT_TOP_K", chat_retrieval.top_k);
        chat_retrieval.min_score = env_parse("CIVIC_CHAT_MIN_SCORE", chat_retrieval.min_score);

        let mut staff_retrieval = defaults.staff_retrieval.with_strategy(strategy);
        staff_retrieval.min_score = env_parse("CIVIC_STAFF_MIN_SCORE", staff_retrieval.min_score);

        Self {
            kb_root: env::var("CIVIC_KB_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.kb_root),
            database_url: env::var("CIVIC_DATABASE_URL")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            bind: env::var("CIVIC_BIND").unwrap_or(defaults.bind),
            staff_api_key: env::var("CIVIC_STAFF_API_KEY").unwrap_or(defaults.staff_api_key),
            chat_retrieval,
            staff_retrieval,
            rate_limit_window: Duration::from_secs(env_parse(
                "CIVIC_RATE_LIMIT_WINDOW_SECONDS",
                defaults.rate_limit_window.as_secs(),
            )),
            rate_limit_max: env_parse("CIVIC_RATE_LIMIT_MAX", defaults.rate_limit_max),
            allowed_origins: env::var("CIVIC_ALLOWED_ORIGINS")
                .ok()
                .map(|value| parse_origins(&value))
                .unwrap_or(defaults.allowed_origins),
        }
    }

    pub fn with_kb_root(mut self, kb_root: impl Into<PathBuf>) -> Self {
        self.kb_root = kb_root.into();
        self
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|origin| origin.trim().trim_end_matches('/').to_string())
        .filter(|origin| !origin.is_empty())
        .collect()
}
