//! Typed settings read from the process environment.
//!
//! Every knob the orchestrator recognizes lives here; [`Settings::from_env`]
//! falls back to defaults for missing keys so a bare environment still
//! yields a runnable (if keyless) configuration.

use serde::{Deserialize, Serialize};

use crate::LoadError;

/// Which backend produces embedding vectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingProvider {
    /// Deterministic in-process feature hashing; no network.
    Local,
    /// OpenAI-compatible embeddings API (custom base URL allowed).
    OpenAiCompatible,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "openai" | "openai-compatible" => Ok(Self::OpenAiCompatible),
            other => Err(format!("unknown embedding provider: {other}")),
        }
    }
}

/// Per-provider connection parameters. Providers ignore fields they do not
/// support (the adapter drops them silently).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model_code: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    /// Per-invocation timeout in seconds.
    pub timeout_secs: u64,
}

/// All settings the orchestrator recognizes.
#[derive(Clone, Debug)]
pub struct Settings {
    pub app_host: String,
    pub app_port: u16,
    pub app_log_level: String,

    /// sqlx connection URL, e.g. `sqlite://weft.db` or `sqlite::memory:`.
    pub database_url: String,
    pub db_pool_min: u32,
    pub db_pool_max: u32,
    pub db_idle_secs: u64,

    pub redis_url: String,

    pub jwt_secret: String,
    pub jwt_expire_minutes: i64,
    pub jwt_issuer: String,
    /// Max concurrent sessions per user; the atomic script evicts beyond it.
    pub max_login_num: usize,

    pub embedding_provider: EmbeddingProvider,
    pub embedding_model: String,
    /// Must match the stored vector width.
    pub embedding_dimension: usize,
    pub embedding_api_key: Option<String>,
    pub embedding_base_url: Option<String>,

    pub rag_top_k: usize,
    pub rag_similarity_threshold: f32,
    pub max_history_messages: usize,
    pub max_history_tokens: usize,

    pub deep_search_max_rounds: u32,
    pub max_search_words: usize,
    pub tavily_api_key: Option<String>,

    /// DeepSeek is the default chat provider.
    pub deepseek: ProviderSettings,
    pub gemini: ProviderSettings,
    /// "Responses-style" streaming-only relay provider.
    pub responses: ProviderSettings,
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, LoadError> {
    match env(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| LoadError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn env_parse_opt<T: std::str::FromStr>(key: &str) -> Result<Option<T>, LoadError> {
    match env(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| LoadError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}

fn provider(prefix: &str, default_model: &str, default_base: Option<&str>) -> Result<ProviderSettings, LoadError> {
    Ok(ProviderSettings {
        api_key: env(&format!("{prefix}_API_KEY")),
        base_url: env(&format!("{prefix}_BASE_URL"))
            .or_else(|| default_base.map(str::to_string)),
        model_code: env_or(&format!("{prefix}_MODEL"), default_model),
        temperature: env_parse_opt(&format!("{prefix}_TEMPERATURE"))?,
        top_p: env_parse_opt(&format!("{prefix}_TOP_P"))?,
        top_k: env_parse_opt(&format!("{prefix}_TOP_K"))?,
        max_tokens: env_parse_opt(&format!("{prefix}_MAX_TOKENS"))?,
        timeout_secs: env_parse(&format!("{prefix}_TIMEOUT"), 30)?,
    })
}

impl Settings {
    /// Reads all recognized keys from the environment, defaulting the rest.
    pub fn from_env() -> Result<Self, LoadError> {
        Ok(Self {
            app_host: env_or("APP_HOST", "0.0.0.0"),
            app_port: env_parse("APP_PORT", 8080)?,
            app_log_level: env_or("APP_LOG_LEVEL", "info"),

            database_url: env_or("DATABASE_URL", "sqlite://weft.db"),
            db_pool_min: env_parse("DB_POOL_MIN", 2)?,
            db_pool_max: env_parse("DB_POOL_MAX", 10)?,
            db_idle_secs: env_parse("DB_IDLE_SECS", 300)?,

            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379/0"),

            jwt_secret: env_or("JWT_SECRET", "change_me"),
            jwt_expire_minutes: env_parse("JWT_EXPIRE_MINUTES", 60)?,
            jwt_issuer: env_or("JWT_ISSUER", "weft"),
            max_login_num: env_parse("MAX_LOGIN_NUM", 2)?,

            embedding_provider: env_parse(
                "EMBEDDING_PROVIDER",
                EmbeddingProvider::Local,
            )?,
            embedding_model: env_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_dimension: env_parse("EMBEDDING_DIMENSION", 1536)?,
            embedding_api_key: env("EMBEDDING_API_KEY"),
            embedding_base_url: env("EMBEDDING_BASE_URL"),

            rag_top_k: env_parse("RAG_TOP_K", 5)?,
            rag_similarity_threshold: env_parse("RAG_SIMILARITY_THRESHOLD", 0.5)?,
            max_history_messages: env_parse("MAX_HISTORY_MESSAGES", 20)?,
            max_history_tokens: env_parse("MAX_HISTORY_TOKENS", 4000)?,

            deep_search_max_rounds: env_parse("DEEP_SEARCH_MAX_ROUNDS", 3)?,
            max_search_words: env_parse("MAX_SEARCH_WORDS", 5)?,
            tavily_api_key: env("TAVILY_API_KEY"),

            deepseek: provider(
                "DEEPSEEK",
                "deepseek-chat",
                Some("https://api.deepseek.com/v1"),
            )?,
            gemini: provider("GEMINI", "gemini-2.0-flash", None)?,
            responses: provider("RESPONSES", "gpt-5.1-codex-max", None)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests mutate the process environment; serialise them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// **Scenario**: a bare environment yields the documented defaults.
    #[test]
    fn defaults_without_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        // Keys are namespaced enough that a test environment is clean.
        let s = Settings::from_env().unwrap();
        assert_eq!(s.db_pool_min, 2);
        assert_eq!(s.db_pool_max, 10);
        assert_eq!(s.db_idle_secs, 300);
        assert_eq!(s.max_login_num, 2);
        assert_eq!(s.rag_top_k, 5);
        assert_eq!(s.embedding_provider, EmbeddingProvider::Local);
        assert_eq!(s.deepseek.model_code, "deepseek-chat");
        assert_eq!(s.deepseek.timeout_secs, 30);
    }

    /// **Scenario**: a malformed numeric value is reported with its key,
    /// not silently defaulted.
    #[test]
    fn invalid_numeric_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("DEEP_SEARCH_MAX_ROUNDS", "lots");
        let err = Settings::from_env().unwrap_err();
        match err {
            LoadError::InvalidValue { key, value } => {
                assert_eq!(key, "DEEP_SEARCH_MAX_ROUNDS");
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
        std::env::remove_var("DEEP_SEARCH_MAX_ROUNDS");
    }

    /// **Scenario**: embedding provider parses both spellings.
    #[test]
    fn embedding_provider_parse() {
        assert_eq!(
            "openai-compatible".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::OpenAiCompatible
        );
        assert_eq!(
            "local".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::Local
        );
        assert!("magic".parse::<EmbeddingProvider>().is_err());
    }
}
