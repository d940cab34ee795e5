use anyhow::{Context, Result};
use std::time::Duration;

pub const DEFAULT_FREQUENCY_URL_TEMPLATE: &str =
    "https://raw.githubusercontent.com/hermitdave/FrequencyWords/master/content/2018/{lang}/{lang}_50k.txt";

#[derive(Debug, Clone)]
pub struct Config {
    // HTTP surface
    pub port: u16,
    pub api_key: Option<String>,

    // Backends (None → in-process store and broker)
    pub redis_url: Option<String>,
    pub consumer_id: String,
    pub cache_ttl: Duration,

    // Languages
    pub supported_languages: Vec<String>,

    // Content provider
    pub wikipedia_api_url: String,
    pub fetch_timeout: Duration,

    // Frequency provider
    pub frequency_url_template: String,
    pub frequency_dir: Option<String>,

    // Completion service
    pub anthropic_api_key: Option<String>,
    pub anthropic_api_url: String,
    pub anthropic_model: String,
    pub anthropic_version: String,
    pub completion_max_tokens: u32,
    pub completion_timeout: Duration,
    pub completion_max_attempts: u32,

    // Rate limiting
    pub rate_limit_per_second: f64,
    pub rate_limit_burst: u32,
    pub rate_limit_wait: Duration,
    /// Consumers in a standalone worker process
    pub worker_consumers: usize,

    // Gateway
    pub min_paragraph_chars: usize,
    pub result_timeout: Duration,
    pub result_poll_interval: Duration,
    pub embedded_workers: usize,
    pub embedded_collector: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let supported_languages = env_or("SUPPORTED_LANGUAGES", "en,sv")
            .split(',')
            .map(|code| code.trim().to_lowercase())
            .filter(|code| !code.is_empty())
            .collect::<Vec<_>>();
        if supported_languages.len() < 2 {
            anyhow::bail!(
                "SUPPORTED_LANGUAGES must list at least two languages, got {:?}",
                supported_languages
            );
        }

        let rate_limit_per_second: f64 = env_parse("RATE_LIMIT_PER_SECOND", 1.0);
        if !(rate_limit_per_second.is_finite() && rate_limit_per_second > 0.0) {
            anyhow::bail!("RATE_LIMIT_PER_SECOND must be positive, got {}", rate_limit_per_second);
        }

        let port = match std::env::var("PORT") {
            Ok(value) => value
                .parse()
                .with_context(|| format!("PORT is not a valid port: {}", value))?,
            Err(_) => 8080,
        };

        Ok(Self {
            port,
            api_key: env_opt("GATEWAY_API_KEY"),

            redis_url: env_opt("REDIS_URL"),
            consumer_id: env_or("CONSUMER_ID", "codeswitch"),
            cache_ttl: Duration::from_secs(env_parse("CACHE_TTL_SECS", 24 * 60 * 60)),

            supported_languages,

            wikipedia_api_url: env_or("WIKIPEDIA_API_URL", "https://en.wikipedia.org/w/api.php"),
            fetch_timeout: Duration::from_secs(env_parse("FETCH_TIMEOUT_SECS", 10)),

            frequency_url_template: env_or(
                "FREQUENCY_URL_TEMPLATE",
                DEFAULT_FREQUENCY_URL_TEMPLATE,
            ),
            frequency_dir: env_opt("FREQUENCY_DIR"),

            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            anthropic_api_url: env_or("ANTHROPIC_API_URL", "https://api.anthropic.com/v1/messages"),
            anthropic_model: env_or("ANTHROPIC_MODEL", "claude-3-sonnet-20240229"),
            anthropic_version: env_or("ANTHROPIC_VERSION", "2023-06-01"),
            completion_max_tokens: env_parse("COMPLETION_MAX_TOKENS", 1024),
            completion_timeout: Duration::from_secs(env_parse("COMPLETION_TIMEOUT_SECS", 30)),
            completion_max_attempts: env_parse::<u32>("COMPLETION_MAX_ATTEMPTS", 1).max(1),

            rate_limit_per_second,
            rate_limit_burst: env_parse::<u32>("RATE_LIMIT_BURST", 1).max(1),
            rate_limit_wait: Duration::from_secs(env_parse("RATE_LIMIT_WAIT_SECS", 60)),
            worker_consumers: env_parse::<usize>("WORKER_CONSUMERS", 4).max(1),

            min_paragraph_chars: env_parse("MIN_PARAGRAPH_CHARS", 10),
            result_timeout: Duration::from_secs(env_parse("RESULT_TIMEOUT_SECS", 120)),
            result_poll_interval: Duration::from_millis(env_parse("RESULT_POLL_MS", 250)),
            embedded_workers: env_parse("EMBEDDED_WORKERS", 1),
            embedded_collector: env_parse("EMBEDDED_COLLECTOR", true),
        })
    }

    /// API key for the completion service, required by any process running workers.
    pub fn require_anthropic_api_key(&self) -> Result<&str> {
        self.anthropic_api_key
            .as_deref()
            .context("ANTHROPIC_API_KEY not set")
    }

    pub fn require_redis_url(&self) -> Result<&str> {
        self.redis_url
            .as_deref()
            .context("REDIS_URL not set (standalone workers and collectors need a shared broker)")
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
