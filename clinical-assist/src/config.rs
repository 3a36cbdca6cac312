use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::retry::RetryPolicy;

pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_THINKING_BUDGET: i32 = 16000;

/// Settings for talking to the generation service.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub thinking_budget: i32,
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .field("thinking_budget", &self.thinking_budget)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(120),
            thinking_budget: DEFAULT_THINKING_BUDGET,
            retry: RetryPolicy::default(),
        }
    }

    /// Read `GEMINI_API_KEY` (or `API_KEY`), `GEMINI_MODEL`, `GEMINI_BASE_URL`,
    /// `REQUEST_TIMEOUT_SECS`, `ANALYSIS_TIMEOUT_SECS` and `THINKING_BUDGET`.
    ///
    /// A missing key yields an empty `api_key`; client construction reports it.
    pub fn from_env() -> Self {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .unwrap_or_default();

        let mut config = Self::new(api_key.trim());
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            if !model.trim().is_empty() {
                config.model = model.trim().to_string();
            }
        }
        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL") {
            if !base_url.trim().is_empty() {
                config.base_url = base_url.trim().trim_end_matches('/').to_string();
            }
        }
        config.request_timeout = Duration::from_secs(env_or("REQUEST_TIMEOUT_SECS", 120));
        config.thinking_budget = env_or("THINKING_BUDGET", DEFAULT_THINKING_BUDGET);
        let total_timeout = match env_or("ANALYSIS_TIMEOUT_SECS", 0u64) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        config.retry = config.retry.with_total_timeout(total_timeout);
        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_thinking_budget(mut self, budget: i32) -> Self {
        self.thinking_budget = budget;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Parse an environment variable, falling back to `default` when unset or invalid.
pub fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    parse_or(name, std::env::var(name).ok().as_deref(), default)
}

fn parse_or<T>(name: &str, raw: Option<&str>, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    let Some(raw) = raw else {
        return default;
    };
    raw.trim().parse::<T>().unwrap_or_else(|_| {
        warn!(
            variable = name,
            value = %raw,
            default = %default,
            "Invalid value, using default"
        );
        default
    })
}
