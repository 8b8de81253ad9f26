//! Runtime settings loaded from the environment (and `.env`)

use crate::error::AnalystError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_INVOCATIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct Settings {
    // Model API
    pub llm_api_key: String,
    pub llm_api_base: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,
    pub llm_timeout: Duration,

    // Loop
    pub max_invocations: u32,

    // Data sources
    pub kline_api_base: String,
    pub derivatives_api_base: String,
    pub news_database_url: Option<String>,
    pub max_news_items: u32,
    pub kline_days_limit: usize,
    pub data_timeout: Duration,

    // API server
    pub app_name: String,
    pub app_version: String,
    pub api_host: String,
    pub api_port: u16,
    pub api_prefix: String,
    pub debug: bool,

    // Session registry
    pub max_sessions: usize,
    pub session_idle_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base: "https://api.deepseek.com/v1".to_string(),
            llm_model: "deepseek-chat".to_string(),
            llm_temperature: 0.5,
            llm_max_tokens: 1200,
            llm_timeout: Duration::from_secs(120),
            max_invocations: DEFAULT_MAX_INVOCATIONS,
            kline_api_base: "https://moziinnovations.com".to_string(),
            derivatives_api_base: "https://moziinnovations.com/derivatives".to_string(),
            news_database_url: None,
            max_news_items: 100,
            kline_days_limit: 30,
            data_timeout: Duration::from_secs(30),
            app_name: "Crypto Analyst Assistant".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            api_prefix: "/api/v1".to_string(),
            debug: false,
            max_sessions: 1000,
            session_idle_timeout: Duration::from_secs(3600),
        }
    }
}

impl Settings {
    /// Load settings from process environment after reading `.env`.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Unset keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let settings = Self {
            llm_api_key: get("DEEPSEEK_API_KEY")
                .or_else(|| get("LLM_API_KEY"))
                .unwrap_or_default(),
            llm_api_base: get("DEEPSEEK_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.llm_api_base),
            llm_model: get("DEEPSEEK_MODEL").unwrap_or(defaults.llm_model),
            llm_temperature: parse_or(get("LLM_TEMPERATURE"), "LLM_TEMPERATURE", defaults.llm_temperature)?,
            llm_max_tokens: parse_or(get("LLM_MAX_TOKENS"), "LLM_MAX_TOKENS", defaults.llm_max_tokens)?,
            llm_timeout: Duration::from_secs(parse_or(
                get("LLM_TIMEOUT_SECS"),
                "LLM_TIMEOUT_SECS",
                defaults.llm_timeout.as_secs(),
            )?),
            max_invocations: parse_or(get("MAX_INVOCATIONS"), "MAX_INVOCATIONS", defaults.max_invocations)?,
            kline_api_base: get("KLINE_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.kline_api_base),
            derivatives_api_base: get("DERIVATIVES_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.derivatives_api_base),
            news_database_url: get("NEWS_DATABASE_URL").or_else(|| get("MYSQL_URL")),
            max_news_items: parse_or(get("MAX_NEWS_ITEMS"), "MAX_NEWS_ITEMS", defaults.max_news_items)?,
            kline_days_limit: parse_or(get("KLINE_DAYS_LIMIT"), "KLINE_DAYS_LIMIT", defaults.kline_days_limit)?,
            data_timeout: Duration::from_secs(parse_or(
                get("DATA_TIMEOUT_SECS"),
                "DATA_TIMEOUT_SECS",
                defaults.data_timeout.as_secs(),
            )?),
            app_name: get("APP_NAME").unwrap_or(defaults.app_name),
            app_version: defaults.app_version,
            api_host: get("API_HOST").unwrap_or(defaults.api_host),
            api_port: parse_or(get("PORT").or_else(|| get("API_PORT")), "API_PORT", defaults.api_port)?,
            api_prefix: get("API_PREFIX").unwrap_or(defaults.api_prefix),
            debug: parse_bool(get("DEBUG"), "DEBUG", defaults.debug)?,
            max_sessions: parse_or(get("MAX_SESSIONS"), "MAX_SESSIONS", defaults.max_sessions)?,
            session_idle_timeout: Duration::from_secs(parse_or(
                get("SESSION_IDLE_SECS"),
                "SESSION_IDLE_SECS",
                defaults.session_idle_timeout.as_secs(),
            )?),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_invocations == 0 {
            return Err(AnalystError::Config(
                "MAX_INVOCATIONS must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(AnalystError::Config(format!(
                "LLM_TEMPERATURE must be within 0.0..=2.0, got {}",
                self.llm_temperature
            )));
        }
        if self.max_sessions == 0 {
            return Err(AnalystError::Config(
                "MAX_SESSIONS must be at least 1".to_string(),
            ));
        }
        if self.kline_days_limit == 0 {
            return Err(AnalystError::Config(
                "KLINE_DAYS_LIMIT must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.trim().parse::<T>().map_err(|e| {
            AnalystError::Config(format!("{} has invalid value '{}': {}", key, raw, e))
        }),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>, key: &str, default: bool) -> Result<bool> {
    match value.as_deref().map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AnalystError::Config(format!("{} must be a boolean, got '{}'", key, v))),
        },
    }
}
