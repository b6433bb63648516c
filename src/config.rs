//! Environment-driven settings.
//!
//! Values come from the process environment, optionally seeded from a
//! `.env` file. Required keys are checked together so startup reports
//! everything that is missing in one go.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenAi,
}

impl LlmProvider {
    fn api_key_var(self) -> &'static str {
        match self {
            LlmProvider::Gemini => "GOOGLE_API_KEY",
            LlmProvider::OpenAi => "OPENAI_API_KEY",
        }
    }

    /// OpenAI-compatible chat completions endpoint for the provider.
    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            LlmProvider::OpenAi => "https://api.openai.com/v1",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    /// Requests-per-minute ceiling enforced before every LLM call
    pub max_rpm: u32,
    pub max_iterations: usize,
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub llm: LlmSettings,
    pub serper_api_key: String,
    /// `None` when EMAIL_USER/EMAIL_PASS are absent; delivery is skipped
    pub smtp: Option<SmtpSettings>,
    pub log_level: String,
    pub enable_memory: bool,
    pub enable_verbose: bool,
}

impl Settings {
    /// Load `.env` if present, then read the process environment.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as
    /// absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = match get("LLM_PROVIDER").as_deref().map(str::to_ascii_lowercase) {
            None => LlmProvider::Gemini,
            Some(p) if p == "gemini" => LlmProvider::Gemini,
            Some(p) if p == "openai" => LlmProvider::OpenAi,
            Some(other) => {
                return Err(Error::Config(format!(
                    "LLM_PROVIDER must be 'gemini' or 'openai', got '{}'",
                    other
                )));
            }
        };

        let missing: Vec<&str> = [provider.api_key_var(), "SERPER_API_KEY"]
            .into_iter()
            .filter(|&key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let model = match provider {
            LlmProvider::Gemini => get("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.5-flash".into()),
            LlmProvider::OpenAi => {
                get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4-turbo-preview".into())
            }
        };
        // LiteLLM-style prefixes ("gemini/gemini-2.5-flash") are accepted
        let model = model
            .strip_prefix("gemini/")
            .map(str::to_string)
            .unwrap_or(model);

        let temperature: f32 = parse_or(&get, "LLM_TEMPERATURE", 0.7)?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(Error::Config(
                "LLM_TEMPERATURE must be between 0.0 and 2.0".to_string(),
            ));
        }

        let max_rpm: u32 = parse_or(&get, "MAX_RPM", 4)?;
        if max_rpm == 0 {
            return Err(Error::Config("MAX_RPM must be at least 1".to_string()));
        }

        let max_iterations: usize = parse_or(&get, "MAX_AGENT_ITERATIONS", 5)?;
        if !(1..=20).contains(&max_iterations) {
            return Err(Error::Config(
                "MAX_AGENT_ITERATIONS must be between 1 and 20".to_string(),
            ));
        }

        let smtp = match (get("EMAIL_USER"), get("EMAIL_PASS")) {
            (Some(user), Some(password)) => Some(SmtpSettings {
                host: get("SMTP_SERVER").unwrap_or_else(|| "smtp.gmail.com".into()),
                port: parse_or(&get, "SMTP_PORT", 587)?,
                user,
                password,
            }),
            _ => None,
        };

        let log_level = get("LOG_LEVEL")
            .unwrap_or_else(|| "INFO".into())
            .to_ascii_uppercase();
        if !matches!(log_level.as_str(), "DEBUG" | "INFO" | "WARNING" | "ERROR") {
            return Err(Error::Config(format!(
                "LOG_LEVEL must be DEBUG, INFO, WARNING or ERROR, got '{}'",
                log_level
            )));
        }

        Ok(Self {
            llm: LlmSettings {
                provider,
                api_key: get(provider.api_key_var()).unwrap_or_default(),
                base_url: get("LLM_BASE_URL")
                    .unwrap_or_else(|| provider.default_base_url().to_string()),
                model,
                temperature,
                max_rpm,
                max_iterations,
            },
            serper_api_key: get("SERPER_API_KEY").unwrap_or_default(),
            smtp,
            log_level,
            enable_memory: parse_bool_or(&get, "ENABLE_MEMORY", true)?,
            enable_verbose: parse_bool_or(&get, "ENABLE_VERBOSE", true)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value '{}'", key, raw))),
    }
}

fn parse_bool_or<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(Error::Config(format!(
            "{} must be a boolean, got '{}'",
            key, v
        ))),
    }
}
