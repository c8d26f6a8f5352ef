use std::env;
use std::time::Duration;

use eyre::{Result, bail, eyre};
use url::Url;

use crate::cli::chat::conversation_state::DEFAULT_SYSTEM_PROMPT;
use crate::provider_client::DEFAULT_MODEL;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/";

const API_KEY_VARS: [&str; 2] = ["PERSONA_CHAT_API_KEY", "OPENAI_API_KEY"];
const BASE_URL_VAR: &str = "PERSONA_CHAT_BASE_URL";

/// Values supplied on the command line. Anything left `None` falls back to
/// the environment or a built-in default.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub system_prompt: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_key: Option<String>,
    pub base_url: Url,
    /// Always `DEFAULT_MODEL`; there is no flag or variable for it.
    pub model: String,
    pub system_prompt: String,
    /// `None` waits on the provider indefinitely.
    pub timeout: Option<Duration>,
}

impl ChatConfig {
    pub fn from_env(overrides: ConfigOverrides) -> Result<Self> {
        Self::resolve(overrides, |key| env::var(key).ok())
    }

    pub fn resolve(overrides: ConfigOverrides, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = API_KEY_VARS
            .iter()
            .filter_map(|key| lookup(key))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty());

        let base_url = match lookup(BASE_URL_VAR) {
            Some(raw) => parse_base_url(&raw)?,
            None => parse_base_url(DEFAULT_BASE_URL)?,
        };

        let system_prompt = overrides
            .system_prompt
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let timeout = match overrides.timeout_secs {
            Some(0) => bail!("--timeout must be at least one second"),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        Ok(Self {
            api_key,
            base_url,
            model: DEFAULT_MODEL.to_string(),
            system_prompt,
            timeout,
        })
    }
}

/// Parse a provider base URL, keeping a trailing slash so that joining
/// `chat/completions` appends instead of replacing the last segment.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };

    let url = Url::parse(&normalized).map_err(|e| eyre!("Invalid provider base URL {}: {}", trimmed, e))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => bail!("Unsupported provider URL scheme: {}", other),
    }
}
