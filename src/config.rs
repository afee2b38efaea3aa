use std::env;
use std::path::PathBuf;
use std::time::Duration;

use eyre::{Result, WrapErr};
use secrecy::SecretString;
use tracing::debug;
use url::Url;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_MAX_TOKENS: u32 = 500;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1/";
pub const DEFAULT_SEARCH_URL: &str = "https://google.serper.dev/search";

/// Settings for the OpenAI chat completions client.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_key: Option<SecretString>,
    pub base_url: Url,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

/// Settings for the Serper web search client.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub api_key: Option<SecretString>,
    pub url: Url,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub completion: CompletionConfig,
    pub search: SearchConfig,
}

/// Values supplied on the command line. `None` falls back to the environment
/// and then to the built-in defaults.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_secs: Option<u64>,
    pub openai_base_url: Option<String>,
    pub search_url: Option<String>,
}

impl Config {
    /// Assemble the configuration from the process environment and the
    /// command line overrides.
    pub fn load(overrides: Overrides) -> Result<Self> {
        Self::from_lookup(overrides, |name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(
        overrides: Overrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(overrides.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

        let base_url = overrides.openai_base_url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE_URL);
        let base_url = parse_base_url(base_url)
            .wrap_err_with(|| format!("invalid OpenAI base URL: {base_url}"))?;

        let search_url = overrides.search_url.as_deref().unwrap_or(DEFAULT_SEARCH_URL);
        let search_url =
            Url::parse(search_url).wrap_err_with(|| format!("invalid search URL: {search_url}"))?;

        let model = overrides
            .model
            .or_else(|| non_empty(lookup("SMART_DIAMOND_MODEL")))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Ok(Self {
            completion: CompletionConfig {
                api_key: secret(lookup("OPENAI_API_KEY")),
                base_url,
                model,
                max_tokens: overrides.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                temperature: overrides.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                timeout,
            },
            search: SearchConfig {
                api_key: secret(lookup("SERPER_API_KEY")),
                url: search_url,
                timeout,
            },
        })
    }
}

/// Load `<config dir>/smart-diamond/.env` and then `./.env`. Neither file
/// overrides variables that are already set.
pub fn load_env_files() {
    if let Some(path) = user_env_file() {
        if path.is_file() {
            match dotenv::from_path(&path) {
                Ok(()) => debug!("Loaded environment from {}", path.display()),
                Err(e) => debug!("Skipping {}: {}", path.display(), e),
            }
        }
    }
    dotenv::dotenv().ok();
}

fn user_env_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("smart-diamond").join(".env"))
}

/// Wrap a raw key, treating blank input as "not configured".
pub fn secret(value: Option<String>) -> Option<SecretString> {
    non_empty(value).map(SecretString::from)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// `Url::join` drops the last path segment unless the base ends with a slash.
fn parse_base_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
