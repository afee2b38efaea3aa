use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::config::{SearchConfig, CONNECT_TIMEOUT};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search API key is not configured")]
    MissingApiKey,
    #[error("{0}")]
    Transport(String),
    #[error("no relevant information found")]
    NoResults,
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        SearchError::Transport(e.to_string())
    }
}

/// A web search that answers with a short, display-ready string.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<String, SearchError>;
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(rename = "answerBox")]
    answer_box: Option<AnswerBox>,
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct AnswerBox {
    answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    snippet: Option<String>,
    title: Option<String>,
    link: Option<String>,
}

impl SearchResponse {
    /// The direct answer if there is one, otherwise the top organic result.
    fn short_answer(&self) -> Option<String> {
        if let Some(answer) = self.answer_box.as_ref().and_then(|b| b.answer.as_deref()) {
            return Some(format!("**Web Result:** {answer}"));
        }

        self.organic.first().map(|top| {
            format!(
                "**Web Result:** {}\n\n*Source: [{}]({})*",
                top.snippet.as_deref().unwrap_or("Information found"),
                top.title.as_deref().unwrap_or("Link"),
                top.link.as_deref().unwrap_or(""),
            )
        })
    }
}

/// Client for the Serper Google search API.
pub struct SearchClient {
    api_key: Option<SecretString>,
    url: Url,
    client: reqwest::Client,
}

impl SearchClient {
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            api_key: config.api_key.clone(),
            url: config.url.clone(),
            client,
        })
    }
}

#[async_trait]
impl WebSearch for SearchClient {
    async fn search(&self, query: &str) -> Result<String, SearchError> {
        let api_key = self.api_key.as_ref().ok_or(SearchError::MissingApiKey)?;

        info!("Searching the web");
        debug!("Search query: {}", query);

        let response = self
            .client
            .post(self.url.clone())
            .header("X-API-KEY", api_key.expose_secret())
            .json(&SearchRequest { q: query })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Search request failed with status {}: {}", status, error_text);
            return Err(SearchError::Transport(format!("{status}: {error_text}")));
        }

        let body: SearchResponse = response.json().await?;
        debug!(
            "Search response: answer box {}, {} organic results",
            body.answer_box.is_some(),
            body.organic.len()
        );

        body.short_answer().ok_or(SearchError::NoResults)
    }
}
