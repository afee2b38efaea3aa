//! OpenAI chat completions with streamed output.
//!
//! The response body is read as Server-Sent Events and exposed as an ordered,
//! finite stream of text fragments. Provider faults are not returned as
//! errors: they arrive as one final fragment describing the failure, so a
//! caller that simply concatenates fragments always ends up with displayable
//! text.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{self, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::{CompletionConfig, CONNECT_TIMEOUT};

/// Ordered text fragments of one streamed reply.
pub type FragmentStream = Pin<Box<dyn Stream<Item = String> + Send>>;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion API key is not configured")]
    MissingApiKey,
}

/// A language model that streams its reply.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Whether a request can be attempted at all.
    fn is_configured(&self) -> bool;

    async fn complete(&self, prompt: &str) -> Result<FragmentStream, CompletionError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// What one SSE event contributes to the fragment stream.
enum ChunkEvent {
    Text(String),
    Skip,
    Done,
    Failed(String),
}

fn interpret(data: &str) -> ChunkEvent {
    if data.trim() == "[DONE]" {
        return ChunkEvent::Done;
    }
    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(ChatCompletionChunk {
            error: Some(err), ..
        }) => ChunkEvent::Failed(err.message),
        Ok(chunk) => match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
            Some(text) if !text.is_empty() => ChunkEvent::Text(text),
            _ => ChunkEvent::Skip,
        },
        Err(e) => {
            warn!("Skipping undecodable completion chunk: {}", e);
            ChunkEvent::Skip
        }
    }
}

pub fn error_fragment(message: impl std::fmt::Display) -> String {
    format!("❌ OpenAI error: {message}")
}

fn single_fragment(text: String) -> FragmentStream {
    Box::pin(stream::once(async move { text }))
}

/// Turn a streaming HTTP response into text fragments.
fn fragment_stream(response: reqwest::Response) -> FragmentStream {
    let events = Box::pin(response.bytes_stream().eventsource());

    let fragments = stream::unfold(Some(events), |state| async move {
        let mut events = state?;
        loop {
            match events.next().await {
                None => return None,
                Some(Ok(event)) => match interpret(&event.data) {
                    ChunkEvent::Text(text) => return Some((text, Some(events))),
                    ChunkEvent::Skip => continue,
                    ChunkEvent::Done => {
                        debug!("Completion stream finished");
                        return None;
                    }
                    ChunkEvent::Failed(message) => {
                        error!("Completion stream reported an error: {}", message);
                        return Some((error_fragment(message), None));
                    }
                },
                Some(Err(e)) => {
                    error!("Completion stream broke: {}", e);
                    return Some((error_fragment(e), None));
                }
            }
        }
    });

    Box::pin(fragments)
}

/// Client for the OpenAI chat completions endpoint.
pub struct CompletionClient {
    api_key: Option<SecretString>,
    endpoint: Url,
    model: String,
    max_tokens: u32,
    temperature: f32,
    /// Bounds the wait for response headers. The streamed body is not bounded.
    timeout: Duration,
    client: reqwest::Client,
}

impl CompletionClient {
    pub fn new(config: &CompletionConfig) -> eyre::Result<Self> {
        let endpoint = config.base_url.join("chat/completions")?;
        let client = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;

        Ok(Self {
            api_key: config.api_key.clone(),
            endpoint,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout,
            client,
        })
    }
}

#[async_trait]
impl Completion for CompletionClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, prompt: &str) -> Result<FragmentStream, CompletionError> {
        let api_key = self.api_key.as_ref().ok_or(CompletionError::MissingApiKey)?;

        let request_body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
        };

        info!("Requesting completion from {}", self.model);
        debug!("Completion request: {:?}", request_body);

        let request = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(api_key.expose_secret())
            .json(&request_body)
            .send();

        let response = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!("Completion request failed: {}", e);
                return Ok(single_fragment(error_fragment(e)));
            }
            Err(_) => {
                error!("Completion request timed out after {:?}", self.timeout);
                let message = format!("no response within {}s", self.timeout.as_secs());
                return Ok(single_fragment(error_fragment(message)));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Completion request failed with status {}: {}", status, error_text);
            return Ok(single_fragment(error_fragment(format!("{status}: {error_text}"))));
        }

        Ok(fragment_stream(response))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::secret;

    fn test_config(base_url: &str, key: Option<&str>) -> CompletionConfig {
        CompletionConfig {
            api_key: secret(key.map(str::to_string)),
            base_url: Url::parse(&format!("{base_url}/v1/")).unwrap(),
            model: "gpt-3.5-turbo".to_string(),
            max_tokens: 500,
            temperature: 0.7,
            timeout: Duration::from_secs(5),
        }
    }

    fn sse_body(deltas: &[&str]) -> String {
        let mut body = String::new();
        body.push_str("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
        for delta in deltas {
            let chunk = json!({"choices": [{"delta": {"content": delta}}]});
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn mount_sse(server: &MockServer, body: String) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn streams_fragments_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-3.5-turbo",
                "messages": [{"role": "user", "content": "Say hello"}],
                "max_tokens": 500,
                "stream": true
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&["Hel", "lo", "!"])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = CompletionClient::new(&test_config(&server.uri(), Some("sk-test"))).unwrap();
        let fragments: Vec<String> = client.complete("Say hello").await.unwrap().collect().await;
        assert_eq!(fragments, vec!["Hel", "lo", "!"]);
    }

    #[tokio::test]
    async fn nothing_after_done_is_read() {
        let server = MockServer::start().await;
        let mut body = sse_body(&["one"]);
        body.push_str("data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n");
        mount_sse(&server, body).await;

        let client = CompletionClient::new(&test_config(&server.uri(), Some("k"))).unwrap();
        let fragments: Vec<String> = client.complete("hi").await.unwrap().collect().await;
        assert_eq!(fragments, vec!["one"]);
    }

    #[tokio::test]
    async fn undecodable_chunks_are_skipped() {
        let server = MockServer::start().await;
        let body = "data: {not json}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n\
                    data: [DONE]\n\n";
        mount_sse(&server, body.to_string()).await;

        let client = CompletionClient::new(&test_config(&server.uri(), Some("k"))).unwrap();
        let fragments: Vec<String> = client.complete("hi").await.unwrap().collect().await;
        assert_eq!(fragments, vec!["ok"]);
    }

    #[tokio::test]
    async fn error_chunk_ends_the_stream_with_one_error_fragment() {
        let server = MockServer::start().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"par\"}}]}\n\n\
                    data: {\"error\":{\"message\":\"server overloaded\"}}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n";
        mount_sse(&server, body.to_string()).await;

        let client = CompletionClient::new(&test_config(&server.uri(), Some("k"))).unwrap();
        let fragments: Vec<String> = client.complete("hi").await.unwrap().collect().await;
        assert_eq!(
            fragments,
            vec!["par".to_string(), "❌ OpenAI error: server overloaded".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_key_fails_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = CompletionClient::new(&test_config(&server.uri(), None)).unwrap();
        assert!(!client.is_configured());
        let result = client.complete("hello").await;
        assert!(matches!(result, Err(CompletionError::MissingApiKey)));
    }

    #[tokio::test]
    async fn error_status_becomes_a_single_fragment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;

        let client = CompletionClient::new(&test_config(&server.uri(), Some("wrong"))).unwrap();
        let fragments: Vec<String> = client.complete("hi").await.unwrap().collect().await;
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].starts_with("❌ OpenAI error: 401"), "{}", fragments[0]);
        assert!(fragments[0].contains("Incorrect API key provided"));
    }

    #[tokio::test]
    async fn slow_response_headers_time_out_as_a_single_fragment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&["late"]))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let mut config = test_config(&server.uri(), Some("k"));
        config.timeout = Duration::from_secs(1);
        let client = CompletionClient::new(&config).unwrap();
        let fragments: Vec<String> = client.complete("hi").await.unwrap().collect().await;
        assert_eq!(fragments, vec!["❌ OpenAI error: no response within 1s".to_string()]);
    }

    #[tokio::test]
    async fn transport_failure_becomes_a_single_fragment() {
        // Nothing listens on the discard port.
        let client = CompletionClient::new(&test_config("http://127.0.0.1:9", Some("k"))).unwrap();
        let fragments: Vec<String> = client.complete("hi").await.unwrap().collect().await;
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].starts_with("❌ OpenAI error: "));
    }

    #[test]
    fn interprets_chunk_payloads() {
        assert!(matches!(interpret("[DONE]"), ChunkEvent::Done));
        assert!(matches!(
            interpret(r#"{"choices":[{"delta":{"content":"x"}}]}"#),
            ChunkEvent::Text(t) if t == "x"
        ));
        assert!(matches!(
            interpret(r#"{"choices":[{"delta":{"content":""}}]}"#),
            ChunkEvent::Skip
        ));
        assert!(matches!(interpret(r#"{"choices":[]}"#), ChunkEvent::Skip));
        assert!(matches!(
            interpret(r#"{"error":{"message":"boom"}}"#),
            ChunkEvent::Failed(m) if m == "boom"
        ));
    }
}
