//! OpenAI-compatible chat-completions backend.
//!
//! Speaks the widely-implemented `/chat/completions` protocol, which
//! covers both the `openai` hint and the `qwen-max` hint (DashScope's
//! compatible-mode endpoint). Structured stages use non-streaming calls
//! and parse a single JSON object out of the reply; the translation
//! stage consumes the SSE stream and yields [`TokenChunk`]s until the
//! `[DONE]` marker.

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use liaison_core::session::{Direction, Perspective};

use crate::prompts;
use crate::provider::{
    GapAnalysis, Provider, ProviderError, ProviderResult, TokenChunk, TokenStream,
    TranslateRequest,
};

/// Default retry delay when a 429 carries no `Retry-After` header.
const DEFAULT_RETRY_AFTER_MS: u64 = 1_000;

/// Provider backed by an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    name: String,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiCompatProvider {
    /// Create a provider for a specific backend endpoint and model.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            name: name.into(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    /// Issue a non-streaming chat call and return the reply text.
    async fn chat(&self, system: &str, user: &str) -> ProviderResult<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: system,
                    },
                    ChatMessage {
                        role: "user",
                        content: user,
                    },
                ],
                stream: false,
            })
            .send()
            .await?;

        let response = check_status(response)?;
        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ProviderError::Malformed {
                message: "empty completion".into(),
            });
        }
        Ok(content)
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn classify_perspective(&self, content: &str) -> ProviderResult<Perspective> {
        let reply = self.chat(prompts::CLASSIFY_SYSTEM, content).await?;
        parse_perspective(&reply)
    }

    async fn analyze_gaps(
        &self,
        content: &str,
        perspective: Perspective,
        direction: Direction,
    ) -> ProviderResult<GapAnalysis> {
        let user = format!("Perspective: {perspective}\n\n{content}");
        let reply = self.chat(prompts::gap_system_prompt(direction), &user).await?;
        let parsed: GapPayload =
            serde_json::from_str(strip_fences(&reply)).map_err(|e| ProviderError::Malformed {
                message: format!("gap analysis is not valid JSON: {e}"),
            })?;
        Ok(GapAnalysis {
            gaps: parsed.gaps,
            suggestions: parsed.suggestions,
        })
    }

    async fn translate_stream(&self, request: &TranslateRequest) -> ProviderResult<TokenStream> {
        let user =
            prompts::build_translate_prompt(&request.content, request.context.as_deref(), &request.gaps);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: prompts::translate_system_prompt(request.direction),
                    },
                    ChatMessage {
                        role: "user",
                        content: &user,
                    },
                ],
                stream: true,
            })
            .send()
            .await?;

        let response = check_status(response)?;
        debug!(backend = %self.name, model = %self.model, "translation stream opened");

        let mut events = response.bytes_stream().eventsource();
        let stream = try_stream! {
            let mut terminated = false;
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| ProviderError::SseParse {
                    message: e.to_string(),
                })?;
                if event.data == "[DONE]" {
                    terminated = true;
                    yield TokenChunk::Done;
                    break;
                }
                let chunk: StreamChunk = serde_json::from_str(&event.data)?;
                let delta = chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .unwrap_or_default();
                if !delta.is_empty() {
                    yield TokenChunk::Delta(delta);
                }
            }
            if !terminated {
                // EOF before the end marker: the stream is not trustworthy.
                Err(ProviderError::SseParse {
                    message: "stream ended without [DONE] marker".into(),
                })?;
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Map an HTTP response status to the provider error taxonomy.
fn check_status(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth {
            message: format!("backend rejected credentials ({status})"),
        },
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            retry_after_ms: response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map_or(DEFAULT_RETRY_AFTER_MS, |secs| secs * 1000),
        },
        s => ProviderError::Api {
            status: s.as_u16(),
            message: s.canonical_reason().unwrap_or("unknown").to_owned(),
            retryable: s.is_server_error(),
        },
    })
}

/// Parse a perspective out of a classification reply. Accepts the JSON
/// object the prompt asks for, or a bare `pm`/`dev` token.
fn parse_perspective(reply: &str) -> ProviderResult<Perspective> {
    let trimmed = strip_fences(reply);
    if let Ok(payload) = serde_json::from_str::<PerspectivePayload>(trimmed) {
        return perspective_from_str(&payload.perspective);
    }
    perspective_from_str(trimmed.trim().trim_matches('"'))
}

fn perspective_from_str(value: &str) -> ProviderResult<Perspective> {
    match value {
        "pm" => Ok(Perspective::Pm),
        "dev" => Ok(Perspective::Dev),
        other => Err(ProviderError::Malformed {
            message: format!("unrecognized perspective: {other:?}"),
        }),
    }
}

/// Strip a markdown code fence if the model wrapped its JSON in one.
fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct PerspectivePayload {
    perspective: String,
}

#[derive(Deserialize)]
struct GapPayload {
    #[serde(default)]
    gaps: Vec<liaison_core::session::Gap>,
    #[serde(default)]
    suggestions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(
            "test",
            base_url,
            "test-model",
            "test-key",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn chat_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    #[test]
    fn strip_fences_handles_plain_and_fenced() {
        assert_eq!(strip_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn parse_perspective_accepts_json_and_bare_tokens() {
        assert_eq!(
            parse_perspective("{\"perspective\": \"pm\"}").unwrap(),
            Perspective::Pm
        );
        assert_eq!(parse_perspective("dev").unwrap(), Perspective::Dev);
        assert_eq!(parse_perspective("\"pm\"").unwrap(), Perspective::Pm);
        assert_matches!(
            parse_perspective("magical"),
            Err(ProviderError::Malformed { .. })
        );
    }

    #[tokio::test]
    async fn classify_perspective_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(chat_body("{\"perspective\": \"pm\"}")),
            )
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        let perspective = p.classify_perspective("Add a login button").await.unwrap();
        assert_eq!(perspective, Perspective::Pm);
    }

    #[tokio::test]
    async fn analyze_gaps_parses_fenced_json() {
        let server = MockServer::start().await;
        let reply = "```json\n{\"gaps\": [{\"category\": \"constraints\", \
                     \"description\": \"No auth provider named\"}], \
                     \"suggestions\": [\"Name the provider\"]}\n```";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body(reply)))
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        let analysis = p
            .analyze_gaps("Add a login button", Perspective::Pm, Direction::PmToDev)
            .await
            .unwrap();
        assert_eq!(analysis.gaps.len(), 1);
        assert_eq!(analysis.gaps[0].category, "constraints");
        assert_eq!(analysis.suggestions, vec!["Name the provider".to_owned()]);
    }

    #[tokio::test]
    async fn empty_completion_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("  ")))
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        assert_matches!(
            p.classify_perspective("text").await,
            Err(ProviderError::Malformed { .. })
        );
    }

    #[tokio::test]
    async fn auth_failure_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        let err = p.classify_perspective("text").await.unwrap_err();
        assert_matches!(err, ProviderError::Auth { .. });
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn rate_limit_maps_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        let err = p.classify_perspective("text").await.unwrap_err();
        assert_matches!(
            err,
            ProviderError::RateLimited {
                retry_after_ms: 2000
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn translate_stream_yields_deltas_then_done() {
        let server = MockServer::start().await;
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Implement \"}}]}\n\n\
                   data: {\"choices\":[{\"delta\":{\"content\":\"an auth entry point\"}}]}\n\n\
                   data: {\"choices\":[{\"delta\":{}}]}\n\n\
                   data: [DONE]\n\n";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        let request = TranslateRequest {
            content: "Add a login button".into(),
            context: None,
            perspective: Perspective::Pm,
            gaps: vec![],
            direction: Direction::PmToDev,
        };
        let mut stream = p.translate_stream(&request).await.unwrap();

        let mut text = String::new();
        let mut saw_done = false;
        while let Some(chunk) = stream.next().await {
            match chunk.unwrap() {
                TokenChunk::Delta(d) => text.push_str(&d),
                TokenChunk::Done => {
                    saw_done = true;
                    break;
                }
            }
        }
        assert!(saw_done);
        assert_eq!(text, "Implement an auth entry point");
    }

    #[tokio::test]
    async fn translate_stream_without_done_marker_errors() {
        let server = MockServer::start().await;
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n";
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        let request = TranslateRequest {
            content: "x".into(),
            context: None,
            perspective: Perspective::Dev,
            gaps: vec![],
            direction: Direction::DevToPm,
        };
        let mut stream = p.translate_stream(&request).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, TokenChunk::Delta("partial".into()));
        let second = stream.next().await.unwrap();
        assert_matches!(second, Err(ProviderError::SseParse { .. }));
    }
}
