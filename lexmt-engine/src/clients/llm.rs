//! Chat completions client
//!
//! Wraps an OpenAI-compatible `/chat/completions` endpoint with a global
//! concurrency semaphore, timeout, and exponential-backoff retry with
//! jitter. JSON-mode calls validate the reply against the caller's schema
//! and perform one repair round-trip before failing.

use async_trait::async_trait;
use lexmt_common::config::RuntimeConfig;
use lexmt_common::{Error, Result};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Temperature for evaluator and selector calls
pub const EVAL_TEMPERATURE: f64 = 0.1;
/// Temperature for single-shot translation calls
pub const TRANSLATE_TEMPERATURE: f64 = 0.2;
/// Temperature when generating multiple candidates for selection
pub const CANDIDATE_TEMPERATURE: f64 = 0.7;

/// One chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Fully-specified chat request handed to the backend
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub json_mode: bool,
}

/// Backend seam: the HTTP implementation in production, scripted
/// implementations in tests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Issue one chat completion, returning the assistant text.
    ///
    /// Implementations return `Error::UpstreamUnavailable` for failures the
    /// client should retry (timeouts, 429, 5xx, transport errors).
    async fn chat(&self, request: &ChatRequest) -> Result<String>;
}

// ---- HTTP backend -----------------------------------------------------------

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
}

/// reqwest-backed chat backend
pub struct HttpChatBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpChatBackend {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let body = WireRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("chat request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(Error::UpstreamUnavailable(format!(
                "chat endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "chat endpoint returned {status}: {text}"
            )));
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| Error::MalformedModelOutput(format!("chat response parse: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::MalformedModelOutput("chat response had no content".to_string()))
    }
}

// ---- Client -----------------------------------------------------------------

/// Shared LLM client. Cloning shares the semaphore, so the concurrency cap
/// is global across every agent and layer in the process.
#[derive(Clone)]
pub struct LlmClient {
    backend: Arc<dyn ChatBackend>,
    model: String,
    semaphore: Arc<Semaphore>,
    max_retries: u32,
    base_delay: Duration,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.llm_timeout_secs);
        let backend = HttpChatBackend::new(&config.api_base_url, &config.api_key, timeout)?;
        Ok(Self::with_backend(
            Arc::new(backend),
            &config.chat_model,
            config.max_concurrent,
            config.llm_max_retries,
            timeout,
        ))
    }

    /// Construct over any backend; tests use scripted backends.
    pub fn with_backend(
        backend: Arc<dyn ChatBackend>,
        model: &str,
        max_concurrent: usize,
        max_retries: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            model: model.to_string(),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            max_retries: max_retries.max(1),
            base_delay: Duration::from_secs(1),
            timeout,
        }
    }

    /// Issue a chat completion and return the raw assistant text.
    pub async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature,
            max_tokens,
            json_mode: false,
        };
        self.dispatch(&request).await
    }

    /// Issue a JSON-mode completion and deserialize the reply into `T`.
    ///
    /// On schema failure the prompt is reissued once with the offending
    /// output appended plus a corrective instruction; a second failure is
    /// `MalformedModelOutput`.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> Result<T> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature,
            max_tokens,
            json_mode: true,
        };

        let raw = self.dispatch(&request).await?;
        match parse_json_reply::<T>(&raw) {
            Ok(value) => Ok(value),
            Err(first_err) => {
                tracing::warn!(error = %first_err, "Model output failed schema validation, issuing repair retry");

                let mut repair = request.clone();
                repair.messages.push(ChatMessage::assistant(raw));
                repair.messages.push(ChatMessage::user(
                    "The previous reply was not valid JSON matching the requested schema. \
                     Reply again with only the corrected JSON object, no commentary.",
                ));

                let repaired = self.dispatch(&repair).await?;
                parse_json_reply::<T>(&repaired).map_err(|e| {
                    Error::MalformedModelOutput(format!("repair retry still malformed: {e}"))
                })
            }
        }
    }

    /// Run one request under the semaphore with timeout and retry.
    async fn dispatch(&self, request: &ChatRequest) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Error::Internal("llm semaphore closed".to_string()))?;

        let mut last_error = None;
        for attempt in 1..=self.max_retries {
            let outcome = tokio::time::timeout(self.timeout, self.backend.chat(request)).await;
            let result = match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::UpstreamUnavailable(format!(
                    "chat request timed out after {:?}",
                    self.timeout
                ))),
            };

            match result {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient chat failure, backing off"
                    );
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(Error::UpstreamUnavailable(format!(
                        "chat failed after {} attempts: {err}",
                        self.max_retries
                    )));
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Internal("retry loop exhausted".to_string())))
    }

    /// Exponential backoff with uniform jitter, capped at 30s.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * (1u64 << (attempt - 1).min(5));
        let jitter = rand::thread_rng().gen_range(0..=exp / 2);
        Duration::from_millis((exp + jitter).min(30_000))
    }
}

/// Parse a model reply as JSON, tolerating markdown code fences and prose
/// around the object.
pub fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim);
    if let Some(body) = unfenced {
        if let Ok(value) = serde_json::from_str::<T>(body) {
            return Ok(value);
        }
    }

    // Last resort: widest braces span
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<T>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(Error::MalformedModelOutput(format!(
        "reply is not valid JSON for the requested schema: {}",
        &trimmed.chars().take(120).collect::<String>()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Backend that replays a fixed script of outcomes
    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<String>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn chat(&self, _request: &ChatRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(Error::Internal("script exhausted".to_string())))
        }
    }

    fn client(backend: Arc<dyn ChatBackend>) -> LlmClient {
        LlmClient::with_backend(backend, "test-model", 4, 3, Duration::from_secs(5))
    }

    #[derive(Deserialize, Debug, PartialEq)]
    struct Probe {
        value: i32,
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(Error::UpstreamUnavailable("503".into())),
            Ok("hello".into()),
        ]));
        let client = client(backend.clone());

        let reply = client
            .complete(vec![ChatMessage::user("hi")], 0.0, None)
            .await
            .unwrap();
        assert_eq!(reply, "hello");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_transient_failure_becomes_upstream_unavailable() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err(Error::UpstreamUnavailable("503".into())),
            Err(Error::UpstreamUnavailable("503".into())),
            Err(Error::UpstreamUnavailable("503".into())),
        ]));
        let client = client(backend.clone());

        let err = client
            .complete(vec![ChatMessage::user("hi")], 0.0, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "upstream_unavailable");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_without_retry() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(Error::Internal(
            "401".into(),
        ))]));
        let client = client(backend.clone());

        let err = client
            .complete(vec![ChatMessage::user("hi")], 0.0, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "internal");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn json_repair_retry_recovers_once() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok("definitely not json".into()),
            Ok(r#"{"value": 7}"#.into()),
        ]));
        let client = client(backend.clone());

        let parsed: Probe = client
            .complete_json(vec![ChatMessage::user("emit json")], 0.0, None)
            .await
            .unwrap();
        assert_eq!(parsed, Probe { value: 7 });
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn double_json_failure_is_malformed_output() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok("nope".into()),
            Ok("still nope".into()),
        ]));
        let client = client(backend);

        let err = client
            .complete_json::<Probe>(vec![ChatMessage::user("emit json")], 0.0, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "malformed_model_output");
    }

    #[tokio::test]
    async fn parse_tolerates_fences_and_prose() {
        let fenced = "```json\n{\"value\": 3}\n```";
        assert_eq!(
            parse_json_reply::<Probe>(fenced).unwrap(),
            Probe { value: 3 }
        );

        let prosey = "Here you go: {\"value\": 4} hope that helps";
        assert_eq!(
            parse_json_reply::<Probe>(prosey).unwrap(),
            Probe { value: 4 }
        );
    }

    /// Backend that tracks the maximum number of simultaneous calls
    struct InFlightProbe {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ChatBackend for InFlightProbe {
        async fn chat(&self, _request: &ChatRequest) -> Result<String> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok("ok".into())
        }
    }

    #[tokio::test]
    async fn semaphore_caps_in_flight_requests() {
        let probe = Arc::new(InFlightProbe {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let client = LlmClient::with_backend(
            probe.clone(),
            "test-model",
            5,
            1,
            Duration::from_secs(5),
        );

        let mut join_set = tokio::task::JoinSet::new();
        for _ in 0..20 {
            let client = client.clone();
            join_set.spawn(async move {
                client
                    .complete(vec![ChatMessage::user("hi")], 0.0, None)
                    .await
            });
        }
        while let Some(result) = join_set.join_next().await {
            result.unwrap().unwrap();
        }

        assert!(probe.peak.load(Ordering::SeqCst) <= 5);
    }
}
