//! OpenAI-compatible provider clients.
//!
//! Works against OpenAI and any endpoint following the chat completions API
//! format (vLLM OpenAI server, local API servers). Transient failures
//! (timeouts, 429, 5xx) are retried with exponential backoff up to a bounded
//! attempt count; the exhausted error is surfaced as [`Error::Provider`] for
//! that call only.

use super::rate_limiter::RpmLimiter;
use super::{Credentials, GenerationParams, InferenceProvider, ScoringProvider};
use crate::dataset::Record;
use crate::{Error, Result};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const DEFAULT_MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Outcome of one request attempt.
enum Attempt<T> {
    Done(T),
    /// Worth retrying (timeout, 429, 5xx)
    Transient(String),
    /// Not worth retrying (auth failure, malformed response)
    Fatal(Error),
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn with_retries<T, F, Fut>(
    limiter: &Mutex<RpmLimiter>,
    max_retries: u32,
    what: &str,
    attempt: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Attempt<T>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut last_transient = String::new();

    for try_index in 0..=max_retries {
        // Honor the requests-per-minute budget before dispatching
        loop {
            let delay = limiter.lock().await.check();
            match delay {
                Some(wait) => {
                    debug!(?wait, what, "rate limit budget exhausted; waiting");
                    tokio::time::sleep(wait).await;
                }
                None => break,
            }
        }
        limiter.lock().await.record();

        match attempt().await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fatal(e) => return Err(e),
            Attempt::Transient(reason) => {
                warn!(what, try_index, %reason, "transient provider failure");
                last_transient = reason;
                if try_index < max_retries {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    Err(Error::Provider(format!(
        "{what} failed after {} attempts: {last_transient}",
        max_retries + 1
    )))
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiCompatClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    model: String,
    params: GenerationParams,
    limiter: Mutex<RpmLimiter>,
    max_retries: u32,
}

impl OpenAiCompatClient {
    /// Create a client for the given endpoint and model.
    ///
    /// `base_url` is the API root (e.g. `https://api.openai.com/v1`); the
    /// chat completions path is appended.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        credentials: Credentials,
        params: GenerationParams,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            model: model.into(),
            params,
            limiter: Mutex::new(RpmLimiter::new(params.requests_per_minute)),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override the bounded retry count (default 3 retries after the first
    /// attempt).
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The model identifier sent with each request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the chat completions request body for a prompt.
    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.params.max_tokens,
            "temperature": self.params.temperature,
            "top_p": self.params.top_p,
        })
    }

    async fn attempt_generate(&self, prompt: &str) -> Attempt<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.credentials.api_key())
            .json(&self.request_body(prompt))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return Attempt::Transient(e.to_string())
            }
            Err(e) => return Attempt::Fatal(Error::Provider(e.to_string())),
        };

        let status = response.status();
        if is_transient_status(status) {
            return Attempt::Transient(format!("HTTP {status}"));
        }
        if !status.is_success() {
            return Attempt::Fatal(Error::Provider(format!("HTTP {status} from {url}")));
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return Attempt::Fatal(Error::Provider(format!("invalid response: {e}"))),
        };

        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map_or_else(
                || {
                    Attempt::Fatal(Error::Provider(
                        "response has no choices[0].message.content".to_string(),
                    ))
                },
                |text| Attempt::Done(text.to_string()),
            )
    }
}

impl InferenceProvider for OpenAiCompatClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        with_retries(&self.limiter, self.max_retries, "generate", || {
            self.attempt_generate(prompt)
        })
        .await
    }
}

/// Remote metric-scoring client.
///
/// Posts `{input, label, prediction}` to a scoring endpoint and expects
/// `{"score": <number>}` back. Anything else is a provider error.
pub struct HttpScoringClient {
    client: Client,
    endpoint: String,
    credentials: Credentials,
    limiter: Mutex<RpmLimiter>,
    max_retries: u32,
}

impl HttpScoringClient {
    /// Create a scoring client for the given endpoint URL.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        credentials: Credentials,
        requests_per_minute: usize,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            credentials,
            limiter: Mutex::new(RpmLimiter::new(requests_per_minute)),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    async fn attempt_score(&self, record: &Record, prediction: &str) -> Attempt<f64> {
        let body = json!({
            "input": record.input(),
            "label": record.label(),
            "prediction": prediction,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.credentials.api_key())
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return Attempt::Transient(e.to_string())
            }
            Err(e) => return Attempt::Fatal(Error::Provider(e.to_string())),
        };

        let status = response.status();
        if is_transient_status(status) {
            return Attempt::Transient(format!("HTTP {status}"));
        }
        if !status.is_success() {
            return Attempt::Fatal(Error::Provider(format!(
                "HTTP {status} from {}",
                self.endpoint
            )));
        }

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return Attempt::Fatal(Error::Provider(format!("invalid response: {e}"))),
        };

        body.get("score").and_then(Value::as_f64).map_or_else(
            || Attempt::Fatal(Error::Provider("response has no numeric 'score'".to_string())),
            Attempt::Done,
        )
    }
}

impl ScoringProvider for HttpScoringClient {
    async fn score(&self, record: &Record, prediction: &str) -> Result<f64> {
        with_retries(&self.limiter, self.max_retries, "score", || {
            self.attempt_score(record, prediction)
        })
        .await
    }
}
