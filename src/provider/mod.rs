//! External collaborators - inference and scoring providers
//!
//! Providers are consumed strictly through their input/output contracts:
//! [`InferenceProvider`] turns text into text, [`ScoringProvider`] turns a
//! record/prediction pair into a numeric score. What runs behind the endpoint
//! is out of scope.
//!
//! Credentials are explicit objects loaded once and injected at client
//! construction; nothing reads the environment mid-call.
//!
//! Toyota Way: Heijunka - calls are spread across a requests-per-minute
//! budget, with bounded retry and backoff on transient failures.

mod openai_compat;
mod rate_limiter;

pub use openai_compat::{HttpScoringClient, OpenAiCompatClient};
pub use rate_limiter::RpmLimiter;

use crate::dataset::{Dataset, Record};
use crate::{Error, Result};
use std::fmt;
use std::future::Future;

/// Explicit provider credentials.
///
/// Loaded once (e.g. from the environment at startup) and injected into
/// clients at construction.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// Wrap an already-resolved API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Load the key from an environment variable, once, at construction time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provider`] if the variable is unset.
    pub fn from_env(var: &str) -> Result<Self> {
        std::env::var(var)
            .map(Self::new)
            .map_err(|_| Error::Provider(format!("environment variable '{var}' is not set")))
    }

    /// The resolved API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the key
        f.debug_struct("Credentials").field("api_key", &"***").finish()
    }
}

/// Generation parameters passed to inference providers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    /// Sampling temperature (0.0 = greedy)
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Nucleus sampling cutoff
    pub top_p: f32,
    /// Requests-per-minute budget (0 = unlimited)
    pub requests_per_minute: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 256,
            top_p: 1.0,
            requests_per_minute: 60,
        }
    }
}

/// Model-inference collaborator: text in, text out.
pub trait InferenceProvider: Send + Sync {
    /// Generate a completion for the prompt.
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Metric-scoring collaborator: record/prediction pair in, numeric score out.
pub trait ScoringProvider: Send + Sync {
    /// Score one prediction against its record.
    fn score(&self, record: &Record, prediction: &str) -> impl Future<Output = Result<f64>> + Send;
}

/// Generate one prediction per dataset record, in record order.
///
/// The provider's own rate limiting and retry policy govern pacing. Fails on
/// the first record whose generation exhausts retries; callers that want
/// partial tolerance should call [`InferenceProvider::generate`] per record
/// and substitute their own sentinel.
///
/// # Errors
///
/// Returns [`Error::Provider`] if any generation fails after retries.
pub async fn collect_predictions<P: InferenceProvider>(
    provider: &P,
    dataset: &Dataset,
) -> Result<Vec<String>> {
    let mut predictions = Vec::with_capacity(dataset.len());
    for record in dataset.records() {
        predictions.push(provider.generate(record.input()).await?);
    }
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_key() {
        let creds = Credentials::new("sk-very-secret");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_credentials_from_env_missing() {
        let result = Credentials::from_env("COTEJO_TEST_UNSET_KEY_XYZ");
        assert!(matches!(result, Err(Error::Provider(_))));
    }

    #[test]
    fn test_generation_params_defaults() {
        let params = GenerationParams::default();
        assert!((params.temperature - 0.0).abs() < f32::EPSILON);
        assert_eq!(params.max_tokens, 256);
        assert_eq!(params.requests_per_minute, 60);
    }

    #[tokio::test]
    async fn test_collect_predictions_record_order() {
        struct Echo;
        impl InferenceProvider for Echo {
            async fn generate(&self, prompt: &str) -> Result<String> {
                Ok(format!("echo: {prompt}"))
            }
        }

        let dataset = Dataset::builder()
            .inputs(["a", "b"])
            .labels(["1", "2"])
            .build()
            .unwrap();
        let predictions = collect_predictions(&Echo, &dataset).await.unwrap();
        assert_eq!(predictions, vec!["echo: a", "echo: b"]);
    }
}
