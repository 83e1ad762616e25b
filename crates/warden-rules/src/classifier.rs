//! External content classifier.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Debug;
use std::time::Duration;

use crate::error::{ClassifierError, ClassifierResult};

/// Classifier decision for one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    pub flagged: bool,
    pub categories: Vec<String>,
}

impl Verdict {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn flagged(categories: Vec<String>) -> Self {
        Self {
            flagged: true,
            categories,
        }
    }
}

/// Content classifier.
#[async_trait]
pub trait Classifier: Send + Sync + Debug {
    async fn classify(&self, text: &str) -> ClassifierResult<Verdict>;
}

/// Classifier that never flags anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopClassifier;

#[async_trait]
impl Classifier for NoopClassifier {
    async fn classify(&self, _text: &str) -> ClassifierResult<Verdict> {
        Ok(Verdict::clean())
    }
}

/// Default moderation model
pub const DEFAULT_MODERATION_MODEL: &str = "text-moderation-latest";

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    #[serde(default)]
    results: Vec<ModerationResult>,
}

#[derive(Debug, Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: serde_json::Map<String, Value>,
}

/// OpenAI-compatible moderation endpoint.
#[derive(Debug, Clone)]
pub struct HttpModerationClassifier {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl HttpModerationClassifier {
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        model: Option<String>,
        timeout: Duration,
    ) -> ClassifierResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: resolve_moderation_endpoint(endpoint),
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| DEFAULT_MODERATION_MODEL.to_string()),
            timeout,
        })
    }
}

fn resolve_moderation_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.ends_with("/moderations") {
        endpoint.to_string()
    } else if endpoint.ends_with("/v1") {
        format!("{}/moderations", endpoint)
    } else {
        format!("{}/v1/moderations", endpoint)
    }
}

#[async_trait]
impl Classifier for HttpModerationClassifier {
    async fn classify(&self, text: &str) -> ClassifierResult<Verdict> {
        let payload = json!({
            "input": text,
            "model": self.model,
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifierError::Timeout(self.timeout)
                } else {
                    ClassifierError::Unavailable(format!("moderation request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ClassifierError::Unavailable(format!(
                "moderation endpoint returned {}",
                status
            )));
        }

        let body: ModerationResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;

        let result = body
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ClassifierError::InvalidResponse("empty results".to_string()))?;

        let categories = result
            .categories
            .into_iter()
            .filter(|(_, hit)| hit.as_bool().unwrap_or(false))
            .map(|(name, _)| name)
            .collect();

        Ok(Verdict {
            flagged: result.flagged,
            categories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_never_flags() {
        let verdict = NoopClassifier.classify("anything at all").await.unwrap();
        assert!(!verdict.flagged);
    }

    #[test]
    fn test_endpoint_resolution() {
        assert_eq!(
            resolve_moderation_endpoint("https://api.openai.com"),
            "https://api.openai.com/v1/moderations"
        );
        assert_eq!(
            resolve_moderation_endpoint("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/moderations"
        );
        assert_eq!(
            resolve_moderation_endpoint("http://localhost:8080/v1/moderations"),
            "http://localhost:8080/v1/moderations"
        );
    }

    #[test]
    fn test_moderation_response_shape() {
        let raw = r#"{"id":"modr-1","results":[{"flagged":true,"categories":{"hate":true,"violence":false}}]}"#;
        let body: ModerationResponse = serde_json::from_str(raw).unwrap();
        assert!(body.results[0].flagged);
        assert_eq!(body.results[0].categories.len(), 2);
    }
}
