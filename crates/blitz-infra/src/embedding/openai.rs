//! OpenAI and Azure OpenAI embeddings over REST.
//!
//! Both services accept the same request body and return the same response
//! shape; they differ only in URL layout and auth header.

use std::sync::Arc;
use std::time::Duration;

use blitz_core::memory::embedder::Embedder;
use blitz_core::metrics::MetricsCollector;
use blitz_types::config::{EmbeddingConfig, EmbeddingProvider};
use blitz_types::error::EmbeddingError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Where requests go and how they authenticate.
#[derive(Debug, Clone, PartialEq)]
enum Endpoint {
    OpenAi { base_url: String },
    Azure {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

impl Endpoint {
    fn url(&self) -> String {
        match self {
            Endpoint::OpenAi { base_url } => {
                format!("{}/embeddings", base_url.trim_end_matches('/'))
            }
            Endpoint::Azure {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{deployment}/embeddings?api-version={api_version}",
                endpoint.trim_end_matches('/')
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
    #[serde(default)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Embedding client for OpenAI or an Azure OpenAI deployment.
///
/// The API key is held as a [`SecretString`] and only exposed while building
/// request headers.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: Endpoint,
    api_key: SecretString,
    model: String,
    dimension: usize,
    metrics: Option<Arc<MetricsCollector>>,
}

impl OpenAiEmbedder {
    pub fn from_config(config: &EmbeddingConfig, dimension: usize) -> Result<Self, EmbeddingError> {
        let api_key = config
            .api_key
            .as_ref()
            .map(|key| SecretString::from(key.expose_secret().to_string()))
            .ok_or_else(|| EmbeddingError::Config("embedding.api_key is not set".to_string()))?;

        let endpoint = match config.provider {
            EmbeddingProvider::OpenAi => Endpoint::OpenAi {
                base_url: config.base_url.clone(),
            },
            EmbeddingProvider::AzureOpenAi => Endpoint::Azure {
                endpoint: config.azure_endpoint.clone().ok_or_else(|| {
                    EmbeddingError::Config("embedding.azure_endpoint is not set".to_string())
                })?,
                deployment: config
                    .azure_deployment
                    .clone()
                    .unwrap_or_else(|| config.model.clone()),
                api_version: config.api_version.clone(),
            },
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: config.model.clone(),
            dimension,
            metrics: None,
        })
    }

    /// Record billed tokens under the `embedding` token type.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn request_body<'a>(&'a self, texts: &'a [String]) -> EmbeddingRequest<'a> {
        EmbeddingRequest {
            input: texts,
            model: &self.model,
            // Only the text-embedding-3 family accepts a reduced dimension.
            dimensions: self
                .model
                .starts_with("text-embedding-3")
                .then_some(self.dimension),
        }
    }
}

/// Order vectors by their `index` and check count and length.
fn into_vectors(
    response: EmbeddingResponse,
    expected_count: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut data = response.data;
    if data.is_empty() {
        return Err(EmbeddingError::Empty);
    }
    if data.len() != expected_count {
        return Err(EmbeddingError::Decode(format!(
            "expected {expected_count} vectors, got {}",
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    data.into_iter()
        .map(|d| {
            if d.embedding.len() == dimension {
                Ok(d.embedding)
            } else {
                Err(EmbeddingError::Dimension {
                    expected: dimension,
                    actual: d.embedding.len(),
                })
            }
        })
        .collect()
}

fn api_error(status: u16, body: &str) -> EmbeddingError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string());
    EmbeddingError::Api { status, message }
}

impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = self.client.post(self.endpoint.url());
        let request = match &self.endpoint {
            Endpoint::OpenAi { .. } => request.bearer_auth(self.api_key.expose_secret()),
            Endpoint::Azure { .. } => request.header("api-key", self.api_key.expose_secret()),
        };

        let response = request
            .json(&self.request_body(texts))
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), model = %self.model, "embedding request rejected");
            return Err(api_error(status.as_u16(), &body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Decode(e.to_string()))?;
        if let (Some(metrics), Some(usage)) = (&self.metrics, &parsed.usage) {
            metrics.record_tokens("embedding", usage.total_tokens);
        }
        into_vectors(parsed, texts.len(), self.dimension)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: EmbeddingProvider) -> EmbeddingConfig {
        EmbeddingConfig {
            provider,
            api_key: Some(SecretString::from("sk-test-not-real".to_string())),
            azure_endpoint: Some("https://acme.openai.azure.com/".to_string()),
            azure_deployment: Some("embed-prod".to_string()),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_openai_url() {
        let embedder = OpenAiEmbedder::from_config(&config(EmbeddingProvider::OpenAi), 1536).unwrap();
        assert_eq!(embedder.endpoint.url(), "https://api.openai.com/v1/embeddings");
    }

    #[test]
    fn test_azure_url() {
        let embedder =
            OpenAiEmbedder::from_config(&config(EmbeddingProvider::AzureOpenAi), 1536).unwrap();
        assert_eq!(
            embedder.endpoint.url(),
            "https://acme.openai.azure.com/openai/deployments/embed-prod/embeddings?api-version=2025-03-01-preview"
        );
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let mut cfg = config(EmbeddingProvider::OpenAi);
        cfg.api_key = None;
        assert!(matches!(
            OpenAiEmbedder::from_config(&cfg, 1536),
            Err(EmbeddingError::Config(_))
        ));
    }

    #[test]
    fn test_request_body_dimensions() {
        let embedder = OpenAiEmbedder::from_config(&config(EmbeddingProvider::OpenAi), 512).unwrap();
        let texts = vec!["hello".to_string()];
        let body = serde_json::to_value(embedder.request_body(&texts)).unwrap();
        assert_eq!(body["model"], "text-embedding-3-small");
        assert_eq!(body["dimensions"], 512);
        assert_eq!(body["input"][0], "hello");
    }

    #[test]
    fn test_vectors_reordered_by_index() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ], "usage": {"prompt_tokens": 4, "total_tokens": 4}}"#,
        )
        .unwrap();
        let vectors = into_vectors(response, 2, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_dimension_and_empty_checks() {
        let response: EmbeddingResponse =
            serde_json::from_str(r#"{"data": [{"index": 0, "embedding": [1.0]}]}"#).unwrap();
        assert!(matches!(
            into_vectors(response, 1, 3),
            Err(EmbeddingError::Dimension { expected: 3, actual: 1 })
        ));

        let empty: EmbeddingResponse = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert!(matches!(into_vectors(empty, 1, 3), Err(EmbeddingError::Empty)));
    }

    #[test]
    fn test_api_error_message_extracted() {
        let err = api_error(401, r#"{"error": {"message": "Incorrect API key", "type": "invalid_request_error"}}"#);
        assert!(matches!(err, EmbeddingError::Api { status: 401, ref message } if message == "Incorrect API key"));

        let err = api_error(502, "bad gateway");
        assert!(matches!(err, EmbeddingError::Api { status: 502, ref message } if message == "bad gateway"));
    }
}
