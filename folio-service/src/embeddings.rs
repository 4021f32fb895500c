use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingsConfig;
use crate::error::{EmbeddingError, ServiceError, ServiceResult};

/// Batch text embedding
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed every text in one call. Implementations return exactly one
    /// vector per input or an error; callers still verify the count.
    async fn embed_batch(&self, texts: &[String]) -> ServiceResult<Vec<Vec<f32>>>;

    /// Whether the service currently answers requests
    async fn health_check(&self) -> bool;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for the sentence-embedding HTTP server (`POST /embeddings`)
pub struct HttpEmbedder {
    client: Client,
    url: String,
}

impl HttpEmbedder {
    /// Create a new embedding client
    pub fn new(config: &EmbeddingsConfig) -> ServiceResult<Self> {
        let url = format!("{}/embeddings", config.base_url.trim_end_matches('/'));
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::Embedding(EmbeddingError::Connection {
                    url: url.clone(),
                    source: e,
                })
            })?;

        Ok(Self { client, url })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let response = self
            .client
            .post(&self.url)
            .json(&EmbeddingRequest { texts })
            .send()
            .await
            .map_err(|e| EmbeddingError::Connection {
                url: self.url.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Http {
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }

        let parsed: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| EmbeddingError::InvalidResponse {
                    message: e.to_string(),
                })?;

        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> ServiceResult<Vec<Vec<f32>>> {
        debug!(count = texts.len(), url = %self.url, "Requesting embeddings");
        Ok(self.request(texts).await?)
    }

    async fn health_check(&self) -> bool {
        match self.request(&[]).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Embedding service health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let body = serde_json::to_value(EmbeddingRequest { texts: &texts }).unwrap();
        assert_eq!(body, serde_json::json!({"texts": ["a", "b"]}));
    }

    #[test]
    fn test_response_shape() {
        let parsed: EmbeddingResponse =
            serde_json::from_str(r#"{"embeddings": [[0.1, 0.2], [0.3, 0.4]]}"#).unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[1], vec![0.3, 0.4]);
    }

    #[test]
    fn test_url_normalized() {
        let embedder = HttpEmbedder::new(&EmbeddingsConfig {
            base_url: "http://embed:8000/".to_string(),
            request_timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(embedder.url, "http://embed:8000/embeddings");
    }
}
