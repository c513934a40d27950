//! OpenAI-compatible HTTP embedding provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use fusion_core::{EmbeddingConfig, Embedder, FusionError, Result};

/// Environment variable consulted when the config carries no API key.
const API_KEY_ENV: &str = "FUSION_EMBEDDING_API_KEY";

/// Embedder backed by a remote `/v1/embeddings` endpoint.
pub struct HttpEmbedder {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
    version: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig, timeout_ms: u64) -> Result<Self> {
        if config.api_base.is_empty() {
            return Err(FusionError::config("embedding.api_base is not set"));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| FusionError::embedding(format!("Failed to build HTTP client: {}", e)))?;

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.is_empty());

        Ok(Self {
            client,
            url: format!("{}{}", config.api_base.trim_end_matches('/'), config.path),
            api_key,
            model: config.model.clone(),
            version: config.version.clone(),
            dimension: config.dimension,
        })
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dimension,
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FusionError::embedding(format!("Request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| FusionError::embedding(format!("Provider returned error: {}", e)))?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| FusionError::embedding(format!("Invalid response body: {}", e)))?;

        let vectors = parse_embedding_response(json)?;
        if vectors.len() != texts.len() {
            return Err(FusionError::embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }

        debug!("Embedded {} texts via {}", texts.len(), self.url);
        Ok(vectors)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FusionError::embedding("Provider returned no embedding"))
    }
}

fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|v| v.as_array())
        .ok_or_else(|| FusionError::embedding("Embedding response is missing data array"))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (fallback_index, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(fallback_index);
        let values = item
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| FusionError::embedding("Embedding item missing embedding array"))?;

        let vector = values
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|n| n as f32)
                    .ok_or_else(|| FusionError::embedding("Embedding value must be numeric"))
            })
            .collect::<Result<Vec<f32>>>()?;

        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn model_version(&self) -> &str {
        &self.version
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_embeddings_in_index_order() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [2.0, 3.0] },
                { "index": 0, "embedding": [0.5, 1.5] }
            ]
        });

        let parsed = parse_embedding_response(json).unwrap();
        assert_eq!(parsed, vec![vec![0.5, 1.5], vec![2.0, 3.0]]);
    }

    #[test]
    fn test_rejects_malformed_response() {
        assert!(parse_embedding_response(serde_json::json!({ "error": "quota" })).is_err());
        assert!(parse_embedding_response(serde_json::json!({
            "data": [{ "embedding": ["x"] }]
        }))
        .is_err());
    }

    #[test]
    fn test_requires_api_base() {
        let config = EmbeddingConfig::default();
        assert!(HttpEmbedder::new(&config, 1000).is_err());

        let config = EmbeddingConfig {
            api_base: "http://localhost:8080/".to_string(),
            api_key: Some("secret".to_string()),
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::new(&config, 1000).unwrap();
        assert_eq!(embedder.url, "http://localhost:8080/v1/embeddings");
        assert_eq!(embedder.dimension(), 384);
    }
}
