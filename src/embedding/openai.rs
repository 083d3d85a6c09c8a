//! OpenAI 埋め込み（POST /v1/embeddings）
//!
//! APIにdocument/queryの区別が無いため `EmbedMode` は使わない。

use super::{ensure_count, EmbedMode, Embedder, RetryPolicy};
use crate::error::{BoqError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const OPENAI_MAX_BATCH: usize = 300;

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: String, model: String, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BoqError::Provider(format!("HTTPクライアント初期化失敗: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingsRequest {
            input: texts,
            model: &self.model,
        };
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BoqError::Provider(format!("openai request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BoqError::Provider(format!("openai returned {}: {}", status, detail)));
        }

        let mut parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| BoqError::Provider(format!("openai response parse failed: {}", e)))?;
        // index順に並べ直す
        parsed.data.sort_by_key(|item| item.index);
        ensure_count(
            "openai",
            texts.len(),
            parsed.data.into_iter().map(|item| item.embedding).collect(),
        )
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.len() > OPENAI_MAX_BATCH {
            return Err(BoqError::Provider(format!(
                "openai batch of {} exceeds limit {}",
                texts.len(),
                OPENAI_MAX_BATCH
            )));
        }
        debug!(count = texts.len(), model = %self.model, "openai embeddings");
        self.retry
            .run("openai embeddings", || self.request(texts))
            .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        match self.model.as_str() {
            "text-embedding-3-large" => 3072,
            "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
            _ => 0,
        }
    }

    fn max_batch(&self) -> usize {
        OPENAI_MAX_BATCH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_by_model() {
        let large = OpenAiEmbedder::new("key".into(), "text-embedding-3-large".into()).unwrap();
        assert_eq!(large.dimension(), 3072);
        let custom = OpenAiEmbedder::new("key".into(), "custom".into()).unwrap();
        assert_eq!(custom.dimension(), 0);
        assert_eq!(custom.max_batch(), 300);
    }

    #[test]
    fn test_response_is_reordered_by_index() {
        let json = r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#;
        let mut parsed: EmbeddingsResponse = serde_json::from_str(json).unwrap();
        parsed.data.sort_by_key(|item| item.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0, 0.0]);
    }
}
