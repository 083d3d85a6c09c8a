//! Cohere 埋め込み（POST /v1/embed）

use super::{ensure_count, EmbedMode, Embedder, RetryPolicy};
use crate::error::{BoqError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.cohere.ai";
/// Cohere embed の1リクエスト上限
pub const COHERE_MAX_BATCH: usize = 96;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
    model: &'a str,
    input_type: &'static str,
    truncate: &'static str,
    embedding_types: [&'static str; 1],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: EmbeddingsByType,
}

#[derive(Deserialize)]
struct EmbeddingsByType {
    float: Vec<Vec<f32>>,
}

pub struct CohereEmbedder {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

impl CohereEmbedder {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    /// 接続先を指定して生成（プロキシ・テスト用）
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

    fn input_type(mode: EmbedMode) -> &'static str {
        match mode {
            EmbedMode::Document => "search_document",
            EmbedMode::Query => "search_query",
        }
    }

    async fn request(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        let body = EmbedRequest {
            texts,
            model: &self.model,
            input_type: Self::input_type(mode),
            truncate: "END",
            embedding_types: ["float"],
        };
        let response = self
            .client
            .post(format!("{}/v1/embed", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BoqError::Provider(format!("cohere request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BoqError::Provider(format!("cohere returned {}: {}", status, detail)));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| BoqError::Provider(format!("cohere response parse failed: {}", e)))?;
        ensure_count("cohere", texts.len(), parsed.embeddings.float)
    }
}

#[async_trait]
impl Embedder for CohereEmbedder {
    async fn embed(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.len() > COHERE_MAX_BATCH {
            return Err(BoqError::Provider(format!(
                "cohere batch of {} exceeds limit {}",
                texts.len(),
                COHERE_MAX_BATCH
            )));
        }
        debug!(count = texts.len(), input_type = Self::input_type(mode), "cohere embed");
        self.retry
            .run("cohere embed", || self.request(texts, mode))
            .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        1024
    }

    fn max_batch(&self) -> usize {
        COHERE_MAX_BATCH
    }
}
