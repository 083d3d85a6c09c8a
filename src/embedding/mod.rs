//! 埋め込みプロバイダ
//!
//! カタログ項目は document、明細は query として非対称にエンコードする。
//! 失敗はバッチ単位で呼び出し側に返し、ジョブ全体は止めない。

pub mod cache;
pub mod cohere;
pub mod hashing;
pub mod openai;

pub use cache::EmbeddingCache;
pub use cohere::CohereEmbedder;
pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;
pub use crate::retry::RetryPolicy;

use crate::config::Config;
use crate::error::{BoqError, Result};
use crate::strategy::ProviderKind;
use async_trait::async_trait;
use std::sync::Arc;

/// エンコードの向き
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    /// カタログ項目（検索対象）
    Document,
    /// 明細（検索クエリ）
    Query,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// テキスト群をベクトル化（入力と同じ順序・件数）
    async fn embed(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>>;

    fn model_name(&self) -> &str;

    /// 0 は未確定（応答から決まる）
    fn dimension(&self) -> usize;

    /// 1リクエストあたりの最大件数
    fn max_batch(&self) -> usize;
}

/// 設定からプロバイダを生成
pub fn create_embedder(kind: ProviderKind, config: &Config) -> Result<Arc<dyn Embedder>> {
    match kind {
        ProviderKind::Cohere => {
            let key = config.get_api_key(kind)?;
            Ok(Arc::new(CohereEmbedder::new(key, config.cohere_model.clone())?))
        }
        ProviderKind::Openai => {
            let key = config.get_api_key(kind)?;
            Ok(Arc::new(OpenAiEmbedder::new(key, config.openai_model.clone())?))
        }
        ProviderKind::Hashing => Ok(Arc::new(HashingEmbedder::default())),
    }
}

/// 単位ベクトルに正規化（ゼロベクトルはそのまま）
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

/// コサイン類似度（次元不一致は0）
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

/// 応答件数が入力と一致するか確認
pub(crate) fn ensure_count(provider: &str, expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(BoqError::Provider(format!(
            "{} returned {} vectors for {} texts",
            provider,
            vectors.len(),
            expected
        )));
    }
    Ok(vectors)
}
