//! カタログ埋め込みキャッシュ
//!
//! 1つの照合器が専有し、ジョブごとに作り直す。

use super::normalize;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct EmbeddingCache {
    /// カタログ項目ID → 単位ベクトル
    vectors: HashMap<String, Vec<f32>>,
    model: String,
}

impl EmbeddingCache {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            vectors: HashMap::new(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn clear(&mut self) {
        self.vectors.clear();
    }

    /// 正規化して保存
    pub fn insert(&mut self, entry_id: impl Into<String>, mut vector: Vec<f32>) {
        normalize(&mut vector);
        self.vectors.insert(entry_id.into(), vector);
    }

    pub fn get(&self, entry_id: &str) -> Option<&[f32]> {
        self.vectors.get(entry_id).map(Vec::as_slice)
    }

    pub fn contains(&self, entry_id: &str) -> bool {
        self.vectors.contains_key(entry_id)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}
