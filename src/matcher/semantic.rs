//! 埋め込みベクトルによる照合
//!
//! ジョブ開始時にカタログ全項目を document としてベクトル化してキャッシュし、
//! 明細はバッチごとに query としてベクトル化してコサイン類似度で順位付けする。

use super::category::category_first;
use super::lexical::{LexicalMatcher, TOP_CANDIDATES};
use super::Matcher;
use crate::embedding::{cosine_similarity, EmbedMode, Embedder, EmbeddingCache};
use crate::error::{BoqError, Result};
use crate::job::JobContext;
use async_trait::async_trait;
use boq_match_common::{
    unit_relation, CatalogEntry, CatalogIndex, LineItem, MatchCandidate, MatchMethod, UnitRelation,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 信頼度の下限（低類似・失敗時でも必ず1件返すため）
pub const CONFIDENCE_FLOOR: f64 = 0.01;
const EXACT_UNIT_BONUS: f64 = 1.10;
const COMPATIBLE_UNIT_BONUS: f64 = 1.05;

/// カタログ項目の document テキスト
///
/// 説明文のみ。単位とカテゴリは `unit_multiplier` と `category_first` で扱うため、
/// 同じ説明文の明細とはベクトルが一致する。
pub fn document_text(entry: &CatalogEntry) -> String {
    let description = if entry.description.trim().is_empty() {
        entry.full_context.as_deref().unwrap_or_default()
    } else {
        entry.description.as_str()
    };
    normalize_text(description)
}

/// 明細の query テキスト（説明文のみ）
pub fn query_text(item: &LineItem) -> String {
    normalize_text(&item.description)
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// 単位の一致度による倍率
fn unit_multiplier(item: &LineItem, entry: &CatalogEntry) -> f64 {
    match unit_relation(item.unit.as_deref(), entry.unit.as_deref()) {
        UnitRelation::Exact => EXACT_UNIT_BONUS,
        UnitRelation::Compatible => COMPATIBLE_UNIT_BONUS,
        _ => 1.0,
    }
}

pub struct SemanticMatcher {
    embedder: Arc<dyn Embedder>,
    cache: EmbeddingCache,
    /// クエリ埋め込みに失敗したときの代替
    fallback: LexicalMatcher,
    /// precompute 中に報告する進捗の範囲
    progress_range: (u8, u8),
    /// クエリ埋め込みが失敗したバッチ数
    failed_batches: AtomicUsize,
}

impl SemanticMatcher {
    pub fn new(embedder: Arc<dyn Embedder>, fallback: LexicalMatcher) -> Self {
        let cache = EmbeddingCache::new(embedder.model_name());
        Self {
            embedder,
            cache,
            fallback,
            progress_range: (20, 30),
            failed_batches: AtomicUsize::new(0),
        }
    }

    pub fn with_progress_range(mut self, start: u8, end: u8) -> Self {
        self.progress_range = (start, end.max(start));
        self
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    fn batch_size(&self) -> usize {
        self.embedder.max_batch().max(1)
    }

    /// カタログ全項目の埋め込みを作り直す
    ///
    /// 一部のバッチが失敗しても続行する。1件も作れなければエラー。
    pub async fn precompute(&mut self, catalog: &CatalogIndex, ctx: &JobContext) -> Result<()> {
        self.cache.clear();
        *self.failed_batches.get_mut() = 0;
        self.fallback.prepare_catalog(catalog);
        if catalog.is_empty() {
            return Ok(());
        }

        let entries = catalog.entries();
        let batch_size = self.batch_size();
        let total_batches = entries.len().div_ceil(batch_size);
        let (start, end) = self.progress_range;
        let mut failed_batches = 0;

        for (k, chunk) in entries.chunks(batch_size).enumerate() {
            ctx.checkpoint("catalog embeddings").await?;
            let percent = start + ((end - start) as usize * k / total_batches) as u8;
            ctx.report(
                percent,
                format!("computing embeddings batch {}/{}", k + 1, total_batches),
            )
            .await;

            let texts: Vec<String> = chunk.iter().map(document_text).collect();
            match self.embedder.embed(&texts, EmbedMode::Document).await {
                Ok(vectors) => {
                    for (entry, vector) in chunk.iter().zip(vectors) {
                        self.cache.insert(entry.id.clone(), vector);
                    }
                }
                Err(e) => {
                    failed_batches += 1;
                    warn!(
                        model = %self.model_name(),
                        batch = k + 1,
                        total_batches,
                        error = %e,
                        "catalog embedding batch failed"
                    );
                }
            }
        }

        if self.cache.is_empty() {
            return Err(BoqError::Provider(format!(
                "{}: no catalog embeddings could be computed",
                self.model_name()
            )));
        }
        info!(
            model = %self.model_name(),
            cached = self.cache.len(),
            failed_batches,
            "catalog embeddings ready"
        );
        Ok(())
    }

    /// 明細群を query としてベクトル化
    pub async fn embed_queries(&self, items: &[LineItem]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(items.len());
        for chunk in items.chunks(self.batch_size()) {
            let texts: Vec<String> = chunk.iter().map(query_text).collect();
            vectors.extend(self.embedder.embed(&texts, EmbedMode::Query).await?);
        }
        Ok(vectors)
    }

    /// クエリベクトルと項目の類似度 [0, 1]（キャッシュに無ければNone）
    pub fn similarity(&self, query: &[f32], entry_id: &str) -> Option<f64> {
        self.cache
            .get(entry_id)
            .map(|vector| cosine_similarity(query, vector).max(0.0))
    }

    /// 指定項目群を順位付け
    pub fn rank(&self, item: &LineItem, query: &[f32], entries: &[&CatalogEntry]) -> Vec<MatchCandidate> {
        let mut candidates: Vec<MatchCandidate> = entries
            .iter()
            .filter_map(|entry| {
                let cosine = self.similarity(query, &entry.id)?;
                let multiplier = unit_multiplier(item, entry);
                let confidence = (cosine * multiplier).clamp(CONFIDENCE_FLOOR, 1.0);
                Some(
                    MatchCandidate::new(entry.id.clone(), confidence, MatchMethod::Semantic)
                        .with_score("cosine", cosine)
                        .with_score("unitMultiplier", multiplier),
                )
            })
            .collect();
        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        candidates.truncate(TOP_CANDIDATES);
        candidates
    }

    /// カテゴリ優先で1明細を採点
    pub fn score_with_vector(&self, item: &LineItem, query: &[f32], catalog: &CatalogIndex) -> Vec<MatchCandidate> {
        category_first(item, catalog, |entries| self.rank(item, query, entries))
    }

    /// 文字列照合の最良候補を代替として返す
    fn fallback_candidates(&self, item: &LineItem, catalog: &CatalogIndex) -> Vec<MatchCandidate> {
        self.fallback
            .score(item, catalog)
            .into_iter()
            .take(1)
            .map(|lexical| {
                let confidence = lexical.confidence.max(CONFIDENCE_FLOOR);
                MatchCandidate::new(lexical.catalog_entry_id, confidence, MatchMethod::Fallback)
                    .with_score("lexical", lexical.confidence)
            })
            .collect()
    }
}

#[async_trait]
impl Matcher for SemanticMatcher {
    fn name(&self) -> &'static str {
        "semantic"
    }

    async fn prepare(&mut self, catalog: &CatalogIndex, ctx: &JobContext) -> Result<()> {
        self.precompute(catalog, ctx).await
    }

    fn failed_batches(&self) -> usize {
        self.failed_batches.load(Ordering::Relaxed)
    }

    async fn score_batch(&self, items: &[LineItem], catalog: &CatalogIndex) -> Vec<Vec<MatchCandidate>> {
        if catalog.is_empty() {
            return vec![Vec::new(); items.len()];
        }

        let vectors = match self.embed_queries(items).await {
            Ok(vectors) => vectors,
            Err(e) => {
                self.failed_batches.fetch_add(1, Ordering::Relaxed);
                warn!(
                    model = %self.model_name(),
                    items = items.len(),
                    error = %e,
                    "query embedding failed, using lexical fallback"
                );
                return items
                    .iter()
                    .map(|item| self.fallback_candidates(item, catalog))
                    .collect();
            }
        };

        items
            .iter()
            .zip(vectors.iter())
            .map(|(item, vector)| {
                let ranked = self.score_with_vector(item, vector, catalog);
                if ranked.is_empty() {
                    debug!(item = %item.id, "no cached vectors matched, using lexical fallback");
                    self.fallback_candidates(item, catalog)
                } else {
                    ranked
                }
            })
            .collect()
    }
}
