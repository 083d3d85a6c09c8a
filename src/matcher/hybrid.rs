//! ハイブリッド照合
//!
//! 1. 文字列類似度だけで候補を絞り込む（最大50件、最低0.3）
//! 2. 残った候補ごとに 意味(最大2系統) / 文字列 / ドメイン / 文脈 のスコアを計算
//! 3. 存在するスコアの重みだけで正規化した加重平均を取る

use super::lexical::{LexicalMatcher, TOP_CANDIDATES};
use super::semantic::SemanticMatcher;
use super::similarity::{jaccard, levenshtein_ratio, trigram_similarity, word_overlap};
use super::Matcher;
use crate::error::{BoqError, Result};
use crate::job::JobContext;
use async_trait::async_trait;
use boq_match_common::domain::{materials_in, MATERIAL_CATEGORIES};
use boq_match_common::{
    unit_relation, CatalogEntry, CatalogIndex, LineItem, MatchCandidate, MatchMethod, UnitRelation,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// 各スコアの重み
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridWeights {
    pub semantic_primary: f64,
    pub semantic_secondary: f64,
    pub string: f64,
    pub domain: f64,
    pub context: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            semantic_primary: 0.35,
            semantic_secondary: 0.35,
            string: 0.15,
            domain: 0.10,
            context: 0.05,
        }
    }
}

/// 絞り込み条件
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefilterOptions {
    pub max_candidates: usize,
    pub min_score: f64,
}

impl Default for PrefilterOptions {
    fn default() -> Self {
        Self {
            max_candidates: 50,
            min_score: 0.3,
        }
    }
}

/// 候補1件分のスコア（意味スコアはプロバイダが無ければNone）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HybridSignals {
    pub semantic_primary: Option<f64>,
    pub semantic_secondary: Option<f64>,
    pub string: f64,
    pub domain: f64,
    pub context: f64,
}

impl HybridSignals {
    /// 存在するスコアのみの加重平均
    pub fn combine(&self, weights: &HybridWeights) -> f64 {
        let present = [
            (self.semantic_primary, weights.semantic_primary),
            (self.semantic_secondary, weights.semantic_secondary),
            (Some(self.string), weights.string),
            (Some(self.domain), weights.domain),
            (Some(self.context), weights.context),
        ];
        let (sum, total_weight) = present
            .iter()
            .filter_map(|(score, weight)| score.map(|s| (s * weight, *weight)))
            .fold((0.0, 0.0), |(sum, total), (weighted, weight)| (sum + weighted, total + weight));
        if total_weight <= 0.0 {
            0.0
        } else {
            (sum / total_weight).clamp(0.0, 1.0)
        }
    }
}

/// 絞り込み用の安価なスコア
pub fn prefilter_score(query: &str, entry: &CatalogEntry) -> f64 {
    let a = query.to_lowercase();
    let b = entry.matching_text().to_lowercase();
    let words_a: Vec<&str> = a.split_whitespace().collect();
    let words_b: Vec<&str> = b.split_whitespace().collect();
    levenshtein_ratio(&a, &b) * 0.6 + word_overlap(&words_a, &words_b) * 0.4
}

/// 候補を絞り込む（条件を満たすものが無ければ上位をそのまま残す）
pub fn prefilter<'a>(query: &str, entries: &'a [CatalogEntry], options: &PrefilterOptions) -> Vec<&'a CatalogEntry> {
    let mut scored: Vec<(&CatalogEntry, f64)> = entries
        .iter()
        .map(|entry| (entry, prefilter_score(query, entry)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let passing = scored.iter().filter(|(_, s)| *s >= options.min_score).count();
    let keep = if passing == 0 {
        options.max_candidates
    } else {
        passing.min(options.max_candidates)
    };
    scored.into_iter().take(keep).map(|(entry, _)| entry).collect()
}

/// ドメイン知識スコア
///
/// 材料カテゴリが両方にあれば+0.3、片方だけなら-0.1。
/// 単位が一致・換算可能なら+0.4、不一致なら-0.2。
pub fn domain_score(item: &LineItem, entry: &CatalogEntry) -> f64 {
    let item_materials = materials_in(item.matching_text());
    let entry_text = format!(
        "{} {}",
        entry.matching_text(),
        entry.category.as_deref().unwrap_or_default()
    );
    let entry_materials = materials_in(&entry_text);

    let mut score: f64 = 0.0;
    for material in MATERIAL_CATEGORIES.iter().map(|(name, _)| *name) {
        match (item_materials.contains(&material), entry_materials.contains(&material)) {
            (true, true) => score += 0.3,
            (true, false) | (false, true) => score -= 0.1,
            (false, false) => {}
        }
    }

    score += match unit_relation(item.unit.as_deref(), entry.unit.as_deref()) {
        UnitRelation::Exact | UnitRelation::Compatible => 0.4,
        UnitRelation::Incompatible => -0.2,
        UnitRelation::Unknown => 0.0,
    };
    score.clamp(0.0, 1.0)
}

/// 文脈妥当性スコア
///
/// 金額規模・数量規模・説明長の近さを評価する。
pub fn context_score(item: &LineItem, entry: &CatalogEntry) -> f64 {
    let mut score: f64 = 0.5;
    let amount = item.quantity * entry.rate;
    if amount > 0.0 && amount < 1_000_000.0 {
        score += 0.2;
    }
    if item.quantity > 0.0 && item.quantity < 100_000.0 {
        score += 0.1;
    }
    let len_a = item.description.chars().count() as f64;
    let len_b = entry.matching_text().chars().count() as f64;
    let longer = len_a.max(len_b);
    if longer > 0.0 {
        score += len_a.min(len_b) / longer * 0.2;
    }
    score.clamp(0.0, 1.0)
}

pub struct HybridEnsemble {
    weights: HybridWeights,
    prefilter: PrefilterOptions,
    lexical: LexicalMatcher,
    primary: Option<SemanticMatcher>,
    secondary: Option<SemanticMatcher>,
    /// 全プロバイダのクエリ埋め込みが失敗したバッチ数
    failed_batches: AtomicUsize,
}

impl HybridEnsemble {
    pub fn new(weights: HybridWeights, prefilter: PrefilterOptions, lexical: LexicalMatcher) -> Self {
        Self {
            weights,
            prefilter,
            lexical,
            primary: None,
            secondary: None,
            failed_batches: AtomicUsize::new(0),
        }
    }

    pub fn with_primary(mut self, matcher: SemanticMatcher) -> Self {
        self.primary = Some(matcher.with_progress_range(20, 25));
        self
    }

    pub fn with_secondary(mut self, matcher: SemanticMatcher) -> Self {
        self.secondary = Some(matcher.with_progress_range(25, 30));
        self
    }

    /// 有効な意味プロバイダ数
    pub fn provider_count(&self) -> usize {
        self.primary.iter().chain(self.secondary.iter()).count()
    }

    /// 文字列スコア（レーベンシュタイン + Jaccard + 3-gram）
    pub fn string_score(&self, item: &LineItem, entry: &CatalogEntry) -> f64 {
        let query = item.matching_text();
        let target = entry.matching_text();
        let preprocessor = self.lexical.preprocessor();
        let tokens_a = preprocessor.process(query).tokens;
        let tokens_b = preprocessor.process(target).tokens;
        levenshtein_ratio(&query.to_lowercase(), &target.to_lowercase()) * 0.4
            + jaccard(&tokens_a, &tokens_b) * 0.3
            + trigram_similarity(query, target) * 0.3
    }

    /// 1明細の候補を採点
    ///
    /// # Arguments
    /// * `primary_vec` / `secondary_vec` - 各プロバイダのクエリベクトル（無ければNone）
    pub fn score_item(
        &self,
        item: &LineItem,
        catalog: &CatalogIndex,
        primary_vec: Option<&[f32]>,
        secondary_vec: Option<&[f32]>,
    ) -> Vec<MatchCandidate> {
        if catalog.is_empty() {
            return Vec::new();
        }

        let survivors = prefilter(item.matching_text(), catalog.entries(), &self.prefilter);
        let semantic = |matcher: &Option<SemanticMatcher>, vector: Option<&[f32]>, entry: &CatalogEntry| {
            matcher
                .as_ref()
                .zip(vector)
                .and_then(|(m, v)| m.similarity(v, &entry.id))
        };

        let mut candidates: Vec<MatchCandidate> = survivors
            .into_iter()
            .map(|entry| {
                let signals = HybridSignals {
                    semantic_primary: semantic(&self.primary, primary_vec, entry),
                    semantic_secondary: semantic(&self.secondary, secondary_vec, entry),
                    string: self.string_score(item, entry),
                    domain: domain_score(item, entry),
                    context: context_score(item, entry),
                };
                let mut candidate =
                    MatchCandidate::new(entry.id.clone(), signals.combine(&self.weights), MatchMethod::Hybrid)
                        .with_score("string", signals.string)
                        .with_score("domain", signals.domain)
                        .with_score("context", signals.context);
                if let Some(s) = signals.semantic_primary {
                    candidate = candidate.with_score("semanticPrimary", s);
                }
                if let Some(s) = signals.semantic_secondary {
                    candidate = candidate.with_score("semanticSecondary", s);
                }
                candidate
            })
            .collect();

        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        candidates.truncate(TOP_CANDIDATES);
        candidates
    }
}

/// 意味プロバイダの事前計算（プロバイダ障害ならそのプロバイダを外す）
async fn prepare_provider(
    slot: &mut Option<SemanticMatcher>,
    catalog: &CatalogIndex,
    ctx: &JobContext,
) -> Result<()> {
    let Some(matcher) = slot.as_mut() else {
        return Ok(());
    };
    match matcher.precompute(catalog, ctx).await {
        Ok(()) => Ok(()),
        Err(BoqError::Provider(message)) => {
            warn!(model = %matcher.model_name(), error = %message, "dropping semantic provider from ensemble");
            *slot = None;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// クエリベクトル（プロバイダなし・失敗時はNone）
async fn query_vectors(slot: &Option<SemanticMatcher>, items: &[LineItem]) -> Option<Vec<Vec<f32>>> {
    let matcher = slot.as_ref()?;
    match matcher.embed_queries(items).await {
        Ok(vectors) => Some(vectors),
        Err(e) => {
            warn!(model = %matcher.model_name(), error = %e, "query embedding failed for batch");
            None
        }
    }
}

fn vector_at(vectors: &Option<Vec<Vec<f32>>>, idx: usize) -> Option<&[f32]> {
    vectors.as_ref().and_then(|v| v.get(idx)).map(Vec::as_slice)
}

#[async_trait]
impl Matcher for HybridEnsemble {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    async fn prepare(&mut self, catalog: &CatalogIndex, ctx: &JobContext) -> Result<()> {
        *self.failed_batches.get_mut() = 0;
        self.lexical.prepare_catalog(catalog);
        prepare_provider(&mut self.primary, catalog, ctx).await?;
        prepare_provider(&mut self.secondary, catalog, ctx).await?;
        Ok(())
    }

    async fn score_batch(&self, items: &[LineItem], catalog: &CatalogIndex) -> Vec<Vec<MatchCandidate>> {
        let primary = query_vectors(&self.primary, items).await;
        let secondary = query_vectors(&self.secondary, items).await;
        if self.provider_count() > 0 && primary.is_none() && secondary.is_none() {
            self.failed_batches.fetch_add(1, Ordering::Relaxed);
        }

        items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                self.score_item(item, catalog, vector_at(&primary, idx), vector_at(&secondary, idx))
            })
            .collect()
    }

    fn failed_batches(&self) -> usize {
        self.failed_batches.load(Ordering::Relaxed)
    }
}
