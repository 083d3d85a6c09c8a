//! 明細とカタログの照合
//!
//! - lexical: 文字列類似度のみ（外部呼び出しなし）
//! - semantic: 埋め込みベクトルのコサイン類似度
//! - hybrid: 上記と領域知識スコアの加重平均

pub mod category;
pub mod hybrid;
pub mod lexical;
pub mod semantic;
pub mod similarity;
pub mod text;

pub use hybrid::{HybridEnsemble, HybridWeights, PrefilterOptions};
pub use lexical::LexicalMatcher;
pub use semantic::SemanticMatcher;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{BoqError, Result};
use crate::job::JobContext;
use crate::strategy::Strategy;
use async_trait::async_trait;
use boq_match_common::{CatalogIndex, LineItem, MatchCandidate, MatchResult, SynonymTable};
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait Matcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// ジョブ開始時の前処理（カタログ埋め込みなど）
    async fn prepare(&mut self, _catalog: &CatalogIndex, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }

    /// 明細ごとの候補（最大5件、先頭が選択候補で以降は信頼度の降順）
    ///
    /// カタログが空でなければ各明細に少なくとも1件返す。
    async fn score_batch(&self, items: &[LineItem], catalog: &CatalogIndex) -> Vec<Vec<MatchCandidate>>;

    /// 埋め込みプロバイダの失敗で代替候補になったバッチ数（prepare で0に戻る）
    fn failed_batches(&self) -> usize {
        0
    }

    async fn score(&self, item: &LineItem, catalog: &CatalogIndex) -> Vec<MatchCandidate> {
        self.score_batch(std::slice::from_ref(item), catalog)
            .await
            .into_iter()
            .next()
            .unwrap_or_default()
    }
}

/// 設定の同義語表を読み込む
pub fn load_synonyms(config: &Config) -> Result<SynonymTable> {
    let mut table = SynonymTable::from_preset(&config.synonym_preset).ok_or_else(|| {
        BoqError::Config(format!("不明な同義語プリセット: {}", config.synonym_preset))
    })?;
    if let Some(path) = &config.synonym_file {
        table.merge(SynonymTable::from_file(path)?);
    }
    Ok(table)
}

/// 設定から照合器を組み立てる
pub fn build_matcher(config: &Config) -> Result<Box<dyn Matcher>> {
    let embedders = if config.strategy.needs_embeddings() {
        if config.providers.is_empty() {
            return Err(BoqError::Config(format!(
                "{} には providers の指定が必要です",
                config.strategy
            )));
        }
        config
            .providers
            .iter()
            .map(|kind| create_embedder(*kind, config))
            .collect::<Result<Vec<_>>>()?
    } else {
        Vec::new()
    };
    assemble_matcher(config, load_synonyms(config)?, embedders)
}

/// 埋め込みプロバイダを指定して照合器を組み立てる
///
/// # Arguments
/// * `embedders` - 先頭が primary、2件目が secondary（lexical では無視）
pub fn assemble_matcher(
    config: &Config,
    synonyms: SynonymTable,
    embedders: Vec<Arc<dyn Embedder>>,
) -> Result<Box<dyn Matcher>> {
    let lexical = LexicalMatcher::new(synonyms);
    let mut embedders = embedders.into_iter();

    let matcher: Box<dyn Matcher> = match config.strategy {
        Strategy::Lexical => Box::new(lexical),
        Strategy::Semantic => {
            let embedder = embedders
                .next()
                .ok_or_else(|| BoqError::Config("semantic には埋め込みプロバイダが必要です".into()))?;
            Box::new(SemanticMatcher::new(embedder, lexical))
        }
        Strategy::Hybrid => {
            let mut ensemble = HybridEnsemble::new(config.hybrid, config.prefilter, lexical.clone());
            if let Some(primary) = embedders.next() {
                ensemble = ensemble.with_primary(SemanticMatcher::new(primary, lexical.clone()));
            }
            if let Some(secondary) = embedders.next() {
                ensemble = ensemble.with_secondary(SemanticMatcher::new(secondary, lexical));
            }
            Box::new(ensemble)
        }
    };
    info!(strategy = %config.strategy, matcher = matcher.name(), "matcher ready");
    Ok(matcher)
}

/// 候補から明細ごとの結果を作る（明細1件につき必ず1件）
pub fn to_results(
    items: &[LineItem],
    candidates: Vec<Vec<MatchCandidate>>,
    catalog: &CatalogIndex,
    min_confidence: f64,
) -> Vec<MatchResult> {
    let mut candidates = candidates.into_iter();
    items
        .iter()
        .map(|item| {
            let best = candidates.next().and_then(|list| list.into_iter().next());
            let entry = best.as_ref().and_then(|c| catalog.get(&c.catalog_entry_id));
            MatchResult::build(item.clone(), best, entry, min_confidence)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use boq_match_common::{CatalogEntry, MatchMethod, MatchOutcome};

    #[test]
    fn test_unknown_preset_is_config_error() {
        let config = Config {
            synonym_preset: "shipbuilding".into(),
            ..Default::default()
        };
        assert!(matches!(load_synonyms(&config), Err(BoqError::Config(_))));
    }

    #[test]
    fn test_assemble_by_strategy() {
        let mut config = Config::default();
        let synonyms = || SynonymTable::from_preset("construction").unwrap();
        let hashing = || -> Arc<dyn Embedder> { Arc::new(HashingEmbedder::default()) };

        assert_eq!(assemble_matcher(&config, synonyms(), vec![]).unwrap().name(), "lexical");

        config.strategy = Strategy::Semantic;
        assert!(assemble_matcher(&config, synonyms(), vec![]).is_err());
        assert_eq!(
            assemble_matcher(&config, synonyms(), vec![hashing()]).unwrap().name(),
            "semantic"
        );

        config.strategy = Strategy::Hybrid;
        assert_eq!(
            assemble_matcher(&config, synonyms(), vec![hashing(), hashing()]).unwrap().name(),
            "hybrid"
        );
    }

    #[test]
    fn test_to_results_one_per_item() {
        let catalog = CatalogIndex::new(vec![CatalogEntry {
            id: "c1".into(),
            description: "PVC pipe".into(),
            rate: 12.5,
            unit: Some("m".into()),
            ..Default::default()
        }]);
        let items: Vec<LineItem> = (0..2)
            .map(|i| LineItem {
                id: format!("li-{}", i),
                description: "PVC pipe".into(),
                quantity: 4.0,
                ..Default::default()
            })
            .collect();
        let candidates = vec![
            vec![MatchCandidate::new("c1", 0.9, MatchMethod::Lexical)],
            vec![],
        ];

        let results = to_results(&items, candidates, &catalog, 0.4);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, MatchOutcome::Matched);
        assert_eq!(results[0].total_amount, Some(50.0));
        assert_eq!(results[1].outcome, MatchOutcome::NoCatalogAvailable);
    }
}
