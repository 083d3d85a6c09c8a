//! 照合の統合テスト
//!
//! 外部APIは使わず、HashingEmbedder とテスト用の Embedder で検証

use async_trait::async_trait;
use boq_match_common::{
    CatalogEntry, CatalogIndex, LineItem, MatchMethod, MatchOutcome, SynonymTable,
};
use boq_match_rust::config::Config;
use boq_match_rust::embedding::{EmbedMode, Embedder, HashingEmbedder};
use boq_match_rust::error::{BoqError, Result};
use boq_match_rust::job::JobContext;
use boq_match_rust::matcher::{
    assemble_matcher, to_results, HybridEnsemble, HybridWeights, LexicalMatcher, Matcher,
    PrefilterOptions, SemanticMatcher,
};
use std::sync::Arc;

fn entry(id: &str, description: &str, unit: Option<&str>, rate: f64, category: Option<&str>) -> CatalogEntry {
    CatalogEntry {
        id: id.to_string(),
        description: description.to_string(),
        rate,
        unit: unit.map(String::from),
        category: category.map(String::from),
        ..Default::default()
    }
}

fn item(description: &str, quantity: f64, unit: Option<&str>, section: Option<&str>) -> LineItem {
    LineItem {
        id: format!("li-{}", description.len()),
        description: description.to_string(),
        quantity,
        unit: unit.map(String::from),
        row_number: 5,
        sheet_name: "BOQ".to_string(),
        section_header: section.map(String::from),
        ..Default::default()
    }
}

fn synonyms() -> SynonymTable {
    SynonymTable::from_preset("construction").unwrap()
}

fn lexical() -> LexicalMatcher {
    LexicalMatcher::new(synonyms())
}

/// 文書モードは成功し、クエリモードだけ失敗する
struct QueryFailingEmbedder {
    inner: HashingEmbedder,
}

#[async_trait]
impl Embedder for QueryFailingEmbedder {
    async fn embed(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        match mode {
            EmbedMode::Document => self.inner.embed(texts, mode).await,
            EmbedMode::Query => Err(BoqError::Provider("503 service unavailable".into())),
        }
    }

    fn model_name(&self) -> &str {
        "query-failing"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn max_batch(&self) -> usize {
        16
    }
}

/// 常に失敗する
struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed(&self, _texts: &[String], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        Err(BoqError::Provider("connection refused".into()))
    }

    fn model_name(&self) -> &str {
        "down"
    }

    fn dimension(&self) -> usize {
        0
    }

    fn max_batch(&self) -> usize {
        16
    }
}

/// 施工内容の言い換えでも lexical で照合でき、金額まで出る
#[tokio::test]
async fn test_lexical_end_to_end_pvc_pipe() {
    let catalog = CatalogIndex::new(vec![
        entry("c1", "PVC pipe 100mm supply and installation", Some("m"), 12.5, None),
        entry("c2", "Ceramic floor tiles 300 x 300mm", Some("m2"), 32.0, None),
        entry("c3", "Excavate foundation trench", Some("m3"), 18.0, None),
    ]);
    let mut matcher = assemble_matcher(&Config::default(), synonyms(), vec![]).unwrap();
    matcher.prepare(&catalog, &JobContext::detached()).await.unwrap();

    let items = vec![item("Supply and install 100mm PVC pipe", 50.0, Some("m"), None)];
    let candidates = matcher.score_batch(&items, &catalog).await;
    let results = to_results(&items, candidates, &catalog, 0.4);

    let result = &results[0];
    let best = result.best_candidate.as_ref().unwrap();
    assert_eq!(best.catalog_entry_id, "c1");
    assert!(best.confidence > 0.7, "confidence {}", best.confidence);
    assert_eq!(result.matched_rate, Some(12.5));
    assert_eq!(result.total_amount, Some(625.0));
    assert_eq!(result.outcome, MatchOutcome::Matched);
}

/// 完全一致は lexical で0.9以上、semantic でコサイン0.99以上
#[tokio::test]
async fn test_exact_text_scores() {
    let catalog = CatalogIndex::new(vec![
        entry("c1", "Excavate foundation trench", Some("m3"), 18.0, None),
        entry("c2", "Ceramic floor tiles", Some("m2"), 32.0, None),
    ]);
    let query = item("Excavate foundation trench", 10.0, None, None);

    let lexical_best = lexical().score(&query, &catalog).into_iter().next().unwrap();
    assert_eq!(lexical_best.catalog_entry_id, "c1");
    assert!(lexical_best.confidence >= 0.9);

    let mut semantic = SemanticMatcher::new(Arc::new(HashingEmbedder::default()), lexical());
    semantic.prepare(&catalog, &JobContext::detached()).await.unwrap();
    let semantic_best = Matcher::score(&semantic, &query, &catalog).await.into_iter().next().unwrap();
    assert_eq!(semantic_best.catalog_entry_id, "c1");
    assert!(semantic_best.score_breakdown["cosine"] >= 0.99);
    assert!((0.0..=1.0).contains(&semantic_best.confidence));
}

/// 単位・見出し・カテゴリが片側にしかなくても、同じ説明文ならコサインは0.99以上
#[tokio::test]
async fn test_exact_text_cosine_ignores_metadata() {
    let mut c1 = entry("c1", "Excavate foundation trench", Some("m3"), 18.0, Some("Groundwork"));
    c1.subcategory = Some("Excavation".into());
    let catalog = CatalogIndex::new(vec![c1, entry("c2", "Ceramic floor tiles", Some("m2"), 32.0, None)]);
    let query = item("Excavate foundation trench", 10.0, None, Some("SUBSTRUCTURE"));

    let mut semantic = SemanticMatcher::new(Arc::new(HashingEmbedder::default()), lexical());
    semantic.prepare(&catalog, &JobContext::detached()).await.unwrap();
    let best = Matcher::score(&semantic, &query, &catalog).await.into_iter().next().unwrap();
    assert_eq!(best.catalog_entry_id, "c1");
    assert!(best.score_breakdown["cosine"] >= 0.99);
}

/// 見出しから推定したカテゴリ内の候補が、全体最良より優先される
#[tokio::test]
async fn test_category_scoped_result_wins() {
    let catalog = CatalogIndex::new(vec![
        entry("d1", "PVC pipe 110mm", Some("m"), 11.0, Some("Drainage")),
        entry("p1", "PVC pipe 100mm", Some("m"), 12.5, Some("Plumbing")),
    ]);
    let matcher = lexical();

    let drainage = matcher.score(&item("PVC pipe 100mm", 10.0, Some("m"), Some("DRAINAGE")), &catalog);
    assert_eq!(drainage[0].catalog_entry_id, "d1");

    let plumbing = matcher.score(&item("PVC pipe 100mm", 10.0, Some("m"), Some("PLUMBING")), &catalog);
    assert_eq!(plumbing[0].catalog_entry_id, "p1");
}

/// 欠けているプロバイダの重みは結果に影響しない
#[tokio::test]
async fn test_hybrid_ignores_missing_provider_weight() {
    let catalog = CatalogIndex::new(vec![
        entry("c1", "PVC pipe 100mm supply and installation", Some("m"), 12.5, None),
        entry("c2", "Concrete grade C25 in strip foundations", Some("m3"), 95.0, None),
    ]);
    let query = item("Supply and install 100mm PVC pipe", 50.0, Some("m"), None);

    let mut confidences = Vec::new();
    for secondary_weight in [0.35, 5.0] {
        let weights = HybridWeights {
            semantic_secondary: secondary_weight,
            ..HybridWeights::default()
        };
        let mut hybrid = HybridEnsemble::new(weights, PrefilterOptions::default(), lexical())
            .with_primary(SemanticMatcher::new(Arc::new(HashingEmbedder::default()), lexical()));
        hybrid.prepare(&catalog, &JobContext::detached()).await.unwrap();
        assert_eq!(hybrid.provider_count(), 1);

        let best = hybrid.score(&query, &catalog).await.into_iter().next().unwrap();
        assert_eq!(best.catalog_entry_id, "c1");
        assert!(best.score_breakdown.contains_key("semanticPrimary"));
        assert!(!best.score_breakdown.contains_key("semanticSecondary"));
        confidences.push(best.confidence);
    }
    assert!((confidences[0] - confidences[1]).abs() < 1e-12);
}

/// 事前計算に失敗したプロバイダは外され、残りの信号で照合を続ける
#[tokio::test]
async fn test_hybrid_drops_failed_provider() {
    let catalog = CatalogIndex::new(vec![entry("c1", "PVC pipe 100mm", Some("m"), 12.5, None)]);
    let mut hybrid = HybridEnsemble::new(HybridWeights::default(), PrefilterOptions::default(), lexical())
        .with_primary(SemanticMatcher::new(Arc::new(DownEmbedder), lexical()))
        .with_secondary(SemanticMatcher::new(Arc::new(HashingEmbedder::default()), lexical()));

    hybrid.prepare(&catalog, &JobContext::detached()).await.unwrap();
    assert_eq!(hybrid.provider_count(), 1);

    let best = hybrid
        .score(&item("PVC pipe 100mm", 4.0, Some("m"), None), &catalog)
        .await
        .into_iter()
        .next()
        .unwrap();
    assert_eq!(best.method, MatchMethod::Hybrid);
    assert!(best.score_breakdown.contains_key("semanticSecondary"));
}

/// クエリ埋め込みが失敗したバッチは lexical の代替候補になる
#[tokio::test]
async fn test_semantic_query_failure_falls_back() {
    let catalog = CatalogIndex::new(vec![
        entry("c1", "PVC pipe 100mm supply and installation", Some("m"), 12.5, None),
        entry("c2", "Ceramic floor tiles", Some("m2"), 32.0, None),
    ]);
    let embedder = Arc::new(QueryFailingEmbedder {
        inner: HashingEmbedder::default(),
    });
    let mut semantic = SemanticMatcher::new(embedder, lexical());
    semantic.prepare(&catalog, &JobContext::detached()).await.unwrap();

    let items = vec![item("Supply and install 100mm PVC pipe", 50.0, Some("m"), None)];
    let candidates = semantic.score_batch(&items, &catalog).await;
    let results = to_results(&items, candidates, &catalog, 0.4);

    let best = results[0].best_candidate.as_ref().unwrap();
    assert_eq!(best.method, MatchMethod::Fallback);
    assert_eq!(best.catalog_entry_id, "c1");
    assert_eq!(results[0].outcome, MatchOutcome::LowConfidenceMatched);
}

/// 全バッチが失敗するプロバイダは semantic の前処理をエラーにする
#[tokio::test]
async fn test_semantic_precompute_fails_when_provider_down() {
    let catalog = CatalogIndex::new(vec![entry("c1", "PVC pipe", Some("m"), 12.5, None)]);
    let mut semantic = SemanticMatcher::new(Arc::new(DownEmbedder), lexical());
    let err = semantic.prepare(&catalog, &JobContext::detached()).await.unwrap_err();
    assert!(matches!(err, BoqError::Provider(_)));
}

/// カタログが空なら候補なし、結果は NoCatalogAvailable
#[tokio::test]
async fn test_empty_catalog_gives_no_catalog_outcome() {
    let catalog = CatalogIndex::new(vec![]);
    let items = vec![item("PVC pipe", 3.0, None, None)];
    for strategy_matcher in [
        Box::new(lexical()) as Box<dyn Matcher>,
        Box::new(SemanticMatcher::new(Arc::new(HashingEmbedder::default()), lexical())),
    ] {
        let mut matcher = strategy_matcher;
        matcher.prepare(&catalog, &JobContext::detached()).await.unwrap();
        let results = to_results(&items, matcher.score_batch(&items, &catalog).await, &catalog, 0.4);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, MatchOutcome::NoCatalogAvailable);
        assert!(results[0].best_candidate.is_none());
    }
}
