//! カテゴリ優先検索
//!
//! 明細のカテゴリが推定できればまずカテゴリ内だけを検索し、
//! 十分な結果が無ければ全体検索と比較する。

use boq_match_common::{CatalogEntry, CatalogIndex, LineItem, MatchCandidate};
use tracing::debug;

/// カテゴリ内の結果をそのまま採用する下限
pub const CATEGORY_ACCEPT: f64 = 0.4;
/// 全体最良に対してこの比率以上ならカテゴリ内の結果を優先
pub const CATEGORY_PREFERENCE: f64 = 0.8;

/// カテゴリ内 → 全体 の順に検索する
///
/// # Arguments
/// * `item` - 対象明細
/// * `catalog` - カタログ索引
/// * `search` - 項目群を受け取り信頼度降順の候補を返す検索関数
pub fn category_first<F>(item: &LineItem, catalog: &CatalogIndex, mut search: F) -> Vec<MatchCandidate>
where
    F: FnMut(&[&CatalogEntry]) -> Vec<MatchCandidate>,
{
    let all: Vec<&CatalogEntry> = catalog.entries().iter().collect();

    let Some(category) = catalog.infer_category(item) else {
        return search(&all);
    };
    let scoped = catalog.in_category(category);
    if scoped.is_empty() || scoped.len() == all.len() {
        return search(&all);
    }

    let in_category = search(&scoped);
    let category_best = best_confidence(&in_category);
    if category_best >= CATEGORY_ACCEPT {
        debug!(item = %item.id, category, category_best, "accepted in-category match");
        return in_category;
    }

    let global = search(&all);
    let global_best = best_confidence(&global);
    if !in_category.is_empty() && category_best >= global_best * CATEGORY_PREFERENCE {
        debug!(item = %item.id, category, category_best, global_best, "preferred in-category match");
        in_category
    } else {
        global
    }
}

fn best_confidence(candidates: &[MatchCandidate]) -> f64 {
    candidates.first().map(|c| c.confidence).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use boq_match_common::MatchMethod;

    fn entry(id: &str, category: &str) -> CatalogEntry {
        CatalogEntry {
            id: id.into(),
            description: id.into(),
            rate: 1.0,
            category: Some(category.into()),
            ..Default::default()
        }
    }

    fn catalog() -> CatalogIndex {
        CatalogIndex::new(vec![
            entry("drain-1", "Drainage"),
            entry("roof-1", "Roofing"),
        ])
    }

    fn item_in(section: &str) -> LineItem {
        LineItem {
            id: "li-1".into(),
            description: "Item".into(),
            quantity: 1.0,
            sheet_name: "BOQ".into(),
            section_header: Some(section.into()),
            ..Default::default()
        }
    }

    /// 固定スコア表で検索を模擬
    fn search_with<'a>(scores: &'a [(&'a str, f64)]) -> impl FnMut(&[&CatalogEntry]) -> Vec<MatchCandidate> + 'a {
        move |entries| {
            let mut out: Vec<MatchCandidate> = entries
                .iter()
                .filter_map(|e| scores.iter().find(|(id, _)| *id == e.id))
                .map(|(id, s)| MatchCandidate::new(*id, *s, MatchMethod::Lexical))
                .collect();
            out.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            out
        }
    }

    #[test]
    fn test_accepts_confident_in_category_result() {
        let result = category_first(&item_in("DRAINAGE"), &catalog(), search_with(&[("drain-1", 0.5), ("roof-1", 0.9)]));
        assert_eq!(result[0].catalog_entry_id, "drain-1");
    }

    #[test]
    fn test_prefers_category_within_ratio_of_global() {
        let result = category_first(&item_in("DRAINAGE"), &catalog(), search_with(&[("drain-1", 0.3), ("roof-1", 0.35)]));
        assert_eq!(result[0].catalog_entry_id, "drain-1");
    }

    #[test]
    fn test_falls_back_to_global_when_category_is_weak() {
        let result = category_first(&item_in("DRAINAGE"), &catalog(), search_with(&[("drain-1", 0.1), ("roof-1", 0.6)]));
        assert_eq!(result[0].catalog_entry_id, "roof-1");
    }

    #[test]
    fn test_without_category_searches_everything() {
        let result = category_first(&item_in("GENERAL"), &catalog(), search_with(&[("drain-1", 0.2), ("roof-1", 0.6)]));
        assert_eq!(result[0].catalog_entry_id, "roof-1");
        assert_eq!(result.len(), 2);
    }
}
