//! 文字列アンサンブル照合（外部呼び出しなし）
//!
//! 6種類の部分スコアを固定重みで合成する。
//! いずれかが0.8を超えると1.1倍のボーナス（上限1.0）。

use super::category::category_first;
use super::similarity::{
    bigram_overlap, containment, fuzzy_token_score, jaccard, levenshtein_ratio, word_overlap,
};
use super::text::{Preprocessor, ProcessedText, MEASUREMENT_TOKEN, NUMBER_TOKEN};
use super::Matcher;
use crate::error::Result;
use crate::job::JobContext;
use async_trait::async_trait;
use boq_match_common::{CatalogEntry, CatalogIndex, LineItem, MatchCandidate, MatchMethod, SynonymTable};
use std::borrow::Cow;
use std::collections::HashMap;

const W_LEVENSHTEIN: f64 = 0.15;
const W_JACCARD: f64 = 0.25;
const W_CONTAINMENT: f64 = 0.15;
const W_KEY_TERMS: f64 = 0.20;
const W_EXACT_PHRASE: f64 = 0.10;
const W_FUZZY: f64 = 0.15;

const STRONG_SIGNAL: f64 = 0.8;
const STRONG_SIGNAL_BONUS: f64 = 1.1;
const FUZZY_THRESHOLD: f64 = 0.8;
const PARTIAL_TERM: f64 = 0.7;

/// 同点扱いの幅
const TIE_MARGIN: f64 = 0.05;
/// 返す候補数
pub const TOP_CANDIDATES: usize = 5;

/// 部分スコア
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LexicalScores {
    pub levenshtein: f64,
    pub jaccard: f64,
    pub containment: f64,
    pub key_terms: f64,
    pub exact_phrase: f64,
    pub fuzzy: f64,
}

impl LexicalScores {
    /// 部分スコアを計算
    ///
    /// どちらかの前処理結果に語が残らない場合は記号除去のみのトークンで比べる。
    pub fn compute(query: &ProcessedText, candidate: &ProcessedText) -> Self {
        if query.is_empty() || candidate.is_empty() {
            let (raw_query, raw_candidate) = (query.raw(), candidate.raw());
            if !raw_query.is_empty() && !raw_candidate.is_empty() {
                return Self::from_tokens(&raw_query, &raw_candidate);
            }
        }
        Self::from_tokens(query, candidate)
    }

    fn from_tokens(query: &ProcessedText, candidate: &ProcessedText) -> Self {
        Self {
            levenshtein: levenshtein_ratio(&query.joined, &candidate.joined),
            jaccard: jaccard(&query.tokens, &candidate.tokens),
            containment: containment(&query.tokens, &candidate.tokens),
            key_terms: key_term_score(query, candidate),
            exact_phrase: word_overlap(&query.tokens, &candidate.tokens) * 0.7
                + bigram_overlap(&query.tokens, &candidate.tokens) * 0.3,
            fuzzy: fuzzy_token_score(&query.tokens, &candidate.tokens, FUZZY_THRESHOLD),
        }
    }

    fn signals(&self) -> [f64; 6] {
        [
            self.levenshtein,
            self.jaccard,
            self.containment,
            self.key_terms,
            self.exact_phrase,
            self.fuzzy,
        ]
    }

    /// 重み付き合成スコア [0, 1]
    pub fn combined(&self) -> f64 {
        let weighted = self.levenshtein * W_LEVENSHTEIN
            + self.jaccard * W_JACCARD
            + self.containment * W_CONTAINMENT
            + self.key_terms * W_KEY_TERMS
            + self.exact_phrase * W_EXACT_PHRASE
            + self.fuzzy * W_FUZZY;
        let boosted = if self.signals().iter().any(|s| *s > STRONG_SIGNAL) {
            weighted * STRONG_SIGNAL_BONUS
        } else {
            weighted
        };
        boosted.clamp(0.0, 1.0)
    }

    /// 上位候補の選択用加点
    ///
    /// 句の一致・重要語・語彙重複の強さと、説明の具体性（長さ）を評価する。
    pub fn selection_bonus(&self, description_len: usize) -> f64 {
        let mut bonus = 0.0;
        if self.exact_phrase > 0.7 {
            bonus += 0.1;
        }
        if self.key_terms > 0.8 {
            bonus += 0.05;
        }
        if self.jaccard > 0.6 {
            bonus += 0.05;
        }
        if self.signals().iter().filter(|s| **s > 0.5).count() >= 3 {
            bonus += 0.1;
        }
        if description_len < 20 {
            bonus -= 0.05;
        } else if (30..=200).contains(&description_len) {
            bonus += 0.03;
        }
        bonus
    }

    fn attach(&self, candidate: MatchCandidate) -> MatchCandidate {
        candidate
            .with_score("levenshtein", self.levenshtein)
            .with_score("jaccard", self.jaccard)
            .with_score("containment", self.containment)
            .with_score("keyTerms", self.key_terms)
            .with_score("exactPhrase", self.exact_phrase)
            .with_score("fuzzy", self.fuzzy)
    }
}

/// 重要語の重み付き一致率
///
/// 寸法は3倍、規格表記は2倍、その他の語は1倍。部分一致は0.7。
pub fn key_term_score(query: &ProcessedText, candidate: &ProcessedText) -> f64 {
    let mut total = 0.0;
    let mut matched = 0.0;

    for m in &query.measurements {
        total += 3.0;
        matched += 3.0 * term_match(m, &candidate.measurements);
    }
    for s in &query.specs {
        total += 2.0;
        matched += 2.0 * term_match(s, &candidate.specs);
    }
    for token in query
        .tokens
        .iter()
        .filter(|t| t.as_str() != MEASUREMENT_TOKEN && t.as_str() != NUMBER_TOKEN)
    {
        total += 1.0;
        matched += term_match(token, &candidate.tokens);
    }

    if total == 0.0 {
        0.0
    } else {
        matched / total
    }
}

fn term_match(term: &str, pool: &[String]) -> f64 {
    if pool.iter().any(|p| p == term) {
        return 1.0;
    }
    let partial = term.len() >= 4
        && pool
            .iter()
            .any(|p| p.len() >= 4 && (p.contains(term) || term.contains(p.as_str())));
    if partial {
        PARTIAL_TERM
    } else {
        0.0
    }
}

/// 文字列アンサンブル照合器
#[derive(Debug, Clone, Default)]
pub struct LexicalMatcher {
    preprocessor: Preprocessor,
    /// カタログ項目ID → 前処理済みテキスト
    prepared: HashMap<String, ProcessedText>,
}

impl LexicalMatcher {
    pub fn new(synonyms: SynonymTable) -> Self {
        Self {
            preprocessor: Preprocessor::new(synonyms),
            prepared: HashMap::new(),
        }
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// カタログ全項目の前処理結果を作り直す
    pub fn prepare_catalog(&mut self, catalog: &CatalogIndex) {
        self.prepared = catalog
            .entries()
            .iter()
            .map(|entry| (entry.id.clone(), self.preprocessor.process(entry.matching_text())))
            .collect();
    }

    fn entry_text(&self, entry: &CatalogEntry) -> Cow<'_, ProcessedText> {
        match self.prepared.get(&entry.id) {
            Some(processed) => Cow::Borrowed(processed),
            None => Cow::Owned(self.preprocessor.process(entry.matching_text())),
        }
    }

    /// 1明細の候補（最大5件）
    ///
    /// 先頭は選択された候補。最高信頼度から0.05以内の僅差であれば、より具体的な
    /// 説明の候補が先頭に来るため、先頭だけは2件目より信頼度が低いことがある。
    /// 2件目以降は信頼度の降順。カタログが空なら空を返す。
    pub fn score(&self, item: &LineItem, catalog: &CatalogIndex) -> Vec<MatchCandidate> {
        if catalog.is_empty() {
            return Vec::new();
        }
        let query = self.preprocessor.process(item.matching_text());
        category_first(item, catalog, |entries| self.rank(&query, entries))
    }

    /// 指定項目群を採点して上位を返す（並び順は `score` と同じ）
    pub fn rank(&self, query: &ProcessedText, entries: &[&CatalogEntry]) -> Vec<MatchCandidate> {
        let mut scored: Vec<(&CatalogEntry, LexicalScores, f64)> = entries
            .iter()
            .map(|entry| {
                let scores = LexicalScores::compute(query, &self.entry_text(entry));
                let combined = scores.combined();
                (*entry, scores, combined)
            })
            .collect();
        scored.sort_by(|a, b| b.2.total_cmp(&a.2));
        scored.truncate(TOP_CANDIDATES);

        // 僅差の上位からより具体的な候補を選ぶ
        if let Some(best) = scored.first().map(|s| s.2) {
            let winner = scored
                .iter()
                .enumerate()
                .filter(|(_, s)| best - s.2 <= TIE_MARGIN)
                .map(|(idx, (entry, scores, combined))| {
                    let len = entry.matching_text().chars().count();
                    (idx, combined + scores.selection_bonus(len))
                })
                .fold(None, |acc: Option<(usize, f64)>, (idx, selection)| match acc {
                    Some((_, top)) if top >= selection => acc,
                    _ => Some((idx, selection)),
                })
                .map(|(idx, _)| idx);
            if let Some(idx) = winner.filter(|idx| *idx > 0) {
                let chosen = scored.remove(idx);
                scored.insert(0, chosen);
            }
        }

        scored
            .into_iter()
            .map(|(entry, scores, combined)| {
                scores.attach(MatchCandidate::new(entry.id.clone(), combined, MatchMethod::Lexical))
            })
            .collect()
    }
}

#[async_trait]
impl Matcher for LexicalMatcher {
    fn name(&self) -> &'static str {
        "lexical"
    }

    async fn prepare(&mut self, catalog: &CatalogIndex, _ctx: &JobContext) -> Result<()> {
        self.prepare_catalog(catalog);
        Ok(())
    }

    async fn score_batch(&self, items: &[LineItem], catalog: &CatalogIndex) -> Vec<Vec<MatchCandidate>> {
        items.iter().map(|item| self.score(item, catalog)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, description: &str, category: Option<&str>) -> CatalogEntry {
        CatalogEntry {
            id: id.into(),
            description: description.into(),
            rate: 10.0,
            category: category.map(String::from),
            ..Default::default()
        }
    }

    fn item(description: &str) -> LineItem {
        LineItem {
            id: "li-1".into(),
            description: description.into(),
            quantity: 1.0,
            sheet_name: "BOQ".into(),
            row_number: 2,
            ..Default::default()
        }
    }

    fn matcher() -> LexicalMatcher {
        LexicalMatcher::new(SynonymTable::from_preset("construction").unwrap())
    }

    #[test]
    fn test_exact_text_scores_high() {
        let catalog = CatalogIndex::new(vec![
            entry("c1", "Excavate foundation trench not exceeding 2m deep", None),
            entry("c2", "Ceramic floor tiles 300 x 300mm", None),
        ]);
        let candidates = matcher().score(&item("Excavate foundation trench not exceeding 2m deep"), &catalog);
        assert_eq!(candidates[0].catalog_entry_id, "c1");
        assert!(candidates[0].confidence >= 0.9);
        assert_eq!(candidates[0].method, MatchMethod::Lexical);
    }

    #[test]
    fn test_scores_are_clamped_and_sorted() {
        let catalog = CatalogIndex::new(
            (0..8)
                .map(|i| entry(&format!("c{}", i), &format!("Painting walls coat {}", i), None))
                .collect(),
        );
        let candidates = matcher().score(&item("Painting walls two coats emulsion"), &catalog);
        assert_eq!(candidates.len(), TOP_CANDIDATES);
        for candidate in &candidates {
            assert!((0.0..=1.0).contains(&candidate.confidence));
        }
        assert!(candidates[1..]
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence));
        let best = candidates.iter().map(|c| c.confidence).fold(0.0, f64::max);
        assert!(best - candidates[0].confidence <= TIE_MARGIN);
    }

    #[test]
    fn test_exact_short_description_scores_high() {
        for text in ["A/C", "Do it"] {
            let catalog = CatalogIndex::new(vec![
                entry("c1", text, None),
                entry("c2", "Ceramic floor tiles 300 x 300mm", None),
            ]);
            let candidates = matcher().score(&item(text), &catalog);
            assert_eq!(candidates[0].catalog_entry_id, "c1");
            assert!(candidates[0].confidence >= 0.9, "{}: {}", text, candidates[0].confidence);
        }
    }

    #[test]
    fn test_empty_catalog_returns_nothing() {
        let catalog = CatalogIndex::new(Vec::new());
        assert!(matcher().score(&item("Anything"), &catalog).is_empty());
    }

    #[test]
    fn test_key_term_score_weights_measurements() {
        let pre = Preprocessor::new(SynonymTable::default());
        let query = pre.process("PVC pipe 100mm");
        let same = pre.process("PVC pipe 100mm");
        let other_size = pre.process("PVC pipe 150mm");
        assert_eq!(key_term_score(&query, &same), 1.0);
        // 寸法(3)が外れて 語(2)のみ一致
        assert!((key_term_score(&query, &other_size) - 2.0 / 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_strong_signal_bonus() {
        let scores = LexicalScores {
            jaccard: 0.9,
            ..Default::default()
        };
        assert!((scores.combined() - 0.9 * 0.25 * 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_selection_prefers_specific_descriptions() {
        let scores = LexicalScores::default();
        assert!(scores.selection_bonus(80) > scores.selection_bonus(10));
    }

    #[test]
    fn test_breakdown_is_recorded() {
        let catalog = CatalogIndex::new(vec![entry("c1", "Gully grating", None)]);
        let candidates = matcher().score(&item("Gully grating"), &catalog);
        let breakdown = &candidates[0].score_breakdown;
        assert_eq!(breakdown.len(), 6);
        assert_eq!(breakdown["jaccard"], 1.0);
    }
}
