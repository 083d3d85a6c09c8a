//! 照合データの型定義
//!
//! CLIとライブラリで共有される型:
//! - LineItem: 取り込みエンジンが抽出したBOQ明細
//! - CatalogEntry: 単価カタログの1項目
//! - MatchCandidate / MatchResult: 照合の出力

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// BOQ明細（取り込み後は不変）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// (シート名, 行番号, 内容ハッシュ) から導出した決定的ID
    pub id: String,
    pub description: String,
    pub quantity: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub rate: Option<f64>,
    /// 1始まりの行番号
    pub row_number: u32,
    pub sheet_name: String,
    /// 直近の見出し（最大3件、" > " 区切り）
    #[serde(default)]
    pub section_header: Option<String>,
    /// 説明が短い場合のみ見出しを前置した説明
    #[serde(default)]
    pub enhanced_description: Option<String>,
}

impl LineItem {
    /// 照合に使うテキスト
    pub fn matching_text(&self) -> &str {
        self.enhanced_description
            .as_deref()
            .unwrap_or(&self.description)
    }

    /// 最も近い見出し
    pub fn nearest_section(&self) -> Option<&str> {
        self.section_header
            .as_deref()
            .and_then(|chain| chain.rsplit(SECTION_SEPARATOR).next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// 見出しチェーンの区切り文字
pub const SECTION_SEPARATOR: &str = " > ";

/// 単価カタログの1項目（外部ストア所有、読み取り専用）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub description: String,
    /// 説明に単位・分類を含めた全文（ある場合は埋め込みに使用）
    #[serde(default, alias = "full_context")]
    pub full_context: Option<String>,
    pub rate: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
}

impl CatalogEntry {
    /// 照合に使うテキスト
    pub fn matching_text(&self) -> &str {
        if self.description.trim().is_empty() {
            self.full_context.as_deref().unwrap_or_default()
        } else {
            &self.description
        }
    }
}

/// 照合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Lexical,
    Semantic,
    Hybrid,
    /// 外部プロバイダ失敗時などの代替候補
    Fallback,
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchMethod::Lexical => write!(f, "lexical"),
            MatchMethod::Semantic => write!(f, "semantic"),
            MatchMethod::Hybrid => write!(f, "hybrid"),
            MatchMethod::Fallback => write!(f, "fallback"),
        }
    }
}

/// 照合候補
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub catalog_entry_id: String,
    /// [0, 1]
    pub confidence: f64,
    pub method: MatchMethod,
    /// 個別スコアの内訳
    #[serde(default)]
    pub score_breakdown: BTreeMap<String, f64>,
}

impl MatchCandidate {
    pub fn new(catalog_entry_id: impl Into<String>, confidence: f64, method: MatchMethod) -> Self {
        Self {
            catalog_entry_id: catalog_entry_id.into(),
            confidence: clamp_unit(confidence),
            method,
            score_breakdown: BTreeMap::new(),
        }
    }

    /// 内訳を追加
    pub fn with_score(mut self, name: &str, value: f64) -> Self {
        self.score_breakdown.insert(name.to_string(), value);
        self
    }
}

/// 信頼度カテゴリ
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceCategory {
    Rejected,
    Poor,
    Moderate,
    Good,
    Excellent,
}

impl ConfidenceCategory {
    pub const EXCELLENT: f64 = 0.85;
    pub const GOOD: f64 = 0.70;
    pub const MODERATE: f64 = 0.55;
    pub const POOR: f64 = 0.40;

    /// スコアを固定閾値でカテゴリ分け
    pub fn from_score(score: f64) -> Self {
        if score >= Self::EXCELLENT {
            ConfidenceCategory::Excellent
        } else if score >= Self::GOOD {
            ConfidenceCategory::Good
        } else if score >= Self::MODERATE {
            ConfidenceCategory::Moderate
        } else if score >= Self::POOR {
            ConfidenceCategory::Poor
        } else {
            ConfidenceCategory::Rejected
        }
    }
}

impl std::fmt::Display for ConfidenceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceCategory::Excellent => write!(f, "excellent"),
            ConfidenceCategory::Good => write!(f, "good"),
            ConfidenceCategory::Moderate => write!(f, "moderate"),
            ConfidenceCategory::Poor => write!(f, "poor"),
            ConfidenceCategory::Rejected => write!(f, "rejected"),
        }
    }
}

/// 照合の結末（3状態）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchOutcome {
    Matched,
    LowConfidenceMatched,
    NoCatalogAvailable,
}

impl std::fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchOutcome::Matched => write!(f, "matched"),
            MatchOutcome::LowConfidenceMatched => write!(f, "low-confidence"),
            MatchOutcome::NoCatalogAvailable => write!(f, "no-catalog"),
        }
    }
}

/// 明細1件に対する照合結果（明細ごとに必ず1件）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub line_item: LineItem,
    /// カタログが空の場合のみNone
    pub best_candidate: Option<MatchCandidate>,
    pub confidence_category: ConfidenceCategory,
    pub outcome: MatchOutcome,
    #[serde(default)]
    pub matched_description: Option<String>,
    #[serde(default)]
    pub matched_unit: Option<String>,
    #[serde(default)]
    pub matched_rate: Option<f64>,
    /// 数量 × 照合単価
    #[serde(default)]
    pub total_amount: Option<f64>,
}

impl MatchResult {
    /// 最良候補から結果を組み立てる
    ///
    /// # Arguments
    /// * `line_item` - 対象明細
    /// * `best` - 最良候補（カタログが空ならNone）
    /// * `entry` - 最良候補に対応するカタログ項目
    /// * `min_confidence` - Matched とみなす下限
    pub fn build(
        line_item: LineItem,
        best: Option<MatchCandidate>,
        entry: Option<&CatalogEntry>,
        min_confidence: f64,
    ) -> Self {
        let Some(candidate) = best else {
            return Self {
                line_item,
                best_candidate: None,
                confidence_category: ConfidenceCategory::Rejected,
                outcome: MatchOutcome::NoCatalogAvailable,
                matched_description: None,
                matched_unit: None,
                matched_rate: None,
                total_amount: None,
            };
        };

        let outcome = if candidate.method == MatchMethod::Fallback
            || candidate.confidence < min_confidence
        {
            MatchOutcome::LowConfidenceMatched
        } else {
            MatchOutcome::Matched
        };
        let matched_rate = entry.map(|e| e.rate);
        let total_amount = matched_rate.map(|rate| round_money(line_item.quantity * rate));

        Self {
            confidence_category: ConfidenceCategory::from_score(candidate.confidence),
            outcome,
            matched_description: entry.map(|e| e.description.clone()),
            matched_unit: entry.and_then(|e| e.unit.clone()),
            matched_rate,
            total_amount,
            best_candidate: Some(candidate),
            line_item,
        }
    }

    pub fn confidence(&self) -> f64 {
        self.best_candidate
            .as_ref()
            .map(|c| c.confidence)
            .unwrap_or(0.0)
    }

    pub fn is_matched(&self) -> bool {
        self.outcome == MatchOutcome::Matched
    }
}

/// [0, 1] に丸める（NaNは0）
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// 金額を小数2桁に丸める
pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
